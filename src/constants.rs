// Various constants

// LCD panel geometry.
pub mod lcd {
    pub const WIDTH: usize  = 32;
    pub const HEIGHT: usize = 16;

    pub const ICON_COUNT: usize = 8;
}

// Driving-loop timing.
pub mod timing {
    // Canonical timestamp base. The core is initialised with this frequency
    // and get_timestamp / sleep_until must agree with it.
    pub const TS_FREQ: u32 = 1_000_000;

    // Screen refresh cadence.
    pub const FRAMERATE: u32 = 10;

    // Core step calls per frame tick.
    pub const STEPS_PER_FRAME: usize = 1024;
}

// Core state geometry.
pub mod mem {
    // 4-bit memory words in the core's address space.
    pub const MEMORY_NIBBLES: usize = 0x1000;

    pub const INT_SLOT_COUNT: usize = 6;
}
