// The boundary with the external 4-bit emulator core.
// The core's original callback table is a fixed function-pointer struct;
// here it is the Hal trait, injected into every step call.

use std::time::{
    Duration,
    Instant
};

use crate::constants::timing;
use crate::state::CpuState;

// Gameplay buttons. The core polls levels, not edges.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Button {
    Left,
    Middle,
    Right
}

// Log channels used by the core.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum LogLevel {
    Error,
    Info,
    Memory,
    Cpu,
    Int
}

impl LogLevel {
    pub fn to_level(self) -> log::Level {
        match self {
            LogLevel::Error                 => log::Level::Error,
            LogLevel::Info                  => log::Level::Info,
            LogLevel::Int                   => log::Level::Debug,
            LogLevel::Memory | LogLevel::Cpu => log::Level::Trace,
        }
    }
}

// Callback surface this layer provides to the core.
pub trait Hal {
    fn set_lcd_matrix(&mut self, x: u8, y: u8, val: bool);
    fn set_lcd_icon(&mut self, icon: u8, val: bool);

    fn set_frequency(&mut self, freq: u32);
    fn play_frequency(&mut self, en: bool);

    // Unrecoverable core fault. No resume.
    fn halt(&mut self);

    // Timestamps are in timing::TS_FREQ units and never decrease.
    fn get_timestamp(&mut self) -> u32;
    fn sleep_until(&mut self, ts: u32);

    fn is_log_enabled(&self, level: LogLevel) -> bool;
    fn log(&self, level: LogLevel, msg: &str);
}

// The external emulator core. Instruction decode and register/timer
// semantics live behind this trait and are out of scope here.
pub trait EmulatorCore {
    fn step(&mut self, hal: &mut dyn Hal);

    fn set_button(&mut self, button: Button, pressed: bool);

    // State accessor pair used by the state store.
    fn state(&self) -> CpuState;
    fn load_state(&mut self, state: &CpuState);

    // Recompute hardware-visible state (timers, interrupts) from the
    // memory image. Called after a state load.
    fn refresh_hw(&mut self);
}

// Monotonic timestamp source at TS_FREQ.
pub struct Clock {
    origin: Instant
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            origin: Instant::now()
        }
    }

    pub fn timestamp(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }

    pub fn sleep_until(&self, ts: u32) {
        let ahead = ts.wrapping_sub(self.timestamp());
        // Anything further out than a second is a wrapped (past) timestamp.
        if ahead != 0 && ahead < timing::TS_FREQ {
            std::thread::sleep(Duration::from_micros(ahead as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_never_decrease() {
        let clock = Clock::new();
        let mut last = clock.timestamp();
        for _ in 0..1000 {
            let now = clock.timestamp();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn sleep_until_past_timestamp_returns() {
        let clock = Clock::new();
        // A timestamp already behind us must not block.
        clock.sleep_until(clock.timestamp().wrapping_sub(500));
    }
}
