// Persisted core state.
// The wire layout is a fixed field sequence, little-endian, with no padding:
// the order and widths below are the whole contract between save and load.

use std::{
    fs,
    io::{
        self,
        Write
    },
    path::PathBuf
};

use thiserror::Error;

use crate::constants::mem::{
    INT_SLOT_COUNT,
    MEMORY_NIBBLES
};
use crate::core::EmulatorCore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage medium unavailable: {0}")]
    StorageUnavailable(#[source] io::Error),
    #[error("no persisted state")]
    NotFound,
    #[error("couldn't write state: {0}")]
    WriteFailure(#[source] io::Error),
    #[error("persisted state is corrupt")]
    CorruptState,
}

// One interrupt slot of the core.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct InterruptSlot {
    pub factor_flag:    u8,     // 4-bit
    pub mask:           u8,     // 4-bit
    pub triggered:      bool,
    pub vector:         u8,
}

// Mirror of the core's live state, in wire order.
#[derive(Clone, PartialEq, Debug)]
pub struct CpuState {
    pub pc:     u16,    // 13-bit
    pub x:      u16,    // 12-bit
    pub y:      u16,    // 12-bit
    pub a:      u8,     // 4-bit
    pub b:      u8,     // 4-bit
    pub np:     u8,     // 5-bit
    pub sp:     u8,
    pub flags:  u8,     // 4-bit

    pub tick_counter:               u32,
    pub clk_timer_2hz_timestamp:    u32,
    pub clk_timer_4hz_timestamp:    u32,
    pub clk_timer_8hz_timestamp:    u32,
    pub clk_timer_16hz_timestamp:   u32,
    pub clk_timer_32hz_timestamp:   u32,
    pub clk_timer_64hz_timestamp:   u32,
    pub clk_timer_128hz_timestamp:  u32,
    pub prog_timer_timestamp:       u32,

    pub prog_timer_enabled: bool,
    pub prog_timer_data:    u8,
    pub prog_timer_rld:     u8,

    pub call_depth: u32,

    pub interrupts: [InterruptSlot; INT_SLOT_COUNT],

    pub cpu_halted: bool,

    // One 4-bit word per entry; packed two per byte on the wire.
    pub memory: Box<[u8]>,
}

impl CpuState {
    pub fn new() -> Self {
        CpuState {
            pc:     0,
            x:      0,
            y:      0,
            a:      0,
            b:      0,
            np:     0,
            sp:     0,
            flags:  0,

            tick_counter:               0,
            clk_timer_2hz_timestamp:    0,
            clk_timer_4hz_timestamp:    0,
            clk_timer_8hz_timestamp:    0,
            clk_timer_16hz_timestamp:   0,
            clk_timer_32hz_timestamp:   0,
            clk_timer_64hz_timestamp:   0,
            clk_timer_128hz_timestamp:  0,
            prog_timer_timestamp:       0,

            prog_timer_enabled: false,
            prog_timer_data:    0,
            prog_timer_rld:     0,

            call_depth: 0,

            interrupts: [InterruptSlot::default(); INT_SLOT_COUNT],

            cpu_halted: false,

            memory: vec![0; MEMORY_NIBBLES].into_boxed_slice(),
        }
    }
}

impl Default for CpuState {
    fn default() -> Self {
        CpuState::new()
    }
}

// Byte length of the serialized blob, from the field table above.
pub const STATE_LEN: usize =
    2 + 2 + 2 + 1 + 1 + 1 + 1 + 1   // pc, x, y, a, b, np, sp, flags
    + (4 * 9)                       // tick counter + timer timestamps
    + 3                             // prog timer enable / data / reload
    + 4                             // call depth
    + (4 * INT_SLOT_COUNT)          // interrupt slots
    + 1                             // cpu halted
    + MEMORY_NIBBLES / 2;           // memory image, two nibbles per byte

// Values are masked to their declared widths here, so any state that made it
// into the core round-trips bit-for-bit.
pub fn serialize(state: &CpuState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATE_LEN);

    buf.extend_from_slice(&(state.pc & 0x1FFF).to_le_bytes());
    buf.extend_from_slice(&(state.x & 0xFFF).to_le_bytes());
    buf.extend_from_slice(&(state.y & 0xFFF).to_le_bytes());
    buf.push(lo_nibble!(state.a));
    buf.push(lo_nibble!(state.b));
    buf.push(state.np & 0x1F);
    buf.push(state.sp);
    buf.push(lo_nibble!(state.flags));

    for timer in &[
        state.tick_counter,
        state.clk_timer_2hz_timestamp,
        state.clk_timer_4hz_timestamp,
        state.clk_timer_8hz_timestamp,
        state.clk_timer_16hz_timestamp,
        state.clk_timer_32hz_timestamp,
        state.clk_timer_64hz_timestamp,
        state.clk_timer_128hz_timestamp,
        state.prog_timer_timestamp,
    ] {
        buf.extend_from_slice(&timer.to_le_bytes());
    }

    buf.push(state.prog_timer_enabled as u8);
    buf.push(state.prog_timer_data);
    buf.push(state.prog_timer_rld);

    buf.extend_from_slice(&state.call_depth.to_le_bytes());

    for slot in &state.interrupts {
        buf.push(lo_nibble!(slot.factor_flag));
        buf.push(lo_nibble!(slot.mask));
        buf.push(slot.triggered as u8);
        buf.push(slot.vector);
    }

    buf.push(state.cpu_halted as u8);

    for pair in state.memory.chunks_exact(2) {
        buf.push((lo_nibble!(pair[0]) << 4) | lo_nibble!(pair[1]));
    }

    debug_assert_eq!(buf.len(), STATE_LEN);
    buf
}

pub fn deserialize(bytes: &[u8]) -> Result<CpuState, StoreError> {
    if bytes.len() != STATE_LEN {
        return Err(StoreError::CorruptState);
    }

    let mut r = Reader { buf: bytes, pos: 0 };
    let mut state = CpuState::new();

    state.pc    = r.u16();
    state.x     = r.u16();
    state.y     = r.u16();
    state.a     = r.u8();
    state.b     = r.u8();
    state.np    = r.u8();
    state.sp    = r.u8();
    state.flags = r.u8();

    state.tick_counter              = r.u32();
    state.clk_timer_2hz_timestamp   = r.u32();
    state.clk_timer_4hz_timestamp   = r.u32();
    state.clk_timer_8hz_timestamp   = r.u32();
    state.clk_timer_16hz_timestamp  = r.u32();
    state.clk_timer_32hz_timestamp  = r.u32();
    state.clk_timer_64hz_timestamp  = r.u32();
    state.clk_timer_128hz_timestamp = r.u32();
    state.prog_timer_timestamp      = r.u32();

    state.prog_timer_enabled = r.u8() != 0;
    state.prog_timer_data    = r.u8();
    state.prog_timer_rld     = r.u8();

    state.call_depth = r.u32();

    for slot in state.interrupts.iter_mut() {
        slot.factor_flag = r.u8();
        slot.mask        = r.u8();
        slot.triggered   = r.u8() != 0;
        slot.vector      = r.u8();
    }

    state.cpu_halted = r.u8() != 0;

    for i in 0..MEMORY_NIBBLES / 2 {
        let byte = r.u8();
        state.memory[i * 2]     = hi_nibble!(byte);
        state.memory[i * 2 + 1] = lo_nibble!(byte);
    }

    Ok(state)
}

// Cursor over a length-validated blob.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let val = self.buf[self.pos];
        self.pos += 1;
        val
    }

    fn u16(&mut self) -> u16 {
        let val = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        val
    }

    fn u32(&mut self) -> u32 {
        let val = u32::from_le_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        val
    }
}

// Durable home for the serialized blob.
// The medium is owned only for the duration of a read or replace call.
pub trait BlockStorage {
    fn read(&mut self) -> Result<Vec<u8>, StoreError>;

    // Replace any existing blob wholesale: delete, then write fresh bytes.
    // Old and new bytes are never mixed.
    fn replace(&mut self, data: &[u8]) -> Result<(), StoreError>;
}

pub struct FileStorage {
    path: PathBuf
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileStorage {
            path: path.into()
        }
    }
}

impl BlockStorage for FileStorage {
    fn read(&mut self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::StorageUnavailable(e)),
        }
    }

    fn replace(&mut self, data: &[u8]) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(StoreError::StorageUnavailable(e)),
        }

        let mut file = fs::File::create(&self.path).map_err(StoreError::StorageUnavailable)?;
        file.write_all(data).map_err(StoreError::WriteFailure)?;
        file.sync_all().map_err(StoreError::WriteFailure)
    }
}

// Saves and restores the core's state through its accessor pair.
pub struct StateStore {
    storage: Box<dyn BlockStorage>
}

impl StateStore {
    pub fn new(storage: Box<dyn BlockStorage>) -> Self {
        StateStore {
            storage
        }
    }

    pub fn save(&mut self, core: &dyn EmulatorCore) -> Result<(), StoreError> {
        let blob = serialize(&core.state());
        self.storage.replace(&blob)
    }

    // On success the core's hardware state is refreshed from the freshly
    // loaded memory image. On any error the live core is left untouched.
    pub fn load(&mut self, core: &mut dyn EmulatorCore) -> Result<(), StoreError> {
        let bytes = self.storage.read()?;
        let state = deserialize(&bytes)?;

        core.load_state(&state);
        core.refresh_hw();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Button, Hal};

    // In-memory storage double.
    struct MemStorage {
        blob: Option<Vec<u8>>
    }

    impl BlockStorage for MemStorage {
        fn read(&mut self) -> Result<Vec<u8>, StoreError> {
            self.blob.clone().ok_or(StoreError::NotFound)
        }

        fn replace(&mut self, data: &[u8]) -> Result<(), StoreError> {
            self.blob = Some(data.to_vec());
            Ok(())
        }
    }

    struct FakeCore {
        state:      CpuState,
        loaded:     bool,
        refreshed:  bool,
    }

    impl FakeCore {
        fn with_state(state: CpuState) -> Self {
            FakeCore { state, loaded: false, refreshed: false }
        }
    }

    impl EmulatorCore for FakeCore {
        fn step(&mut self, _: &mut dyn Hal) {}
        fn set_button(&mut self, _: Button, _: bool) {}

        fn state(&self) -> CpuState {
            self.state.clone()
        }

        fn load_state(&mut self, state: &CpuState) {
            self.state = state.clone();
            self.loaded = true;
        }

        fn refresh_hw(&mut self) {
            self.refreshed = true;
        }
    }

    fn distinctive_state() -> CpuState {
        let mut state = CpuState::new();
        state.pc    = 0x1A5F;
        state.x     = 0xBEE;
        state.y     = 0x123;
        state.a     = 0x7;
        state.b     = 0xE;
        state.np    = 0x15;
        state.sp    = 0xC4;
        state.flags = 0x9;

        state.tick_counter              = 0xDEAD_BEEF;
        state.clk_timer_2hz_timestamp   = 1;
        state.clk_timer_4hz_timestamp   = 2;
        state.clk_timer_8hz_timestamp   = 3;
        state.clk_timer_16hz_timestamp  = 4;
        state.clk_timer_32hz_timestamp  = 5;
        state.clk_timer_64hz_timestamp  = 6;
        state.clk_timer_128hz_timestamp = 7;
        state.prog_timer_timestamp      = 0x0102_0304;

        state.prog_timer_enabled = true;
        state.prog_timer_data    = 0x42;
        state.prog_timer_rld     = 0x99;

        state.call_depth = 11;

        for (i, slot) in state.interrupts.iter_mut().enumerate() {
            slot.factor_flag = (i as u8) & 0xF;
            slot.mask        = (0xF - i as u8) & 0xF;
            slot.triggered   = i % 2 == 0;
            slot.vector      = 0x0C + (i as u8) * 2;
        }

        state.cpu_halted = false;

        for (i, nibble) in state.memory.iter_mut().enumerate() {
            *nibble = (i % 13) as u8 & 0xF;
        }
        state
    }

    #[test]
    fn blob_length_is_fixed() {
        assert_eq!(serialize(&CpuState::new()).len(), STATE_LEN);
        assert_eq!(serialize(&distinctive_state()).len(), STATE_LEN);
    }

    #[test]
    fn state_round_trips_exactly() {
        let state = distinctive_state();
        let back = deserialize(&serialize(&state)).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn save_then_load_restores_every_field() {
        let mut store = StateStore::new(Box::new(MemStorage { blob: None }));

        let saved = FakeCore::with_state(distinctive_state());
        store.save(&saved).unwrap();

        let mut restored = FakeCore::with_state(CpuState::new());
        store.load(&mut restored).unwrap();

        assert_eq!(restored.state, saved.state);
        assert!(restored.loaded);
        assert!(restored.refreshed);
    }

    #[test]
    fn load_without_blob_is_not_found_and_touches_nothing() {
        let mut store = StateStore::new(Box::new(MemStorage { blob: None }));
        let mut core = FakeCore::with_state(distinctive_state());
        let before = core.state.clone();

        match store.load(&mut core) {
            Err(StoreError::NotFound) => {},
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
        assert_eq!(core.state, before);
        assert!(!core.loaded);
        assert!(!core.refreshed);
    }

    #[test]
    fn short_blob_is_corrupt_and_touches_nothing() {
        let mut storage = MemStorage { blob: None };
        storage.replace(&serialize(&distinctive_state())[..STATE_LEN - 1]).unwrap();
        let mut store = StateStore::new(Box::new(storage));

        let mut core = FakeCore::with_state(CpuState::new());
        match store.load(&mut core) {
            Err(StoreError::CorruptState) => {},
            other => panic!("expected CorruptState, got {:?}", other.map(|_| ())),
        }
        assert!(!core.loaded);
    }

    #[test]
    fn file_storage_round_trips_and_replaces() {
        let path = std::env::temp_dir().join("tamaputer_state_test.bin");
        let _ = fs::remove_file(&path);

        let mut storage = FileStorage::new(&path);
        match storage.read() {
            Err(StoreError::NotFound) => {},
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }

        storage.replace(&[1, 2, 3]).unwrap();
        storage.replace(&[9, 9]).unwrap();
        assert_eq!(storage.read().unwrap(), vec![9, 9]);

        let _ = fs::remove_file(&path);
    }
}
