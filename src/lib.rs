// Tamaputer: persistence, input and rendering shell around an external
// 4-bit virtual-pet emulator core. The core itself is reached only through
// the traits in `core`; this crate owns everything around it: the ROM codec,
// the state store, the key/session controller and the display compositor.

#[macro_use]
mod common;
mod constants;

pub mod audio;
pub mod core;
pub mod display;
pub mod input;
pub mod rom;
pub mod state;

use crate::constants::timing;

use audio::Beeper;
use display::{
    DisplayCompositor,
    Overlay
};
use input::{
    InputController,
    SessionEvent
};

pub use crate::core::{
    Button,
    Clock,
    EmulatorCore,
    Hal,
    LogLevel
};
pub use audio::BeeperHandler;
pub use display::{
    FRAME_BUFFER_SIZE,
    FRAME_HEIGHT,
    FRAME_WIDTH
};
pub use input::{
    Keys,
    SessionMode
};
pub use rom::{
    RomError,
    RomFormat,
    WordRom
};
pub use state::{
    BlockStorage,
    CpuState,
    FileStorage,
    InterruptSlot,
    StateStore,
    StoreError,
    STATE_LEN
};

// Number of frame ticks per second the frontend should aim for.
pub const FRAMERATE: u32 = timing::FRAMERATE;

pub struct Tamaputer {
    core:       Box<dyn EmulatorCore>,

    input:      InputController,
    display:    DisplayCompositor,
    store:      StateStore,
    beeper:     Beeper,
    clock:      Clock,

    halted:     bool,
}

impl Tamaputer {
    pub fn new(core: Box<dyn EmulatorCore>, storage: Box<dyn BlockStorage>) -> Self {
        Tamaputer {
            core,

            input:      InputController::new(),
            display:    DisplayCompositor::new(),
            store:      StateStore::new(storage),
            beeper:     Beeper::new(),
            clock:      Clock::new(),

            halted:     false,
        }
    }

    // Restore the previous session, if one was persisted. A missing blob is
    // the normal fresh-session path; other failures leave the session
    // running unsaved.
    pub fn load_saved_state(&mut self) {
        match self.store.load(self.core.as_mut()) {
            Ok(()) => log::info!("previous session restored"),
            Err(StoreError::NotFound) => log::info!("no saved state, starting fresh"),
            Err(e) => log::warn!("couldn't restore state: {}", e),
        }
    }

    // Set a raw key line level from the frontend.
    pub fn set_key(&mut self, key: Keys, level: bool) {
        self.input.set_line(key, level);
    }

    pub fn mode(&self) -> SessionMode {
        self.input.mode()
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    // One driving-loop tick: call at FRAMERATE. Renders into `frame`,
    // which must be FRAME_BUFFER_SIZE bytes.
    pub fn frame(&mut self, frame: &mut [u8]) {
        self.tick();
        self.display.render();
        self.display.copy_to(frame);
    }

    fn tick(&mut self) {
        if self.halted {
            // Terminal: the core's halt contract has no resume.
            self.display.set_overlay(Overlay::Halt);
            return;
        }

        let event = self.input.tick();
        self.dispatch(event);

        if self.input.mode() == SessionMode::Running {
            // Levels go to the core exactly once per tick, before stepping.
            self.forward_buttons();
            self.step_core();
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::None => {},
            SessionEvent::SaveRequested => {
                let notice = match self.store.save(self.core.as_ref()) {
                    Ok(()) => {
                        log::info!("state saved");
                        "SAVED"
                    },
                    Err(e) => {
                        log::warn!("save failed: {}", e);
                        "SAVE FAILED"
                    },
                };
                self.input.save_done();
                self.display.notice(notice);
            },
            SessionEvent::Paused => {
                self.display.set_overlay(Overlay::Pause { volume: self.input.volume() });
            },
            SessionEvent::Resumed => {
                self.display.set_overlay(Overlay::None);
                self.display.force_redraw();
            },
            SessionEvent::HelpOpened => {
                self.display.set_overlay(Overlay::Help);
            },
            SessionEvent::HelpClosed => {
                self.display.set_overlay(Overlay::Pause { volume: self.input.volume() });
            },
            SessionEvent::VolumeChanged(volume) => {
                self.beeper.set_volume(volume);
                self.display.set_overlay(Overlay::Pause { volume });
            },
        }
    }

    fn forward_buttons(&mut self) {
        self.core.set_button(Button::Left, self.input.pressed(Keys::LEFT));
        self.core.set_button(Button::Middle, self.input.pressed(Keys::MIDDLE));
        self.core.set_button(Button::Right, self.input.pressed(Keys::RIGHT));
    }

    fn step_core(&mut self) {
        let mut hal = HalAdapter {
            display:    &mut self.display,
            beeper:     &mut self.beeper,
            clock:      &self.clock,
            halted:     &mut self.halted,
        };

        for _ in 0..timing::STEPS_PER_FRAME {
            self.core.step(&mut hal);
            if *hal.halted {
                break;
            }
        }
    }

    // Hand out the audio-thread half of the beeper. Call at most once.
    pub fn enable_audio(&mut self, sample_rate: f64) -> BeeperHandler {
        let rx = self.beeper.take_rx().expect("audio already enabled");
        BeeperHandler::new(rx, sample_rate)
    }
}

// Routes core callbacks to the components for the duration of a step burst.
struct HalAdapter<'a> {
    display:    &'a mut DisplayCompositor,
    beeper:     &'a mut Beeper,
    clock:      &'a Clock,
    halted:     &'a mut bool,
}

impl<'a> Hal for HalAdapter<'a> {
    fn set_lcd_matrix(&mut self, x: u8, y: u8, val: bool) {
        self.display.set_pixel(x, y, val);
    }

    fn set_lcd_icon(&mut self, icon: u8, val: bool) {
        self.display.set_icon(icon, val);
    }

    fn set_frequency(&mut self, freq: u32) {
        self.beeper.set_frequency(freq);
    }

    fn play_frequency(&mut self, en: bool) {
        self.beeper.enable(en);
    }

    fn halt(&mut self) {
        *self.halted = true;
    }

    fn get_timestamp(&mut self) -> u32 {
        self.clock.timestamp()
    }

    fn sleep_until(&mut self, ts: u32) {
        self.clock.sleep_until(ts);
    }

    fn is_log_enabled(&self, level: LogLevel) -> bool {
        log::log_enabled!(target: "core", level.to_level())
    }

    fn log(&self, level: LogLevel, msg: &str) {
        log::log!(target: "core", level.to_level(), "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct MemStorage {
        blob:   Option<Vec<u8>>,
        saves:  Rc<Cell<usize>>,
    }

    impl MemStorage {
        fn counting(saves: Rc<Cell<usize>>) -> Self {
            MemStorage { blob: None, saves }
        }
    }

    impl BlockStorage for MemStorage {
        fn read(&mut self) -> Result<Vec<u8>, StoreError> {
            self.blob.clone().ok_or(StoreError::NotFound)
        }

        fn replace(&mut self, data: &[u8]) -> Result<(), StoreError> {
            self.blob = Some(data.to_vec());
            self.saves.set(self.saves.get() + 1);
            Ok(())
        }
    }

    // Scripted core: counts steps, draws one pixel per step, optionally
    // halts after a step budget.
    struct ScriptedCore {
        steps:      Rc<Cell<usize>>,
        halt_after: Option<usize>,
        buttons:    Rc<Cell<[bool; 3]>>,
    }

    impl ScriptedCore {
        fn new(steps: Rc<Cell<usize>>) -> Self {
            ScriptedCore { steps, halt_after: None, buttons: Rc::new(Cell::new([false; 3])) }
        }
    }

    impl EmulatorCore for ScriptedCore {
        fn step(&mut self, hal: &mut dyn Hal) {
            let n = self.steps.get() + 1;
            self.steps.set(n);
            hal.set_lcd_matrix((n % 32) as u8, (n % 16) as u8, true);

            if let Some(budget) = self.halt_after {
                if n >= budget {
                    hal.halt();
                }
            }
        }

        fn set_button(&mut self, button: Button, pressed: bool) {
            let mut levels = self.buttons.get();
            levels[button as usize] = pressed;
            self.buttons.set(levels);
        }

        fn state(&self) -> CpuState {
            CpuState::new()
        }

        fn load_state(&mut self, _: &CpuState) {}
        fn refresh_hw(&mut self) {}
    }

    fn device_with(core: ScriptedCore, saves: Rc<Cell<usize>>) -> Tamaputer {
        Tamaputer::new(Box::new(core), Box::new(MemStorage::counting(saves)))
    }

    #[test]
    fn running_ticks_step_the_core() {
        let steps = Rc::new(Cell::new(0));
        let mut device = device_with(ScriptedCore::new(steps.clone()), Rc::new(Cell::new(0)));

        let mut frame = vec![0; FRAME_BUFFER_SIZE];
        device.frame(&mut frame);
        assert_eq!(steps.get(), constants::timing::STEPS_PER_FRAME);
    }

    #[test]
    fn held_save_key_saves_once() {
        let steps = Rc::new(Cell::new(0));
        let saves = Rc::new(Cell::new(0));
        let mut device = device_with(ScriptedCore::new(steps), saves.clone());

        let mut frame = vec![0; FRAME_BUFFER_SIZE];
        device.set_key(Keys::SAVE, true);
        for _ in 0..10 {
            device.frame(&mut frame);
        }
        assert_eq!(saves.get(), 1);
        assert_eq!(device.mode(), SessionMode::Running);
    }

    #[test]
    fn pause_suspends_core_stepping() {
        let steps = Rc::new(Cell::new(0));
        let mut device = device_with(ScriptedCore::new(steps.clone()), Rc::new(Cell::new(0)));

        let mut frame = vec![0; FRAME_BUFFER_SIZE];
        device.set_key(Keys::PAUSE, true);
        device.frame(&mut frame);
        device.set_key(Keys::PAUSE, false);
        assert_eq!(device.mode(), SessionMode::Paused);

        let paused_at = steps.get();
        for _ in 0..5 {
            device.frame(&mut frame);
        }
        assert_eq!(steps.get(), paused_at);

        // Any gameplay key resumes.
        device.set_key(Keys::MIDDLE, true);
        device.frame(&mut frame);
        assert_eq!(device.mode(), SessionMode::Running);
        device.frame(&mut frame);
        assert!(steps.get() > paused_at);
    }

    #[test]
    fn core_halt_is_terminal() {
        let steps = Rc::new(Cell::new(0));
        let mut core = ScriptedCore::new(steps.clone());
        core.halt_after = Some(1);
        let mut device = device_with(core, Rc::new(Cell::new(0)));

        let mut frame = vec![0; FRAME_BUFFER_SIZE];
        device.frame(&mut frame);
        assert!(device.halted());
        assert_eq!(steps.get(), 1);

        // No further stepping, key presses included.
        device.set_key(Keys::MIDDLE, true);
        device.frame(&mut frame);
        device.frame(&mut frame);
        assert_eq!(steps.get(), 1);
    }

    #[test]
    fn button_levels_reach_the_core_every_tick() {
        let core = ScriptedCore::new(Rc::new(Cell::new(0)));
        let levels = core.buttons.clone();
        let mut device = device_with(core, Rc::new(Cell::new(0)));

        let mut frame = vec![0; FRAME_BUFFER_SIZE];
        device.set_key(Keys::LEFT, true);
        device.set_key(Keys::RIGHT, true);
        device.frame(&mut frame);
        assert_eq!(levels.get(), [true, false, true]);

        device.set_key(Keys::RIGHT, false);
        device.frame(&mut frame);
        assert_eq!(levels.get(), [true, false, false]);
    }
}
