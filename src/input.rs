// Key sampling and the session state machine.
// Raw line levels come in from the frontend at any time; they are sampled
// exactly once per tick, so edges are always derived from two consecutive
// tick samples and never from sub-tick polling.

use bitflags::bitflags;

bitflags! {
    // Physical key lines.
    #[derive(Default)]
    pub struct Keys: u8 {
        const LEFT   = bit!(0);
        const MIDDLE = bit!(1);
        const RIGHT  = bit!(2);
        const SAVE   = bit!(3);
        const PAUSE  = bit!(4);
        const HELP   = bit!(5);
    }
}

const VOLUME_STEP: u8 = 10;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SessionMode {
    Running,
    Paused,
    HelpOverlay,
    SaveInProgress
}

// What this tick asks of the device. At most one event per tick.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SessionEvent {
    None,
    SaveRequested,
    Paused,
    Resumed,
    HelpOpened,
    HelpClosed,
    VolumeChanged(u8),
}

pub struct InputController {
    lines:      Keys,   // live levels, set by the frontend
    sampled:    Keys,   // this tick's sample
    prev:       Keys,   // previous tick's sample

    mode:       SessionMode,
    volume:     u8,
}

impl InputController {
    pub fn new() -> Self {
        InputController {
            lines:      Keys::default(),
            sampled:    Keys::default(),
            prev:       Keys::default(),

            mode:       SessionMode::Running,
            volume:     100,
        }
    }

    // Set a raw line level from the frontend.
    pub fn set_line(&mut self, key: Keys, level: bool) {
        self.lines.set(key, level);
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    // Level of a line as of this tick's sample. The core wants levels,
    // not edges.
    pub fn pressed(&self, key: Keys) -> bool {
        self.sampled.contains(key)
    }

    fn rising(&self, key: Keys) -> bool {
        self.sampled.contains(key) && !self.prev.contains(key)
    }

    fn any_rising(&self) -> bool {
        !(self.sampled & !self.prev).is_empty()
    }

    // Sample the lines once and advance the state machine a single
    // poll-and-dispatch step.
    pub fn tick(&mut self) -> SessionEvent {
        self.prev = self.sampled;
        self.sampled = self.lines;

        match self.mode {
            SessionMode::Running => {
                // Session actions fire on rising edges only, so a held key
                // triggers once and re-arms on release.
                if self.rising(Keys::SAVE) {
                    self.mode = SessionMode::SaveInProgress;
                    SessionEvent::SaveRequested
                } else if self.rising(Keys::PAUSE) {
                    self.mode = SessionMode::Paused;
                    SessionEvent::Paused
                } else {
                    SessionEvent::None
                }
            },
            SessionMode::SaveInProgress => {
                // Back to Running unconditionally; the outcome of the save
                // is surfaced visually, never here.
                self.mode = SessionMode::Running;
                SessionEvent::None
            },
            SessionMode::Paused => {
                if self.rising(Keys::LEFT) {
                    self.volume = self.volume.saturating_sub(VOLUME_STEP);
                    SessionEvent::VolumeChanged(self.volume)
                } else if self.rising(Keys::RIGHT) {
                    self.volume = self.volume.saturating_add(VOLUME_STEP);
                    SessionEvent::VolumeChanged(self.volume)
                } else if self.rising(Keys::HELP) {
                    self.mode = SessionMode::HelpOverlay;
                    SessionEvent::HelpOpened
                } else if self.any_rising() {
                    self.mode = SessionMode::Running;
                    SessionEvent::Resumed
                } else {
                    SessionEvent::None
                }
            },
            SessionMode::HelpOverlay => {
                if self.any_rising() {
                    self.mode = SessionMode::Paused;
                    SessionEvent::HelpClosed
                } else {
                    SessionEvent::None
                }
            },
        }
    }

    // The device calls this once its synchronous save has finished.
    pub fn save_done(&mut self) {
        if self.mode == SessionMode::SaveInProgress {
            self.mode = SessionMode::Running;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(input: &mut InputController, key: Keys) -> SessionEvent {
        input.set_line(key, true);
        input.tick()
    }

    fn release_all(input: &mut InputController) {
        input.lines = Keys::default();
        input.tick();
    }

    #[test]
    fn held_save_key_fires_exactly_once() {
        let mut input = InputController::new();

        let mut saves = 0;
        input.set_line(Keys::SAVE, true);
        for _ in 0..50 {
            if input.tick() == SessionEvent::SaveRequested {
                saves += 1;
            }
            input.save_done();
        }
        assert_eq!(saves, 1);
        assert_eq!(input.mode(), SessionMode::Running);

        // Release re-arms the edge.
        release_all(&mut input);
        assert_eq!(press(&mut input, Keys::SAVE), SessionEvent::SaveRequested);
    }

    #[test]
    fn save_mode_returns_to_running_without_save_done() {
        let mut input = InputController::new();
        assert_eq!(press(&mut input, Keys::SAVE), SessionEvent::SaveRequested);
        assert_eq!(input.mode(), SessionMode::SaveInProgress);
        assert_eq!(input.tick(), SessionEvent::None);
        assert_eq!(input.mode(), SessionMode::Running);
    }

    #[test]
    fn pause_then_any_other_key_resumes() {
        let mut input = InputController::new();
        assert_eq!(press(&mut input, Keys::PAUSE), SessionEvent::Paused);
        release_all(&mut input);

        assert_eq!(press(&mut input, Keys::MIDDLE), SessionEvent::Resumed);
        assert_eq!(input.mode(), SessionMode::Running);
    }

    #[test]
    fn volume_adjusts_in_steps_and_clamps() {
        let mut input = InputController::new();
        press(&mut input, Keys::PAUSE);
        release_all(&mut input);

        assert_eq!(press(&mut input, Keys::RIGHT), SessionEvent::VolumeChanged(110));
        release_all(&mut input);

        // Repeated presses saturate at the top of the range.
        for _ in 0..30 {
            press(&mut input, Keys::RIGHT);
            release_all(&mut input);
        }
        assert_eq!(input.volume(), 255);

        for _ in 0..30 {
            press(&mut input, Keys::LEFT);
            release_all(&mut input);
        }
        assert_eq!(input.volume(), 0);
        assert_eq!(input.mode(), SessionMode::Paused);
    }

    #[test]
    fn help_is_nested_under_pause() {
        let mut input = InputController::new();
        press(&mut input, Keys::PAUSE);
        release_all(&mut input);

        assert_eq!(press(&mut input, Keys::HELP), SessionEvent::HelpOpened);
        assert_eq!(input.mode(), SessionMode::HelpOverlay);
        release_all(&mut input);

        assert_eq!(press(&mut input, Keys::MIDDLE), SessionEvent::HelpClosed);
        assert_eq!(input.mode(), SessionMode::Paused);
    }

    #[test]
    fn gameplay_levels_follow_tick_samples() {
        let mut input = InputController::new();
        input.set_line(Keys::LEFT, true);

        // Not visible until the next tick samples the line.
        assert!(!input.pressed(Keys::LEFT));
        input.tick();
        assert!(input.pressed(Keys::LEFT));

        input.set_line(Keys::LEFT, false);
        assert!(input.pressed(Keys::LEFT));
        input.tick();
        assert!(!input.pressed(Keys::LEFT));
    }

    #[test]
    fn gameplay_keys_do_not_disturb_running_mode() {
        let mut input = InputController::new();
        input.set_line(Keys::LEFT, true);
        input.set_line(Keys::RIGHT, true);
        assert_eq!(input.tick(), SessionEvent::None);
        assert_eq!(input.mode(), SessionMode::Running);
    }
}
