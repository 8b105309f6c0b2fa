// Tone output.
// The core's sound interface is two callbacks: a tone frequency and an
// on/off line. Commands cross to the audio thread over a bounded channel and
// the handler synthesises a plain square wave. No envelopes, no mixing.

use crossbeam_channel::{
    bounded,
    Receiver,
    Sender
};

const COMMAND_QUEUE_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BeeperCommand {
    Frequency(u32),
    Enable(bool),
    Volume(u8),
}

// Device-side half: accepts commands from the HAL callbacks.
pub struct Beeper {
    command_tx: Sender<BeeperCommand>,
    command_rx: Option<Receiver<BeeperCommand>>,
}

impl Beeper {
    pub fn new() -> Self {
        let (command_tx, command_rx) = bounded(COMMAND_QUEUE_LEN);

        Beeper {
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn set_frequency(&mut self, freq: u32) {
        self.send(BeeperCommand::Frequency(freq));
    }

    pub fn enable(&mut self, en: bool) {
        self.send(BeeperCommand::Enable(en));
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.send(BeeperCommand::Volume(volume));
    }

    // Receiver that will be used on the audio thread.
    pub fn take_rx(&mut self) -> Option<Receiver<BeeperCommand>> {
        self.command_rx.take()
    }

    // With no audio thread attached the queue just fills up and commands
    // are dropped.
    fn send(&mut self, command: BeeperCommand) {
        let _ = self.command_tx.try_send(command);
    }
}

// Audio-thread half: pulled by the output stream callback.
pub struct BeeperHandler {
    command_rx:     Receiver<BeeperCommand>,
    sample_rate:    f64,

    phase:          f64,
    freq:           f64,
    enabled:        bool,
    amplitude:      f32,
}

impl BeeperHandler {
    pub(crate) fn new(command_rx: Receiver<BeeperCommand>, sample_rate: f64) -> Self {
        BeeperHandler {
            command_rx,
            sample_rate,

            phase:      0.0,
            freq:       0.0,
            enabled:    false,
            amplitude:  volume_to_amplitude(100),
        }
    }

    pub fn get_audio_packet(&mut self, data: &mut [f32]) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                BeeperCommand::Frequency(freq) => self.freq = freq as f64,
                BeeperCommand::Enable(en)      => self.enabled = en,
                BeeperCommand::Volume(volume)  => self.amplitude = volume_to_amplitude(volume),
            }
        }

        for sample in data.iter_mut() {
            *sample = if self.enabled && self.freq > 0.0 {
                self.phase += self.freq / self.sample_rate;
                if self.phase >= 1.0 {
                    self.phase -= 1.0;
                }
                if self.phase < 0.5 { self.amplitude } else { -self.amplitude }
            } else {
                0.0
            };
        }
    }
}

fn volume_to_amplitude(volume: u8) -> f32 {
    // Half-scale at full volume is plenty for a buzzer.
    (volume as f32 / 255.0) * 0.5
}
