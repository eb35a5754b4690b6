//! # Shield Controller Library
//!
//! This library decodes the fixed-width serial commands sent to the actuator
//! shield and drives its three kinds of outputs: a five-waveform oscillator
//! bank behind a transistor, three continuously sweeping servos and a PWM fan.
//!
//! All mutable state lives in a [`Controller`], which is owned by the single
//! control loop and passed around explicitly. Hardware is reached through
//! `embedded_hal` PWM channels and the [`AudioOutput`] trait, with in-memory
//! implementations in [`hal`] for tests and the host CLI.

pub mod audio;
pub mod command;
pub mod config;
pub mod error;
pub mod fan;
pub mod framing;
pub mod hal;
pub mod servo;

use std::fmt;
use std::sync::Arc;

use embedded_hal::pwm::SetDutyCycle;
use log::{info, warn};

use audio::{AudioSelector, OscillatorBank, Waveform, WaveformState};
use command::Command;
use fan::{speed_to_duty, Fan};
use hal::{AudioOutput, SimAudio, SimPwm};
use servo::{ActuatorState, ServoBank, ServoId};

pub use command::{extract, Field};
pub use config::ControllerConfig;
pub use error::{CommandError, ConfigError};

/// Linear rescale of `x` from `[in_min, in_max]` onto `[out_min, out_max]`,
/// truncating toward zero.
pub fn map_range(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    if in_max == in_min {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// What an accepted command did. Its `Display` form is the status line
/// reported for the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    AudioStopped,
    AudioStarted { waveform: Waveform, frequency: u32 },
    Servo { id: ServoId, enabled: bool, speed: u32, interval_ms: u32 },
    Fan { speed: u32, duty: u8 },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::AudioStopped => write!(f, "Stopping wave"),
            Status::AudioStarted { waveform, frequency } => {
                write!(f, "Starting wave: {waveform} at {frequency} Hz")
            }
            Status::Servo { id, enabled, speed, interval_ms } => write!(
                f,
                "Servo {id} {}, speed {speed} (step every {interval_ms} ms)",
                if *enabled { "on" } else { "off" }
            ),
            Status::Fan { speed, duty } => write!(f, "Fan speed {speed} (duty {duty}/255)"),
        }
    }
}

/// Owns every actuator and the state that drives them.
#[derive(Debug)]
pub struct Controller<F, S, A> {
    config: ControllerConfig,
    servos: ServoBank<S>,
    fan: Fan<F>,
    waveform: Arc<WaveformState>,
    oscillators: OscillatorBank,
    audio: A,
    // Audio samples already accounted for since time zero.
    samples_scheduled: u64,
}

/// A controller wired to simulated pins and audio sink.
pub type SimController = Controller<SimPwm, SimPwm, SimAudio>;

impl SimController {
    pub fn simulated(config: ControllerConfig) -> Self {
        Controller::new(
            config,
            SimPwm::new(255),
            [SimPwm::new(4095), SimPwm::new(4095), SimPwm::new(4095)],
            SimAudio::new(),
        )
    }
}

impl<F, S, A> Controller<F, S, A>
where
    F: SetDutyCycle,
    S: SetDutyCycle,
    A: AudioOutput,
{
    /// Creates a controller. Servo channels are given in id order 3, 4, 5.
    pub fn new(config: ControllerConfig, fan_pwm: F, servo_pwms: [S; 3], audio: A) -> Self {
        let oscillators = OscillatorBank::new(config.audio.sample_rate, config.audio.noise_seed);
        Self {
            servos: ServoBank::new(servo_pwms, config.servo.clone()),
            fan: Fan::new(fan_pwm),
            waveform: Arc::new(WaveformState::default()),
            oscillators,
            audio,
            samples_scheduled: 0,
            config,
        }
    }

    /// Decodes and applies one command line.
    ///
    /// Rejected commands leave every actuator untouched. Malformed numeric
    /// fields are only warned about; they read as their leading digits.
    pub fn process_command(&mut self, line: &str) -> Result<Status, CommandError> {
        let line = line.trim();
        let decoded = Command::decode(line).inspect_err(|e| warn!("{e} in {line:?}"))?;
        for warning in &decoded.warnings {
            warn!("{warning}");
        }

        let status = self.apply(decoded.command);
        info!("{status}");
        Ok(status)
    }

    fn apply(&mut self, command: Command) -> Status {
        match command {
            Command::StopAudio => {
                self.audio.stop();
                Status::AudioStopped
            }
            Command::StartAudio { waveform, frequency } => {
                if let Some(waveform) = waveform {
                    self.waveform.store(waveform);
                }
                self.oscillators.set_frequency(frequency);
                self.audio.start();
                // Report what the selector will actually play.
                let waveform = self.waveform.load().unwrap_or(Waveform::Sine);
                Status::AudioStarted { waveform, frequency }
            }
            Command::Servo { id, enabled, speed } => {
                let interval_ms = self.servos.configure(id, enabled, speed);
                Status::Servo {
                    id,
                    enabled,
                    speed,
                    interval_ms,
                }
            }
            Command::Fan { speed } => {
                let duty = speed_to_duty(speed, &self.config.fan);
                self.fan.set_duty(duty);
                Status::Fan { speed, duty }
            }
        }
    }

    /// Sweep engine tick. Call once per control cycle.
    pub fn update_control(&mut self, now_ms: u64) {
        self.servos.tick(now_ms);
    }

    /// Renders one sample from the selected oscillator into the audio output.
    /// Returns `None` while audio is stopped.
    pub fn audio_tick(&mut self) -> Option<i16> {
        if !self.audio.is_running() {
            return None;
        }
        let sample = AudioSelector::next_sample(&self.waveform, &mut self.oscillators);
        self.audio.write_sample(sample);
        Some(sample)
    }

    /// Renders the samples that fell due up to `now_ms`, at most one second's
    /// worth. Time keeps counting while audio is stopped, so restarting does
    /// not replay the silence. Returns the number of samples rendered.
    pub fn render_audio(&mut self, now_ms: u64) -> u64 {
        let rate = u64::from(self.config.audio.sample_rate);
        let target = now_ms.saturating_mul(rate) / 1000;
        let due = target.saturating_sub(self.samples_scheduled).min(rate);
        self.samples_scheduled = self.samples_scheduled.max(target);

        if !self.audio.is_running() {
            return 0;
        }
        for _ in 0..due {
            self.audio_tick();
        }
        due
    }

    /// One pass of the control loop: sweep, audio, then the pending command
    /// if one arrived.
    pub fn cycle(&mut self, now_ms: u64, command: Option<&str>) -> Option<Result<Status, CommandError>> {
        self.update_control(now_ms);
        self.render_audio(now_ms);
        command.map(|line| self.process_command(line))
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn servo_state(&self, id: ServoId) -> &ActuatorState {
        self.servos.state(id)
    }

    pub fn servos(&self) -> &ServoBank<S> {
        &self.servos
    }

    pub fn fan(&self) -> &Fan<F> {
        &self.fan
    }

    /// Shared handle on the selected waveform, readable from another thread.
    pub fn waveform_state(&self) -> Arc<WaveformState> {
        Arc::clone(&self.waveform)
    }

    pub fn oscillators(&self) -> &OscillatorBank {
        &self.oscillators
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }
}
