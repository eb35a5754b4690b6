//! Hardware seam.
//!
//! PWM outputs go through `embedded_hal::pwm::SetDutyCycle`, so the same
//! controller runs against real channels or the in-memory [`SimPwm`]. The
//! audio engine is reached through [`AudioOutput`].

use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use log::error;

/// Servo refresh rate.
pub const SERVO_FREQUENCY_HZ: u32 = 50;
/// Pulse width at 0 degrees, in microseconds.
pub const SERVO_MIN_PULSE_US: u32 = 544;
/// Pulse width at 180 degrees, in microseconds.
pub const SERVO_MAX_PULSE_US: u32 = 2400;

/// Drives a hobby servo from a PWM channel.
#[derive(Debug)]
pub struct ServoDriver<PWM> {
    pwm: PWM,
    angle: u8,
    max_duty: u32,
}

impl<PWM> ServoDriver<PWM>
where
    PWM: SetDutyCycle,
{
    pub fn new(pwm: PWM) -> Self {
        let max_duty = u32::from(pwm.max_duty_cycle());
        Self {
            pwm,
            angle: 0,
            max_duty,
        }
    }

    /// Sets the servo angle in degrees. Values above 180 are clamped.
    pub fn set_angle(&mut self, angle: u8) {
        let angle = angle.min(180);

        // Avoid setting the same angle again
        if self.angle == angle {
            return;
        }
        self.angle = angle;

        // The pulse width drives the angle, the frequency stays fixed.
        let pulse = SERVO_MIN_PULSE_US
            + u32::from(angle) * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / 180;
        let period_us = 1_000_000 / SERVO_FREQUENCY_HZ;
        let duty = ((pulse * self.max_duty) / period_us).min(self.max_duty) as u16;
        if let Err(e) = self.pwm.set_duty_cycle(duty) {
            error!("Error writing servo angle {angle}: {e:?}");
        }
    }

    pub fn angle(&self) -> u8 {
        self.angle
    }

    pub fn pwm(&self) -> &PWM {
        &self.pwm
    }
}

/// The audio rendering engine the controller starts, stops and feeds.
pub trait AudioOutput {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    /// Accepts one rendered sample.
    fn write_sample(&mut self, sample: i16);
}

/// In-memory PWM channel. Remembers the last duty written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPwm {
    max_duty: u16,
    duty: u16,
}

impl SimPwm {
    pub fn new(max_duty: u16) -> Self {
        Self { max_duty, duty: 0 }
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }
}

impl ErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        self.max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty = duty.min(self.max_duty);
        Ok(())
    }
}

/// Number of recent samples kept by [`SimAudio`].
pub const SIM_AUDIO_HISTORY: usize = 128;

/// Audio sink that counts samples and keeps the most recent ones.
#[derive(Debug, Clone, Default)]
pub struct SimAudio {
    running: bool,
    samples_written: u64,
    history: VecDeque<i16>,
}

impl SimAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Most recent samples, oldest first.
    pub fn history(&self) -> &VecDeque<i16> {
        &self.history
    }
}

impl AudioOutput for SimAudio {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn write_sample(&mut self, sample: i16) {
        self.samples_written += 1;
        if self.history.len() == SIM_AUDIO_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servo_angle_converts_to_pulse_duty() {
        let mut servo = ServoDriver::new(SimPwm::new(20_000));
        servo.set_angle(90);
        // 544 + 90 * 1856 / 180 = 1472 us out of a 20000 us period
        assert_eq!(servo.pwm().duty(), 1472);
        assert_eq!(servo.angle(), 90);
    }

    #[test]
    fn servo_angle_is_clamped() {
        let mut servo = ServoDriver::new(SimPwm::new(20_000));
        servo.set_angle(181);
        assert_eq!(servo.angle(), 180);
        assert_eq!(servo.pwm().duty(), 2400);
    }

    #[test]
    fn sim_pwm_caps_duty() {
        let mut pwm = SimPwm::new(255);
        pwm.set_duty_cycle(1_000).unwrap();
        assert_eq!(pwm.duty(), 255);
    }

    #[test]
    fn sim_audio_keeps_bounded_history() {
        let mut audio = SimAudio::new();
        audio.start();
        assert!(audio.is_running());
        for i in 0..(SIM_AUDIO_HISTORY as i16 + 10) {
            audio.write_sample(i);
        }
        assert_eq!(audio.samples_written(), SIM_AUDIO_HISTORY as u64 + 10);
        assert_eq!(audio.history().len(), SIM_AUDIO_HISTORY);
        assert_eq!(audio.history().front(), Some(&10));
        audio.stop();
        assert!(!audio.is_running());
    }
}
