//! PWM fan output.

use embedded_hal::pwm::SetDutyCycle;
use log::error;

use crate::config::FanLimits;
use crate::map_range;

/// Full-scale fan duty.
pub const FAN_MAX_DUTY: u8 = 255;

/// Rescales a fan speed onto the 0..=255 duty range, rounding down.
pub fn speed_to_duty(speed: u32, limits: &FanLimits) -> u8 {
    let speed = speed.min(limits.max_speed);
    map_range(
        i64::from(speed),
        0,
        i64::from(limits.max_speed),
        0,
        i64::from(FAN_MAX_DUTY),
    ) as u8
}

/// The fan keeps no state besides the last duty written: every command fully
/// determines the output.
#[derive(Debug)]
pub struct Fan<PWM> {
    pwm: PWM,
    duty: u8,
}

impl<PWM> Fan<PWM>
where
    PWM: SetDutyCycle,
{
    pub fn new(pwm: PWM) -> Self {
        Self { pwm, duty: 0 }
    }

    /// Writes `duty` (out of 255) to the fan pin.
    pub fn set_duty(&mut self, duty: u8) {
        self.duty = duty;
        if let Err(e) = self
            .pwm
            .set_duty_cycle_fraction(u16::from(duty), u16::from(FAN_MAX_DUTY))
        {
            error!("Error writing fan duty {duty}: {e:?}");
        }
    }

    pub fn duty(&self) -> u8 {
        self.duty
    }

    pub fn pwm(&self) -> &PWM {
        &self.pwm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SimPwm;

    #[test]
    fn speed_maps_onto_duty_range() {
        let limits = FanLimits::default();
        assert_eq!(speed_to_duty(0, &limits), 0);
        assert_eq!(speed_to_duty(50, &limits), 127);
        assert_eq!(speed_to_duty(100, &limits), 255);
    }

    #[test]
    fn speed_above_range_is_clamped() {
        assert_eq!(speed_to_duty(400, &FanLimits::default()), 255);
    }

    #[test]
    fn duty_scales_to_pin_resolution() {
        let mut fan = Fan::new(SimPwm::new(1023));
        fan.set_duty(255);
        assert_eq!(fan.pwm().duty(), 1023);
        fan.set_duty(0);
        assert_eq!(fan.pwm().duty(), 0);
        assert_eq!(fan.duty(), 0);
    }
}
