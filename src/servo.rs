//! Servo sweep state and the engine that advances it.

use std::fmt;

use embedded_hal::pwm::SetDutyCycle;
use log::debug;

use crate::config::ServoLimits;
use crate::error::CommandError;
use crate::hal::ServoDriver;
use crate::map_range;

/// The servos reachable by command. The ids match the shield outputs they
/// were wired to, hence the odd numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServoId {
    Three = 3,
    Four = 4,
    Five = 5,
}

impl ServoId {
    pub const ALL: [ServoId; 3] = [ServoId::Three, ServoId::Four, ServoId::Five];

    pub fn number(self) -> u8 {
        self as u8
    }

    fn index(self) -> usize {
        match self {
            ServoId::Three => 0,
            ServoId::Four => 1,
            ServoId::Five => 2,
        }
    }
}

impl TryFrom<u32> for ServoId {
    type Error = CommandError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ServoId::Three),
            4 => Ok(ServoId::Four),
            5 => Ok(ServoId::Five),
            other => Err(CommandError::UnknownServoId(other)),
        }
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Maps a sweep speed onto a step interval. The slowest speed gets the
/// longest interval; speeds outside the configured range are clamped first.
pub fn speed_to_interval(speed: u32, limits: &ServoLimits) -> u32 {
    let speed = speed.clamp(limits.min_speed, limits.max_speed);
    let interval = map_range(
        i64::from(speed),
        i64::from(limits.min_speed),
        i64::from(limits.max_speed),
        i64::from(limits.max_interval_ms),
        i64::from(limits.min_interval_ms),
    );
    interval as u32
}

/// Sweep state of one servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorState {
    pub enabled: bool,
    pub interval_ms: u32,
    /// Current angle. May sit one step outside the limits right before a
    /// reversal.
    pub position: i32,
    pub clockwise: bool,
    pub last_update_ms: u64,
}

impl ActuatorState {
    pub fn new(limits: &ServoLimits) -> Self {
        Self {
            enabled: false,
            interval_ms: limits.max_interval_ms,
            position: limits.min_position,
            clockwise: true,
            last_update_ms: 0,
        }
    }

    /// Runs one sweep tick. Returns the new position if the servo moved.
    ///
    /// The reversal check looks at the position *before* stepping, so the
    /// servo overshoots a limit by one step and only turns around on the
    /// following tick.
    pub fn sweep(&mut self, now_ms: u64, limits: &ServoLimits) -> Option<i32> {
        if !self.enabled || now_ms.saturating_sub(self.last_update_ms) < u64::from(self.interval_ms) {
            return None;
        }
        self.last_update_ms = now_ms;

        if self.position < limits.min_position {
            self.clockwise = true;
        } else if self.position > limits.max_position {
            self.clockwise = false;
        }

        if self.clockwise {
            self.position += 1;
        } else {
            self.position -= 1;
        }
        Some(self.position)
    }
}

#[derive(Debug)]
struct ServoChannel<P> {
    id: ServoId,
    state: ActuatorState,
    driver: ServoDriver<P>,
}

/// The three sweeping servos with their drivers.
#[derive(Debug)]
pub struct ServoBank<P> {
    channels: [ServoChannel<P>; 3],
    limits: ServoLimits,
}

impl<P> ServoBank<P>
where
    P: SetDutyCycle,
{
    /// Creates the bank from one PWM channel per servo, in id order 3, 4, 5.
    pub fn new(pwms: [P; 3], limits: ServoLimits) -> Self {
        let [p3, p4, p5] = pwms;
        let channel = |id, pwm| ServoChannel {
            id,
            state: ActuatorState::new(&limits),
            driver: ServoDriver::new(pwm),
        };
        Self {
            channels: [
                channel(ServoId::Three, p3),
                channel(ServoId::Four, p4),
                channel(ServoId::Five, p5),
            ],
            limits,
        }
    }

    pub fn state(&self, id: ServoId) -> &ActuatorState {
        &self.channels[id.index()].state
    }

    pub fn driver(&self, id: ServoId) -> &ServoDriver<P> {
        &self.channels[id.index()].driver
    }

    pub fn limits(&self) -> &ServoLimits {
        &self.limits
    }

    /// Switches a servo on or off and sets its step interval from `speed`.
    /// Position and direction are kept, so a re-enabled servo resumes where it
    /// stopped. Returns the new interval.
    pub fn configure(&mut self, id: ServoId, enabled: bool, speed: u32) -> u32 {
        let interval = speed_to_interval(speed, &self.limits);
        let state = &mut self.channels[id.index()].state;
        state.enabled = enabled;
        state.interval_ms = interval;
        interval
    }

    /// Advances every enabled servo whose interval has elapsed and writes the
    /// new angle to its driver.
    pub fn tick(&mut self, now_ms: u64) {
        for channel in self.channels.iter_mut() {
            if let Some(position) = channel.state.sweep(now_ms, &self.limits) {
                debug!("servo {} -> {}", channel.id, position);
                channel.driver.set_angle(position.clamp(0, 180) as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SimPwm;

    fn limits() -> ServoLimits {
        ServoLimits::default()
    }

    fn enabled_state(interval_ms: u32) -> ActuatorState {
        let mut state = ActuatorState::new(&limits());
        state.enabled = true;
        state.interval_ms = interval_ms;
        state
    }

    #[test]
    fn interval_mapping_endpoints() {
        assert_eq!(speed_to_interval(1, &limits()), 200);
        assert_eq!(speed_to_interval(100, &limits()), 10);
    }

    #[test]
    fn interval_mapping_is_linear_and_decreasing() {
        assert_eq!(speed_to_interval(50, &limits()), 106);
        let intervals: Vec<u32> = (1..=100).map(|s| speed_to_interval(s, &limits())).collect();
        assert!(intervals.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(speed_to_interval(50, &limits()), speed_to_interval(50, &limits()));
    }

    #[test]
    fn interval_mapping_clamps_speed() {
        assert_eq!(speed_to_interval(0, &limits()), 200);
        assert_eq!(speed_to_interval(99999, &limits()), 10);
    }

    #[test]
    fn servo_id_lookup() {
        assert_eq!(ServoId::try_from(4), Ok(ServoId::Four));
        assert_eq!(ServoId::try_from(9), Err(CommandError::UnknownServoId(9)));
        assert_eq!(ServoId::Five.to_string(), "5");
    }

    #[test]
    fn new_state_starts_disabled_at_minimum() {
        let state = ActuatorState::new(&limits());
        assert!(!state.enabled);
        assert!(state.clockwise);
        assert_eq!(state.position, 65);
    }

    #[test]
    fn sweep_waits_for_interval() {
        let mut state = enabled_state(20);
        assert_eq!(state.sweep(19, &limits()), None);
        assert_eq!(state.sweep(20, &limits()), Some(66));
        assert_eq!(state.sweep(39, &limits()), None);
        assert_eq!(state.sweep(40, &limits()), Some(67));
    }

    #[test]
    fn disabled_servo_does_not_move() {
        let mut state = ActuatorState::new(&limits());
        state.interval_ms = 10;
        assert_eq!(state.sweep(1_000, &limits()), None);
        assert_eq!(state.position, 65);
    }

    #[test]
    fn sweep_traces_triangle_with_overshoot() {
        let mut state = enabled_state(10);
        let mut trace = Vec::new();
        for tick in 1..=600u64 {
            if let Some(position) = state.sweep(tick * 10, &limits()) {
                trace.push(position);
            }
        }

        assert_eq!(trace.len(), 600);
        assert_eq!(*trace.iter().max().unwrap(), 181);
        assert_eq!(*trace.iter().min().unwrap(), 64);

        // 65 -> 181 takes 116 ticks, then the next tick reverses.
        assert_eq!(trace[115], 181);
        assert_eq!(trace[116], 180);

        // From then on the trace repeats every 2 * (181 - 64) ticks.
        let period = 2 * (181 - 64) as usize;
        for i in 115..(trace.len() - period) {
            assert_eq!(trace[i], trace[i + period]);
        }
        assert!(trace.windows(2).all(|w| (w[0] - w[1]).abs() == 1));
    }

    #[test]
    fn reversal_only_after_overshoot() {
        let mut state = enabled_state(10);
        state.position = 180;
        assert_eq!(state.sweep(10, &limits()), Some(181));
        assert!(state.clockwise);
        assert_eq!(state.sweep(20, &limits()), Some(180));
        assert!(!state.clockwise);

        state.position = 65;
        assert_eq!(state.sweep(30, &limits()), Some(64));
        assert_eq!(state.sweep(40, &limits()), Some(65));
        assert!(state.clockwise);
    }

    #[test]
    fn bank_configure_keeps_position_and_direction() {
        let mut bank = ServoBank::new([SimPwm::new(255), SimPwm::new(255), SimPwm::new(255)], limits());
        bank.configure(ServoId::Three, true, 100);
        for t in 1..=5 {
            bank.tick(t * 10);
        }
        assert_eq!(bank.state(ServoId::Three).position, 70);

        assert_eq!(bank.configure(ServoId::Three, false, 100), 10);
        bank.tick(1_000);
        assert_eq!(bank.state(ServoId::Three).position, 70);

        bank.configure(ServoId::Three, true, 100);
        bank.tick(1_010);
        assert_eq!(bank.state(ServoId::Three).position, 71);
        assert!(bank.state(ServoId::Three).clockwise);
    }

    #[test]
    fn bank_servos_are_independent() {
        let mut bank = ServoBank::new([SimPwm::new(255), SimPwm::new(255), SimPwm::new(255)], limits());
        bank.configure(ServoId::Four, true, 100);
        bank.configure(ServoId::Five, true, 1);
        bank.tick(200);

        assert_eq!(bank.state(ServoId::Three).position, 65);
        assert_eq!(bank.state(ServoId::Four).position, 66);
        assert_eq!(bank.state(ServoId::Five).position, 66);

        bank.tick(210);
        assert_eq!(bank.state(ServoId::Four).position, 67);
        assert_eq!(bank.state(ServoId::Five).position, 66);
    }

    #[test]
    fn bank_writes_angle_to_driver() {
        let mut bank = ServoBank::new([SimPwm::new(255), SimPwm::new(255), SimPwm::new(255)], limits());
        bank.configure(ServoId::Four, true, 100);
        bank.tick(10);
        assert_eq!(bank.driver(ServoId::Four).angle(), 66);
        assert_eq!(bank.driver(ServoId::Three).angle(), 0);
    }
}
