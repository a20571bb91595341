use serde::{Deserialize, Serialize};
use std::fmt;

/// Logic level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Trigger/echo pin pair a sensor is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub trigger_pin: u8,
    pub echo_pin: u8,
}

impl PortBinding {
    pub const fn new(trigger_pin: u8, echo_pin: u8) -> Self {
        Self {
            trigger_pin,
            echo_pin,
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trig{}/echo{}", self.trigger_pin, self.echo_pin)
    }
}

/// Hardware boundary of one ultrasonic transducer.
pub trait UltrasoundPort: Send {
    fn set_trigger(&mut self, level: Level);
    fn read_echo(&mut self) -> Level;
    /// Monotonic microseconds.
    fn now_us(&self) -> u64;
    /// Moves simulated time forward. Real hardware ignores it.
    fn advance(&mut self, _dt_us: u64) {}
    fn is_healthy(&self) -> bool {
        true
    }
}

impl<P: UltrasoundPort + ?Sized> UltrasoundPort for Box<P> {
    fn set_trigger(&mut self, level: Level) {
        (**self).set_trigger(level)
    }

    fn read_echo(&mut self) -> Level {
        (**self).read_echo()
    }

    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn advance(&mut self, dt_us: u64) {
        (**self).advance(dt_us)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
