use crate::distance::round_trip_us;
use crate::hal::{Level, UltrasoundPort};
use serde::{Deserialize, Serialize};

/// Shortest trigger pulse the transducer reacts to.
pub const MIN_TRIGGER_US: u64 = 10;
/// Delay between the trigger falling edge and the echo rising edge (8 cycles at 40 kHz).
pub const BURST_LATENCY_US: u64 = 200;
/// Echo width reported when nothing reflects within range.
pub const NO_TARGET_ECHO_US: u64 = 38_000;

/// What the simulated transducer is pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimTarget {
    /// Reflector at the given distance in centimetres.
    At(f64),
    /// Nothing in range: the echo line is held high for the full no-target window.
    Beyond,
    /// The echo line never rises.
    Silent,
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    echo_rise_us: u64,
    echo_fall_us: u64,
}

/// HC-SR04 style transducer driven by a virtual microsecond clock.
#[derive(Debug, Clone)]
pub struct SimulatedTransducer {
    now_us: u64,
    trigger: Level,
    trigger_rise_us: u64,
    burst: Option<Burst>,
    target: SimTarget,
    speed_of_sound_m_s: f64,
    connected: bool,
    bursts_emitted: u64,
}

impl SimulatedTransducer {
    pub fn new(target: SimTarget) -> Self {
        Self {
            now_us: 0,
            trigger: Level::Low,
            trigger_rise_us: 0,
            burst: None,
            target,
            speed_of_sound_m_s: 343.0,
            connected: true,
            bursts_emitted: 0,
        }
    }

    pub fn with_speed_of_sound(mut self, speed_m_s: f64) -> Self {
        self.speed_of_sound_m_s = speed_m_s;
        self
    }

    pub fn set_target(&mut self, target: SimTarget) {
        self.target = target;
    }

    pub fn target(&self) -> SimTarget {
        self.target
    }

    /// Simulates a broken wire: the trigger is ignored and the echo reads low.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.burst = None;
        }
    }

    pub fn trigger_level(&self) -> Level {
        self.trigger
    }

    pub fn bursts_emitted(&self) -> u64 {
        self.bursts_emitted
    }

    fn echo_busy(&self) -> bool {
        self.burst
            .map(|b| self.now_us < b.echo_fall_us)
            .unwrap_or(false)
    }

    fn emit_burst(&mut self) {
        let width_us = match self.target {
            SimTarget::At(distance_cm) => round_trip_us(distance_cm, self.speed_of_sound_m_s),
            SimTarget::Beyond => NO_TARGET_ECHO_US,
            SimTarget::Silent => {
                self.burst = None;
                return;
            }
        };
        let echo_rise_us = self.now_us + BURST_LATENCY_US;
        self.burst = Some(Burst {
            echo_rise_us,
            echo_fall_us: echo_rise_us + width_us,
        });
        self.bursts_emitted += 1;
    }
}

impl Default for SimulatedTransducer {
    fn default() -> Self {
        Self::new(SimTarget::At(100.0))
    }
}

impl UltrasoundPort for SimulatedTransducer {
    fn set_trigger(&mut self, level: Level) {
        let previous = self.trigger;
        self.trigger = level;
        if !self.connected {
            return;
        }
        match (previous, level) {
            (Level::Low, Level::High) => self.trigger_rise_us = self.now_us,
            (Level::High, Level::Low) => {
                let width = self.now_us.saturating_sub(self.trigger_rise_us);
                if width >= MIN_TRIGGER_US && !self.echo_busy() {
                    self.emit_burst();
                }
            }
            _ => {}
        }
    }

    fn read_echo(&mut self) -> Level {
        if !self.connected {
            return Level::Low;
        }
        match self.burst {
            Some(b) => Level::from(self.now_us >= b.echo_rise_us && self.now_us < b.echo_fall_us),
            None => Level::Low,
        }
    }

    fn now_us(&self) -> u64 {
        self.now_us
    }

    fn advance(&mut self, dt_us: u64) {
        self.now_us = self.now_us.saturating_add(dt_us);
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }
}
