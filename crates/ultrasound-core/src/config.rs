use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Timing and range parameters of one ranging FSM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UltrasoundConfig {
    /// How long the trigger line is held high.
    pub trigger_pulse_us: u64,
    /// Longest wait for the echo rising edge, counted from the trigger rising edge.
    pub echo_start_timeout_us: u64,
    /// Longest echo pulse accepted as a reflection.
    pub echo_window_us: u64,
    /// Minimum spacing between consecutive triggers.
    pub measurement_period_us: u64,
    pub speed_of_sound_m_s: f64,
    pub min_range_cm: f64,
    pub max_range_cm: f64,
    /// Number of samples in the median filter. 1 publishes raw samples.
    pub median_window: usize,
}

impl Default for UltrasoundConfig {
    fn default() -> Self {
        Self {
            trigger_pulse_us: 10,
            echo_start_timeout_us: 30_000,
            echo_window_us: 38_000,
            measurement_period_us: 100_000,
            speed_of_sound_m_s: 343.0,
            min_range_cm: 2.0,
            max_range_cm: 400.0,
            median_window: 5,
        }
    }
}

impl UltrasoundConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("trigger_pulse_us", self.trigger_pulse_us),
            ("echo_start_timeout_us", self.echo_start_timeout_us),
            ("echo_window_us", self.echo_window_us),
        ];
        if let Some(&(field, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.median_window == 0 {
            return Err(ConfigError::Zero {
                field: "median_window",
            });
        }
        if !self.speed_of_sound_m_s.is_finite() || self.speed_of_sound_m_s <= 0.0 {
            return Err(ConfigError::InvalidSpeedOfSound {
                value: self.speed_of_sound_m_s,
            });
        }
        let range_ok = self.min_range_cm.is_finite()
            && self.max_range_cm.is_finite()
            && self.min_range_cm >= 0.0
            && self.min_range_cm < self.max_range_cm;
        if !range_ok {
            return Err(ConfigError::InvalidRange {
                min_cm: self.min_range_cm,
                max_cm: self.max_range_cm,
            });
        }
        Ok(())
    }
}
