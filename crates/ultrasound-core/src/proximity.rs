use crate::distance::Reading;
use serde::{Deserialize, Serialize};

/// Parking-aid distance bands, nearest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityBand {
    Danger,
    Warning,
    Caution,
    Info,
    Clear,
    OutOfRange,
}

pub const DANGER_MIN_CM: f64 = 0.0;
pub const WARNING_MIN_CM: f64 = 25.0;
pub const CAUTION_MIN_CM: f64 = 50.0;
pub const INFO_MIN_CM: f64 = 150.0;
pub const CLEAR_MIN_CM: f64 = 175.0;
pub const CLEAR_MAX_CM: f64 = 200.0;

impl ProximityBand {
    pub fn classify(reading: Reading) -> Self {
        let Some(cm) = reading.cm() else {
            return ProximityBand::OutOfRange;
        };
        if (DANGER_MIN_CM..=WARNING_MIN_CM).contains(&cm) {
            ProximityBand::Danger
        } else if cm > WARNING_MIN_CM && cm <= CAUTION_MIN_CM {
            ProximityBand::Warning
        } else if cm > CAUTION_MIN_CM && cm <= INFO_MIN_CM {
            ProximityBand::Caution
        } else if cm > INFO_MIN_CM && cm <= CLEAR_MIN_CM {
            ProximityBand::Info
        } else if cm > CLEAR_MIN_CM && cm <= CLEAR_MAX_CM {
            ProximityBand::Clear
        } else {
            ProximityBand::OutOfRange
        }
    }

    /// RGB colour of the band on the parking-aid indicator.
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            ProximityBand::Danger => (255, 0, 0),
            ProximityBand::Warning => (255, 255, 0),
            ProximityBand::Caution => (0, 255, 0),
            ProximityBand::Info => (0, 255, 255),
            ProximityBand::Clear => (0, 0, 255),
            ProximityBand::OutOfRange => (0, 0, 0),
        }
    }
}
