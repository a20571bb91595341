use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of one ranging cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    /// No reflection was timed. Also the value before the first cycle completes.
    #[default]
    NoEcho,
    Distance(f64),
}

impl Reading {
    pub fn cm(self) -> Option<f64> {
        match self {
            Reading::Distance(cm) => Some(cm),
            Reading::NoEcho => None,
        }
    }

    pub fn is_echo(self) -> bool {
        matches!(self, Reading::Distance(_))
    }

    /// Orders readings by distance, with `NoEcho` beyond every distance.
    pub fn cmp_range(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Reading::Distance(a), Reading::Distance(b)) => a.total_cmp(b),
            (Reading::Distance(_), Reading::NoEcho) => Ordering::Less,
            (Reading::NoEcho, Reading::Distance(_)) => Ordering::Greater,
            (Reading::NoEcho, Reading::NoEcho) => Ordering::Equal,
        }
    }
}

/// Converts an echo pulse width to a one-way distance in centimetres.
pub fn pulse_to_distance_cm(pulse_us: u64, speed_of_sound_m_s: f64) -> f64 {
    // us * m/s = 1e-6 m = 1e-4 cm, halved for the round trip.
    pulse_us as f64 * speed_of_sound_m_s / 20_000.0
}

/// Echo pulse width produced by a reflector at `distance_cm`.
pub fn round_trip_us(distance_cm: f64, speed_of_sound_m_s: f64) -> u64 {
    (distance_cm * 20_000.0 / speed_of_sound_m_s).round().max(0.0) as u64
}

/// Clamps `distance_cm` into `[min_cm, max_cm]`, reporting whether it moved.
pub fn clamp_to_range(distance_cm: f64, min_cm: f64, max_cm: f64) -> (f64, bool) {
    let clamped = distance_cm.clamp(min_cm, max_cm);
    (clamped, clamped != distance_cm)
}
