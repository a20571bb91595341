use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("speed of sound must be finite and positive, got {value}")]
    InvalidSpeedOfSound { value: f64 },
    #[error("invalid range [{min_cm}, {max_cm}] cm")]
    InvalidRange { min_cm: f64, max_cm: f64 },
    #[error("malformed configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UltrasoundError {
    #[error("sensor table full ({capacity} slots)")]
    Allocation { capacity: usize },
    #[error("sensor handle {index}:{generation} was destroyed")]
    UseAfterDestroy { index: usize, generation: u32 },
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}
