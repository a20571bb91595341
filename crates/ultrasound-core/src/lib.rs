pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod fsm;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod poll_loop;
pub mod proximity;
pub mod registry;
pub mod timebase;

pub use config::UltrasoundConfig;
pub use distance::Reading;
pub use error::{ConfigError, UltrasoundError};
pub use filter::MedianFilter;
pub use fsm::{MeasurementStats, UltrasoundFsm, UltrasoundState};
pub use hal::{Level, PortBinding, UltrasoundPort};
#[cfg(feature = "simulation")]
pub use hal_sim::{SimTarget, SimulatedTransducer};
pub use poll_loop::{ExecutionStats, PollConfig, PollLoop};
pub use proximity::ProximityBand;
pub use registry::{SensorHandle, SensorRegistry};
pub use timebase::TimeBase;
