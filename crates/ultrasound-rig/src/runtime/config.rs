use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use ultrasound_core::{ConfigError, PortBinding, SimTarget, UltrasoundConfig, UltrasoundError};

#[derive(Debug, Error)]
pub enum RigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sensor(#[from] UltrasoundError),
    #[error("no sensors configured")]
    NoSensors,
    #[error("{requested} sensors requested, numbered pin pairs run out after {max}")]
    TooManySensors { requested: usize, max: usize },
    #[error("pin pair {binding} is used by more than one sensor")]
    DuplicateBinding { binding: PortBinding },
    #[error("poll loop thread panicked")]
    PollThreadPanicked,
}

/// One simulated sensor on the rig.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorSpec {
    #[serde(flatten)]
    pub binding: PortBinding,
    #[serde(default = "default_target")]
    pub target: SimTarget,
}

fn default_target() -> SimTarget {
    SimTarget::At(100.0)
}

/// Sensors `--sensors` can number: pairs 0/1 up to 254/255.
pub const MAX_NUMBERED_SENSORS: usize = 128;

impl SensorSpec {
    fn numbered(index: usize, target: SimTarget) -> Option<Self> {
        let trigger_pin = u8::try_from(index * 2).ok()?;
        let echo_pin = trigger_pin.checked_add(1)?;
        Some(Self {
            binding: PortBinding::new(trigger_pin, echo_pin),
            target,
        })
    }
}

/// Layout of the `--config` JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RigFile {
    ultrasound: UltrasoundConfig,
    sensors: Vec<SensorSpec>,
    cycle_us: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub config_path: Option<PathBuf>,
    pub run_seconds: Option<u64>,
    pub cycles: Option<u64>,
    pub cycle_us: u64,
    pub pace: bool,
    pub json_logs: bool,
    pub sensor_count: Option<usize>,
    pub target_override: Option<SimTarget>,
    pub ultrasound: UltrasoundConfig,
    pub sensors: Vec<SensorSpec>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            config_path: None,
            run_seconds: None,
            cycles: None,
            cycle_us: 20,
            pace: true,
            json_logs: false,
            sensor_count: None,
            target_override: None,
            ultrasound: UltrasoundConfig::default(),
            sensors: vec![SensorSpec {
                binding: PortBinding::new(0, 1),
                target: default_target(),
            }],
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if i + 1 < args.len() {
                        cfg.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--cycles" => {
                    if i + 1 < args.len() {
                        cfg.cycles = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--cycle-us" => {
                    if i + 1 < args.len() {
                        cfg.cycle_us = args[i + 1].parse().unwrap_or(20).max(1);
                        i += 1;
                    }
                }
                "--sensors" => {
                    if i + 1 < args.len() {
                        cfg.sensor_count = args[i + 1].parse::<usize>().ok();
                        i += 1;
                    }
                }
                "--target-cm" => {
                    if i + 1 < args.len() {
                        cfg.target_override = args[i + 1].parse::<f64>().ok().map(SimTarget::At);
                        i += 1;
                    }
                }
                "--target" => {
                    if i + 1 < args.len() {
                        cfg.target_override = match args[i + 1].as_str() {
                            "beyond" => Some(SimTarget::Beyond),
                            "silent" => Some(SimTarget::Silent),
                            _ => None,
                        };
                        i += 1;
                    }
                }
                "--no-pace" => {
                    cfg.pace = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    /// Applies the config file, then the command-line overrides.
    pub fn resolve(mut self) -> Result<Self, RigError> {
        if let Some(path) = self.config_path.clone() {
            let file = load_rig_file(&path)?;
            self.ultrasound = file.ultrasound;
            if !file.sensors.is_empty() {
                self.sensors = file.sensors;
            }
            if let Some(cycle_us) = file.cycle_us {
                self.cycle_us = cycle_us.max(1);
            }
        }
        if let Some(count) = self.sensor_count {
            let target = self
                .sensors
                .first()
                .map(|s| s.target)
                .unwrap_or_else(default_target);
            self.sensors = (0..count)
                .map(|i| SensorSpec::numbered(i, target))
                .collect::<Option<Vec<_>>>()
                .ok_or(RigError::TooManySensors {
                    requested: count,
                    max: MAX_NUMBERED_SENSORS,
                })?;
        }
        if let Some(target) = self.target_override {
            for sensor in &mut self.sensors {
                sensor.target = target;
            }
        }
        if self.sensors.is_empty() {
            return Err(RigError::NoSensors);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.sensors.iter().find(|s| !seen.insert(s.binding)) {
            return Err(RigError::DuplicateBinding {
                binding: dup.binding,
            });
        }
        self.ultrasound.validate()?;
        Ok(self)
    }

    pub fn print_help() {
        println!(
            r#"ultrasound-rig - Simulated ultrasonic ranging bench

USAGE:
    ultrasound-rig [OPTIONS]

OPTIONS:
    --config <PATH>         JSON file with `ultrasound` settings and a `sensors` list
    --run-seconds <SECS>    Run for a fixed wall-clock duration then exit
    --cycles <N>            Stop after N poll cycles
    --cycle-us <US>         Poll interval in microseconds [default: 20]
    --sensors <N>           Number of simulated sensors (pins 0/1, 2/3, ..., at most 128)
    --target-cm <CM>        Place every simulated reflector at CM centimetres
    --target <KIND>         Use `beyond` (nothing in range) or `silent` (no echo) targets
    --no-pace               Run cycles back to back instead of in real time
    --json-logs             Output logs in JSON format
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,ultrasound_core=trace)

EXAMPLES:
    # Two sensors, one second of simulated time, as fast as possible
    ultrasound-rig --sensors 2 --no-pace --cycle-us 1 --cycles 1000000

    # Real-time run from a config file
    ultrasound-rig --config rig.json --run-seconds 5
"#
        );
    }
}

fn load_rig_file(path: &Path) -> Result<RigFile, RigError> {
    let text = std::fs::read_to_string(path).map_err(|source| RigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| RigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
