use crate::runtime::config::{RigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use serde::Serialize;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use ultrasound_core::{
    MeasurementStats, PollConfig, PollLoop, ProximityBand, Reading, SensorHandle, SensorRegistry,
    SimulatedTransducer, TimeBase, UltrasoundPort,
};

#[derive(Debug, Clone, Default)]
struct Tally {
    measurements: u64,
    no_echo: u64,
    last: Reading,
}

#[derive(Debug, Serialize)]
pub struct SensorSummary {
    pub status: u32,
    pub binding: String,
    pub measurements: u64,
    pub no_echo: u64,
    pub last_reading: Reading,
    pub band: ProximityBand,
    pub indicator_rgb: (u8, u8, u8),
    pub healthy: bool,
    pub stats: MeasurementStats,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_unix_us: u64,
    pub wall_time_us: u64,
    pub cycles_executed: u64,
    pub cycles_missed: u64,
    pub max_jitter_us: u64,
    pub transitions: u64,
    pub measurements: u64,
    pub watchdog_tripped: bool,
    pub sensors: Vec<SensorSummary>,
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    init_tracing(config.json_logs);

    let summary = config.resolve().and_then(run);
    match summary {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Failed to encode run summary");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e, "Rig failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<RunSummary, RigError> {
    let timebase = TimeBase::new();
    let started_unix_us = timebase.unix_us();

    let mut registry = SensorRegistry::with_capacity(config.sensors.len());
    for (index, sensor) in config.sensors.iter().enumerate() {
        let port = SimulatedTransducer::new(sensor.target)
            .with_speed_of_sound(config.ultrasound.speed_of_sound_m_s);
        let handle = registry.create(port, sensor.binding, config.ultrasound.clone())?;
        let fsm = registry.get_mut(handle)?;
        fsm.set_status(index as u32);
        fsm.start();
        info!(
            sensor = index,
            binding = %sensor.binding,
            target = ?sensor.target,
            "Sensor started"
        );
    }

    let poll_config = PollConfig {
        cycle_time: Duration::from_micros(config.cycle_us),
        pace: config.pace,
        max_cycles: config.cycles,
        ..Default::default()
    };

    info!(
        sensors = config.sensors.len(),
        cycle_us = config.cycle_us,
        pace = config.pace,
        measurement_period_us = config.ultrasound.measurement_period_us,
        median_window = config.ultrasound.median_window,
        "Starting poll loop"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_poll = Arc::clone(&stop);

    let poll_handle = thread::spawn(move || {
        let mut poll = PollLoop::new(registry, poll_config, timebase);
        let mut tallies: HashMap<SensorHandle, Tally> = HashMap::new();
        poll.run_with(&stop_poll, |handle, reading| {
            let tally = tallies.entry(handle).or_default();
            tally.measurements += 1;
            tally.last = reading;
            if !reading.is_echo() {
                tally.no_echo += 1;
            }
            info!(
                sensor = handle.index(),
                distance_cm = reading.cm(),
                band = ?ProximityBand::classify(reading),
                "Measurement"
            );
        });
        (poll, tallies)
    });

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
        thread::sleep(Duration::from_secs(seconds));
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
    } else if config.cycles.is_none() {
        warn!("No --cycles or --run-seconds given, running until killed");
    }

    let (poll, tallies) = poll_handle
        .join()
        .map_err(|_| RigError::PollThreadPanicked)?;

    let stats = poll.stats().clone();
    let registry = poll.into_registry();
    let sensors = registry
        .iter()
        .map(|(handle, fsm)| {
            let tally = tallies.get(&handle).cloned().unwrap_or_default();
            let band = ProximityBand::classify(tally.last);
            SensorSummary {
                status: fsm.status(),
                binding: fsm.binding().to_string(),
                measurements: tally.measurements,
                no_echo: tally.no_echo,
                last_reading: tally.last,
                band,
                indicator_rgb: band.rgb(),
                healthy: fsm.port().is_healthy(),
                stats: fsm.stats().clone(),
            }
        })
        .collect();

    info!(
        cycles_executed = stats.cycles_executed,
        cycles_missed = stats.cycles_missed,
        measurements = stats.measurements,
        max_jitter_us = stats.max_jitter_us,
        "Run complete"
    );

    Ok(RunSummary {
        started_unix_us,
        wall_time_us: timebase.now_us(),
        cycles_executed: stats.cycles_executed,
        cycles_missed: stats.cycles_missed,
        max_jitter_us: stats.max_jitter_us,
        transitions: stats.transitions,
        measurements: stats.measurements,
        watchdog_tripped: stats.watchdog_tripped,
        sensors,
    })
}
