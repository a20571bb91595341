use crate::distance::Reading;
use crate::hal::UltrasoundPort;
use crate::registry::{SensorHandle, SensorRegistry};
use crate::timebase::TimeBase;
use log::{debug, error};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Interval between two fire passes. Also the step applied to simulated clocks.
    pub cycle_time: Duration,
    /// Spin until each cycle deadline instead of running flat out.
    pub pace: bool,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
    /// A paced cycle later than this stops every sensor and ends the loop.
    pub watchdog_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_micros(20),
            pace: true,
            max_cycles: None,
            watchdog_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Default, Debug, Serialize)]
pub struct ExecutionStats {
    pub cycles_executed: u64,
    pub cycles_missed: u64,
    pub max_jitter_us: u64,
    pub transitions: u64,
    pub measurements: u64,
    pub watchdog_tripped: bool,
}

/// Cooperative scheduler that fires every registered sensor once per cycle.
pub struct PollLoop<P: UltrasoundPort> {
    registry: SensorRegistry<P>,
    config: PollConfig,
    stats: ExecutionStats,
    timebase: TimeBase,
}

impl<P: UltrasoundPort> PollLoop<P> {
    pub fn new(registry: SensorRegistry<P>, config: PollConfig, timebase: TimeBase) -> Self {
        Self {
            registry,
            config,
            stats: ExecutionStats::default(),
            timebase,
        }
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        self.run_with(stop, |_, _| {});
    }

    /// Runs until `stop` is set or the cycle budget is spent, handing every
    /// fresh measurement to `on_measurement`.
    pub fn run_with<F>(&mut self, stop: &AtomicBool, mut on_measurement: F)
    where
        F: FnMut(SensorHandle, Reading),
    {
        let cycle_us = self.config.cycle_time.as_micros() as u64;
        let mut next_cycle_us = self.timebase.now_us();

        while !stop.load(Ordering::Relaxed) {
            if let Some(max) = self.config.max_cycles {
                if self.stats.cycles_executed >= max {
                    break;
                }
            }

            if self.config.pace {
                let now_us = self.timebase.now_us();
                if now_us < next_cycle_us {
                    self.timebase.spin_until(next_cycle_us);
                } else if now_us > next_cycle_us {
                    self.stats.cycles_missed += 1;
                    let overrun_us = now_us - next_cycle_us;
                    if overrun_us > self.config.watchdog_timeout.as_micros() as u64 {
                        error!("poll loop overran by {} us, stopping sensors", overrun_us);
                        self.emergency_stop();
                        break;
                    }
                }
            }

            let cycle_start_us = self.timebase.now_us();

            self.stats.transitions += self.registry.fire_all() as u64;
            for (handle, fsm) in self.registry.iter_mut() {
                if fsm.new_measurement_ready() {
                    let reading = fsm.read_distance();
                    self.stats.measurements += 1;
                    on_measurement(handle, reading);
                }
            }
            self.registry.advance_all(cycle_us);

            let cycle_duration_us = self.timebase.now_us().saturating_sub(cycle_start_us);
            let jitter_us = cycle_duration_us.saturating_sub(cycle_us);
            self.stats.max_jitter_us = self.stats.max_jitter_us.max(jitter_us);
            self.stats.cycles_executed += 1;

            next_cycle_us += cycle_us;
        }

        debug!(
            "poll loop finished after {} cycles ({} missed)",
            self.stats.cycles_executed, self.stats.cycles_missed
        );
    }

    fn emergency_stop(&mut self) {
        self.stats.watchdog_tripped = true;
        for (_, fsm) in self.registry.iter_mut() {
            fsm.stop();
        }
    }

    /// Number of sensors currently inside a ranging cycle.
    pub fn busy_sensors(&self) -> usize {
        self.registry
            .iter()
            .filter(|(_, fsm)| fsm.check_activity())
            .count()
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn registry(&self) -> &SensorRegistry<P> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SensorRegistry<P> {
        &mut self.registry
    }

    pub fn into_registry(self) -> SensorRegistry<P> {
        self.registry
    }
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::config::UltrasoundConfig;
    use crate::hal::PortBinding;
    use crate::hal_sim::{SimTarget, SimulatedTransducer};

    fn unpaced(cycles: u64) -> PollConfig {
        PollConfig {
            cycle_time: Duration::from_micros(1),
            pace: false,
            max_cycles: Some(cycles),
            ..Default::default()
        }
    }

    fn raw_config() -> UltrasoundConfig {
        UltrasoundConfig {
            median_window: 1,
            ..Default::default()
        }
    }

    #[test]
    fn delivers_measurements_from_every_sensor() {
        let mut reg = SensorRegistry::with_capacity(2);
        let near = reg
            .create(
                SimulatedTransducer::new(SimTarget::At(30.0)),
                PortBinding::new(0, 1),
                raw_config(),
            )
            .unwrap();
        let far = reg
            .create(
                SimulatedTransducer::new(SimTarget::At(180.0)),
                PortBinding::new(2, 3),
                raw_config(),
            )
            .unwrap();
        for (_, fsm) in reg.iter_mut() {
            fsm.start();
        }

        // Two full measurement periods of simulated time.
        let mut poll = PollLoop::new(reg, unpaced(200_000), TimeBase::new());
        let mut seen: Vec<(SensorHandle, Reading)> = Vec::new();
        poll.run_with(&AtomicBool::new(false), |h, r| seen.push((h, r)));

        assert_eq!(poll.stats().cycles_executed, 200_000);
        assert_eq!(poll.stats().measurements, 4);
        let near_cm: Vec<f64> = seen
            .iter()
            .filter(|(h, _)| *h == near)
            .filter_map(|(_, r)| r.cm())
            .collect();
        let far_cm: Vec<f64> = seen
            .iter()
            .filter(|(h, _)| *h == far)
            .filter_map(|(_, r)| r.cm())
            .collect();
        assert_eq!(near_cm.len(), 2);
        assert_eq!(far_cm.len(), 2);
        assert!(near_cm.iter().all(|cm| (cm - 30.0).abs() < 0.1));
        assert!(far_cm.iter().all(|cm| (cm - 180.0).abs() < 0.1));
    }

    #[test]
    fn stop_flag_ends_loop_immediately() {
        let reg: SensorRegistry<SimulatedTransducer> = SensorRegistry::with_capacity(1);
        let mut poll = PollLoop::new(reg, unpaced(10), TimeBase::new());
        poll.run(&AtomicBool::new(true));
        assert_eq!(poll.stats().cycles_executed, 0);
    }

    #[test]
    fn idle_sensors_are_not_busy() {
        let mut reg = SensorRegistry::with_capacity(1);
        reg.create(
            SimulatedTransducer::default(),
            PortBinding::new(0, 1),
            raw_config(),
        )
        .unwrap();
        let mut poll = PollLoop::new(reg, unpaced(100), TimeBase::new());
        poll.run(&AtomicBool::new(false));
        assert_eq!(poll.busy_sensors(), 0);
        assert_eq!(poll.stats().transitions, 0);
    }

    #[test]
    fn stalled_cycle_trips_watchdog() {
        let mut reg = SensorRegistry::with_capacity(1);
        let handle = reg
            .create(
                SimulatedTransducer::new(SimTarget::At(20.0)),
                PortBinding::new(0, 1),
                raw_config(),
            )
            .unwrap();
        reg.get_mut(handle).unwrap().start();

        let config = PollConfig {
            cycle_time: Duration::from_micros(1),
            pace: true,
            max_cycles: Some(1_000_000),
            watchdog_timeout: Duration::from_millis(1),
        };
        let mut poll = PollLoop::new(reg, config, TimeBase::new());
        poll.run_with(&AtomicBool::new(false), |_, _| {
            std::thread::sleep(Duration::from_millis(5));
        });

        assert!(poll.stats().watchdog_tripped);
        assert!(poll.stats().measurements <= 1);
        assert!(poll.stats().cycles_executed < 1_000_000);
        assert!(!poll.registry().get(handle).unwrap().is_active());
    }
}
