use crate::config::UltrasoundConfig;
use crate::distance::{clamp_to_range, pulse_to_distance_cm, Reading};
use crate::error::UltrasoundError;
use crate::filter::MedianFilter;
use crate::hal::{Level, PortBinding, UltrasoundPort};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UltrasoundState {
    #[default]
    WaitStart,
    TriggerStart,
    WaitEchoStart,
    WaitEchoEnd,
    SetDistance,
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize)]
pub struct MeasurementStats {
    pub cycles_completed: u64,
    pub echoes_timed: u64,
    pub echo_start_timeouts: u64,
    pub echo_end_timeouts: u64,
    pub out_of_range: u64,
    /// Cycles discarded because the machine was stopped while timing them.
    pub interrupted: u64,
}

/// Ranging state machine for one trigger/echo transducer.
///
/// The machine never blocks: every call to [`UltrasoundFsm::fire`] samples the
/// port once and takes at most one transition. Waiting states are bounded by
/// timeouts, so a lost echo ends the cycle with [`Reading::NoEcho`] instead of
/// stalling it.
pub struct UltrasoundFsm<P: UltrasoundPort> {
    port: P,
    binding: PortBinding,
    config: UltrasoundConfig,
    state: UltrasoundState,
    active: bool,
    status: u32,
    distance: Reading,
    new_measurement_ready: bool,
    trigger_start_us: u64,
    echo_start_us: u64,
    next_trigger_us: u64,
    last_tick_us: u64,
    pending: Reading,
    interrupted: bool,
    filter: MedianFilter,
    stats: MeasurementStats,
}

impl<P: UltrasoundPort> UltrasoundFsm<P> {
    pub fn new(
        mut port: P,
        binding: PortBinding,
        config: UltrasoundConfig,
    ) -> Result<Self, UltrasoundError> {
        config.validate()?;
        port.set_trigger(Level::Low);
        let last_tick_us = port.now_us();
        Ok(Self {
            port,
            binding,
            filter: MedianFilter::new(config.median_window),
            config,
            state: UltrasoundState::WaitStart,
            active: false,
            status: 0,
            distance: Reading::NoEcho,
            new_measurement_ready: false,
            trigger_start_us: 0,
            echo_start_us: 0,
            next_trigger_us: last_tick_us,
            last_tick_us,
            pending: Reading::NoEcho,
            interrupted: false,
            stats: MeasurementStats::default(),
        })
    }

    /// Releases the instance, leaving the trigger line low.
    pub fn destroy(mut self) -> P {
        self.port.set_trigger(Level::Low);
        debug!("ultrasound {}: destroyed", self.binding);
        self.port
    }

    pub fn start(&mut self) {
        if !self.active {
            debug!("ultrasound {}: start in {:?}", self.binding, self.state);
        }
        self.active = true;
    }

    /// Pauses the machine. State and last distance are kept.
    ///
    /// Edges on the echo line go unseen while stopped, so a cycle paused
    /// between trigger and echo end is finished as [`Reading::NoEcho`].
    pub fn stop(&mut self) {
        if self.active {
            debug!("ultrasound {}: stop in {:?}", self.binding, self.state);
        }
        if matches!(
            self.state,
            UltrasoundState::TriggerStart
                | UltrasoundState::WaitEchoStart
                | UltrasoundState::WaitEchoEnd
        ) {
            self.interrupted = true;
        }
        self.active = false;
        self.port.set_trigger(Level::Low);
    }

    /// Samples the port and advances the machine.
    pub fn fire(&mut self) -> bool {
        let now_us = self.port.now_us();
        let echo = self.port.read_echo();
        self.step(now_us, echo)
    }

    /// Advances by at most one transition. Returns whether a transition was taken.
    pub fn step(&mut self, now_us: u64, echo: Level) -> bool {
        self.last_tick_us = now_us;
        if !self.active {
            return false;
        }

        let next = match self.state {
            UltrasoundState::WaitStart => {
                if now_us < self.next_trigger_us {
                    return false;
                }
                self.trigger_start_us = now_us;
                self.port.set_trigger(Level::High);
                UltrasoundState::TriggerStart
            }
            UltrasoundState::TriggerStart => {
                if now_us.saturating_sub(self.trigger_start_us) < self.config.trigger_pulse_us {
                    return false;
                }
                self.port.set_trigger(Level::Low);
                UltrasoundState::WaitEchoStart
            }
            UltrasoundState::WaitEchoStart => {
                if echo.is_high() {
                    self.echo_start_us = now_us;
                    UltrasoundState::WaitEchoEnd
                } else if now_us.saturating_sub(self.trigger_start_us)
                    >= self.config.echo_start_timeout_us
                {
                    warn!(
                        "ultrasound {}: no echo within {} us",
                        self.binding, self.config.echo_start_timeout_us
                    );
                    self.stats.echo_start_timeouts += 1;
                    self.pending = Reading::NoEcho;
                    UltrasoundState::SetDistance
                } else {
                    return false;
                }
            }
            UltrasoundState::WaitEchoEnd => {
                let pulse_us = now_us.saturating_sub(self.echo_start_us);
                if pulse_us >= self.config.echo_window_us {
                    warn!(
                        "ultrasound {}: echo still high after {} us",
                        self.binding, pulse_us
                    );
                    self.stats.echo_end_timeouts += 1;
                    self.pending = Reading::NoEcho;
                    UltrasoundState::SetDistance
                } else if !echo.is_high() {
                    self.pending = if self.interrupted {
                        Reading::NoEcho
                    } else {
                        self.convert(pulse_us)
                    };
                    UltrasoundState::SetDistance
                } else {
                    return false;
                }
            }
            UltrasoundState::SetDistance => {
                self.publish();
                UltrasoundState::WaitStart
            }
        };

        trace!("ultrasound {}: {:?} -> {:?}", self.binding, self.state, next);
        self.state = next;
        true
    }

    fn convert(&mut self, pulse_us: u64) -> Reading {
        self.stats.echoes_timed += 1;
        let raw_cm = pulse_to_distance_cm(pulse_us, self.config.speed_of_sound_m_s);
        let (cm, clamped) =
            clamp_to_range(raw_cm, self.config.min_range_cm, self.config.max_range_cm);
        if clamped {
            self.stats.out_of_range += 1;
        }
        Reading::Distance(cm)
    }

    fn publish(&mut self) {
        if self.interrupted {
            warn!("ultrasound {}: cycle paused mid-echo, discarded", self.binding);
            self.interrupted = false;
            self.stats.interrupted += 1;
            self.pending = Reading::NoEcho;
        }
        self.distance = self.filter.push(self.pending);
        self.new_measurement_ready = true;
        self.next_trigger_us = self
            .trigger_start_us
            .saturating_add(self.config.measurement_period_us);
        self.stats.cycles_completed += 1;
        debug!(
            "ultrasound {}: sample {:?}, published {:?}",
            self.binding, self.pending, self.distance
        );
    }

    /// Returns the last published distance and clears the ready flag.
    pub fn read_distance(&mut self) -> Reading {
        self.new_measurement_ready = false;
        self.distance
    }

    /// Returns the last published distance without consuming it.
    pub fn last_distance(&self) -> Reading {
        self.distance
    }

    pub fn new_measurement_ready(&self) -> bool {
        self.new_measurement_ready
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn set_status(&mut self, status: u32) {
        self.status = status;
    }

    /// True while a ranging cycle is in progress, paused or not.
    pub fn check_activity(&self) -> bool {
        self.state != UltrasoundState::WaitStart
    }

    /// True when the quiet interval has elapsed and a new trigger may be issued.
    pub fn is_ready(&self) -> bool {
        self.state == UltrasoundState::WaitStart && self.last_tick_us >= self.next_trigger_us
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> UltrasoundState {
        self.state
    }

    pub fn stats(&self) -> &MeasurementStats {
        &self.stats
    }

    pub fn binding(&self) -> PortBinding {
        self.binding
    }

    pub fn config(&self) -> &UltrasoundConfig {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    /// Port that records trigger writes; time and echo come from `step` arguments.
    #[derive(Default)]
    struct ScriptedPort {
        trigger: Level,
        rising_edges: u32,
    }

    impl UltrasoundPort for ScriptedPort {
        fn set_trigger(&mut self, level: Level) {
            if level == Level::High && self.trigger == Level::Low {
                self.rising_edges += 1;
            }
            self.trigger = level;
        }

        fn read_echo(&mut self) -> Level {
            Level::Low
        }

        fn now_us(&self) -> u64 {
            0
        }
    }

    fn raw_config() -> UltrasoundConfig {
        UltrasoundConfig {
            median_window: 1,
            ..Default::default()
        }
    }

    fn fsm() -> UltrasoundFsm<ScriptedPort> {
        UltrasoundFsm::new(ScriptedPort::default(), PortBinding::new(0, 1), raw_config()).unwrap()
    }

    #[test]
    fn new_instance_is_idle() {
        let fsm = fsm();
        assert_eq!(fsm.state(), UltrasoundState::WaitStart);
        assert!(!fsm.is_active());
        assert!(!fsm.new_measurement_ready());
        assert!(!fsm.check_activity());
        assert_eq!(fsm.last_distance(), Reading::NoEcho);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = UltrasoundConfig {
            echo_window_us: 0,
            ..Default::default()
        };
        let res = UltrasoundFsm::new(ScriptedPort::default(), PortBinding::new(0, 1), cfg);
        assert!(matches!(
            res,
            Err(UltrasoundError::InvalidConfig(ConfigError::Zero { .. }))
        ));
    }

    #[test]
    fn stopped_machine_ignores_steps() {
        let mut fsm = fsm();
        for t in 0..1_000u64 {
            let echo = Level::from(t % 3 == 0);
            assert!(!fsm.step(t * 50, echo));
        }
        assert_eq!(fsm.state(), UltrasoundState::WaitStart);
        assert_eq!(fsm.port().rising_edges, 0);
    }

    #[test]
    fn nominal_cycle_publishes_once() {
        let mut fsm = fsm();
        fsm.start();

        assert!(fsm.step(0, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::TriggerStart);
        assert_eq!(fsm.port().trigger, Level::High);

        assert!(!fsm.step(5, Level::Low));
        assert!(fsm.step(10, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::WaitEchoStart);
        assert_eq!(fsm.port().trigger, Level::Low);

        assert!(!fsm.step(200, Level::Low));
        assert!(fsm.step(300, Level::High));
        assert_eq!(fsm.state(), UltrasoundState::WaitEchoEnd);

        assert!(!fsm.step(1_000, Level::High));
        assert!(fsm.step(1_476, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::SetDistance);
        assert!(!fsm.new_measurement_ready());
        assert_eq!(fsm.last_distance(), Reading::NoEcho);

        assert!(fsm.step(1_477, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::WaitStart);
        assert!(fsm.new_measurement_ready());

        let cm = fsm.read_distance().cm().unwrap();
        assert!((cm - 20.1684).abs() < 1e-3, "got {cm}");
        assert!(!fsm.new_measurement_ready());
        assert_eq!(fsm.stats().cycles_completed, 1);
        assert_eq!(fsm.stats().echoes_timed, 1);
    }

    #[test]
    fn next_trigger_waits_for_quiet_interval() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        fsm.step(10, Level::Low);
        fsm.step(300, Level::High);
        fsm.step(1_476, Level::Low);
        fsm.step(1_477, Level::Low);
        assert!(!fsm.is_ready());

        assert!(!fsm.step(99_999, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::WaitStart);
        assert!(fsm.step(100_000, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::TriggerStart);
        assert_eq!(fsm.port().rising_edges, 2);
    }

    #[test]
    fn missing_echo_times_out_to_sentinel() {
        let mut fsm = fsm();
        fsm.start();
        let timeout = fsm.config().echo_start_timeout_us;
        let mut t = 0;
        while fsm.state() != UltrasoundState::SetDistance {
            fsm.step(t, Level::Low);
            t += 100;
            assert!(t <= timeout + 200, "stuck in {:?}", fsm.state());
        }
        fsm.step(t, Level::Low);
        assert_eq!(fsm.read_distance(), Reading::NoEcho);
        assert_eq!(fsm.stats().echo_start_timeouts, 1);
    }

    #[test]
    fn stuck_echo_times_out_to_sentinel() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        fsm.step(10, Level::Low);
        fsm.step(300, Level::High);
        assert!(!fsm.step(300 + 37_999, Level::High));
        assert!(fsm.step(300 + 38_000, Level::High));
        assert_eq!(fsm.state(), UltrasoundState::SetDistance);
        fsm.step(300 + 38_001, Level::High);
        assert_eq!(fsm.last_distance(), Reading::NoEcho);
        assert_eq!(fsm.stats().echo_end_timeouts, 1);
    }

    #[test]
    fn short_pulse_clamps_to_minimum_range() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        fsm.step(10, Level::Low);
        fsm.step(300, Level::High);
        fsm.step(310, Level::Low);
        fsm.step(311, Level::Low);
        assert_eq!(fsm.last_distance(), Reading::Distance(2.0));
        assert_eq!(fsm.stats().out_of_range, 1);
    }

    #[test]
    fn pause_resumes_from_same_state() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        fsm.step(10, Level::Low);
        fsm.step(300, Level::High);
        assert_eq!(fsm.state(), UltrasoundState::WaitEchoEnd);

        fsm.stop();
        assert!(!fsm.step(500, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::WaitEchoEnd);
        assert!(fsm.check_activity());

        fsm.start();
        assert_eq!(fsm.state(), UltrasoundState::WaitEchoEnd);
        assert!(fsm.step(600, Level::Low));
        assert_eq!(fsm.state(), UltrasoundState::SetDistance);
    }

    #[test]
    fn echo_timed_across_a_pause_is_discarded() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        fsm.step(10, Level::Low);
        fsm.step(300, Level::High);
        fsm.stop();
        fsm.start();
        fsm.step(10_300, Level::Low);
        fsm.step(10_301, Level::Low);

        assert!(fsm.new_measurement_ready());
        assert_eq!(fsm.read_distance(), Reading::NoEcho);
        assert_eq!(fsm.stats().interrupted, 1);
        assert_eq!(fsm.stats().echoes_timed, 0);

        // The following cycle is timed normally again.
        let t0 = fsm.config().measurement_period_us;
        let script = [
            (t0, false),
            (t0 + 10, false),
            (t0 + 300, true),
            (t0 + 1_476, false),
            (t0 + 1_477, false),
        ];
        for (t, echo) in script {
            fsm.step(t, Level::from(echo));
        }
        assert!(fsm.read_distance().is_echo());
        assert_eq!(fsm.stats().interrupted, 1);
    }

    #[test]
    fn pause_before_trigger_is_not_discarded() {
        let mut fsm = fsm();
        fsm.stop();
        fsm.start();
        for (t, echo) in [(0, false), (10, false), (300, true), (1_476, false), (1_477, false)] {
            fsm.step(t, Level::from(echo));
        }
        assert!(fsm.read_distance().is_echo());
        assert_eq!(fsm.stats().interrupted, 0);
    }

    #[test]
    fn stop_keeps_last_distance() {
        let mut fsm = fsm();
        fsm.start();
        for (t, echo) in [(0, false), (10, false), (300, true), (1_476, false), (1_477, false)] {
            fsm.step(t, Level::from(echo));
        }
        let before = fsm.last_distance();
        fsm.stop();
        fsm.start();
        assert_eq!(fsm.last_distance(), before);
        assert!(fsm.new_measurement_ready());
    }

    #[test]
    fn status_round_trips_in_every_state() {
        let mut fsm = fsm();
        fsm.start();
        let script = [(0, false), (10, false), (300, true), (1_476, false), (1_477, false)];
        for (i, (t, echo)) in script.into_iter().enumerate() {
            let tag = 0xA5A5_0000 | i as u32;
            fsm.set_status(tag);
            assert_eq!(fsm.status(), tag);
            fsm.step(t, Level::from(echo));
            assert_eq!(fsm.status(), tag);
        }
    }

    #[test]
    fn destroy_releases_trigger() {
        let mut fsm = fsm();
        fsm.start();
        fsm.step(0, Level::Low);
        assert_eq!(fsm.port().trigger, Level::High);
        let port = fsm.destroy();
        assert_eq!(port.trigger, Level::Low);
    }

    #[cfg(feature = "simulation")]
    mod simulated {
        use super::*;
        use crate::hal_sim::{SimTarget, SimulatedTransducer};

        fn run_until_ready(fsm: &mut UltrasoundFsm<SimulatedTransducer>, budget_us: u64) {
            for _ in 0..budget_us {
                fsm.fire();
                if fsm.new_measurement_ready() {
                    return;
                }
                fsm.port_mut().advance(1);
            }
            panic!("no measurement within {budget_us} us");
        }

        #[test]
        fn measures_simulated_target() {
            let sim = SimulatedTransducer::new(SimTarget::At(75.0));
            let mut fsm = UltrasoundFsm::new(sim, PortBinding::new(2, 3), raw_config()).unwrap();
            fsm.start();
            run_until_ready(&mut fsm, 50_000);
            let cm = fsm.read_distance().cm().unwrap();
            assert!((cm - 75.0).abs() < 0.1, "got {cm}");
        }

        #[test]
        fn pause_while_echo_high_publishes_no_echo() {
            let sim = SimulatedTransducer::new(SimTarget::At(20.0));
            let mut fsm = UltrasoundFsm::new(sim, PortBinding::new(2, 3), raw_config()).unwrap();
            fsm.start();
            while fsm.state() != UltrasoundState::WaitEchoEnd {
                fsm.fire();
                fsm.port_mut().advance(1);
            }
            fsm.stop();
            fsm.port_mut().advance(10_000);
            fsm.start();
            run_until_ready(&mut fsm, 50_000);
            assert_eq!(fsm.read_distance(), Reading::NoEcho);
            assert_eq!(fsm.stats().interrupted, 1);
        }

        #[test]
        fn beyond_range_reports_no_echo() {
            let sim = SimulatedTransducer::new(SimTarget::Beyond);
            let mut fsm = UltrasoundFsm::new(sim, PortBinding::new(2, 3), raw_config()).unwrap();
            fsm.start();
            run_until_ready(&mut fsm, 80_000);
            assert_eq!(fsm.read_distance(), Reading::NoEcho);
            assert_eq!(fsm.stats().echo_end_timeouts, 1);
        }

        #[test]
        fn disconnected_sensor_does_not_stall() {
            let mut sim = SimulatedTransducer::new(SimTarget::At(40.0));
            sim.set_connected(false);
            let mut fsm = UltrasoundFsm::new(sim, PortBinding::new(2, 3), raw_config()).unwrap();
            fsm.start();
            for _ in 0..3 {
                run_until_ready(&mut fsm, 200_000);
                assert_eq!(fsm.read_distance(), Reading::NoEcho);
            }
            assert_eq!(fsm.stats().echo_start_timeouts, 3);
        }

        #[test]
        fn median_filter_hides_a_single_dropout() {
            let cfg = UltrasoundConfig {
                median_window: 3,
                ..Default::default()
            };
            let sim = SimulatedTransducer::new(SimTarget::At(60.0));
            let mut fsm = UltrasoundFsm::new(sim, PortBinding::new(2, 3), cfg).unwrap();
            fsm.start();
            for _ in 0..2 {
                run_until_ready(&mut fsm, 200_000);
                fsm.read_distance();
            }
            fsm.port_mut().set_target(SimTarget::Silent);
            run_until_ready(&mut fsm, 200_000);
            let cm = fsm.read_distance().cm().unwrap();
            assert!((cm - 60.0).abs() < 0.1, "got {cm}");
        }
    }
}
