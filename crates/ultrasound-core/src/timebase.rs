use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since Unix epoch, for run reports only.
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }

    /// Busy-waits until `deadline_us` on this time base.
    pub fn spin_until(&self, deadline_us: u64) {
        while self.now_us() < deadline_us {
            std::hint::spin_loop();
        }
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
