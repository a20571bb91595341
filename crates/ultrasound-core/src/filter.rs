use crate::distance::Reading;
use std::collections::VecDeque;

/// Sliding median over the most recent readings.
///
/// `NoEcho` ranks above every distance, so isolated dropouts are voted out
/// while a persistent loss of echo still surfaces once it holds the majority.
/// With an even number of samples the lower middle is reported.
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: usize,
    samples: VecDeque<Reading>,
}

impl MedianFilter {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Adds a sample and returns the median of the window.
    pub fn push(&mut self, reading: Reading) -> Reading {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(reading);
        self.median()
    }

    pub fn median(&self) -> Reading {
        let mut sorted: Vec<Reading> = self.samples.iter().copied().collect();
        sorted.sort_by(Reading::cmp_range);
        match sorted.len() {
            0 => Reading::NoEcho,
            n => sorted[(n - 1) / 2],
        }
    }
}
