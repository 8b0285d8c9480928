//! Sliding-window throughput estimation

use std::collections::VecDeque;
use std::time::Instant;

pub const DEFAULT_WINDOW: usize = 30;

/// Frames-per-second estimator over the last `window` inter-frame intervals
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    window: usize,
    deltas: VecDeque<f64>,
    last: Option<Instant>,
}

impl ThroughputMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            deltas: VecDeque::with_capacity(window),
            last: None,
        }
    }

    /// Record a frame at the current time and return the estimated FPS
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Record a frame at `now`. The first tick has no interval and returns 0.0.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let Some(last) = self.last.replace(now) else {
            return 0.0;
        };

        if self.deltas.len() == self.window {
            self.deltas.pop_front();
        }
        self.deltas
            .push_back(now.saturating_duration_since(last).as_secs_f64());

        self.fps()
    }

    /// Current estimate without recording a frame
    pub fn fps(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }
        let avg = self.deltas.iter().sum::<f64>() / self.deltas.len() as f64;
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.deltas.clear();
        self.last = None;
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
