//! Transfer rate estimation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: usize = 5;
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Moving average over the last few byte-rate samples.
///
/// A sample is taken at most every 500 ms; calls in between return the
/// current average unchanged.
#[derive(Debug)]
pub struct SpeedMeter {
    samples: VecDeque<f64>,
    last_bytes: u64,
    last_time: Instant,
}

impl SpeedMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    #[must_use]
    pub fn starting_at(now: Instant) -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            last_bytes: 0,
            last_time: now,
        }
    }

    /// Record the cumulative byte count observed at `now` and return the
    /// averaged rate in bytes per second.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, total_bytes: u64, now: Instant) -> f64 {
        if total_bytes < self.last_bytes {
            // A new attempt restarted the counter.
            self.samples.clear();
            self.last_bytes = total_bytes;
            self.last_time = now;
            return 0.0;
        }

        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed >= MIN_SAMPLE_INTERVAL {
            let rate = (total_bytes - self.last_bytes) as f64 / elapsed.as_secs_f64();
            if self.samples.len() == WINDOW {
                self.samples.pop_front();
            }
            self.samples.push_back(rate);
            self.last_bytes = total_bytes;
            self.last_time = now;
        }
        self.average()
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a byte rate the way the queue UI displays it.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    if bytes_per_sec >= MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{} B/s", bytes_per_sec.max(0.0) as u64)
    }
}
