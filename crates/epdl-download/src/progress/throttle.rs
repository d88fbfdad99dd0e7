//! Progress throttling.
//!
//! Rate-limits progress output per download so a terminal or UI is not
//! flooded when several items report at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use epdl_core::DownloadKey;

/// Per-item rate limiter for progress updates.
pub struct ProgressThrottle {
    last_emit: HashMap<DownloadKey, Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: HashMap::new(),
            min_interval,
        }
    }

    /// Check if enough time has passed to emit another update for `key`.
    pub fn should_emit(&mut self, key: DownloadKey) -> bool {
        self.should_emit_at(key, Instant::now())
    }

    pub fn should_emit_at(&mut self, key: DownloadKey, now: Instant) -> bool {
        match self.last_emit.get(&key) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => false,
            _ => {
                self.last_emit.insert(key, now);
                true
            }
        }
    }

    /// Forget `key` so its next update is emitted immediately.
    pub fn reset(&mut self, key: DownloadKey) {
        self.last_emit.remove(&key);
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epdl_core::{AnimeId, EpisodeId};

    fn key(episode: i64) -> DownloadKey {
        DownloadKey::new(AnimeId(1), EpisodeId(episode))
    }

    #[test]
    fn first_update_per_key_is_emitted() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(throttle.should_emit_at(key(1), now));
        assert!(throttle.should_emit_at(key(2), now));
        assert!(!throttle.should_emit_at(key(1), now + Duration::from_millis(10)));
    }

    #[test]
    fn interval_is_respected() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        let now = Instant::now();
        assert!(throttle.should_emit_at(key(1), now));
        assert!(!throttle.should_emit_at(key(1), now + Duration::from_millis(20)));
        assert!(throttle.should_emit_at(key(1), now + Duration::from_millis(60)));
    }

    #[test]
    fn reset_allows_immediate_emit() {
        let mut throttle = ProgressThrottle::default();
        let now = Instant::now();
        throttle.should_emit_at(key(1), now);
        throttle.reset(key(1));
        assert!(throttle.should_emit_at(key(1), now));
    }
}
