//! Worker-side progress sink.
//!
//! Strategies write progress through a [`ProgressReporter`]; the bridge task
//! owns the receiving end and turns snapshots into events.

use std::sync::Arc;

use tokio::sync::watch;

/// Progress snapshot sent through the watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub downloaded_segments: Option<u32>,
    pub total_segments: Option<u32>,
    /// Percent reported directly by the strategy (remux sessions).
    pub explicit_percent: Option<u8>,
    /// Monotonically increasing sequence number for change detection.
    pub seq: u64,
}

impl ProgressUpdate {
    /// Percent complete, derived from the most specific source available.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if let Some(percent) = self.explicit_percent {
            return percent.min(100);
        }
        if let (Some(done), Some(total)) = (self.downloaded_segments, self.total_segments) {
            return ratio_percent(u64::from(done), u64::from(total));
        }
        match self.total_bytes {
            Some(total) => ratio_percent(self.downloaded_bytes, total),
            None => 0,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ratio_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.min(total) * 100 / total) as u8
}

/// Cloneable handle strategies use to publish progress.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<ProgressUpdate>) {
        let (tx, rx) = watch::channel(ProgressUpdate::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// A reporter nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self::channel().0
    }

    fn modify(&self, f: impl FnOnce(&mut ProgressUpdate)) {
        self.tx.send_modify(|state| {
            f(state);
            state.seq += 1;
        });
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.modify(|s| s.downloaded_bytes += bytes);
    }

    pub fn set_total_bytes(&self, total: Option<u64>) {
        self.modify(|s| s.total_bytes = total);
    }

    pub fn set_segments(&self, done: u32, total: u32) {
        self.modify(|s| {
            s.downloaded_segments = Some(done);
            s.total_segments = Some(total);
        });
    }

    pub fn set_percent(&self, percent: u8) {
        self.modify(|s| s.explicit_percent = Some(percent.min(100)));
    }

    /// Set the absolute byte count (remux reports totals, not deltas).
    pub fn set_bytes(&self, downloaded: u64) {
        self.modify(|s| s.downloaded_bytes = downloaded);
    }

    /// Forget a previous attempt's progress.
    pub fn reset(&self) {
        self.modify(|s| {
            let seq = s.seq;
            *s = ProgressUpdate {
                seq,
                ..ProgressUpdate::default()
            };
        });
    }

    #[must_use]
    pub fn current(&self) -> ProgressUpdate {
        self.tx.borrow().clone()
    }
}
