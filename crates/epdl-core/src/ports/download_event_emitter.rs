//! Download event emitter port.
//!
//! This port abstracts event delivery so the engine can notify observers
//! without coupling to a transport (terminal renderer, channel, UI bridge).

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::download::DownloadEvent;

/// Port for emitting download events.
///
/// Implementations must not block; the engine calls `emit` from inside
/// worker and scheduler tasks.
pub trait DownloadEventEmitterPort: Send + Sync {
    fn emit(&self, event: DownloadEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn DownloadEventEmitterPort>;
}

/// A no-op download event emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopDownloadEmitter;

impl NoopDownloadEmitter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DownloadEventEmitterPort for NoopDownloadEmitter {
    fn emit(&self, _event: DownloadEvent) {}

    fn clone_box(&self) -> Box<dyn DownloadEventEmitterPort> {
        Box::new(self.clone())
    }
}

/// Forwards events into an unbounded channel.
///
/// Used by the CLI to render progress on its own task. Events sent after
/// the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelDownloadEmitter {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelDownloadEmitter {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DownloadEventEmitterPort for ChannelDownloadEmitter {
    fn emit(&self, event: DownloadEvent) {
        let _ = self.tx.send(event);
    }

    fn clone_box(&self) -> Box<dyn DownloadEventEmitterPort> {
        Box::new(self.clone())
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingDownloadEmitter {
    events: Arc<Mutex<Vec<DownloadEvent>>>,
}

impl RecordingDownloadEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events matching a predicate.
    pub fn matching(&self, predicate: impl Fn(&DownloadEvent) -> bool) -> Vec<DownloadEvent> {
        self.events().into_iter().filter(|e| predicate(e)).collect()
    }
}

impl DownloadEventEmitterPort for RecordingDownloadEmitter {
    fn emit(&self, event: DownloadEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn clone_box(&self) -> Box<dyn DownloadEventEmitterPort> {
        Box::new(self.clone())
    }
}
