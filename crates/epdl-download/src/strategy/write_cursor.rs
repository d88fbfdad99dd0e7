//! Reordering buffer for out-of-order segment completion.

use std::collections::BTreeMap;

/// Holds completed segments until every earlier index has been released.
///
/// `pop_ready` yields entries strictly in index order, so the consumer can
/// append them to a file and the result is the ordered concatenation of all
/// segments no matter which order they completed in.
#[derive(Debug)]
pub struct WriteCursor<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> WriteCursor<T> {
    pub const fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Park a completed segment. Indices already released are ignored.
    pub fn insert(&mut self, index: usize, value: T) {
        if index >= self.next {
            self.pending.insert(index, value);
        }
    }

    /// Next segment in order, if it has completed.
    pub fn pop_ready(&mut self) -> Option<T> {
        let value = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(value)
    }
}

impl<T> Default for WriteCursor<T> {
    fn default() -> Self {
        Self::new()
    }
}
