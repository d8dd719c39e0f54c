//! Process-wide adaptive ingestion chunk size.
//!
//! Starts at a configured default and only ever shrinks: every decode
//! failure or watchdog trip halves it down to [`MIN_CHUNK_SIZE`]. Sessions
//! in the same process share one instance, so a stall in one session slows
//! ingestion pacing in all of them.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Smallest chunk the pipeline will ever submit.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Default starting chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Debug)]
pub struct AdaptiveChunkSize {
    current: AtomicUsize,
    initial: usize,
}

impl AdaptiveChunkSize {
    /// Create with a starting size, floored at [`MIN_CHUNK_SIZE`].
    pub fn new(initial: usize) -> Self {
        let initial = initial.max(MIN_CHUNK_SIZE);
        Self { current: AtomicUsize::new(initial), initial }
    }

    pub fn get(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn at_floor(&self) -> bool {
        self.get() <= MIN_CHUNK_SIZE
    }

    /// Halve the chunk size, floor-clamped.
    ///
    /// Returns the new size if it shrank, `None` if it was already at the floor.
    pub fn degrade(&self) -> Option<usize> {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                let next = (cur / 2).max(MIN_CHUNK_SIZE);
                (next < cur).then_some(next)
            })
            .ok()?;
        let next = (previous / 2).max(MIN_CHUNK_SIZE);
        crate::telemetry::record_chunk_size(next);
        Some(next)
    }

    /// Restore the starting size. Only called on explicit reset.
    pub fn reset(&self) {
        self.current.store(self.initial, Ordering::SeqCst);
        crate::telemetry::record_chunk_size(self.initial);
    }
}

impl Default for AdaptiveChunkSize {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
