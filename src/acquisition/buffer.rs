use std::collections::VecDeque;
use std::sync::Mutex;

use crate::acquisition::Sample;

/// Shared sliding window of recently published samples.
///
/// The recording path appends, the prediction path reads and truncates. Both
/// go through one mutex so a drain never races an append and the length used
/// for the trigger decision always matches the backing sequence.
pub struct RollingBuffer {
    inner: Mutex<VecDeque<Sample>>,
}

impl RollingBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Appends one sample. If the window has reached `trigger_size`, takes a
    /// snapshot of the full buffer, drains the `evict` oldest entries and
    /// returns the snapshot for inference.
    ///
    /// Snapshot, eviction count and drain all happen under one lock
    /// acquisition, so no concurrent publish can change the length between
    /// the trigger decision and the eviction. Fires at most once per call.
    pub fn publish_and_trigger(
        &self,
        sample: Sample,
        trigger_size: usize,
        evict: usize,
    ) -> Option<Vec<Sample>> {
        let mut queue = self.lock();
        queue.push_back(sample);
        if queue.len() < trigger_size {
            return None;
        }
        let snapshot: Vec<Sample> = queue.iter().cloned().collect();
        let evict = evict.min(queue.len());
        queue.drain(..evict);
        Some(snapshot)
    }

    /// Removes up to `n` of the oldest entries, returning how many were
    /// actually removed.
    pub fn drain_oldest(&self, n: usize) -> usize {
        let mut queue = self.lock();
        let n = n.min(queue.len());
        queue.drain(..n);
        n
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Sample>> {
        // A poisoned lock only happens if a holder panicked; the queue itself
        // is still structurally sound, so keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
