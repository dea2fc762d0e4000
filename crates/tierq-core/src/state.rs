use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::api::{Entry, EntryId, TierCounts};
use crate::error::GateError;

/// Pending entries kept sorted by (priority, enqueued_at).
///
/// Insertion is a linear scan from the front; queues here hold tens of
/// entries, not thousands.
#[derive(Debug)]
pub(crate) struct WaitingList<T> {
    entries: VecDeque<Entry<T>>,
}

impl<T> WaitingList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts before the first entry that sorts strictly after `entry`, so
    /// equal keys keep arrival order.
    pub(crate) fn insert(&mut self, entry: Entry<T>) {
        let at = self
            .entries
            .iter()
            .position(|existing| existing.sorts_after(&entry))
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Entry<T>> {
        self.entries.pop_front()
    }

    pub(crate) fn remove_by_requester(&mut self, requester: &str) -> Option<Entry<T>> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.requester.as_str() == requester)?;
        self.entries.remove(idx)
    }

    pub(crate) fn remove_by_id(&mut self, id: &EntryId) -> Option<Entry<T>> {
        let idx = self.entries.iter().position(|entry| &entry.id == id)?;
        self.entries.remove(idx)
    }

    /// 1-based.
    pub(crate) fn position_of(&self, requester: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.requester.as_str() == requester)
            .map(|idx| idx + 1)
    }

    /// 1-based.
    pub(crate) fn position_of_entry(&self, id: &EntryId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| &entry.id == id)
            .map(|idx| idx + 1)
    }

    pub(crate) fn tier_counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for entry in &self.entries {
            counts.bump(entry.tier);
        }
        counts
    }

    pub(crate) fn oldest_wait(&self, now: Instant) -> Duration {
        self.entries
            .front()
            .map(|entry| now.saturating_duration_since(entry.enqueued_at))
            .unwrap_or_default()
    }

    pub(crate) fn drain(&mut self) -> Vec<Entry<T>> {
        self.entries.drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter()
    }
}

/// Bounds how many entries run at once.
#[derive(Debug)]
pub(crate) struct Gate {
    capacity: usize,
    running: HashSet<EntryId>,
}

impl Gate {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            running: HashSet::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn running(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.running.len() < self.capacity
    }

    pub(crate) fn acquire(&mut self, id: EntryId) -> Result<(), GateError> {
        if !self.has_capacity() {
            return Err(GateError::Saturated {
                capacity: self.capacity,
            });
        }
        if self.running.contains(&id) {
            return Err(GateError::AlreadyRunning(id));
        }
        self.running.insert(id);
        Ok(())
    }

    pub(crate) fn release(&mut self, id: &EntryId) -> Result<(), GateError> {
        if self.running.remove(id) {
            Ok(())
        } else {
            Err(GateError::NotRunning(id.clone()))
        }
    }
}

/// Exponentially weighted moving average of processing time, in seconds.
#[derive(Debug)]
pub(crate) struct Estimator {
    average_secs: f64,
    smoothing: f64,
}

impl Estimator {
    pub(crate) fn new(seed_secs: f64, smoothing: f64) -> Self {
        Self {
            average_secs: seed_secs,
            smoothing: smoothing.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }

    pub(crate) fn average_secs(&self) -> f64 {
        self.average_secs
    }

    pub(crate) fn record(&mut self, observed: Duration) {
        let observed = observed.as_secs_f64();
        self.average_secs = (1.0 - self.smoothing) * self.average_secs + self.smoothing * observed;
    }
}
