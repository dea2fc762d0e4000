use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::api::{
    CloseMode, Dispatch, EnqueueResult, Entry, EntryId, JobKind, LoadSnapshot, Outcome,
    QueueCounters, QueueStats, RejectReason, RequesterId, Tier,
};
use crate::config::QueueConfig;
use crate::error::{ConfigError, GateError};
use crate::state::{Estimator, Gate, WaitingList};

struct State<T> {
    waiting: WaitingList<T>,
    gate: Gate,
    estimator: Estimator,
    counters: QueueCounters,
    closed: bool,
}

/// Tier-ranked waiting list behind a bounded concurrency gate.
///
/// Every operation is a short synchronous step under one lock, so cancelling
/// and dispatching the same entry can never both succeed. Running the work is
/// left to the caller: [`Scheduler::try_dispatch`] hands out an entry with its
/// slot already taken and [`Scheduler::release`] gives the slot back.
pub struct Scheduler<T> {
    config: QueueConfig,
    state: Mutex<State<T>>,
}

impl<T> Scheduler<T> {
    /// Creates an empty, open scheduler. Fails if `config` does not validate.
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = State {
            waiting: WaitingList::new(),
            gate: Gate::new(config.capacity),
            estimator: Estimator::new(config.default_processing_secs, config.smoothing),
            counters: QueueCounters::default(),
            closed: false,
        };
        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Admits an entry into the waiting list at its tier's rank.
    ///
    /// A closed or full queue hands the payload back inside the result.
    pub fn enqueue(
        &self,
        requester: RequesterId,
        tier: Tier,
        kind: JobKind,
        payload: T,
    ) -> EnqueueResult<T> {
        let mut state = self.state.lock();

        if state.closed {
            return EnqueueResult::Closed(payload);
        }
        if let Some(max_waiting) = self.config.max_waiting {
            if state.waiting.len() >= max_waiting {
                state.counters.rejected += 1;
                debug!(%requester, %tier, max_waiting, "waiting list full, rejecting");
                return EnqueueResult::Rejected {
                    reason: RejectReason::QueueFull,
                    payload,
                };
            }
        }

        let id = EntryId::generate(&requester);
        let priority = tier.priority();
        debug!(entry = %id, %requester, %tier, %kind, priority = priority.rank(), "entry enqueued");
        state.waiting.insert(Entry {
            id: id.clone(),
            requester,
            tier,
            priority,
            kind,
            enqueued_at: Instant::now(),
            payload,
        });
        state.counters.enqueued += 1;

        EnqueueResult::Enqueued(id)
    }

    /// Pops the front waiting entry if the gate has room, taking its slot.
    pub fn try_dispatch(&self) -> Option<Dispatch<T>> {
        let mut state = self.state.lock();
        if !state.gate.has_capacity() {
            return None;
        }
        let entry = state.waiting.pop_front()?;
        if let Err(err) = state.gate.acquire(entry.id.clone()) {
            // Ids are unique and capacity was checked under the same lock.
            error!(error = %err, entry = %entry.id, "gate refused a checked acquire");
            debug_assert!(false, "gate refused a checked acquire: {err}");
            state.waiting.insert(entry);
            return None;
        }
        state.counters.dispatched += 1;

        let waited = entry.enqueued_at.elapsed();
        debug!(
            entry = %entry.id,
            tier = %entry.tier,
            waited_ms = waited.as_millis() as u64,
            running = state.gate.running(),
            "entry dispatched"
        );
        Some(Dispatch {
            id: entry.id,
            requester: entry.requester,
            tier: entry.tier,
            kind: entry.kind,
            waited,
            payload: entry.payload,
        })
    }

    /// Gives back the slot of a dispatched entry.
    ///
    /// `elapsed` feeds the moving average for finished (not aborted) work when
    /// `record_durations` is on.
    pub fn release(
        &self,
        id: &EntryId,
        outcome: Outcome,
        elapsed: Option<Duration>,
    ) -> Result<(), GateError> {
        let mut state = self.state.lock();
        if let Err(err) = state.gate.release(id) {
            error!(error = %err, "release without a matching acquire");
            return Err(err);
        }

        match outcome {
            Outcome::Succeeded => state.counters.succeeded += 1,
            Outcome::Failed => state.counters.failed += 1,
            Outcome::Aborted => state.counters.aborted += 1,
        }
        if self.config.record_durations && outcome != Outcome::Aborted {
            if let Some(elapsed) = elapsed {
                state.estimator.record(elapsed);
            }
        }
        debug!(entry = %id, ?outcome, running = state.gate.running(), "slot released");
        Ok(())
    }

    /// Removes the requester's earliest waiting entry. Running entries are
    /// never touched.
    pub fn cancel(&self, requester: &str) -> Option<Entry<T>> {
        let mut state = self.state.lock();
        let entry = state.waiting.remove_by_requester(requester)?;
        state.counters.cancelled += 1;
        debug!(entry = %entry.id, requester, "entry cancelled");
        Some(entry)
    }

    /// Removes one specific waiting entry.
    pub fn cancel_entry(&self, id: &EntryId) -> Option<Entry<T>> {
        let mut state = self.state.lock();
        let entry = state.waiting.remove_by_id(id)?;
        state.counters.cancelled += 1;
        debug!(entry = %entry.id, "entry cancelled");
        Some(entry)
    }

    /// 1-based position of the requester's earliest waiting entry.
    pub fn position_of(&self, requester: &str) -> Option<usize> {
        self.state.lock().waiting.position_of(requester)
    }

    /// 1-based position of one specific waiting entry.
    pub fn position_of_entry(&self, id: &EntryId) -> Option<usize> {
        self.state.lock().waiting.position_of_entry(id)
    }

    /// Feeds an externally measured duration into the moving average.
    pub fn report_duration(&self, observed: Duration) {
        self.state.lock().estimator.record(observed);
    }

    /// Current moving average of processing time.
    pub fn average_processing_time(&self) -> Duration {
        Duration::from_secs_f64(self.state.lock().estimator.average_secs().max(0.0))
    }

    /// Running entries against capacity.
    pub fn load(&self) -> LoadSnapshot {
        let state = self.state.lock();
        LoadSnapshot::new(state.gate.running(), state.gate.capacity())
    }

    /// Number of waiting entries.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Snapshot of the queue. With a requester, the position and wait
    /// estimate are computed for their earliest waiting entry.
    pub fn stats(&self, requester: Option<&str>) -> QueueStats {
        let state = self.state.lock();
        let total_waiting = state.waiting.len() as u64;
        let average = state.estimator.average_secs();
        let position = requester.and_then(|requester| state.waiting.position_of(requester));
        let estimated_wait_secs = match position {
            Some(position) => position as f64 * average,
            None => total_waiting as f64 * average,
        };

        QueueStats {
            total_waiting,
            per_tier: state.waiting.tier_counts(),
            estimated_wait_secs,
            position,
            average_processing_secs: average,
            oldest_wait_secs: state.waiting.oldest_wait(Instant::now()).as_secs_f64(),
            load: LoadSnapshot::new(state.gate.running(), state.gate.capacity()),
            counters: state.counters.clone(),
        }
    }

    /// Returns `true` once [`Scheduler::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Stops admitting work. In [`CloseMode::Immediate`] the waiting entries
    /// are removed and returned so the caller can settle them.
    pub fn close(&self, mode: CloseMode) -> Vec<Entry<T>> {
        let mut state = self.state.lock();
        let was_closed = std::mem::replace(&mut state.closed, true);
        let drained = match mode {
            CloseMode::Drain => Vec::new(),
            CloseMode::Immediate => state.waiting.drain(),
        };
        state.counters.closed += drained.len() as u64;
        if !was_closed || !drained.is_empty() {
            info!(
                ?mode,
                drained = drained.len(),
                still_waiting = state.waiting.len(),
                running = state.gate.running(),
                "queue closed"
            );
        }
        drained
    }

    #[cfg(test)]
    pub(crate) fn waiting_order(&self) -> Vec<(RequesterId, Tier)> {
        self.state
            .lock()
            .waiting
            .iter()
            .map(|entry| (entry.requester.clone(), entry.tier))
            .collect()
    }
}
