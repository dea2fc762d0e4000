//! Tokio adapter for `tierq-core`.
//!
//! [`JobQueue`] accepts async units of work tagged with a subscription tier,
//! runs at most `capacity` of them at once and settles every caller exactly
//! once through a [`Ticket`]:
//!
//! ```rust,no_run
//! use tierq_async::{JobKind, JobQueue, QueueConfig};
//!
//! # async fn demo() -> Result<(), tierq_async::ConfigError> {
//! let queue = JobQueue::new(QueueConfig::default())?;
//! let ticket = queue.enqueue("user-42", "pro", JobKind::Video, || async {
//!     // transcode, scrape, parse...
//!     Ok::<_, std::io::Error>("transcript")
//! });
//! println!("position: {:?}", queue.position_of("user-42"));
//! let transcript = ticket.await;
//! # Ok(())
//! # }
//! ```
//!
//! Dispatch is event driven: it runs after every admission, after every slot
//! release and greedily while slots are free. There is no polling timer.

mod builder;
mod job;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub use builder::QueueBuilder;
pub use job::{Job, JobError, Ticket};
pub use tierq_core::{
    CloseMode, ConfigError, EntryId, JobKind, LoadLevel, LoadSnapshot, Outcome, Priority,
    QueueConfig, QueueCounters, QueueStats, RejectReason, RequesterId, Scheduler, Tier,
    TierCounts, priority_of, prometheus,
};

use tierq_core::{Dispatch, EnqueueResult};
use tokio::runtime::Handle;
use tracing::{Instrument, debug, error, warn};

use crate::job::Abandon;

struct Shared {
    scheduler: Scheduler<Job>,
    /// Runtime that runs dispatched work, whatever thread enqueues it.
    runtime: Option<Handle>,
    pump_scheduled: AtomicBool,
    pumping: AtomicBool,
    repump: AtomicBool,
}

/// Async job queue over a shared [`Scheduler`].
///
/// Cloning is cheap and every clone drives the same queue.
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl Clone for JobQueue {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl JobQueue {
    /// Creates a queue bound to the current Tokio runtime, if there is one.
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        Ok(Self::from_scheduler(Scheduler::new(config)?))
    }

    /// Wraps an existing scheduler, bound to the current Tokio runtime if
    /// there is one.
    pub fn from_scheduler(scheduler: Scheduler<Job>) -> Self {
        Self::with_runtime(scheduler, Handle::try_current().ok())
    }

    pub(crate) fn with_runtime(scheduler: Scheduler<Job>, runtime: Option<Handle>) -> Self {
        Self {
            shared: Arc::new(Shared {
                scheduler,
                runtime,
                pump_scheduled: AtomicBool::new(false),
                pumping: AtomicBool::new(false),
                repump: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a builder with default settings.
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Returns the core scheduler.
    pub fn scheduler(&self) -> &Scheduler<Job> {
        &self.shared.scheduler
    }

    /// Queues `work` for `requester`. The closure is not called until the job
    /// is dispatched.
    ///
    /// Refusals (closed queue, full waiting list) are reported through the
    /// returned ticket rather than here.
    pub fn enqueue<F, Fut, T, E>(
        &self,
        requester: impl Into<RequesterId>,
        tier: impl Into<Tier>,
        kind: JobKind,
        work: F,
    ) -> Ticket<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (job, rx) = Job::new(work);
        match self
            .shared
            .scheduler
            .enqueue(requester.into(), tier.into(), kind, job)
        {
            EnqueueResult::Enqueued(id) => {
                self.schedule_pump();
                Ticket::new(Some(id), rx)
            }
            EnqueueResult::Rejected { reason, payload } => {
                payload.abandon(Abandon::Rejected(reason));
                Ticket::new(None, rx)
            }
            EnqueueResult::Closed(payload) => {
                payload.abandon(Abandon::Closed);
                Ticket::new(None, rx)
            }
        }
    }

    /// Cancels the requester's earliest waiting job. Running jobs are not
    /// affected; returns `false` when nothing was waiting.
    pub fn cancel(&self, requester: &str) -> bool {
        match self.shared.scheduler.cancel(requester) {
            Some(entry) => {
                settle_abandoned(entry.id, entry.payload, Abandon::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancels one specific waiting job.
    pub fn cancel_entry(&self, id: &EntryId) -> bool {
        match self.shared.scheduler.cancel_entry(id) {
            Some(entry) => {
                settle_abandoned(entry.id, entry.payload, Abandon::Cancelled);
                true
            }
            None => false,
        }
    }

    /// 1-based position of the requester's earliest waiting job.
    pub fn position_of(&self, requester: &str) -> Option<usize> {
        self.shared.scheduler.position_of(requester)
    }

    /// 1-based position of one specific waiting job.
    pub fn position_of_entry(&self, id: &EntryId) -> Option<usize> {
        self.shared.scheduler.position_of_entry(id)
    }

    /// Returns a snapshot of the queue, see [`Scheduler::stats`].
    pub fn stats(&self, requester: Option<&str>) -> QueueStats {
        self.shared.scheduler.stats(requester)
    }

    /// Returns running jobs against capacity.
    pub fn load(&self) -> LoadSnapshot {
        self.shared.scheduler.load()
    }

    /// Feeds a measured processing time into the wait estimator.
    pub fn report_duration(&self, observed: Duration) {
        self.shared.scheduler.report_duration(observed);
    }

    /// Stops admitting jobs. Running jobs always finish; waiting jobs either
    /// still run ([`CloseMode::Drain`]) or settle with [`JobError::Closed`]
    /// ([`CloseMode::Immediate`]).
    pub fn close(&self, mode: CloseMode) {
        for entry in self.shared.scheduler.close(mode) {
            settle_abandoned(entry.id, entry.payload, Abandon::Closed);
        }
    }

    /// Runs the dispatch loop on the next runtime tick. Coalesced, so a burst
    /// of admissions made in one step is ranked as a whole before anything
    /// starts.
    fn schedule_pump(&self) {
        if self.shared.pump_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.runtime() {
            Some(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    queue.shared.pump_scheduled.store(false, Ordering::Release);
                    queue.pump();
                });
            }
            None => {
                self.shared.pump_scheduled.store(false, Ordering::Release);
                warn!("no Tokio runtime bound to the queue, job stays queued until the next dispatch");
            }
        }
    }

    fn runtime(&self) -> Option<Handle> {
        self.shared
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Starts waiting jobs until the gate is full or nothing is waiting.
    ///
    /// Only one caller dispatches at a time. A call that finds another one
    /// active flags it to run one more round and returns, so a slot released
    /// from inside the loop never recurses.
    fn pump(&self) {
        let shared = &self.shared;
        shared.repump.store(true, Ordering::SeqCst);
        while !shared.pumping.swap(true, Ordering::SeqCst) {
            shared.repump.store(false, Ordering::SeqCst);
            match self.runtime() {
                Some(handle) => {
                    while let Some(dispatch) = shared.scheduler.try_dispatch() {
                        self.spawn_dispatch(&handle, dispatch);
                    }
                }
                None => warn!("no Tokio runtime bound to the queue, leaving jobs queued"),
            }
            shared.pumping.store(false, Ordering::SeqCst);
            if !shared.repump.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    fn spawn_dispatch(&self, handle: &Handle, dispatch: Dispatch<Job>) {
        let Dispatch {
            id,
            requester,
            tier,
            kind,
            waited,
            payload,
        } = dispatch;
        let span = tracing::debug_span!("job", entry = %id, %requester, %tier, %kind);
        debug!(parent: &span, waited_ms = waited.as_millis() as u64, "job starting");

        let mut guard = SlotGuard::new(self.clone(), id);
        let work = payload.start();
        handle.spawn(
            async move {
                let started = Instant::now();
                let completion = work.await;
                let elapsed = started.elapsed();
                guard.release(completion.outcome, elapsed);
                debug!(outcome = ?completion.outcome, elapsed_ms = elapsed.as_millis() as u64, "job settled");
                if !(completion.deliver)() {
                    debug!("ticket dropped before settlement, result discarded");
                }
                guard.queue.pump();
            }
            .instrument(span),
        );
    }
}

fn settle_abandoned(id: EntryId, job: Job, reason: Abandon) {
    if !job.abandon(reason) {
        debug!(entry = %id, ?reason, "ticket dropped before settlement");
    }
}

/// Owns the gate slot of one dispatched job. The slot goes back exactly once:
/// explicitly after the work settles, or on drop if the work panicked or its
/// task was torn down.
struct SlotGuard {
    queue: JobQueue,
    id: EntryId,
    released: bool,
}

impl SlotGuard {
    fn new(queue: JobQueue, id: EntryId) -> Self {
        Self {
            queue,
            id,
            released: false,
        }
    }

    fn release(&mut self, outcome: Outcome, elapsed: Duration) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Err(err) = self
            .queue
            .shared
            .scheduler
            .release(&self.id, outcome, Some(elapsed))
        {
            error!(error = %err, "slot accounting broken");
            debug_assert!(false, "slot accounting broken: {err}");
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(entry = %self.id, "job ended without settling, releasing its slot");
        if let Err(err) = self
            .queue
            .shared
            .scheduler
            .release(&self.id, Outcome::Aborted, None)
        {
            error!(error = %err, "slot accounting broken");
        }
        self.queue.pump();
    }
}
