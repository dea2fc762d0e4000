use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tierq_core::{EntryId, Outcome, RejectReason};
use tokio::sync::oneshot;

/// Why a caller did not get the value of their unit of work.
///
/// `Cancelled` and `Failed` are deliberately separate so a UI can tell
/// "you cancelled" from "processing failed".
#[derive(Debug, thiserror::Error)]
pub enum JobError<E> {
    /// Removed from the waiting list before it started.
    #[error("job was cancelled before it started")]
    Cancelled,
    /// The queue was closed before the job started.
    #[error("job queue is closed")]
    Closed,
    #[error("job rejected: {0}")]
    Rejected(RejectReason),
    /// The unit of work panicked or its task was torn down before settling.
    #[error("job aborted before producing a result")]
    Aborted,
    /// The unit of work's own error, untouched.
    #[error("job failed: {0}")]
    Failed(E),
}

impl<E> JobError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Returns the unit of work's error, if that is what this is.
    pub fn into_failure(self) -> Option<E> {
        match self {
            JobError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Settlement of a job that never ran.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Abandon {
    Cancelled,
    Closed,
    Rejected(RejectReason),
}

impl<E> From<Abandon> for JobError<E> {
    fn from(reason: Abandon) -> Self {
        match reason {
            Abandon::Cancelled => JobError::Cancelled,
            Abandon::Closed => JobError::Closed,
            Abandon::Rejected(reason) => JobError::Rejected(reason),
        }
    }
}

/// Result of running a job: how it ended, plus the deferred hand-off of its
/// value to the caller. Delivery returns `false` if the caller stopped
/// listening.
pub(crate) struct Completion {
    pub(crate) outcome: Outcome,
    pub(crate) deliver: Box<dyn FnOnce() -> bool + Send>,
}

trait ErasedJob: Send {
    fn start(self: Box<Self>) -> BoxFuture<'static, Completion>;
    fn abandon(self: Box<Self>, reason: Abandon) -> bool;
}

struct TypedJob<F, T, E> {
    work: F,
    tx: oneshot::Sender<Result<T, JobError<E>>>,
}

impl<F, Fut, T, E> ErasedJob for TypedJob<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn start(self: Box<Self>) -> BoxFuture<'static, Completion> {
        let TypedJob { work, tx } = *self;
        async move {
            let result = work().await;
            let outcome = if result.is_ok() {
                Outcome::Succeeded
            } else {
                Outcome::Failed
            };
            Completion {
                outcome,
                deliver: Box::new(move || tx.send(result.map_err(JobError::Failed)).is_ok()),
            }
        }
        .boxed()
    }

    fn abandon(self: Box<Self>, reason: Abandon) -> bool {
        self.tx.send(Err(reason.into())).is_ok()
    }
}

/// Type-erased unit of work plus its settlement channel. This is the payload
/// the core scheduler stores; it never knows what the work produces.
pub struct Job(Box<dyn ErasedJob>);

impl Job {
    pub(crate) fn new<F, Fut, T, E>(work: F) -> (Self, oneshot::Receiver<Result<T, JobError<E>>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        (Job(Box::new(TypedJob { work, tx })), rx)
    }

    /// The work closure is only called when the returned future is first
    /// polled.
    pub(crate) fn start(self) -> BoxFuture<'static, Completion> {
        self.0.start()
    }

    pub(crate) fn abandon(self, reason: Abandon) -> bool {
        self.0.abandon(reason)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Job(<work>)")
    }
}

/// Resolves once the job settles: with its value, its error, or the reason it
/// never ran.
///
/// Dropping a ticket does not cancel the job; use
/// [`JobQueue::cancel_entry`](crate::JobQueue::cancel_entry) for that.
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket<T, E> {
    id: Option<EntryId>,
    rx: oneshot::Receiver<Result<T, JobError<E>>>,
}

impl<T, E> Ticket<T, E> {
    pub(crate) fn new(id: Option<EntryId>, rx: oneshot::Receiver<Result<T, JobError<E>>>) -> Self {
        Self { id, rx }
    }

    /// Entry id, `None` when the job was refused at admission.
    pub fn id(&self) -> Option<&EntryId> {
        self.id.as_ref()
    }
}

impl<T, E> Future for Ticket<T, E> {
    type Output = Result<T, JobError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // sender dropped without a value: the work panicked or its task died
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::Aborted)),
        }
    }
}
