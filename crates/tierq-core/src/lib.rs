//! tierq core: a tier-ranked waiting list behind a bounded concurrency gate.
//!
//! Requests are ranked by the submitter's subscription tier (`pro` before
//! `student` before `free`) and served FIFO within a tier. At most
//! `capacity` dispatched entries run at once; a new high-tier request jumps
//! ahead of waiting lower-tier ones but never preempts running work.
//!
//! The core is runtime-agnostic and generic over an opaque payload. It only
//! keeps the books: the async adapter in `tierq-async` decides what the payload
//! is and how it runs.
//!
//! Wait estimates come from an exponentially weighted moving average of
//! processing time (seeded at 90s, `new = 0.8 * old + 0.2 * observed`).

mod api;
mod config;
mod error;
pub mod prometheus;
mod scheduler;
mod state;

pub use api::{
    CloseMode, Dispatch, EnqueueResult, Entry, EntryId, JobKind, LoadLevel, LoadSnapshot, Outcome,
    Priority, QueueCounters, QueueStats, RejectReason, RequesterId, Tier, TierCounts, priority_of,
};
pub use config::QueueConfig;
pub use error::{ConfigError, GateError};
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests;
