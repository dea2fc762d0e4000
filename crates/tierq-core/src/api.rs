use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Logical identity of whoever submitted a job (user id, session id...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequesterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequesterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription tier of a requester.
///
/// Tags that arrive as strings are parsed with [`Tier::parse`], which never
/// fails: anything unrecognized is treated as [`Tier::Free`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Pro,
    Student,
    #[default]
    Free,
}

impl Tier {
    /// Rank used for per-tier arrays, `0` is served first.
    pub fn index(self) -> usize {
        match self {
            Tier::Pro => 0,
            Tier::Student => 1,
            Tier::Free => 2,
        }
    }

    /// Tiers in dispatch order.
    pub fn ordered() -> [Tier; 3] {
        [Tier::Pro, Tier::Student, Tier::Free]
    }

    pub fn priority(self) -> Priority {
        Priority(self.index() as u8 + 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Pro => "pro",
            Tier::Student => "student",
            Tier::Free => "free",
        }
    }

    /// Parses a tier tag case-insensitively, falling back to [`Tier::Free`].
    pub fn parse(tag: &str) -> Tier {
        match tag.trim().to_ascii_lowercase().as_str() {
            "pro" => Tier::Pro,
            "student" => Tier::Student,
            "free" => Tier::Free,
            _ => {
                tracing::debug!(tag, "unrecognized tier tag, using lowest priority");
                Tier::Free
            }
        }
    }
}

impl From<&str> for Tier {
    fn from(value: &str) -> Self {
        Tier::parse(value)
    }
}

impl From<String> for Tier {
    fn from(value: String) -> Self {
        Tier::parse(&value)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch rank derived from a [`Tier`]. Lower values are served first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Priority(u8);

impl Priority {
    pub fn rank(self) -> u8 {
        self.0
    }
}

/// Maps a raw tier tag to its priority (`pro` → 1, `student` → 2, rest → 3).
pub fn priority_of(tier: &str) -> Priority {
    Tier::parse(tier).priority()
}

/// Category of work. Informational only, never affects ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    File,
    Text,
    #[default]
    Other,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Video => "video",
            JobKind::File => "file",
            JobKind::Text => "text",
            JobKind::Other => "other",
        };
        f.write_str(name)
    }
}

static ENTRY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of a queue entry, unique for the process lifetime.
///
/// Shaped as `<requester>-<unix millis>-<sequence><random>`; the sequence alone
/// guarantees uniqueness, the rest helps when reading logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(String);

impl EntryId {
    pub(crate) fn generate(requester: &RequesterId) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        let seq = ENTRY_SEQ.fetch_add(1, Ordering::Relaxed);
        let suffix: u16 = rand::random();
        Self(format!("{requester}-{millis}-{seq:x}{suffix:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A waiting request together with its opaque payload.
#[derive(Debug)]
pub struct Entry<T> {
    pub id: EntryId,
    pub requester: RequesterId,
    pub tier: Tier,
    pub priority: Priority,
    pub kind: JobKind,
    pub enqueued_at: Instant,
    pub payload: T,
}

impl<T> Entry<T> {
    /// Waiting-list order: priority first, then arrival.
    pub(crate) fn sorts_after(&self, other: &Entry<T>) -> bool {
        (self.priority, self.enqueued_at) > (other.priority, other.enqueued_at)
    }
}

/// An entry handed over to the caller for execution. Its gate slot is already
/// taken and must be given back through `Scheduler::release`.
#[derive(Debug)]
pub struct Dispatch<T> {
    pub id: EntryId,
    pub requester: RequesterId,
    pub tier: Tier,
    pub kind: JobKind,
    /// Time spent in the waiting list.
    pub waited: Duration,
    pub payload: T,
}

#[derive(Debug)]
pub enum EnqueueResult<T> {
    Enqueued(EntryId),
    /// The payload is handed back so the caller can settle it.
    Rejected { reason: RejectReason, payload: T },
    Closed(T),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// `max_waiting` entries are already queued.
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => f.write_str("waiting list is full"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CloseMode {
    /// Stop admitting work; entries already waiting still run.
    #[default]
    Drain,
    /// Stop admitting work and hand back every waiting entry.
    Immediate,
}

/// How a dispatched unit of work ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Panicked or was torn down before producing a result.
    Aborted,
}

/// Waiting entries per tier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub pro: u64,
    pub student: u64,
    pub free: u64,
}

impl TierCounts {
    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Pro => self.pro,
            Tier::Student => self.student,
            Tier::Free => self.free,
        }
    }

    pub(crate) fn bump(&mut self, tier: Tier) {
        match tier {
            Tier::Pro => self.pro += 1,
            Tier::Student => self.student += 1,
            Tier::Free => self.free += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pro + self.student + self.free
    }
}

/// Coarse classification of gate usage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    /// Below 50%.
    Calm,
    /// From 50% up to 80%.
    Moderate,
    /// 80% and above.
    High,
}

impl LoadLevel {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            LoadLevel::High
        } else if percentage >= 50.0 {
            LoadLevel::Moderate
        } else {
            LoadLevel::Calm
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadSnapshot {
    pub running: usize,
    pub capacity: usize,
    pub load_percentage: f64,
}

impl LoadSnapshot {
    pub fn new(running: usize, capacity: usize) -> Self {
        let load_percentage = if capacity == 0 {
            0.0
        } else {
            100.0 * running as f64 / capacity as f64
        };
        Self {
            running,
            capacity,
            load_percentage,
        }
    }

    pub fn level(&self) -> LoadLevel {
        LoadLevel::from_percentage(self.load_percentage)
    }
}

/// Lifetime counters, never reset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub enqueued: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: u64,
    pub cancelled: u64,
    /// Waiting entries dropped by an immediate close.
    pub closed: u64,
    pub rejected: u64,
}

/// Point-in-time view of the queue, optionally from one requester's angle.
#[derive(Clone, Debug, Serialize)]
pub struct QueueStats {
    pub total_waiting: u64,
    pub per_tier: TierCounts,
    /// `position * average` when the requester is waiting, otherwise
    /// `total_waiting * average`.
    pub estimated_wait_secs: f64,
    /// 1-based position of the requester's earliest waiting entry.
    pub position: Option<usize>,
    pub average_processing_secs: f64,
    /// Age of the entry at the front of the waiting list.
    pub oldest_wait_secs: f64,
    pub load: LoadSnapshot,
    pub counters: QueueCounters,
}
