use std::time::Duration;

use tierq_core::Scheduler;
use tokio::runtime::Handle;

use crate::{ConfigError, JobQueue, QueueConfig};

/// Builder for a [`JobQueue`].
///
/// ```rust
/// use std::time::Duration;
/// use tierq_async::JobQueue;
///
/// let queue = JobQueue::builder()
///     .with_capacity(4)
///     .with_max_waiting(500)
///     .with_default_processing_time(Duration::from_secs(60))
///     .build()?;
/// assert_eq!(queue.load().capacity, 4);
/// # Ok::<(), tierq_async::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueueBuilder {
    config: QueueConfig,
    handle: Option<Handle>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration, e.g. one loaded from TOML.
    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    /// Number of jobs allowed to run at the same time. Clamped to at least 1.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    /// Rejects new jobs once this many are waiting.
    pub fn with_max_waiting(mut self, max: usize) -> Self {
        self.config.max_waiting = Some(max.max(1));
        self
    }

    /// Seed of the processing-time estimate.
    pub fn with_default_processing_time(mut self, duration: Duration) -> Self {
        self.config.default_processing_secs = duration.as_secs_f64();
        self
    }

    /// Weight of each new observation in the processing-time estimate.
    /// Must be in (0, 1]; anything else fails at [`QueueBuilder::build`].
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.config.smoothing = smoothing;
        self
    }

    /// Whether dispatched jobs feed the estimator on their own.
    pub fn with_recorded_durations(mut self, enabled: bool) -> Self {
        self.config.record_durations = enabled;
        self
    }

    /// Runtime that dispatched jobs are spawned on. Defaults to the runtime
    /// current at [`QueueBuilder::build`].
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validates the configuration and builds the queue.
    pub fn build(self) -> Result<JobQueue, ConfigError> {
        let scheduler = Scheduler::new(self.config)?;
        let handle = self.handle.or_else(|| Handle::try_current().ok());
        Ok(JobQueue::with_runtime(scheduler, handle))
    }
}
