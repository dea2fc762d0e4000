use crate::api::EntryId;

/// Capacity accounting violations. Any of these means the caller broke the
/// acquire/release pairing and the gate would otherwise drift.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("entry {0} is already running")]
    AlreadyRunning(EntryId),

    #[error("entry {0} is not running")]
    NotRunning(EntryId),

    #[error("gate is at capacity ({capacity})")]
    Saturated { capacity: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
