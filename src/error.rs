//! Scheduler error types.

use thiserror::Error;

/// Errors surfaced by the scheduler and its daemons.
///
/// Only [`SchedulerError::CapabilityUnavailable`] ends a daemon, and only
/// during startup. Everything else is logged and retried on a later cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("{action} failed on {node}")]
    TransientActionFailure {
        action: &'static str,
        node: String,
    },

    #[error("insufficient resources: needed {needed:.2} GB, {available:.2} GB free")]
    InsufficientResources { needed: f64, available: f64 },

    #[error("malformed persisted state `{key}`: {source}")]
    MalformedPersistedState {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
