use std::path::PathBuf;
use thiserror::Error;

use crate::core::storage::PluginKind;

/// Failures of the on-disk job record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid job record: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Rejections reported by the trigger engine. Never raised past the adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Job {0} is already scheduled")]
    Duplicate(String),

    #[error("Job {0} is not scheduled")]
    NotFound(String),

    #[error("Trigger '{0}' cannot run on a timer")]
    UnsupportedTrigger(String),

    #[error("Invalid trigger spec: {0}")]
    InvalidSpec(String),

    #[error("Trigger engine error: {0}")]
    Engine(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Command /{0} is already registered")]
    DuplicateCommand(String),

    #[error("Failed to deliver to {recipient}: {reason}")]
    Send { recipient: i64, reason: String },

    #[error("Receive loop failed: {0}")]
    Receive(String),

    #[error("Gateway is stopped")]
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("Unknown plugin: {kind}/{group}/{class}")]
    UnknownPlugin {
        kind: PluginKind,
        group: String,
        class: String,
    },

    #[error("Plugin {class} could not be constructed: {reason}")]
    Construction { class: String, reason: String },
}

/// Errors surfaced by compound coordinator operations (register, unregister,
/// reschedule, restore, enable/disable).
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    PluginLoad(#[from] PluginLoadError),

    #[error("Invalid registration: {0}")]
    Validation(String),

    #[error("Job {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} was only partially removed: {}", failures.join("; "))]
    Partial {
        job_id: String,
        failures: Vec<String>,
    },
}

impl CoordinatorError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoordinatorError::NotFound(_)
                | CoordinatorError::Store(StoreError::NotFound(_))
                | CoordinatorError::Scheduling(SchedulingError::NotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
