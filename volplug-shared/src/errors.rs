//! Error types used across the volplug driver.

use thiserror::Error;

/// Result type for volplug operations.
pub type VolplugResult<T> = Result<T, VolplugError>;

#[derive(Debug, Error)]
pub enum VolplugError {
    /// A bare volume name exists on more than one datastore.
    #[error("volume name {name} is ambiguous, found on datastores {labels:?}")]
    AmbiguousVolumeName { name: String, labels: Vec<String> },

    /// Remove attempted while containers still reference the volume.
    #[error("volume {name} is still mounted (refcount={refcount})")]
    VolumeStillInUse { name: String, refcount: u32 },

    /// Decrement of a reference count that is already zero.
    #[error("refcount underflow for volume {0}")]
    Underflow(String),

    #[error("volume not found: {0}")]
    NotFound(String),

    /// Opaque failure reported by a storage backend.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("mount table error: {0}")]
    MountTable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for VolplugError {
    fn from(err: std::io::Error) -> Self {
        VolplugError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for VolplugError {
    fn from(err: serde_json::Error) -> Self {
        VolplugError::Config(format!("JSON error: {}", err))
    }
}
