//! Error taxonomy for tunnel control operations
//!
//! Argument and config-write failures surface immediately with a
//! specific kind; backend start/stop failures carry the backend's
//! diagnostic output. Telemetry read failures never appear here at all:
//! they degrade to zeroed counters inside the readers.

use thiserror::Error;
use wgctl_proto::NameError;

/// Tunnel control operation errors
#[derive(Debug, Error)]
pub enum ControlError {
    /// Caller-supplied name or config failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The tunnel configuration could not be persisted.
    #[error("failed to write tunnel config: {0}")]
    ConfigWrite(#[source] std::io::Error),

    /// The backend did not reach the up state.
    #[error("tunnel failed to start: {diagnostic}")]
    Start { diagnostic: String },

    /// The backend teardown failed.
    #[error("tunnel failed to stop: {0}")]
    Stop(String),
}

impl From<NameError> for ControlError {
    fn from(err: NameError) -> Self {
        ControlError::InvalidArgument(err.to_string())
    }
}
