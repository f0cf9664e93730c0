//! Controller-specific error types.

use thiserror::Error;

/// Errors that can occur in the liveupdate controller.
///
/// Failures of the live update itself (stop paths, crash loops, exec
/// errors) are not errors here; they are recorded in the LiveUpdate
/// status. This type covers the transient and configuration errors that
/// bubble out of a reconcile.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A referenced object is not present yet. Expected during startup;
    /// recorded in status rather than logged.
    #[error("{kind} {name:?} not found")]
    ObjectNotFound { kind: &'static str, name: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
