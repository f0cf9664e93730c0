//! Update error types.
//!
//! Callers care about exactly one distinction: a run step exiting
//! non-zero is the user's problem and recoverable per container, while
//! everything else is an infrastructure failure that forces a fall-back
//! to a full image build.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    /// An exec step inside the container exited non-zero. The container's
    /// files are already synced; callers may keep updating sibling
    /// containers so replicas stay consistent.
    #[error("run step {cmd:?} failed with exit code {exit_code}")]
    RunStepFailed { cmd: String, exit_code: i32 },

    /// Local I/O failure (archive build, stdin pipe).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes exec channel failure.
    #[error("kubernetes exec: {0}")]
    Exec(#[from] kube::Error),

    /// The updater cannot restart the container's process.
    #[error("{0} cannot restart the container process")]
    RestartUnsupported(&'static str),

    /// Any other transport or container-side failure.
    #[error("{0}")]
    Infra(String),
}

impl UpdateError {
    /// True for the one recoverable case, a run step exiting non-zero.
    pub fn is_run_step_failure(&self) -> bool {
        matches!(self, UpdateError::RunStepFailed { .. })
    }
}
