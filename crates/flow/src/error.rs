//! Flow error types.

use thiserror::Error;

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that stop a source or sink from starting.
///
/// These are all retried by the owning supervisor after its restart
/// delay; nothing in here is fatal to the flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Spawning or wiring up a child process failed.
    #[error(transparent)]
    Process(#[from] streamtee_process::ProcessError),
}
