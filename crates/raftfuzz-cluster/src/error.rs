//! Cluster error types.

use thiserror::Error;

/// Errors from replica lifecycle operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("node {0} is not running")]
    NotRunning(u32),

    #[error("node {0} is already running")]
    AlreadyRunning(u32),

    #[error("failed to spawn node {0}: {1}")]
    Spawn(u32, std::io::Error),

    #[error("node {0} did not terminate within the grace period")]
    StopTimeout(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
