use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CleanerError {
    /// The payload failed the shareability gate.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to spawn cleaner worker: {0}")]
    WorkerSpawn(#[from] io::Error),

    #[error("Cleaner worker is stopped")]
    WorkerStopped,

    #[error("Cleaner worker disconnected before completing the task")]
    WorkerDisconnected,
}

pub type Result<T> = std::result::Result<T, CleanerError>;
