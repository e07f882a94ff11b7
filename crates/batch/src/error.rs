use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort the whole batch.
///
/// Everything that only concerns a single file (missing input, nonzero exit,
/// cancellation, post-processing) is reported through `JobStatus` instead.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Invalid options or inputs, detected before any job starts.
    #[error("{0}")]
    Config(String),

    /// The engine could not be launched at all.
    #[error("Failed to start FFmpeg at {}: {source}. Make sure it is installed and on PATH", bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected I/O while supervising the engine process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}
