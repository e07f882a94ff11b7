pub mod config;
pub mod error;
pub mod job;
pub mod output_path;
pub mod progress;
pub mod cancel;
pub mod lifecycle;
pub mod post_process;
pub mod scan;
pub mod status;
pub mod runner;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use config::{BatchConfig, BatchOptions};
pub use error::BatchError;
pub use job::{Job, JobStatus};
pub use cancel::CancellationCoordinator;
pub use runner::{BatchRunner, BatchSummary};
pub use status::{StatusSink, TerminalStatus};
