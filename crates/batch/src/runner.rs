use std::path::PathBuf;
use std::sync::Arc;
use log::{debug, info, warn};
use crate::cancel::CancellationCoordinator;
use crate::config::{BatchConfig, BatchOptions};
use crate::error::BatchError;
use crate::job::{Job, JobStatus};
use crate::lifecycle::ProcessController;
use crate::output_path::OutputPathAllocator;
use crate::post_process::{self, StepOutcome};
use crate::status::StatusSink;

/// What a finished (or cancelled) batch did
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Jobs that were started, in order; jobs skipped after a cancel are absent
    pub jobs: Vec<Job>,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn total_output_bytes(&self) -> u64 {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Succeeded)
            .filter_map(|j| j.output_bytes)
            .sum()
    }
}

/// Runs jobs one after another, stopping early on cancellation
pub struct BatchRunner {
    config: BatchConfig,
    options: BatchOptions,
    coordinator: Arc<CancellationCoordinator>,
    status: Arc<dyn StatusSink>,
}

impl BatchRunner {
    pub fn new(
        config: BatchConfig,
        options: BatchOptions,
        coordinator: Arc<CancellationCoordinator>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            options,
            coordinator,
            status,
        }
    }

    /// Process `inputs` in order.
    ///
    /// Returns `Err` only for configuration problems and for an engine that
    /// cannot be launched; in the latter case no further input is attempted.
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<BatchSummary, BatchError> {
        self.options.validate()?;

        let controller = ProcessController::new(
            &self.config,
            &self.options,
            &self.coordinator,
            self.status.as_ref(),
        );
        let mut allocator = OutputPathAllocator::new();
        let mut summary = BatchSummary::default();

        for (index, input) in inputs.iter().enumerate() {
            if self.coordinator.is_cancelled() {
                info!("Batch cancelled, skipping {} remaining file(s)", inputs.len() - index);
                summary.cancelled = true;
                break;
            }

            let mut job = Job::new(input.clone());
            let output = allocator.allocate_for(
                input,
                self.options.output_dir.as_deref(),
                &self.options.output_ext,
            );
            debug!("Job {}: {} -> {}", job.id, input.display(), output.display());
            job.output_path = Some(output);

            controller.run(&mut job).await?;

            match job.status {
                JobStatus::Succeeded => self.post_process(&job),
                JobStatus::Cancelled => summary.cancelled = true,
                _ => {}
            }
            summary.jobs.push(job);

            if summary.cancelled {
                break;
            }
        }

        Ok(summary)
    }

    /// Timestamp copy and structured move; outcomes are logged and dropped
    fn post_process(&self, job: &Job) {
        if self.options.copy_timestamps {
            let outcome = match &job.captured_timestamps {
                Some(ts) => post_process::copy_timestamps(job.output(), ts),
                None => StepOutcome::Failed("input timestamps were not captured".to_string()),
            };
            log_step(job, "timestamp copy", &outcome);
        }

        if let Some(move_dir) = &self.options.move_dir {
            let outcome = post_process::structured_move(&job.input_path, &self.options.input_root, move_dir);
            log_step(job, "move", &outcome);
        }
    }
}

fn log_step(job: &Job, step: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Done => debug!("Job {}: {} done", job.id, step),
        StepOutcome::Partial(reason) => debug!("Job {}: {} partial: {}", job.id, step, reason),
        StepOutcome::Failed(reason) => warn!("Job {}: {} skipped: {}", job.id, step, reason),
    }
}
