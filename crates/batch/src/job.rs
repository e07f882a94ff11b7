use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of a single input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Starting,
    Running,
    Succeeded,
    Failed,
    NotFound,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are never left once entered
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::NotFound | JobStatus::Cancelled
        )
    }

    fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Starting => matches!(
                next,
                JobStatus::Running | JobStatus::NotFound | JobStatus::Cancelled
            ),
            JobStatus::Running => matches!(
                next,
                JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
            ),
            _ => false,
        }
    }
}

/// Timestamps of the input captured before the engine touches anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimestamps {
    /// Not every filesystem records a birth time
    pub created: Option<SystemTime>,
    pub modified: SystemTime,
    pub accessed: SystemTime,
}

impl FileTimestamps {
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            created: meta.created().ok(),
            modified: meta.modified()?,
            accessed: meta.accessed()?,
        })
    }
}

/// One input-to-output transcoding task
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub status: JobStatus,
    pub captured_timestamps: Option<FileTimestamps>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Subprocess start to exit or kill
    pub elapsed: Option<Duration>,
    pub exit_code: Option<i32>,
    pub output_bytes: Option<u64>,
    /// Engine log, kept for failed jobs only
    pub diagnostics: Option<String>,
    /// Set when a failed job's partial output could not be removed
    pub cleanup_error: Option<String>,
}

impl Job {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            output_path: None,
            status: JobStatus::Starting,
            captured_timestamps: None,
            started_at: None,
            finished_at: None,
            elapsed: None,
            exit_code: None,
            output_bytes: None,
            diagnostics: None,
            cleanup_error: None,
        }
    }

    /// Move to `next`, refusing to leave a terminal state or skip ahead.
    ///
    /// Returns false (and leaves the status alone) for an illegal transition.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            log::warn!("Job {}: ignoring transition {:?} -> {:?}", self.id, self.status, next);
            return false;
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Output path, which the runner always allocates before the controller sees the job
    pub fn output(&self) -> &Path {
        self.output_path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}
