use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use crate::cancel::{reap, CancellationCoordinator, PollOutcome};
use crate::config::{BatchConfig, BatchOptions};
use crate::error::BatchError;
use crate::job::{FileTimestamps, Job, JobStatus};
use crate::progress::{LineKind, ProgressCell};
use crate::status::{StatusLabel, StatusLine, StatusSink};

/// How long to keep draining the diagnostic stream after the process is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// `-hide_banner -progress pipe:2 -i <input> <params...> -y <output>`
pub fn build_ffmpeg_args(input: &Path, params: &[String], output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-progress".into(),
        "pipe:2".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
    ];
    args.extend(params.iter().map(OsString::from));
    args.push("-y".into());
    args.push(output.as_os_str().to_owned());
    args
}

/// Feed every stderr line into `progress` until the stream closes.
///
/// Lines are decoded lossily: the engine echoes paths and container tags,
/// which need not be UTF-8, and the pipe has to stay open regardless.
fn spawn_stderr_reader(stderr: ChildStderr, progress: ProgressCell, job_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(&['\n', '\r'][..]);
                    if let LineKind::Duration(seconds) = progress.feed_line(line) {
                        debug!("Job {}: media duration {:.2}s", job_id, seconds);
                    }
                }
                Err(e) => {
                    debug!("Job {}: diagnostic stream read error: {}", job_id, e);
                    break;
                }
            }
        }
    })
}

/// Delete a partial output, retrying once after `retry_delay`
pub async fn remove_partial_output(path: &Path, retry_delay: Duration) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if let Err(first) = std::fs::remove_file(path) {
        // the engine may not have released its handle yet
        debug!("Removing {} failed ({}), retrying", path.display(), first);
        tokio::time::sleep(retry_delay).await;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

enum RunOutcome {
    Exited(ExitStatus),
    Cancelled,
}

/// Drives one job's engine process from spawn to a terminal status
pub struct ProcessController<'a> {
    config: &'a BatchConfig,
    options: &'a BatchOptions,
    coordinator: &'a CancellationCoordinator,
    status: &'a dyn StatusSink,
}

impl<'a> ProcessController<'a> {
    pub fn new(
        config: &'a BatchConfig,
        options: &'a BatchOptions,
        coordinator: &'a CancellationCoordinator,
        status: &'a dyn StatusSink,
    ) -> Self {
        Self {
            config,
            options,
            coordinator,
            status,
        }
    }

    fn show(&self, job: &Job, label: StatusLabel) {
        let line = StatusLine::new(&job.input_path, job.output(), label);
        if line.label.is_final() {
            self.status.finish(&line);
        } else {
            self.status.update(&line);
        }
    }

    fn show_final(&self, job: &Job) {
        self.show(job, StatusLabel::for_status(job.status, job.elapsed));
    }

    /// Run `job` to a terminal status.
    ///
    /// Only a failure to launch the engine (or to supervise it) is an `Err`;
    /// every per-file outcome is left in `job.status`.
    pub async fn run(&self, job: &mut Job) -> Result<(), BatchError> {
        let input = job.input_path.clone();
        let output = job.output().to_path_buf();
        self.show(job, StatusLabel::Starting);

        // Step 1: input may have vanished since enumeration
        if !input.exists() {
            warn!("Job {}: input not found: {}", job.id, input.display());
            job.transition(JobStatus::NotFound);
            self.show_final(job);
            return Ok(());
        }

        if self.options.copy_timestamps {
            match FileTimestamps::capture(&input) {
                Ok(ts) => job.captured_timestamps = Some(ts),
                Err(e) => warn!("Job {}: could not read input timestamps: {}", job.id, e),
            }
        }

        if self.coordinator.is_cancelled() {
            job.transition(JobStatus::Cancelled);
            self.show_final(job);
            return Ok(());
        }

        // Step 2: spawn
        let args = build_ffmpeg_args(&input, &self.options.ffmpeg_params, &output);
        debug!("Job {}: {} {:?}", job.id, self.config.ffmpeg_bin.display(), args);
        let mut command = Command::new(&self.config.ffmpeg_bin);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // keep the terminal's SIGINT away from the engine; the coordinator does the killing
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| BatchError::Spawn {
                bin: self.config.ffmpeg_bin.clone(),
                source,
            })?;

        let progress = ProgressCell::new();
        let reader = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, progress.clone(), job.id.clone()));

        let started = Instant::now();
        job.transition(JobStatus::Running);
        info!("Job {}: started {} (pid {:?})", job.id, input.display(), child.id());
        self.coordinator.register(child);

        // Step 3: poll until exit or cancellation
        let outcome = loop {
            if self.coordinator.is_cancelled() {
                if let Some(child) = self.coordinator.release() {
                    reap(child).await;
                }
                break RunOutcome::Cancelled;
            }

            match self.coordinator.poll() {
                Ok(PollOutcome::Exited(status)) => break RunOutcome::Exited(status),
                // released by the interrupt handler, which also reaps it
                Ok(PollOutcome::Released) => break RunOutcome::Cancelled,
                Ok(PollOutcome::Running) => {}
                Err(e) => {
                    error!("Job {}: failed to check engine process: {}", job.id, e);
                    if let Some(child) = self.coordinator.release() {
                        reap(child).await;
                    }
                    self.drain(reader).await;
                    self.discard_output(job, &output).await;
                    return Err(BatchError::Io(e));
                }
            }

            let percent = progress.snapshot().percent();
            self.show(job, StatusLabel::Running { percent });
            tokio::time::sleep(self.config.poll_interval()).await;
        };

        let elapsed = started.elapsed();
        job.elapsed = Some(elapsed);
        self.drain(reader).await;

        // Step 4: classify
        match outcome {
            RunOutcome::Cancelled => {
                info!("Job {}: cancelled after {:.1}s", job.id, elapsed.as_secs_f64());
                job.transition(JobStatus::Cancelled);
                self.discard_output(job, &output).await;
                self.show_final(job);
            }
            RunOutcome::Exited(status) if status.success() => {
                job.exit_code = status.code();
                job.transition(JobStatus::Succeeded);
                job.output_bytes = std::fs::metadata(&output).ok().map(|m| m.len());
                info!("Job {}: ✅ finished in {:.1}s -> {}", job.id, elapsed.as_secs_f64(), output.display());
                self.show_final(job);
            }
            RunOutcome::Exited(status) => {
                job.exit_code = status.code();
                job.transition(JobStatus::Failed);
                error!("Job {}: ❌ ffmpeg failed with exit code {:?}", job.id, status.code());
                self.discard_output(job, &output).await;
                job.diagnostics = Some(progress.log());

                self.show_final(job);
                let mut report = progress.log();
                if let Some(cleanup) = &job.cleanup_error {
                    report.push_str(&format!("\n{}", cleanup));
                }
                self.status.diagnostics(&report);
            }
        }

        Ok(())
    }

    async fn drain(&self, reader: Option<JoinHandle<()>>) {
        if let Some(mut reader) = reader {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader).await.is_err() {
                debug!("Diagnostic reader still open after process exit, abandoning it");
                reader.abort();
            }
        }
    }

    /// Remove whatever the engine left at `output`; a leftover is recorded, not raised
    async fn discard_output(&self, job: &mut Job, output: &Path) {
        match remove_partial_output(output, self.config.cleanup_retry_delay()).await {
            Ok(()) => debug!("Job {}: no partial output left at {}", job.id, output.display()),
            Err(e) => {
                let message = format!("Failed to remove partial output {}: {}", output.display(), e);
                error!("Job {}: {}", job.id, message);
                job.cleanup_error = Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_shape() {
        let args = build_ffmpeg_args(
            Path::new("in dir/a.mov"),
            &["-c:v".to_string(), "libx264".to_string(), "-crf".to_string(), "23".to_string()],
            Path::new("in dir/a.mkv"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-progress", "pipe:2", "-i", "in dir/a.mov",
                "-c:v", "libx264", "-crf", "23", "-y", "in dir/a.mkv",
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.mkv");
        std::fs::write(&path, b"junk").unwrap();
        remove_partial_output(&path, Duration::from_millis(1)).await.unwrap();
        assert!(!path.exists());
        // nothing there is fine too
        remove_partial_output(&path, Duration::from_millis(1)).await.unwrap();
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::sync::Arc;
        use sysinfo::{Pid, System};
        use crate::status::MemoryStatus;
        use crate::test_support::fake_engine;

        fn setup(body: &str) -> (tempfile::TempDir, BatchConfig, Job) {
            let dir = tempfile::tempdir().unwrap();
            let config = BatchConfig {
                ffmpeg_bin: fake_engine(dir.path(), body),
                poll_interval_ms: 10,
                cleanup_retry_delay_ms: 10,
                ..Default::default()
            };
            let input = dir.path().join("clip.mov");
            fs::write(&input, b"source").unwrap();
            let mut job = Job::new(input);
            job.output_path = Some(dir.path().join("clip.mkv"));
            (dir, config, job)
        }

        #[tokio::test]
        async fn test_success_reports_progress() {
            let (_dir, config, mut job) = setup(
                "echo '  Duration: 00:00:10.00, start: 0.000000' >&2\n\
                 echo 'out_time=00:00:05.000000' >&2\n\
                 sleep 0.5\n\
                 printf encoded > \"$last\"\n\
                 echo 'out_time=00:00:10.000000' >&2\n\
                 exit 0",
            );
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Succeeded);
            assert_eq!(job.exit_code, Some(0));
            assert_eq!(job.output_bytes, Some(7));
            assert!(job.elapsed.is_some());
            assert!(!coord.has_active());

            let lines = sink.lines();
            assert_eq!(lines.first().unwrap().label, StatusLabel::Starting);
            assert!(lines.iter().any(|l| l.label == StatusLabel::Running { percent: Some(50.0) }));
            assert!(matches!(lines.last().unwrap().label, StatusLabel::Succeeded { .. }));
        }

        #[tokio::test]
        async fn test_nonzero_exit_fails_and_removes_output() {
            let (_dir, config, mut job) = setup(
                "printf partial > \"$last\"\n\
                 echo 'Error while decoding stream #0:0' >&2\n\
                 exit 1",
            );
            let output = job.output().to_path_buf();
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.exit_code, Some(1));
            assert!(!output.exists(), "partial output must be removed");
            assert!(job.cleanup_error.is_none());
            assert!(job.diagnostics.as_deref().unwrap().contains("Error while decoding"));
            assert!(sink.logs()[0].contains("Error while decoding"));
        }

        #[tokio::test]
        async fn test_non_utf8_stderr_keeps_progress_flowing() {
            let (_dir, config, mut job) = setup(
                "printf 'Input #0, matroska, from \\377\\376name.mov:\\n' >&2\n\
                 echo '  Duration: 00:00:10.00, start: 0.000000' >&2\n\
                 echo 'out_time=00:00:05.000000' >&2\n\
                 sleep 0.5\n\
                 printf encoded > \"$last\"\n\
                 echo 'out_time=00:00:10.000000' >&2\n\
                 exit 0",
            );
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Succeeded);
            assert_eq!(job.exit_code, Some(0));
            assert!(sink
                .lines()
                .iter()
                .any(|l| l.label == StatusLabel::Running { percent: Some(50.0) }));
        }

        #[tokio::test]
        async fn test_undeletable_output_is_reported_not_raised() {
            let (_dir, config, mut job) = setup(
                "mkdir -p \"$last\"\n\
                 touch \"$last/x\"\n\
                 echo 'Conversion failed!' >&2\n\
                 exit 1",
            );
            let output = job.output().to_path_buf();
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Failed);
            let cleanup = job.cleanup_error.as_deref().expect("residual output is recorded");
            assert!(cleanup.contains(&output.display().to_string()));

            let report = &sink.logs()[0];
            assert!(report.contains("Conversion failed!"));
            assert!(report.contains(cleanup));
            assert_eq!(sink.finished().last().unwrap().label, StatusLabel::Failed);
        }

        #[tokio::test]
        async fn test_missing_input_is_not_found() {
            let (_dir, config, mut job) = setup("exit 0");
            fs::remove_file(&job.input_path).unwrap();
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::NotFound);
            assert!(job.started_at.is_none(), "engine must not be started");
            assert_eq!(sink.finished()[0].label, StatusLabel::NotFound);
        }

        #[tokio::test]
        async fn test_spawn_failure_is_fatal() {
            let (dir, mut config, mut job) = setup("exit 0");
            config.ffmpeg_bin = dir.path().join("no-such-ffmpeg");
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            let sink = MemoryStatus::new();

            let err = ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap_err();

            assert!(matches!(err, BatchError::Spawn { .. }));
            assert!(!job.output().exists());
        }

        #[tokio::test]
        async fn test_interrupt_cancels_running_job() {
            let (_dir, config, mut job) = setup(
                "echo 'Duration: 00:10:00.00' >&2\n\
                 printf partial > \"$last\"\n\
                 exec sleep 30",
            );
            let output = job.output().to_path_buf();
            let options = BatchOptions::default();
            let coord = Arc::new(CancellationCoordinator::new());
            let sink = MemoryStatus::new();
            let controller = ProcessController::new(&config, &options, &coord, &sink);

            let interrupter = async {
                while !coord.has_active() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                // let the script reach its exec
                tokio::time::sleep(Duration::from_millis(300)).await;
                let pid = coord.active_pid().expect("engine is running");
                if let Some(child) = coord.interrupt() {
                    reap(child).await;
                }
                pid
            };
            let (result, pid) = tokio::join!(controller.run(&mut job), interrupter);
            result.unwrap();

            assert_eq!(job.status, JobStatus::Cancelled);
            assert!(!coord.has_active());
            assert!(!output.exists(), "partial output must be removed");

            let system = System::new_all();
            assert!(system.process(Pid::from_u32(pid)).is_none(), "engine pid {} still alive", pid);
        }

        #[tokio::test]
        async fn test_cancelled_before_spawn_never_starts() {
            let (dir, config, mut job) = setup("touch \"$last\"\nexit 0");
            let options = BatchOptions::default();
            let coord = CancellationCoordinator::new();
            coord.interrupt();
            let sink = MemoryStatus::new();

            ProcessController::new(&config, &options, &coord, &sink)
                .run(&mut job)
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Cancelled);
            assert!(!dir.path().join("clip.mkv").exists());
        }
    }
}
