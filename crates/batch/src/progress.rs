use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use regex_lite::{Captures, Regex};

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration: (?P<hour>\d+):(?P<min>\d+):(?P<sec>\d+(\.\d+)?)")
            .expect("duration pattern is valid")
    })
}

fn out_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"out_time=(?P<hour>\d+):(?P<min>\d+):(?P<sec>\d+(\.\d+)?)")
            .expect("out_time pattern is valid")
    })
}

/// `h*3600 + m*60 + s` from a duration or out_time match
fn captured_seconds(caps: &Captures) -> Option<f64> {
    let hours: f64 = caps.name("hour")?.as_str().parse().ok()?;
    let minutes: f64 = caps.name("min")?.as_str().parse().ok()?;
    let seconds: f64 = caps.name("sec")?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// What a diagnostic line turned out to be
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineKind {
    Duration(f64),
    /// A duration announcement after the first one; not used
    DuplicateDuration,
    OutTime(f64),
    Other,
}

/// Point-in-time view of a job's progress
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSample {
    pub duration_seconds: Option<f64>,
    pub elapsed_seconds: Option<f64>,
}

impl ProgressSample {
    /// `elapsed / duration * 100` once both are known and positive.
    ///
    /// Not clamped: the engine can report positions past the announced
    /// duration, or go backwards, and that shows up here as-is.
    pub fn percent(&self) -> Option<f64> {
        match (self.duration_seconds, self.elapsed_seconds) {
            (Some(duration), Some(elapsed)) if duration > 0.0 && elapsed > 0.0 => {
                Some(elapsed / duration * 100.0)
            }
            _ => None,
        }
    }
}

/// Incremental parser for one job's diagnostic stream
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration_seconds: Option<f64>,
    elapsed_seconds: Option<f64>,
    log: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) -> LineKind {
        if let Some(caps) = duration_regex().captures(line) {
            if let Some(seconds) = captured_seconds(&caps) {
                if self.duration_seconds.is_some() {
                    return LineKind::DuplicateDuration;
                }
                self.duration_seconds = Some(seconds);
                return LineKind::Duration(seconds);
            }
        }

        if let Some(caps) = out_time_regex().captures(line) {
            if let Some(seconds) = captured_seconds(&caps) {
                self.elapsed_seconds = Some(seconds);
                return LineKind::OutTime(seconds);
            }
        }

        self.log.push('\n');
        self.log.push_str(line);
        LineKind::Other
    }

    pub fn sample(&self) -> ProgressSample {
        ProgressSample {
            duration_seconds: self.duration_seconds,
            elapsed_seconds: self.elapsed_seconds,
        }
    }

    /// Lines that were neither duration nor progress, each preceded by a newline
    pub fn log(&self) -> &str {
        &self.log
    }
}

/// Tracker shared between the stream reader task and the polling loop
#[derive(Debug, Clone, Default)]
pub struct ProgressCell {
    inner: Arc<Mutex<ProgressTracker>>,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressTracker> {
        // A panicking reader must not take the status line down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn feed_line(&self, line: &str) -> LineKind {
        self.lock().feed_line(line)
    }

    /// Duration and elapsed read together under one lock
    pub fn snapshot(&self) -> ProgressSample {
        self.lock().sample()
    }

    pub fn log(&self) -> String {
        self.lock().log().to_string()
    }
}
