use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use crossterm::style::{Color, Stylize};
use crate::job::JobStatus;

/// Label shown after `input -> output:` on a job's status line
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLabel {
    Starting,
    Running { percent: Option<f64> },
    Succeeded { elapsed: Duration },
    Failed,
    NotFound,
    Cancelled,
}

impl StatusLabel {
    pub fn text(&self) -> String {
        match self {
            StatusLabel::Starting => "STARTING".to_string(),
            StatusLabel::Running { percent: Some(p) } => format!("PROCESSING {:.1}%", p),
            StatusLabel::Running { percent: None } => "PROCESSING".to_string(),
            StatusLabel::Succeeded { elapsed } => format!("OK [{}]", format_elapsed(*elapsed)),
            StatusLabel::Failed => "ERROR".to_string(),
            StatusLabel::NotFound => "NOT FOUND".to_string(),
            StatusLabel::Cancelled => "CANCELLED".to_string(),
        }
    }

    pub fn color(&self) -> Color {
        match self {
            StatusLabel::Starting => Color::Grey,
            StatusLabel::Running { .. } => Color::Yellow,
            StatusLabel::Succeeded { .. } => Color::Green,
            StatusLabel::Failed | StatusLabel::NotFound => Color::Red,
            StatusLabel::Cancelled => Color::Magenta,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, StatusLabel::Starting | StatusLabel::Running { .. })
    }

    /// Label for a job that reached `status`
    pub fn for_status(status: JobStatus, elapsed: Option<Duration>) -> Self {
        match status {
            JobStatus::Starting => StatusLabel::Starting,
            JobStatus::Running => StatusLabel::Running { percent: None },
            JobStatus::Succeeded => StatusLabel::Succeeded {
                elapsed: elapsed.unwrap_or_default(),
            },
            JobStatus::Failed => StatusLabel::Failed,
            JobStatus::NotFound => StatusLabel::NotFound,
            JobStatus::Cancelled => StatusLabel::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub input: PathBuf,
    pub output: PathBuf,
    pub label: StatusLabel,
}

impl StatusLine {
    pub fn new(input: &Path, output: &Path, label: StatusLabel) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            label,
        }
    }
}

/// Human-facing progress surface. Not a stable format.
pub trait StatusSink: Send + Sync {
    /// Redraw the job's line in place
    fn update(&self, line: &StatusLine);
    /// Draw the job's terminal state and move past it
    fn finish(&self, line: &StatusLine);
    /// Engine log of a failed job
    fn diagnostics(&self, log: &str);
}

/// `1.5s` under a minute, `2.3m` above
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else {
        format!("{:.1}m", seconds / 60.0)
    }
}

/// Pad to `width` chars, or keep head and tail around `...` when longer
pub fn pad_trim(name: &str, width: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= width {
        return format!("{:<width$}", name, width = width);
    }
    if width <= 3 {
        return chars[..width].iter().collect();
    }
    let head = (width / 2).min(width - 3);
    let tail = width - 3 - head;
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}...{}", start, end)
}

/// Every log line indented by four spaces
pub fn indent_log(log: &str) -> String {
    log.replace('\n', "\n    ")
}

/// Narrowest name column that still shows something around the `...`
pub const MIN_NAME_WIDTH: usize = 8;

/// Writes carriage-return status lines to stdout
pub struct TerminalStatus {
    name_width: usize,
    out: Mutex<std::io::Stdout>,
}

impl TerminalStatus {
    pub fn new(name_width: usize) -> Self {
        Self {
            name_width: name_width.max(MIN_NAME_WIDTH),
            out: Mutex::new(std::io::stdout()),
        }
    }

    fn render(&self, line: &StatusLine) -> String {
        let input = pad_trim(&line.input.display().to_string(), self.name_width);
        let output = pad_trim(&line.output.display().to_string(), self.name_width);
        // trailing pad wipes leftovers of a longer previous label
        let label = format!("{:<20}", line.label.text());
        format!(
            "\r  - {} -> {}: {}",
            input.cyan(),
            output.cyan(),
            label.with(line.label.color())
        )
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl StatusSink for TerminalStatus {
    fn update(&self, line: &StatusLine) {
        self.write(&self.render(line));
    }

    fn finish(&self, line: &StatusLine) {
        self.write(&format!("{}\n", self.render(line)));
    }

    fn diagnostics(&self, log: &str) {
        let log = indent_log(log);
        let colored = log.with(Color::Rgb { r: 245, g: 124, b: 66 });
        self.write(&format!("{}\n", colored));
    }
}

/// Keeps every line it is given; for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryStatus {
    lines: Mutex<Vec<StatusLine>>,
    logs: Mutex<Vec<String>>,
}

impl MemoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<StatusLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Only the terminal-state lines
    pub fn finished(&self) -> Vec<StatusLine> {
        self.lines().into_iter().filter(|l| l.label.is_final()).collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: &StatusLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

impl StatusSink for MemoryStatus {
    fn update(&self, line: &StatusLine) {
        self.push(line);
    }

    fn finish(&self, line: &StatusLine) {
        self.push(line);
    }

    fn diagnostics(&self, log: &str) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(log.to_string());
        }
    }
}
