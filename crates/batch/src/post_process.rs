use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use filetime::FileTime;
use log::{debug, warn};
use crate::job::FileTimestamps;

/// Result of a best-effort step run after a job has already succeeded.
///
/// Outcomes are for logging only; none of them changes the job's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Done except for parts the platform cannot do (e.g. creation time)
    Partial(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

/// Stamp `output` with the input's captured created/modified/accessed times
pub fn copy_timestamps(output: &Path, timestamps: &FileTimestamps) -> StepOutcome {
    if !output.exists() {
        return StepOutcome::Failed(format!("output does not exist: {}", output.display()));
    }

    let accessed = FileTime::from_system_time(timestamps.accessed);
    let modified = FileTime::from_system_time(timestamps.modified);
    if let Err(e) = filetime::set_file_times(output, accessed, modified) {
        return StepOutcome::Failed(format!("failed to set access/modify times: {}", e));
    }

    match timestamps.created {
        Some(created) => match set_created(output, created) {
            Ok(()) => StepOutcome::Done,
            Err(e) => StepOutcome::Partial(format!("creation time not copied: {}", e)),
        },
        None => StepOutcome::Partial("input has no creation time".to_string()),
    }
}

#[cfg(any(windows, target_os = "macos"))]
fn set_created(path: &Path, created: std::time::SystemTime) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    use std::os::macos::fs::FileTimesExt;
    #[cfg(windows)]
    use std::os::windows::fs::FileTimesExt;

    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_times(fs::FileTimes::new().set_created(created))
}

#[cfg(not(any(windows, target_os = "macos")))]
fn set_created(_path: &Path, _created: std::time::SystemTime) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "setting creation time is not supported on this platform",
    ))
}

/// `move_root` joined with `input`'s path below `input_root`.
///
/// Falls back to the bare file name when `input` is not under `input_root`.
pub fn move_destination(input: &Path, input_root: &Path, move_root: &Path) -> PathBuf {
    match input.strip_prefix(input_root) {
        Ok(relative) if !relative.as_os_str().is_empty() => move_root.join(relative),
        _ => move_root.join(input.file_name().unwrap_or_default()),
    }
}

/// Relocate `input` under `move_root`, keeping its layout relative to `input_root`
pub fn structured_move(input: &Path, input_root: &Path, move_root: &Path) -> StepOutcome {
    let destination = move_destination(input, input_root, move_root);
    match move_file(input, &destination) {
        Ok(()) => {
            debug!("Moved {} -> {}", input.display(), destination.display());
            StepOutcome::Done
        }
        Err(e) => StepOutcome::Failed(format!(
            "failed to move {} -> {}: {}",
            input.display(),
            destination.display(),
            e
        )),
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.is_file() {
        // rename does not replace an existing file on every platform
        fs::remove_file(to)?;
    }
    if let Err(rename_err) = fs::rename(from, to) {
        // typically a destination on another filesystem
        warn!("Rename failed ({}), copying instead: {}", rename_err, from.display());
        if fs::copy(from, to).is_err() {
            return Err(rename_err);
        }
        fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn test_destination_keeps_relative_layout() {
        let dest = move_destination(
            Path::new("/media/in/sub/a.mov"),
            Path::new("/media/in"),
            Path::new("/media/done"),
        );
        assert_eq!(dest, PathBuf::from("/media/done/sub/a.mov"));
    }

    #[test]
    fn test_destination_outside_root_uses_file_name() {
        let dest = move_destination(
            Path::new("/elsewhere/a.mov"),
            Path::new("/media/in"),
            Path::new("/media/done"),
        );
        assert_eq!(dest, PathBuf::from("/media/done/a.mov"));
    }

    #[test]
    fn test_structured_move_creates_subdirectories() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let input = root.path().join("sub").join("a.mov");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"original").unwrap();

        let outcome = structured_move(&input, root.path(), dest.path());
        assert_eq!(outcome, StepOutcome::Done);
        assert!(!input.exists());
        assert_eq!(fs::read(dest.path().join("sub").join("a.mov")).unwrap(), b"original");
    }

    #[test]
    fn test_structured_move_overwrites() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let input = root.path().join("a.mov");
        fs::write(&input, b"new").unwrap();
        fs::write(dest.path().join("a.mov"), b"old").unwrap();

        assert!(structured_move(&input, root.path(), dest.path()).is_done());
        assert_eq!(fs::read(dest.path().join("a.mov")).unwrap(), b"new");
    }

    #[test]
    fn test_structured_move_failure_is_reported_not_raised() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let input = root.path().join("gone.mov");

        let outcome = structured_move(&input, root.path(), dest.path());
        assert!(matches!(outcome, StepOutcome::Failed(_)));
    }

    #[test]
    fn test_copy_timestamps_sets_modified_and_accessed() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.mkv");
        fs::write(&output, b"data").unwrap();

        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let accessed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let timestamps = FileTimestamps { created: None, modified, accessed };

        let outcome = copy_timestamps(&output, &timestamps);
        assert!(!matches!(outcome, StepOutcome::Failed(_)), "{:?}", outcome);

        let meta = fs::metadata(&output).unwrap();
        assert_eq!(meta.modified().unwrap(), modified);
        assert_eq!(meta.accessed().unwrap(), accessed);
    }

    #[test]
    fn test_copy_timestamps_missing_output() {
        let dir = tempdir().unwrap();
        let timestamps = FileTimestamps {
            created: None,
            modified: SystemTime::now(),
            accessed: SystemTime::now(),
        };
        let outcome = copy_timestamps(&dir.path().join("missing.mkv"), &timestamps);
        assert!(matches!(outcome, StepOutcome::Failed(_)));
    }
}
