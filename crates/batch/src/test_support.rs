use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable `sh` stand-in for ffmpeg into `dir`.
///
/// `body` runs after `$last` has been set to the final argument, which is
/// always the output path.
pub(crate) fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    let script = format!("#!/bin/sh\nfor last; do :; done\n{}\n", body);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
