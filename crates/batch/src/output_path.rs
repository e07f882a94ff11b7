use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Hands out output paths that collide neither with files on disk nor with
/// anything issued earlier in the same run.
///
/// The exists-check is not atomic against other writers. A run is a single
/// sequential process, so the only writer that matters is the engine we start
/// ourselves after allocation. Collision chains are not bounded.
#[derive(Debug, Default)]
pub struct OutputPathAllocator {
    issued: HashSet<PathBuf>,
}

impl OutputPathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{dir}/{name}{ext}`, then `{dir}/{name}_1{ext}`, `_2`, ... until free
    pub fn allocate(&mut self, dir: &Path, name: &str, ext: &str) -> PathBuf {
        let mut candidate = dir.join(format!("{}{}", name, ext));
        let mut counter = 1u64;
        while self.is_taken(&candidate) {
            candidate = dir.join(format!("{}_{}{}", name, counter, ext));
            counter += 1;
        }
        self.issued.insert(candidate.clone());
        candidate
    }

    /// Output for `input`: same stem, in `output_dir` or next to the input
    pub fn allocate_for(&mut self, input: &Path, output_dir: Option<&Path>, ext: &str) -> PathBuf {
        let dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.allocate(&dir, &name, ext)
    }

    fn is_taken(&self, path: &Path) -> bool {
        self.issued.contains(path) || path.exists()
    }
}
