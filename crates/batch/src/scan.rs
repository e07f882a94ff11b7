use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use regex_lite::Regex;
use walkdir::WalkDir;
use crate::error::BatchError;

/// Files to process plus the root that structured moves are relative to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSet {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Resolve `input` (a file or a directory) into the ordered list of jobs' inputs.
///
/// Directories contribute their direct children, or everything below them
/// when `recursive`. `pattern` is matched against the full path.
pub fn collect_inputs(input: &Path, recursive: bool, pattern: Option<&str>) -> Result<InputSet, BatchError> {
    let filter = pattern
        .map(Regex::new)
        .transpose()
        .map_err(|e| BatchError::config(format!("Invalid filter pattern: {}", e)))?;

    if input.is_file() {
        let root = input.parent().map(Path::to_path_buf).unwrap_or_default();
        return Ok(InputSet {
            root,
            files: vec![input.to_path_buf()],
        });
    }

    if !input.is_dir() {
        return Err(BatchError::config(format!(
            "Input file or directory does not exist: {}",
            input.display()
        )));
    }

    info!("Scanning directory: {}", input.display());
    let mut walker = WalkDir::new(input).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if let Some(re) = &filter {
            if !re.is_match(&path.to_string_lossy()) {
                debug!("Filtered out: {}", path.display());
                continue;
            }
        }
        files.push(path);
    }
    files.sort();

    if files.is_empty() {
        return Err(BatchError::config("No input files found"));
    }

    info!("Found {} input file(s) under {}", files.len(), input.display());
    Ok(InputSet {
        root: input.to_path_buf(),
        files,
    })
}
