//! Discovery of input files under the source directory.

use crate::error::{LoadError, Result};
use glob::{MatchOptions, Pattern, glob_with};
use std::io;
use std::path::{Path, PathBuf};

/// All `*.parquet` files below `dir`, recursively, in lexicographic path order.
///
/// Directories whose names end in `.parquet` are skipped. An existing
/// directory with no matches yields an empty vector.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if `dir` does not exist or is not a directory,
/// or if a directory entry cannot be read.
pub fn scan_parquet_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(LoadError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory not found: {}", dir.display()),
        )));
    }

    let pattern = format!("{}/**/*.parquet", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let paths = glob_with(&pattern, options)
        .map_err(|e| LoadError::Config(format!("invalid scan pattern {pattern}: {e}")))?;

    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(std::io::Error::from)?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `path` relative to `root` for logs and reports; the full path if unrelated.
#[must_use]
pub fn display_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
