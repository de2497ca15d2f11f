//! Local file scanning for upload.
//!
//! Recursively walks a directory and produces the regular files beneath it
//! with relative paths normalized to forward slashes.

use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// A regular file found by [`scan_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Location on disk.
    pub full_path: PathBuf,
    /// Path relative to the scanned root, `/`-separated. Empty when the root
    /// is itself a file.
    pub relative_path: String,
    pub size: u64,
}

/// Scans `root` recursively, in name order.
///
/// A root that is a regular file yields just that file. Symlinks and other
/// special files are skipped. Returns the files and their total size.
pub fn scan_files(root: &Path) -> Result<(Vec<SourceFile>, u64), TransferError> {
    let mut files = Vec::new();
    let mut total_size = 0;

    let metadata = std::fs::symlink_metadata(root)?;
    if metadata.is_file() {
        files.push(SourceFile {
            full_path: root.to_path_buf(),
            relative_path: String::new(),
            size: metadata.len(),
        });
        return Ok((files, metadata.len()));
    }

    walk_dir(root, root, &mut files, &mut total_size)?;
    Ok((files, total_size))
}

fn walk_dir(
    root: &Path,
    current: &Path,
    files: &mut Vec<SourceFile>,
    total_size: &mut u64,
) -> Result<(), TransferError> {
    let mut entries = std::fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, files, total_size)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;
            let size = metadata.len();

            files.push(SourceFile {
                relative_path: rel_path.to_string_lossy().replace('\\', "/"),
                full_path: path,
                size,
            });
            *total_size += size;
        }
    }

    Ok(())
}
