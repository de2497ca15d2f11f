use std::path::{Component, Path, PathBuf};

use crate::error::TransferError;

/// Validates that a dataset path stays inside whatever directory it is
/// written under.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Resolves a `/`-separated dataset path under `root`.
pub fn local_path(root: &Path, file_path: &str) -> Result<PathBuf, TransferError> {
    validate_relative_path(file_path)?;
    let mut path = root.to_path_buf();
    path.extend(file_path.split('/').filter(|s| !s.is_empty() && *s != "."));
    Ok(path)
}

/// Joins `/`-separated dataset path segments, skipping empty ones.
pub fn join_remote(base: &str, rel: &str) -> String {
    base.split('/')
        .chain(rel.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
