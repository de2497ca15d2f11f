//! Command-line path syntax: `fh://<dataset>/<path>` or a local path.

use std::path::PathBuf;

use anyhow::bail;

const SCHEME: &str = "fh";

/// A parsed command-line path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Dataset { dataset: String, path: String },
}

pub fn split_path(raw: &str) -> anyhow::Result<Location> {
    let Some((scheme, rest)) = raw.split_once("://") else {
        if raw.is_empty() {
            bail!("file paths may not be empty");
        }
        return Ok(Location::Local(PathBuf::from(raw)));
    };

    if scheme != SCHEME {
        bail!("{scheme:?} is not a supported URL scheme; did you mean \"{SCHEME}://\"?");
    }

    let (dataset, path) = rest.split_once('/').unwrap_or((rest, ""));
    if dataset.is_empty() {
        bail!("invalid path {raw:?}, must include dataset");
    }
    Ok(Location::Dataset {
        dataset: dataset.to_string(),
        path: path.to_string(),
    })
}

/// Dataset ID from either a bare ID or an `fh://` path.
pub fn dataset_id(raw: &str) -> anyhow::Result<String> {
    match split_path(raw)? {
        Location::Dataset { dataset, .. } => Ok(dataset),
        Location::Local(_) => Ok(raw.trim_end_matches('/').to_string()),
    }
}
