//! Dataset download orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fileheap_api::{Digest, FileInfo};
use fileheap_async::{AsyncError, Limiter};
use fileheap_client::{DatasetRef, FileBatch, FileSource};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::TransferError;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::validation::{local_path, validate_relative_path};

/// Downloads every file under `prefix` in `dataset` into `target`.
///
/// Remote paths are kept relative to `target`. Files whose local copy
/// already matches the remote size and digest are skipped and reported as
/// written. The first failure cancels the remaining work; files written
/// before it are kept.
pub async fn download(
    dataset: &DatasetRef,
    prefix: &str,
    target: &Path,
    progress: Arc<dyn ProgressSink>,
    concurrency: usize,
) -> Result<(), TransferError> {
    if concurrency == 0 {
        return Err(TransferError::InvalidArgument(
            "concurrency must be positive".into(),
        ));
    }

    // Created up front so an empty dataset still produces the directory.
    tokio::fs::create_dir_all(target).await?;
    info!(
        dataset = %dataset.id(),
        prefix,
        target = %target.display(),
        "starting download"
    );

    let parent = dataset.client().cancel_token().clone();
    let cancel = parent.child_token();
    let dataset = dataset.with_cancel(cancel.clone());
    let errors = Arc::new(AsyncError::<TransferError>::new(cancel.clone()));
    let mut limiter = Limiter::new(concurrency);

    let files = SkipUnchanged {
        files: dataset.files(prefix),
        target: target.to_path_buf(),
        progress: progress.clone(),
    };
    let mut batches = dataset.download_batch(files);
    let mut batch_count = 0usize;

    while !errors.is_set() {
        match batches.next().await {
            Ok(Some(batch)) => {
                batch_count += 1;
                limiter
                    .run(download_batch(
                        batch,
                        target.to_path_buf(),
                        progress.clone(),
                        errors.clone(),
                    ))
                    .await;
            }
            Ok(None) => break,
            Err(err) => {
                errors.report(err.into());
                break;
            }
        }
    }

    limiter.wait().await;
    cancel.cancel();

    if let Some(err) = errors.get() {
        return Err(err);
    }
    if parent.is_cancelled() {
        return Err(TransferError::cancelled());
    }

    info!(dataset = %dataset.id(), batches = batch_count, "download complete");
    progress.finish();
    Ok(())
}

async fn download_batch(
    mut batch: FileBatch,
    target: PathBuf,
    progress: Arc<dyn ProgressSink>,
    errors: Arc<AsyncError<TransferError>>,
) {
    let files = batch.len() as i64;
    let bytes = batch.size() as i64;
    progress.update(&ProgressUpdate::pending(files, bytes));

    match write_batch(&mut batch, &target).await {
        Ok(()) => progress.update(&ProgressUpdate::completed(files, bytes)),
        Err(err) => {
            progress.update(&ProgressUpdate::pending(-files, -bytes));
            errors.report(err);
        }
    }
}

async fn write_batch(batch: &mut FileBatch, target: &Path) -> Result<(), TransferError> {
    for info in batch.infos() {
        validate_relative_path(&info.path)?;
    }

    while let Some((info, mut content)) = batch.next_file().await? {
        let dest = local_path(target, &info.path)?;
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::File::create(&dest).await?;
        content.copy_to(&mut file).await?;
        file.flush().await?;
    }
    Ok(())
}

/// Passes through the files whose local copy is missing or differs.
struct SkipUnchanged<S> {
    files: S,
    target: PathBuf,
    progress: Arc<dyn ProgressSink>,
}

impl<S: FileSource> FileSource for SkipUnchanged<S> {
    async fn next(&mut self) -> fileheap_client::Result<Option<FileInfo>> {
        while let Some(info) = self.files.next().await? {
            // Invalid paths are left for the batch to reject.
            let Ok(dest) = local_path(&self.target, &info.path) else {
                return Ok(Some(info));
            };
            if !is_unchanged(&dest, &info).await? {
                return Ok(Some(info));
            }

            debug!(path = %info.path, "local copy is up to date");
            self.progress
                .update(&ProgressUpdate::written(1, info.size as i64));
        }
        Ok(None)
    }
}

async fn is_unchanged(dest: &Path, info: &FileInfo) -> std::io::Result<bool> {
    let Some(remote) = info.digest else {
        return Ok(false);
    };
    let metadata = match tokio::fs::metadata(dest).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() || metadata.len() != info.size {
        return Ok(false);
    }
    Ok(file_digest(dest).await? == remote)
}

/// SHA-256 of a local file.
pub async fn file_digest(path: &Path) -> std::io::Result<Digest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest::from_hasher(hasher))
}
