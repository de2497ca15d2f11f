//! Directory upload orchestrator.

use std::path::Path;
use std::sync::Arc;

use fileheap_async::{AsyncError, Limiter};
use fileheap_client::{DatasetRef, FileReader, UploadBatch};
use tracing::info;

use crate::error::TransferError;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::scanner::{SourceFile, scan_files};
use crate::validation::join_remote;

/// Uploads the file or directory at `source` into `dataset` under `target`.
///
/// Files are grouped into batches, and up to `concurrency` batches are in
/// flight at once. The first failure cancels the remaining work and is
/// returned once everything in flight has stopped. Batches that completed
/// before the failure stay uploaded.
pub async fn upload(
    source: &Path,
    dataset: &DatasetRef,
    target: &str,
    progress: Arc<dyn ProgressSink>,
    concurrency: usize,
) -> Result<(), TransferError> {
    if concurrency == 0 {
        return Err(TransferError::InvalidArgument(
            "concurrency must be positive".into(),
        ));
    }

    let (files, total) = scan_files(source)?;
    info!(
        source = %source.display(),
        dataset = %dataset.id(),
        files = files.len(),
        bytes = total,
        "starting upload"
    );

    let parent = dataset.client().cancel_token().clone();
    let cancel = parent.child_token();
    let dataset = dataset.with_cancel(cancel.clone());
    let errors = Arc::new(AsyncError::<TransferError>::new(cancel.clone()));
    let mut limiter = Limiter::new(concurrency);
    let max_bytes = dataset.client().limits().max_bytes;

    let mut batch = dataset.new_upload_batch();
    let mut local_err = None;
    for file in &files {
        if errors.is_set() || cancel.is_cancelled() {
            break;
        }

        if !batch.has_capacity(file.size) {
            let full = std::mem::replace(&mut batch, dataset.new_upload_batch());
            limiter
                .run(upload_batch(full, progress.clone(), errors.clone()))
                .await;
        }

        let path = remote_path(target, source, file);
        let added = match open_reader(file, max_bytes).await {
            Ok(reader) => batch.add_file(path, reader, file.size).map_err(Into::into),
            Err(err) => Err(err),
        };
        if let Err(err) = added {
            local_err = Some(err);
            break;
        }
    }

    if local_err.is_none() && !errors.is_set() && !batch.is_empty() {
        limiter
            .run(upload_batch(batch, progress.clone(), errors.clone()))
            .await;
    } else {
        drop(batch);
    }

    if local_err.is_some() {
        cancel.cancel();
    }
    limiter.wait().await;
    cancel.cancel();

    if let Some(err) = local_err.or_else(|| errors.get()) {
        return Err(err);
    }
    if parent.is_cancelled() {
        return Err(TransferError::cancelled());
    }

    info!(dataset = %dataset.id(), files = files.len(), bytes = total, "upload complete");
    progress.finish();
    Ok(())
}

async fn upload_batch(
    batch: UploadBatch,
    progress: Arc<dyn ProgressSink>,
    errors: Arc<AsyncError<TransferError>>,
) {
    let files = batch.len() as i64;
    let bytes = batch.size() as i64;
    progress.update(&ProgressUpdate::pending(files, bytes));

    match batch.upload().await {
        Ok(()) => progress.update(&ProgressUpdate::completed(files, bytes)),
        Err(err) => {
            progress.update(&ProgressUpdate::pending(-files, -bytes));
            errors.report(err.into());
        }
    }
}

/// Files that fit in one request are read into memory right away so open
/// descriptors stay bounded by the number of batches in flight.
async fn open_reader(file: &SourceFile, max_bytes: u64) -> Result<FileReader, TransferError> {
    if file.size <= max_bytes {
        let data = tokio::fs::read(&file.full_path).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    } else {
        Ok(Box::new(tokio::fs::File::open(&file.full_path).await?))
    }
}

/// Dataset path of a scanned file. A lone source file lands at `target`
/// itself, or under its own name when no target is given.
fn remote_path(target: &str, source: &Path, file: &SourceFile) -> String {
    if file.relative_path.is_empty() {
        let joined = join_remote(target, "");
        if !joined.is_empty() {
            return joined;
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return join_remote("", &name);
    }
    join_remote(target, &file.relative_path)
}
