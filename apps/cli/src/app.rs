//! Command dispatch.

use std::sync::Arc;

use anyhow::bail;
use fileheap_client::{Client, DatasetRef};
use fileheap_transfer::{LogProgress, format_bytes};
use tokio_util::sync::CancellationToken;

use crate::Command;
use crate::config::Config;
use crate::paths::{Location, dataset_id, split_path};

/// Runs one command. Ctrl-C cancels whatever is in flight.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let client = Client::with_config(config.client_config()?)?.with_cancel(cancel.clone());

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling");
            interrupt.cancel();
        }
    });

    match command {
        Command::Cp {
            source,
            target,
            concurrency,
        } => copy(&client, &source, &target, concurrency.unwrap_or(config.concurrency)).await,
        Command::Mk => {
            let dataset = client.new_dataset().await?;
            println!("fh://{}", dataset.id());
            Ok(())
        }
        Command::Seal { dataset } => {
            let id = dataset_id(&dataset)?;
            client.dataset(id.as_str()).seal().await?;
            println!("Sealed fh://{id}");
            Ok(())
        }
        Command::Rm { target } => remove(&client, &target).await,
        Command::Ls { path, page_size } => list(&client, &path, page_size).await,
    }
}

/// Copies between a local path and a dataset, in either direction.
async fn copy(client: &Client, source: &str, target: &str, concurrency: usize) -> anyhow::Result<()> {
    let progress = Arc::new(LogProgress::new());
    match (split_path(source)?, split_path(target)?) {
        (Location::Local(src), Location::Dataset { dataset, path }) => {
            fileheap_transfer::upload(&src, &client.dataset(dataset), &path, progress, concurrency)
                .await?;
        }
        (Location::Dataset { dataset, path }, Location::Local(dst)) => {
            fileheap_transfer::download(&client.dataset(dataset), &path, &dst, progress, concurrency)
                .await?;
        }
        (Location::Dataset { .. }, Location::Dataset { .. }) => {
            bail!("copying between datasets is not supported")
        }
        (Location::Local(_), Location::Local(_)) => {
            bail!("cp only supported between a dataset and a directory")
        }
    }
    Ok(())
}

/// Deletes a whole dataset, or only the files under a prefix.
async fn remove(client: &Client, target: &str) -> anyhow::Result<()> {
    let (dataset, prefix) = match split_path(target)? {
        Location::Dataset { dataset, path } => (client.dataset(dataset), path),
        Location::Local(_) => (client.dataset(dataset_id(target)?), String::new()),
    };

    if prefix.is_empty() {
        dataset.delete().await?;
        println!("Deleted fh://{}", dataset.id());
        return Ok(());
    }

    let deleted = delete_prefix(&dataset, &prefix).await?;
    println!("Deleted {deleted} files from fh://{}/{prefix}", dataset.id());
    Ok(())
}

async fn delete_prefix(dataset: &DatasetRef, prefix: &str) -> anyhow::Result<usize> {
    let mut files = dataset.files(prefix);
    let mut batch = dataset.new_delete_batch();
    let mut deleted = 0;
    while let Some(info) = files.next().await? {
        if !batch.has_capacity() {
            let full = std::mem::replace(&mut batch, dataset.new_delete_batch());
            deleted += full.len();
            full.delete().await?;
        }
        batch.add_file(info.path)?;
    }
    deleted += batch.len();
    batch.delete().await?;
    Ok(deleted)
}

async fn list(client: &Client, path: &str, page_size: Option<usize>) -> anyhow::Result<()> {
    let Location::Dataset { dataset, path } = split_path(path)? else {
        bail!("ls expects a dataset path such as fh://<dataset>/<prefix>");
    };

    let mut files = client.dataset(dataset).files(&path);
    if let Some(limit) = page_size {
        files.set_limit(limit)?;
    }
    while let Some(info) = files.next().await? {
        println!("{:>10}  {}", format_bytes(info.size), info.path);
    }
    Ok(())
}
