use crate::extractor::{Extractor, extract_archive};
use crate::network::{archive_snapshot, download_archive};
use crate::options::Settings;
use crate::report::{ItemResult, RunSummary};
use crate::storage::LocationRecord;
use crate::utils::{path_suffix, sanitize_token};
use futures::future::join_all;
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// File name of the downloaded archive inside its work directory.
pub const ARCHIVE_FILE: &str = "archive.cab";

// region: Structs & Enums
/// One archive to download and extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub product: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("invalid archive URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove archive {path}")]
    RemoveArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything a worker needs to process an item.
pub struct Pipeline {
    pub client: reqwest::Client,
    pub extractor: Arc<dyn Extractor>,
    pub settings: Arc<Settings>,
}
// endregion

// region: Functions
/// Flattens the record into work items: every URL ever seen, not only new ones.
pub fn build_work_items(record: &LocationRecord) -> Vec<WorkItem> {
    record
        .entries()
        .map(|(product, url)| WorkItem {
            product: product.to_string(),
            url: url.to_string(),
        })
        .collect()
}

/// The directory an item's archive is downloaded to and extracted into:
/// `<output_dir>/<product>/<url path suffix>`.
pub fn item_dir(settings: &Settings, item: &WorkItem) -> Result<PathBuf, ItemError> {
    let suffix = path_suffix(&item.url).map_err(|source| ItemError::InvalidUrl {
        url: item.url.clone(),
        source,
    })?;
    let product = match sanitize_token(&item.product) {
        name if name.is_empty() => String::from("unnamed"),
        name => name,
    };
    Ok(settings.output_dir.join(product).join(suffix))
}

/// Downloads and extracts one archive.
///
/// Returns `Ok(false)` when the download or the extraction failed (both are logged
/// where they happen). The archive is deleted only after a successful extraction.
pub async fn process_item(item: &WorkItem, pipeline: &Pipeline) -> Result<bool, ItemError> {
    let settings = &pipeline.settings;
    let output_dir = item_dir(settings, item)?;
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|source| ItemError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;
    let archive = output_dir.join(ARCHIVE_FILE);

    if let Some(endpoint) = &settings.archive_endpoint {
        archive_snapshot(endpoint, &item.url, &pipeline.client, settings.archive_timeout).await;
    }

    if !download_archive(&item.url, &archive, &pipeline.client).await {
        return Ok(false);
    }

    let extracted = extract_archive(
        pipeline.extractor.as_ref(),
        &archive,
        &output_dir,
        settings.extract_timeout,
    )
    .await;
    if !extracted {
        return Ok(false);
    }

    match tokio::fs::remove_file(&archive).await {
        Ok(()) => (),
        Err(source) if source.kind() == io::ErrorKind::NotFound => (),
        Err(source) => {
            return Err(ItemError::RemoveArchive {
                path: archive,
                source,
            });
        }
    }

    info!("Extracted {} catalog into {}", item.product, output_dir.display());
    Ok(true)
}

async fn run_item(item: &WorkItem, pipeline: &Pipeline) -> bool {
    match process_item(item, pipeline).await {
        Ok(success) => success,
        Err(e) => {
            error!(error = ?e, "Error processing {}: {}", item.url, e);
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn join_failure(item: &WorkItem, e: JoinError) {
    if e.is_panic() {
        let payload = e.into_panic();
        error!(
            "Worker processing {} panicked: {}",
            item.url,
            panic_message(payload.as_ref())
        );
    } else {
        error!("Worker processing {} was cancelled: {}", item.url, e);
    }
}
// endregion

/// Processes all items on a pool of `settings.workers` concurrent workers.
///
/// Blocks until every item has been attempted. A failing or panicking item only
/// marks itself as failed; it never stops the others. Items that map to the same
/// work directory never run at the same time.
///
/// # Arguments
///
/// * `items` - The work list, usually from [`build_work_items`].
/// * `pipeline` - The shared client, extractor and settings.
///
/// # Returns
///
/// A [`RunSummary`] with one result per item, in input order.
pub async fn process_all(items: Vec<WorkItem>, pipeline: Arc<Pipeline>) -> RunSummary {
    let workers = pipeline.settings.workers.max(1);
    info!("Processing {} URLs with {} workers", items.len(), workers);

    // Items resolving to the same directory share a lock and run one after another.
    let mut dir_locks: HashMap<PathBuf, Arc<Mutex<()>>> = HashMap::new();
    let locks: Vec<Option<Arc<Mutex<()>>>> = items
        .iter()
        .map(|item| {
            item_dir(&pipeline.settings, item)
                .ok()
                .map(|dir| Arc::clone(dir_locks.entry(dir).or_default()))
        })
        .collect();

    let semaphore = Arc::new(Semaphore::new(workers));
    let tasks = items.iter().cloned().zip(locks).map(|(item, dir_lock)| {
        let semaphore = Arc::clone(&semaphore);
        let pipeline = Arc::clone(&pipeline);

        tokio::spawn(async move {
            let _dir_guard = match &dir_lock {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            let Ok(_permit) = semaphore.acquire().await else {
                return false;
            };
            debug!("Processing {} for {}", item.url, item.product);
            run_item(&item, &pipeline).await
        })
    });

    let results = join_all(tasks).await;

    RunSummary {
        results: items
            .into_iter()
            .zip(results)
            .map(|(item, joined)| {
                let success = match joined {
                    Ok(success) => success,
                    Err(e) => {
                        join_failure(&item, e);
                        false
                    }
                };
                ItemResult {
                    product: item.product,
                    url: item.url,
                    success,
                }
            })
            .collect(),
    }
}
