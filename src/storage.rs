use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Every redirect target ever observed, per product, with its first-seen timestamp.
///
/// Serialized as `{"<product>": {"<redirect url>": "<ISO-8601 timestamp>"}}`.
/// Entries are only ever added; a recorded URL keeps its original timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationRecord(BTreeMap<String, BTreeMap<String, String>>);

impl LocationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url` for `product` unless it is already known.
    ///
    /// Returns `true` if the URL was new. An existing entry is never overwritten.
    pub fn insert(&mut self, product: &str, url: &str, timestamp: String) -> bool {
        let urls = self.0.entry(product.to_string()).or_default();
        if urls.contains_key(url) {
            return false;
        }
        urls.insert(url.to_string(), timestamp);
        true
    }

    pub fn contains(&self, product: &str, url: &str) -> bool {
        self.0
            .get(product)
            .is_some_and(|urls| urls.contains_key(url))
    }

    /// The first-seen timestamp of `url` for `product`.
    pub fn first_seen(&self, product: &str, url: &str) -> Option<&str> {
        self.0
            .get(product)
            .and_then(|urls| urls.get(url))
            .map(String::as_str)
    }

    /// All known URLs of a product.
    pub fn urls(&self, product: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(product)
    }

    /// Flattens the record into `(product, url)` pairs, one per recorded URL.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(product, urls)| {
            urls.keys()
                .map(move |url| (product.as_str(), url.as_str()))
        })
    }

    /// Total number of recorded URLs across all products.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize the location record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Loads and saves the [`LocationRecord`] as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct LocationStore {
    path: PathBuf,
}

impl LocationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocationStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where [`load`](Self::load) copies a file before discarding any of its content.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Reads the record from disk.
    ///
    /// Never fails. A missing or unreadable file yields an empty record. The file may
    /// be edited by hand, so a malformed file is salvaged: entries that are not a
    /// `url -> timestamp` string pair are skipped with a warning, and invalid JSON
    /// yields an empty record. Whenever anything is dropped the original file is first
    /// copied to [`backup_path`](Self::backup_path), since the next save overwrites it.
    pub fn load(&self) -> LocationRecord {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return LocationRecord::new();
            }
            Err(e) => {
                warn!(
                    "Failed to read {}: {}. Starting with empty data.",
                    self.path.display(),
                    e
                );
                return LocationRecord::new();
            }
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "{} contains invalid JSON ({}). Starting with empty data.",
                    self.path.display(),
                    e
                );
                self.backup();
                return LocationRecord::new();
            }
        };

        let (record, skipped) = salvage(value);
        if skipped > 0 {
            warn!(
                "Skipped {} malformed entries in {}",
                skipped,
                self.path.display()
            );
            self.backup();
        }
        record
    }

    fn backup(&self) {
        let backup = self.backup_path();
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!("Kept a copy of the original file at {}", backup.display()),
            Err(e) => warn!("Failed to back up {}: {}", self.path.display(), e),
        }
    }

    /// Overwrites the backing file with the full record, indented by four spaces.
    pub fn save(&self, record: &LocationRecord) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        record.serialize(&mut serializer)?;

        let io_error = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&self.path, buf).map_err(io_error)?;

        debug!("Saved {} locations to {}", record.len(), self.path.display());
        Ok(())
    }
}

/// Keeps every well-formed `product -> url -> timestamp` entry of `value`.
///
/// Returns the record and the number of entries that were dropped. A top-level value
/// that is not an object counts as one dropped entry.
fn salvage(value: Value) -> (LocationRecord, usize) {
    let mut record = LocationRecord::new();
    let Value::Object(products) = value else {
        return (record, 1);
    };

    let mut skipped = 0;
    for (product, urls) in products {
        let Value::Object(urls) = urls else {
            debug!("Dropping product {}: not an object", product);
            skipped += 1;
            continue;
        };
        let known = record.0.entry(product).or_default();
        for (url, timestamp) in urls {
            match timestamp {
                Value::String(timestamp) => {
                    known.insert(url, timestamp);
                }
                other => {
                    debug!("Dropping {}: timestamp is {}", url, other);
                    skipped += 1;
                }
            }
        }
    }
    (record, skipped)
}
