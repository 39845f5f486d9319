//! Crash-safe persistence for small identifier sets.
//!
//! Each [`Collection`] is mirrored to one JSON file shaped `{"data": [...]}`.
//! Saves write a sibling temporary file and rename it over the target, so the
//! file on disk is always a complete snapshot; the directory is synced after
//! the rename where the platform allows it. Every load and save of one
//! collection runs inside that collection's exclusive section; different
//! collections never wait on each other.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default file for registered destinations.
pub const DESTINATIONS_FILE: &str = "chat_ids.json";

/// Default file for subscribed members.
pub const SUBSCRIBERS_FILE: &str = "subscribers.json";

/// Persistence errors.
///
/// Internal to the store: `load` degrades to an empty set and `save` returns
/// `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file content is not a recognised snapshot.
    #[error("Invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// A persisted collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Registered outbound chats.
    Destinations,
    /// Members opted in to presence forwarding.
    Subscribers,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destinations => f.write_str("destinations"),
            Self::Subscribers => f.write_str("subscribers"),
        }
    }
}

/// On-disk snapshot. Older files hold a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    data: Vec<&'a T>,
}

/// One file and its exclusive section.
#[derive(Debug)]
struct Section {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Section {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// File-backed store for the relay's identifier sets.
#[derive(Debug)]
pub struct SetStore {
    destinations: Section,
    subscribers: Section,
}

impl SetStore {
    /// Create a store with explicit file paths.
    #[must_use]
    pub fn new(destinations: impl Into<PathBuf>, subscribers: impl Into<PathBuf>) -> Self {
        Self {
            destinations: Section::new(destinations.into()),
            subscribers: Section::new(subscribers.into()),
        }
    }

    /// Create a store using the default file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(DESTINATIONS_FILE), dir.join(SUBSCRIBERS_FILE))
    }

    fn section(&self, collection: Collection) -> &Section {
        match collection {
            Collection::Destinations => &self.destinations,
            Collection::Subscribers => &self.subscribers,
        }
    }

    /// The file backing a collection.
    #[must_use]
    pub fn path(&self, collection: Collection) -> &Path {
        &self.section(collection).path
    }

    /// Load a collection.
    ///
    /// Returns the empty set if the file is missing, unreadable, or not a
    /// recognised snapshot.
    pub async fn load<T>(&self, collection: Collection) -> HashSet<T>
    where
        T: DeserializeOwned + Eq + Hash,
    {
        let section = self.section(collection);
        let _guard = section.lock.lock().await;

        match read_snapshot(&section.path).await {
            Ok(Some(set)) => {
                debug!(%collection, entries = set.len(), "Loaded snapshot");
                set
            }
            Ok(None) => {
                debug!(%collection, path = %section.path.display(), "No snapshot on disk");
                HashSet::new()
            }
            Err(e) => {
                warn!(
                    %collection,
                    path = %section.path.display(),
                    error = %e,
                    "Unreadable snapshot, starting empty"
                );
                HashSet::new()
            }
        }
    }

    /// Save a collection.
    ///
    /// Returns `false` if any step failed; the previous snapshot is then left
    /// in place.
    pub async fn save<T>(&self, collection: Collection, set: &HashSet<T>) -> bool
    where
        T: Serialize + Ord,
    {
        let section = self.section(collection);
        let _guard = section.lock.lock().await;
        let temp = section.temp_path();

        match write_snapshot(&section.path, &temp, set).await {
            Ok(()) => {
                debug!(%collection, entries = set.len(), "Saved snapshot");
                true
            }
            Err(e) => {
                warn!(
                    %collection,
                    path = %section.path.display(),
                    error = %e,
                    "Failed to save snapshot"
                );
                let _ = tokio::fs::remove_file(&temp).await;
                false
            }
        }
    }
}

async fn read_snapshot<T>(path: &Path) -> Result<Option<HashSet<T>>, StoreError>
where
    T: DeserializeOwned + Eq + Hash,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let items = match serde_json::from_slice(&bytes)? {
        Snapshot::Wrapped { data } | Snapshot::Bare(data) => data,
    };
    Ok(Some(items.into_iter().collect()))
}

async fn write_snapshot<T>(path: &Path, temp: &Path, set: &HashSet<T>) -> Result<(), StoreError>
where
    T: Serialize + Ord,
{
    let mut data: Vec<&T> = set.iter().collect();
    data.sort();
    let json = serde_json::to_vec_pretty(&SnapshotRef { data })?;

    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(temp, path).await?;

    // Persist the rename itself. Not every platform can open a directory.
    let dir = parent_dir(path);
    if let Err(e) = sync_dir(dir).await {
        debug!(dir = %dir.display(), error = %e, "Directory sync skipped");
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}
