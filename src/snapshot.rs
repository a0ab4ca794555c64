//! Snapshot persistence.
//!
//! The snapshot is the last state this system successfully pushed to the
//! inventory, keyed by address. Stores only need per-address atomicity:
//! after any crash the snapshot reflects every action applied up to the
//! last completed write.
//!
//! # Backends
//!
//! - [`MemorySnapshotStore`] - in-process map, for tests and embedding
//! - [`JsonSnapshotStore`] - JSON file rewritten atomically (temp file +
//!   rename) on every mutation

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lease::SnapshotEntry;

/// The whole persisted snapshot, ordered by address.
pub type Snapshot = BTreeMap<IpAddr, SnapshotEntry>;

/// Persisted mapping from address to the last record pushed for it.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads every entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreRead`] if the snapshot exists but cannot be
    /// read or decoded.
    async fn load_all(&self) -> Result<Snapshot>;

    /// Writes or overwrites the entry for `entry.address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWrite`] if the entry could not be persisted.
    async fn upsert(&self, entry: &SnapshotEntry) -> Result<()>;

    /// Removes the entry for `address`. Removing an absent address succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWrite`] if the removal could not be persisted.
    async fn delete(&self, address: IpAddr) -> Result<()>;
}

/// Snapshot held in memory only.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<Snapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I: IntoIterator<Item = SnapshotEntry>>(entries: I) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.address, entry))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub async fn get(&self, address: &IpAddr) -> Option<SnapshotEntry> {
        self.entries.lock().await.get(address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_all(&self) -> Result<Snapshot> {
        Ok(self.entries.lock().await.clone())
    }

    async fn upsert(&self, entry: &SnapshotEntry) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(entry.address, entry.clone());
        Ok(())
    }

    async fn delete(&self, address: IpAddr) -> Result<()> {
        self.entries.lock().await.remove(&address);
        Ok(())
    }
}

/// On-disk format of [`JsonSnapshotStore`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SnapshotFile {
    entries: Vec<SnapshotEntry>,
}

/// Snapshot persisted as a JSON file.
///
/// The file is loaded once on [`JsonSnapshotStore::open`]; every mutation
/// updates the in-memory copy and rewrites the file through a temporary
/// sibling that is renamed into place. If the rewrite fails the in-memory
/// copy is rolled back so it never runs ahead of the file.
#[derive(Debug)]
pub struct JsonSnapshotStore {
    path: PathBuf,
    entries: Mutex<Snapshot>,
}

impl JsonSnapshotStore {
    /// Opens the snapshot at `path`. A missing file is an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreRead`] if the file exists but cannot be read or
    /// parsed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::load_file(&path).await?;
        debug!("Opened snapshot {:?} with {} entries", path, entries.len());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_file(path: &Path) -> Result<Snapshot> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|error| Error::StoreRead(format!("{:?}: {}", path, error)))?
        {
            return Ok(Snapshot::new());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| Error::StoreRead(format!("{:?}: {}", path, error)))?;
        let file: SnapshotFile = serde_json::from_str(&content)
            .map_err(|error| Error::StoreRead(format!("{:?}: {}", path, error)))?;

        Ok(file
            .entries
            .into_iter()
            .map(|entry| (entry.address, entry))
            .collect())
    }

    async fn persist(&self, entries: &Snapshot) -> std::io::Result<()> {
        let file = SnapshotFile {
            entries: entries.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut temp_file = tokio::fs::File::create(&temp_path).await?;
        temp_file.write_all(content.as_bytes()).await?;
        temp_file.sync_all().await?;
        drop(temp_file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        self.sync_parent_dir().await;
        Ok(())
    }

    /// Flushes the rename to disk. Not every platform can open a directory
    /// for syncing, so failures are only logged.
    async fn sync_parent_dir(&self) {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let result = match tokio::fs::File::open(parent).await {
            Ok(dir) => dir.sync_all().await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            debug!("Could not sync snapshot directory {:?}: {}", parent, error);
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load_all(&self) -> Result<Snapshot> {
        Ok(self.entries.lock().await.clone())
    }

    async fn upsert(&self, entry: &SnapshotEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(entry.address, entry.clone());

        if let Err(error) = self.persist(&entries).await {
            match previous {
                Some(previous) => entries.insert(entry.address, previous),
                None => entries.remove(&entry.address),
            };
            return Err(Error::StoreWrite {
                address: entry.address,
                reason: error.to_string(),
            });
        }

        Ok(())
    }

    async fn delete(&self, address: IpAddr) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(&address) else {
            return Ok(());
        };

        if let Err(error) = self.persist(&entries).await {
            entries.insert(address, previous);
            return Err(Error::StoreWrite {
                address,
                reason: error.to_string(),
            });
        }

        Ok(())
    }
}
