//! Storage tiers sitting between the caller and the network.
//!
//! - `ObjectStore`: persistent keyed object storage with a versioned schema
//! - `MemoryStore`, `JsonFileStore`: in-process and on-disk implementations
//! - `HydrationSlot`: read-once handoff from a server-side resolution
//! - `StorageBackend`: which of the above a resolver runs against
//!
//! A runtime either persists locally (client) or records hydration
//! snapshots (server), never both, so the choice is made once when the
//! backend is constructed.

pub mod file;
pub mod hydration;
pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::resource::{ResourceId, TimestampedResource};

pub use file::JsonFileStore;
pub use hydration::HydrationSlot;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Schema upgrade of '{store}' to version {version} failed: {reason}")]
    SchemaUpgrade {
        store: String,
        version: u32,
        reason: String,
    },

    #[error("Store '{store}' is at version {stored}, cannot open at lower version {requested}")]
    VersionConflict {
        store: String,
        stored: u32,
        requested: u32,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(ResourceId),

    #[error("Store is not open")]
    Closed,
}

/// Secondary index declared during a schema upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

/// Persisted schema of one object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub version: u32,
    pub indexes: Vec<IndexSpec>,
}

/// Handed to the upgrade hook when a store is created or its version grows.
#[derive(Debug)]
pub struct SchemaUpgrade {
    pub old_version: u32,
    pub new_version: u32,
    indexes: Vec<IndexSpec>,
}

impl SchemaUpgrade {
    pub fn create_index(
        &mut self,
        name: &str,
        key_path: &str,
        unique: bool,
    ) -> Result<(), StorageError> {
        if self.indexes.iter().any(|idx| idx.name == name) {
            return Err(StorageError::InvalidSchema(format!(
                "index '{}' already exists",
                name
            )));
        }
        self.indexes.push(IndexSpec {
            name: name.to_string(),
            key_path: key_path.to_string(),
            unique,
        });
        Ok(())
    }

    pub fn delete_index(&mut self, name: &str) {
        self.indexes.retain(|idx| idx.name != name);
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }
}

pub type UpgradeHook = Arc<dyn Fn(&mut SchemaUpgrade) -> Result<(), StorageError> + Send + Sync>;

/// Name, version and index setup of a store.
#[derive(Clone)]
pub struct StoreSchema {
    pub name: String,
    pub version: u32,
    pub on_upgrade: UpgradeHook,
}

impl StoreSchema {
    pub fn new<F>(name: impl Into<String>, version: u32, on_upgrade: F) -> Self
    where
        F: Fn(&mut SchemaUpgrade) -> Result<(), StorageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version,
            on_upgrade: Arc::new(on_upgrade),
        }
    }

    /// Schema without secondary indexes.
    pub fn plain(name: impl Into<String>, version: u32) -> Self {
        Self::new(name, version, |_| Ok(()))
    }

    /// Compare against what is persisted and run the upgrade hook when the
    /// version grew. Returns the record to persist, or `None` when nothing
    /// changed. A failing hook leaves the persisted schema untouched.
    pub fn upgrade(&self, current: Option<&SchemaRecord>) -> Result<Option<SchemaRecord>, StorageError> {
        if self.version == 0 {
            return Err(StorageError::InvalidSchema(
                "version must be a positive integer".to_string(),
            ));
        }

        let (old_version, indexes) = match current {
            Some(record) if record.version == self.version => return Ok(None),
            Some(record) if record.version > self.version => {
                return Err(StorageError::VersionConflict {
                    store: self.name.clone(),
                    stored: record.version,
                    requested: self.version,
                });
            }
            Some(record) => (record.version, record.indexes.clone()),
            None => (0, Vec::new()),
        };

        info!(
            store = %self.name,
            old_version,
            new_version = self.version,
            "Store requires setup/upgrade"
        );

        let mut upgrade = SchemaUpgrade {
            old_version,
            new_version: self.version,
            indexes,
        };
        (self.on_upgrade)(&mut upgrade).map_err(|e| {
            error!(store = %self.name, error = %e, "Schema upgrade failed, aborting");
            match e {
                StorageError::SchemaUpgrade { .. } => e,
                other => StorageError::SchemaUpgrade {
                    store: self.name.clone(),
                    version: self.version,
                    reason: other.to_string(),
                },
            }
        })?;

        Ok(Some(SchemaRecord {
            name: self.name.clone(),
            version: self.version,
            indexes: upgrade.indexes,
        }))
    }
}

impl fmt::Debug for StoreSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSchema")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Keyed object storage. Records are keyed by [`TimestampedResource::id`].
#[async_trait]
pub trait ObjectStore<T: TimestampedResource>: Send + Sync {
    /// Open (creating or upgrading when needed). Calling it again with the
    /// same schema is cheap.
    async fn open(&self, schema: &StoreSchema) -> Result<(), StorageError>;

    async fn get(&self, id: &ResourceId) -> Result<Option<T>, StorageError>;

    /// Insert or overwrite.
    async fn put(&self, resource: &T) -> Result<(), StorageError>;

    /// Insert only; fails with `AlreadyExists` when the key is taken.
    async fn add(&self, resource: &T) -> Result<(), StorageError>;

    /// Indexes of the opened schema.
    fn indexes(&self) -> Vec<IndexSpec>;
}

/// Tiers available to a resolver.
pub enum StorageBackend<T: TimestampedResource> {
    /// Network only.
    None,
    /// Client side: optional hydration snapshot to consume, then a
    /// persistent store that network results are written back to.
    Persistent {
        store: Arc<dyn ObjectStore<T>>,
        snapshot: Option<HydrationSlot<T>>,
    },
    /// Server side: network results are recorded for the client's first
    /// resolution instead of being persisted.
    Hydration(HydrationSlot<T>),
}

impl<T: TimestampedResource> Clone for StorageBackend<T> {
    fn clone(&self) -> Self {
        match self {
            StorageBackend::None => StorageBackend::None,
            StorageBackend::Persistent { store, snapshot } => StorageBackend::Persistent {
                store: Arc::clone(store),
                snapshot: snapshot.clone(),
            },
            StorageBackend::Hydration(slot) => StorageBackend::Hydration(slot.clone()),
        }
    }
}

impl<T: TimestampedResource> fmt::Debug for StorageBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::None => f.write_str("None"),
            StorageBackend::Persistent { snapshot, .. } => f
                .debug_struct("Persistent")
                .field("snapshot", &snapshot.is_some())
                .finish_non_exhaustive(),
            StorageBackend::Hydration(slot) => f.debug_tuple("Hydration").field(&slot.len()).finish(),
        }
    }
}
