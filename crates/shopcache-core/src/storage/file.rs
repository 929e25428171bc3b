//! On-disk object store.
//!
//! Each store is a directory under the cache root holding `schema.json` and
//! one pretty-printed JSON file per record:
//!
//! ```text
//! <cache_dir>/shops/schema.json
//! <cache_dir>/shops/136.json
//! ```

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::debug;

use super::{IndexSpec, ObjectStore, SchemaRecord, StorageError, StoreSchema};
use crate::resource::{ResourceId, TimestampedResource};

const SCHEMA_FILE: &str = "schema.json";

struct OpenStore {
    dir: PathBuf,
    schema: SchemaRecord,
}

pub struct JsonFileStore<T> {
    cache_dir: PathBuf,
    state: Mutex<Option<OpenStore>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TimestampedResource> JsonFileStore<T> {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            state: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<OpenStore>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_dir(&self) -> Result<PathBuf, StorageError> {
        self.state()
            .as_ref()
            .map(|open| open.dir.clone())
            .ok_or(StorageError::Closed)
    }

    /// Keep record file names to a safe character set.
    fn file_name(id: &ResourceId) -> String {
        let key: String = id
            .as_key()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}.json", key)
    }

    fn record_path(&self, id: &ResourceId) -> Result<PathBuf, StorageError> {
        Ok(self.store_dir()?.join(Self::file_name(id)))
    }
}

async fn load<V: DeserializeOwned>(path: &Path) -> Result<Option<V>, StorageError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value = serde_json::from_str(&contents).map_err(|source| StorageError::Serialization {
        what: path.display().to_string(),
        source,
    })?;

    Ok(Some(value))
}

async fn save<V: Serialize>(path: &Path, value: &V) -> Result<(), StorageError> {
    let contents =
        serde_json::to_string_pretty(value).map_err(|source| StorageError::Serialization {
            what: path.display().to_string(),
            source,
        })?;
    fs::write(path, contents).await.map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl<T: TimestampedResource> ObjectStore<T> for JsonFileStore<T> {
    async fn open(&self, schema: &StoreSchema) -> Result<(), StorageError> {
        let already_open = self.state().as_ref().is_some_and(|open| {
            open.schema.name == schema.name && open.schema.version == schema.version
        });
        if already_open {
            return Ok(());
        }

        let dir = self.cache_dir.join(&schema.name);
        fs::create_dir_all(&dir).await.map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;

        let schema_path = dir.join(SCHEMA_FILE);
        let persisted: Option<SchemaRecord> = load(&schema_path).await?;
        let record = match schema.upgrade(persisted.as_ref())? {
            Some(upgraded) => {
                save(&schema_path, &upgraded).await?;
                upgraded
            }
            None => match persisted {
                Some(record) => record,
                None => return Err(StorageError::Closed),
            },
        };

        debug!(store = %schema.name, version = record.version, dir = ?dir, "Opened file store");
        *self.state() = Some(OpenStore { dir, schema: record });
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<T>, StorageError> {
        let path = self.record_path(id)?;
        load(&path).await
    }

    async fn put(&self, resource: &T) -> Result<(), StorageError> {
        let path = self.record_path(&resource.id())?;
        save(&path, resource).await
    }

    /// The existence check and the write are not atomic across processes.
    async fn add(&self, resource: &T) -> Result<(), StorageError> {
        let id = resource.id();
        let path = self.record_path(&id)?;
        let exists = fs::try_exists(&path).await.map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        if exists {
            return Err(StorageError::AlreadyExists(id));
        }
        save(&path, resource).await
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        self.state()
            .as_ref()
            .map(|open| open.schema.indexes.clone())
            .unwrap_or_default()
    }
}
