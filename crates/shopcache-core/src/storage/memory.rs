use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{IndexSpec, ObjectStore, SchemaRecord, StorageError, StoreSchema};
use crate::resource::{ResourceId, TimestampedResource};

/// Object store kept in process memory. Contents live as long as the value.
pub struct MemoryStore<T> {
    schema: Mutex<Option<SchemaRecord>>,
    /// Keyed by `ResourceId::as_key`, so `136` and `"136"` address the same record.
    records: Mutex<HashMap<String, T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            schema: Mutex::new(None),
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: TimestampedResource> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schema(&self) -> MutexGuard<'_, Option<SchemaRecord>> {
        self.schema.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.schema().is_some() {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

#[async_trait]
impl<T: TimestampedResource> ObjectStore<T> for MemoryStore<T> {
    async fn open(&self, schema: &StoreSchema) -> Result<(), StorageError> {
        let mut current = self.schema();
        if let Some(record) = schema.upgrade(current.as_ref())? {
            *current = Some(record);
        }
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<T>, StorageError> {
        self.ensure_open()?;
        Ok(self.records().get(&id.as_key()).cloned())
    }

    async fn put(&self, resource: &T) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.records().insert(resource.id().as_key(), resource.clone());
        Ok(())
    }

    async fn add(&self, resource: &T) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut records = self.records();
        let id = resource.id();
        if records.contains_key(&id.as_key()) {
            return Err(StorageError::AlreadyExists(id));
        }
        records.insert(id.as_key(), resource.clone());
        Ok(())
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        self.schema()
            .as_ref()
            .map(|record| record.indexes.clone())
            .unwrap_or_default()
    }
}
