//! Hydration transfer between a server-side and a client-side resolution.
//!
//! The server records every network result under `<kind>-<id>`; the slot is
//! serialized into the page/payload it hands to the client, which restores
//! it and consumes each entry at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::StorageError;
use crate::resource::{ResourceId, TimestampedResource};

pub struct HydrationSlot<T> {
    entries: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> Clone for HydrationSlot<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for HydrationSlot<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: TimestampedResource> HydrationSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(id: &ResourceId) -> String {
        format!("{}-{}", T::KIND, id)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, id: &ResourceId, value: T) {
        self.entries().insert(Self::key(id), value);
    }

    /// Remove and return the entry for `id`.
    pub fn take(&self, id: &ResourceId) -> Option<T> {
        self.entries().remove(&Self::key(id))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries().contains_key(&Self::key(id))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(&*self.entries()).map_err(|source| StorageError::Serialization {
            what: "hydration snapshot".to_string(),
            source,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let entries: HashMap<String, T> =
            serde_json::from_str(json).map_err(|source| StorageError::Serialization {
                what: "hydration snapshot".to_string(),
                source,
            })?;
        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
        })
    }
}
