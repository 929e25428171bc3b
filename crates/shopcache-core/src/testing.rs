//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::ApiError;
use crate::models::Shop;
use crate::resolver::ResourceFetcher;
use crate::resource::{Clock, ResourceId, TimestampedResource};
use crate::storage::{IndexSpec, ObjectStore, StorageError, StoreSchema};

pub fn shop(id: &str, name: &str, timestamp: i64) -> Shop {
    Shop {
        id: id.to_string(),
        name: name.to_string(),
        address: "Vienna".to_string(),
        image: "http://x/img.png".to_string(),
        timestamp,
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub enum Reply {
    Ok(Shop),
    Fail,
}

/// Scripted fetcher. Falls back to the last scripted reply when the script
/// runs out; an optional gate holds every fetch until released.
pub struct FakeFetcher {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Shop,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeFetcher {
    pub fn returning(shop: Shop) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: shop,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn scripted(replies: Vec<Reply>, fallback: Shop) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(shop: Shop, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: shop,
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFetcher<Shop> for FakeFetcher {
    async fn fetch(&self, _id: &ResourceId) -> Result<Shop, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Ok(shop)) => Ok(shop),
            Some(Reply::Fail) => Err(ApiError::ServerError {
                status: 503,
                body: "scripted failure".to_string(),
            }),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Store whose reads always fail; writes are counted.
#[derive(Default)]
pub struct BrokenStore {
    pub fail_open: bool,
    pub puts: AtomicUsize,
}

#[async_trait]
impl<T: TimestampedResource> ObjectStore<T> for BrokenStore {
    async fn open(&self, schema: &StoreSchema) -> Result<(), StorageError> {
        if self.fail_open {
            return Err(StorageError::SchemaUpgrade {
                store: schema.name.clone(),
                version: schema.version,
                reason: "broken".to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, _id: &ResourceId) -> Result<Option<T>, StorageError> {
        Err(StorageError::Io {
            path: "broken".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
        })
    }

    async fn put(&self, _resource: &T) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add(&self, _resource: &T) -> Result<(), StorageError> {
        Ok(())
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        Vec::new()
    }
}
