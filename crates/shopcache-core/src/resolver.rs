//! Tiered lookup of a single resource.
//!
//! For a client backend the tiers are consulted in the order
//! snapshot → store → network, and every value found is emitted wrapped in
//! an envelope naming its tier. A network fetch happens only when the store
//! has nothing for the id or its copy has aged past the freshness window.
//! Network results are stamped with the current time and written back to
//! the persistent store (client) or the hydration slot (server).
//!
//! Store failures are logged and treated as a miss whenever a network
//! loader can still run. Network failures end the resolution with an error;
//! retrying is left to the caller or the fetcher itself.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::resource::{
    Clock, FreshnessPolicy, ResourceEnvelope, ResourceId, ResourceOrigin, SystemClock,
    TimestampedResource,
};
use crate::storage::{ObjectStore, StorageBackend, StorageError, StoreSchema};

/// Fetches one resource from its remote origin.
#[async_trait]
pub trait ResourceFetcher<T>: Send + Sync {
    async fn fetch(&self, id: &ResourceId) -> Result<T, ApiError>;
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Network fetch failed: {0}")]
    Transport(#[from] ApiError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

pub type ResolveResult<T> = Result<ResourceEnvelope<T>, ResolveError>;

/// Per-call network configuration.
pub struct ResolveOptions<T> {
    pub network_loader: Option<Arc<dyn ResourceFetcher<T>>>,
    pub freshness: FreshnessPolicy,
}

impl<T> ResolveOptions<T> {
    pub fn new(network_loader: Arc<dyn ResourceFetcher<T>>, freshness: FreshnessPolicy) -> Self {
        Self {
            network_loader: Some(network_loader),
            freshness,
        }
    }

    /// No network loader: stored values are always accepted.
    pub fn offline() -> Self {
        Self {
            network_loader: None,
            freshness: FreshnessPolicy::from_millis(0),
        }
    }
}

impl<T> Clone for ResolveOptions<T> {
    fn clone(&self) -> Self {
        Self {
            network_loader: self.network_loader.clone(),
            freshness: self.freshness,
        }
    }
}

impl<T> fmt::Debug for ResolveOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("network_loader", &self.network_loader.is_some())
            .field("freshness", &self.freshness)
            .finish()
    }
}

struct Inner<T: TimestampedResource> {
    backend: StorageBackend<T>,
    schema: StoreSchema,
    clock: Arc<dyn Clock>,
    opened: OnceCell<()>,
}

/// Cheap to clone; clones share the backend and the opened store.
pub struct Resolver<T: TimestampedResource> {
    inner: Arc<Inner<T>>,
}

impl<T: TimestampedResource> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TimestampedResource> Resolver<T> {
    pub fn new(backend: StorageBackend<T>, schema: StoreSchema) -> Self {
        Self::with_clock(backend, schema, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: StorageBackend<T>, schema: StoreSchema, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                schema,
                clock,
                opened: OnceCell::new(),
            }),
        }
    }

    pub fn backend(&self) -> &StorageBackend<T> {
        &self.inner.backend
    }

    /// Resolve `id`, emitting one envelope per tier that produced a value.
    ///
    /// The stream yields at most one snapshot, one store and one network
    /// envelope, in that order. A network failure is the last item.
    pub fn get_resource_by_id(
        &self,
        id: ResourceId,
        options: ResolveOptions<T>,
    ) -> BoxStream<'static, ResolveResult<T>> {
        let step = match &self.inner.backend {
            StorageBackend::Persistent { .. } => Step::Snapshot,
            StorageBackend::None | StorageBackend::Hydration(_) => Step::Network,
        };
        let resolution = Resolution {
            resolver: self.clone(),
            id,
            options,
            step,
        };

        stream::unfold(resolution, |mut resolution| async move {
            let item = resolution.advance().await?;
            Some((item, resolution))
        })
        .boxed()
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Open the store once per resolver; a failed open is retried next time.
    async fn open_store(&self, store: &Arc<dyn ObjectStore<T>>) -> Result<(), StorageError> {
        self.inner
            .opened
            .get_or_try_init(|| store.open(&self.inner.schema))
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Snapshot,
    Store,
    Network,
    Done,
}

struct Resolution<T: TimestampedResource> {
    resolver: Resolver<T>,
    id: ResourceId,
    options: ResolveOptions<T>,
    step: Step,
}

impl<T: TimestampedResource> Resolution<T> {
    async fn advance(&mut self) -> Option<ResolveResult<T>> {
        loop {
            match self.step {
                Step::Snapshot => {
                    self.step = Step::Store;
                    if let Some(value) = self.take_snapshot() {
                        return Some(Ok(self.envelope(value, ResourceOrigin::Snapshot)));
                    }
                }
                Step::Store => match self.read_store().await {
                    Ok(Some(stored)) => {
                        self.step = if self.needs_refresh(&stored) {
                            Step::Network
                        } else {
                            Step::Done
                        };
                        return Some(Ok(self.envelope(stored, ResourceOrigin::Store)));
                    }
                    Ok(None) => self.step = Step::Network,
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "Failed to read from store");
                        if self.options.network_loader.is_some() {
                            self.step = Step::Network;
                        } else {
                            self.step = Step::Done;
                            return Some(Err(e.into()));
                        }
                    }
                },
                Step::Network => {
                    self.step = Step::Done;
                    return match self.options.network_loader.clone() {
                        Some(loader) => Some(self.fetch(loader.as_ref()).await),
                        None => None,
                    };
                }
                Step::Done => return None,
            }
        }
    }

    fn envelope(&self, data: T, origin: ResourceOrigin) -> ResourceEnvelope<T> {
        debug!(id = %self.id, %origin, timestamp = data.timestamp(), "Resolved resource");
        ResourceEnvelope::new(data, origin)
    }

    fn store(&self) -> Option<Arc<dyn ObjectStore<T>>> {
        match &self.resolver.inner.backend {
            StorageBackend::Persistent { store, .. } => Some(Arc::clone(store)),
            _ => None,
        }
    }

    /// Consume the hydration entry. The store is left untouched; the store
    /// tier that follows reads it as it is.
    fn take_snapshot(&self) -> Option<T> {
        match &self.resolver.inner.backend {
            StorageBackend::Persistent {
                snapshot: Some(slot),
                ..
            } => slot.take(&self.id),
            _ => None,
        }
    }

    async fn read_store(&self) -> Result<Option<T>, StorageError> {
        let Some(store) = self.store() else {
            return Ok(None);
        };
        self.resolver.open_store(&store).await?;
        store.get(&self.id).await
    }

    /// Without a network loader there is nothing to refresh with, so the
    /// stored copy is accepted regardless of age.
    fn needs_refresh(&self, stored: &T) -> bool {
        if self.options.network_loader.is_none() {
            return false;
        }
        let now = self.resolver.now();
        let stale = self.options.freshness.is_stale(now, stored.timestamp());
        if stale {
            debug!(
                id = %self.id,
                age_ms = now - stored.timestamp(),
                window_ms = self.options.freshness.window_ms,
                "Stored copy is stale"
            );
        }
        stale
    }

    async fn fetch(&self, loader: &dyn ResourceFetcher<T>) -> ResolveResult<T> {
        let mut resource = loader.fetch(&self.id).await.map_err(|e| {
            warn!(id = %self.id, error = %e, transient = e.is_transient(), "Network fetch failed");
            e
        })?;
        resource.set_timestamp(self.resolver.now());

        match &self.resolver.inner.backend {
            StorageBackend::Persistent { store, .. } => {
                if let Err(e) = store.put(&resource).await {
                    warn!(id = %self.id, error = %e, "Failed to persist network result");
                }
            }
            StorageBackend::Hydration(slot) => slot.record(&self.id, resource.clone()),
            StorageBackend::None => {}
        }

        Ok(self.envelope(resource, ResourceOrigin::Network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Shop;
    use crate::storage::{HydrationSlot, MemoryStore};
    use crate::testing::{shop, BrokenStore, FakeFetcher, ManualClock, Reply};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: i64 = 10_000;

    fn client(store: Arc<MemoryStore<Shop>>, clock: Arc<ManualClock>) -> Resolver<Shop> {
        Resolver::with_clock(
            StorageBackend::Persistent {
                store,
                snapshot: None,
            },
            StoreSchema::plain("shops", 1),
            clock,
        )
    }

    fn options(fetcher: &Arc<FakeFetcher>) -> ResolveOptions<Shop> {
        ResolveOptions::new(fetcher.clone(), FreshnessPolicy::from_millis(WINDOW))
    }

    async fn resolve(resolver: &Resolver<Shop>, id: i64, options: ResolveOptions<Shop>) -> Vec<ResolveResult<Shop>> {
        resolver
            .get_resource_by_id(ResourceId::from(id), options)
            .collect()
            .await
    }

    fn origins(results: &[ResolveResult<Shop>]) -> Vec<ResourceOrigin> {
        results
            .iter()
            .map(|r| r.as_ref().expect("unexpected error").origin)
            .collect()
    }

    async fn seed(store: &MemoryStore<Shop>, value: Shop) {
        store.open(&StoreSchema::plain("shops", 1)).await.unwrap();
        store.put(&value).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_goes_to_network_and_persists() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        let clock = ManualClock::at(50_000);
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 1));
        let resolver = client(store.clone(), clock);

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Network]);

        let envelope = results[0].as_ref().unwrap();
        assert_eq!(envelope.data.name, "Acme Skis");
        assert_eq!(envelope.data.timestamp, 50_000);

        let stored = store.get(&ResourceId::from(136)).await.unwrap().unwrap();
        assert_eq!(stored, envelope.data);
    }

    #[tokio::test]
    async fn test_second_resolution_within_window_uses_store() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        let clock = ManualClock::at(50_000);
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 1));
        let resolver = client(store, clock.clone());

        resolve(&resolver, 136, options(&fetcher)).await;
        clock.advance(2_000);
        let results = resolve(&resolver, 136, options(&fetcher)).await;

        assert_eq!(origins(&results), vec![ResourceOrigin::Store]);
        assert_eq!(results[0].as_ref().unwrap().data.timestamp, 50_000);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_leading_zero_id_hits_store() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        let clock = ManualClock::at(50_000);
        let fetcher = FakeFetcher::returning(shop("007", "Bond Rentals", 1));
        let resolver = client(store, clock.clone());
        let id = ResourceId::from("007");

        resolver
            .get_resource_by_id(id.clone(), options(&fetcher))
            .collect::<Vec<_>>()
            .await;
        clock.advance(2_000);
        let results: Vec<_> = resolver
            .get_resource_by_id(id, options(&fetcher))
            .collect()
            .await;

        assert_eq!(origins(&results), vec![ResourceOrigin::Store]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_freshness_boundary() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        seed(&store, shop("136", "Acme Skis", 1_000)).await;
        let clock = ManualClock::at(1_000 + WINDOW);
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis v2", 0));
        let resolver = client(store, clock.clone());

        let at_boundary = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&at_boundary), vec![ResourceOrigin::Store]);
        assert_eq!(fetcher.calls(), 0);

        clock.set(1_000 + WINDOW + 1);
        let past_boundary = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(
            origins(&past_boundary),
            vec![ResourceOrigin::Store, ResourceOrigin::Network]
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_without_loader_stale_store_value_is_accepted() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        seed(&store, shop("136", "Acme Skis", 0)).await;
        let resolver = client(store, ManualClock::at(1_000_000));

        let results = resolve(&resolver, 136, ResolveOptions::offline()).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Store]);

        let missing = resolve(&resolver, 999, ResolveOptions::offline()).await;
        assert!(missing.is_empty());
    }

    fn client_with_snapshot(
        store: Arc<MemoryStore<Shop>>,
        snapshot: HydrationSlot<Shop>,
        clock: Arc<ManualClock>,
    ) -> Resolver<Shop> {
        Resolver::with_clock(
            StorageBackend::Persistent {
                store,
                snapshot: Some(snapshot),
            },
            StoreSchema::plain("shops", 1),
            clock,
        )
    }

    #[tokio::test]
    async fn test_snapshot_then_empty_store_fetches() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        let snapshot = HydrationSlot::new();
        snapshot.record(&ResourceId::from(136), shop("136", "Acme Skis", 9_000));
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver = client_with_snapshot(store.clone(), snapshot.clone(), ManualClock::at(10_000));

        let first = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(
            origins(&first),
            vec![ResourceOrigin::Snapshot, ResourceOrigin::Network]
        );
        assert!(snapshot.is_empty());
        assert_eq!(fetcher.calls(), 1);

        // only the network copy, stamped by this resolution, was persisted
        let stored = store.get(&ResourceId::from(136)).await.unwrap().unwrap();
        assert_eq!(stored.timestamp, 10_000);

        let second = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&second), vec![ResourceOrigin::Store]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_overwrite_fresh_store() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        seed(&store, shop("136", "Acme Skis", 8_000)).await;
        let snapshot = HydrationSlot::new();
        snapshot.record(&ResourceId::from(136), shop("136", "Acme Skis (snapshot)", 9_500));
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver = client_with_snapshot(store.clone(), snapshot, ManualClock::at(10_000));

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(
            origins(&results),
            vec![ResourceOrigin::Snapshot, ResourceOrigin::Store]
        );
        let stored = results[1].as_ref().unwrap();
        assert_eq!(stored.data.timestamp, 8_000);
        assert_eq!(stored.data.name, "Acme Skis");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_server_records_into_hydration_slot() {
        let slot = HydrationSlot::new();
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver = Resolver::with_clock(
            StorageBackend::Hydration(slot.clone()),
            StoreSchema::plain("shops", 1),
            ManualClock::at(7_000),
        );

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Network]);
        assert_eq!(slot.take(&ResourceId::from(136)).map(|s| s.timestamp), Some(7_000));
    }

    #[tokio::test]
    async fn test_network_only_backend() {
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver = Resolver::with_clock(
            StorageBackend::None,
            StoreSchema::plain("shops", 1),
            ManualClock::at(1),
        );
        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Network]);
    }

    #[tokio::test]
    async fn test_network_failure_is_terminal_error() {
        let store = Arc::new(MemoryStore::<Shop>::new());
        seed(&store, shop("136", "Acme Skis", 0)).await;
        let fetcher = FakeFetcher::scripted(vec![Reply::Fail], shop("136", "x", 0));
        let resolver = client(store.clone(), ManualClock::at(1_000_000));

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().origin, ResourceOrigin::Store);
        assert!(matches!(results[1], Err(ResolveError::Transport(_))));

        // the stale copy is left untouched
        let stored = store.get(&ResourceId::from(136)).await.unwrap().unwrap();
        assert_eq!(stored.timestamp, 0);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_network() {
        let broken = Arc::new(BrokenStore::default());
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver: Resolver<Shop> = Resolver::with_clock(
            StorageBackend::Persistent {
                store: broken.clone(),
                snapshot: None,
            },
            StoreSchema::plain("shops", 1),
            ManualClock::at(1),
        );

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Network]);
        assert_eq!(broken.puts.load(Ordering::SeqCst), 1);

        let offline = resolve(&resolver, 136, ResolveOptions::offline()).await;
        assert_eq!(offline.len(), 1);
        assert!(matches!(offline[0], Err(ResolveError::Storage(_))));
    }

    #[tokio::test]
    async fn test_failed_open_still_fetches() {
        let broken = Arc::new(BrokenStore {
            fail_open: true,
            ..Default::default()
        });
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver: Resolver<Shop> = Resolver::with_clock(
            StorageBackend::Persistent {
                store: broken,
                snapshot: None,
            },
            StoreSchema::plain("shops", 1),
            ManualClock::at(1),
        );

        let results = resolve(&resolver, 136, options(&fetcher)).await;
        assert_eq!(origins(&results), vec![ResourceOrigin::Network]);
    }

    #[tokio::test]
    async fn test_schema_hook_runs_once_per_resolver() {
        let upgrades = Arc::new(AtomicUsize::new(0));
        let schema = {
            let upgrades = upgrades.clone();
            StoreSchema::new("shops", 1, move |upgrade| {
                upgrades.fetch_add(1, Ordering::SeqCst);
                upgrade.create_index("name", "name", false)
            })
        };
        let store = Arc::new(MemoryStore::<Shop>::new());
        let fetcher = FakeFetcher::returning(shop("136", "Acme Skis", 0));
        let resolver = Resolver::with_clock(
            StorageBackend::Persistent {
                store: store.clone(),
                snapshot: None,
            },
            schema,
            ManualClock::at(1),
        );

        resolve(&resolver, 136, options(&fetcher)).await;
        resolve(&resolver, 137, options(&fetcher)).await;
        assert_eq!(upgrades.load(Ordering::SeqCst), 1);
        assert_eq!(ObjectStore::<Shop>::indexes(store.as_ref()).len(), 1);
    }
}
