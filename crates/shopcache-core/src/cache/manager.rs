use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::coalescer::{Broadcast, Coalescer, Subscription, WaiterId};
use crate::resolver::{ResolveOptions, Resolver};
use crate::resource::{ResourceEnvelope, ResourceId, TimestampedResource};

type LastValue<T> = Arc<Mutex<Option<ResourceEnvelope<T>>>>;

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Replay rounds emit the remembered value and then run the resolver
    /// too, so a stale store copy is refreshed on the same call.
    pub revalidate_on_replay: bool,
}

struct CacheEntry<T: TimestampedResource> {
    id: ResourceId,
    coalescer: Coalescer<ResourceEnvelope<T>>,
    last_value: LastValue<T>,
}

/// Per-id entries for one session. Owned by a [`ResourceCache`]; clones
/// share the same map.
pub struct CacheState<T: TimestampedResource> {
    entries: Arc<Mutex<HashMap<ResourceId, Arc<CacheEntry<T>>>>>,
}

impl<T: TimestampedResource> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: TimestampedResource> Clone for CacheState<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: TimestampedResource> CacheState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        lock(&self.entries).contains_key(id)
    }

    /// Last envelope produced for `id`, if any.
    pub fn last_value(&self, id: &ResourceId) -> Option<ResourceEnvelope<T>> {
        let entry = lock(&self.entries).get(id).cloned()?;
        let value = lock(&entry.last_value).clone();
        value
    }
}

/// Session-level memoization of resources by id.
///
/// Every id maps to one shared stream regardless of how many callers ask for
/// it. The first subscriber triggers a resolution; subscribers that overlap
/// with it share the result, and later subscribers receive the remembered
/// value.
pub struct ResourceCache<T: TimestampedResource> {
    resolver: Resolver<T>,
    options: ResolveOptions<T>,
    cache_options: CacheOptions,
    state: CacheState<T>,
}

impl<T: TimestampedResource> ResourceCache<T> {
    pub fn new(resolver: Resolver<T>, options: ResolveOptions<T>) -> Self {
        Self::with_state(resolver, options, CacheOptions::default(), CacheState::new())
    }

    pub fn with_state(
        resolver: Resolver<T>,
        options: ResolveOptions<T>,
        cache_options: CacheOptions,
        state: CacheState<T>,
    ) -> Self {
        Self {
            resolver,
            options,
            cache_options,
            state,
        }
    }

    pub fn state(&self) -> &CacheState<T> {
        &self.state
    }

    /// Number of ids requested so far this session.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn last_value(&self, id: impl Into<ResourceId>) -> Option<ResourceEnvelope<T>> {
        self.state.last_value(&id.into())
    }

    /// Shared stream for `id`, created on first request.
    pub fn get_by_id(&self, id: impl Into<ResourceId>) -> SharedResource<T> {
        let id = id.into();
        let mut entries = lock(&self.state.entries);
        if let Some(existing) = entries.get(&id) {
            return SharedResource {
                entry: Arc::clone(existing),
            };
        }

        debug!(%id, "Creating cache entry");
        let entry = Arc::new(self.create_entry(id.clone()));
        entries.insert(id, Arc::clone(&entry));
        SharedResource { entry }
    }

    /// Shorthand for `get_by_id(id).subscribe()`.
    pub fn subscribe(&self, id: impl Into<ResourceId>) -> ResourceStream<T> {
        self.get_by_id(id).subscribe()
    }

    fn create_entry(&self, id: ResourceId) -> CacheEntry<T> {
        let last_value: LastValue<T> = Arc::new(Mutex::new(None));
        let loader = Loader {
            id: id.clone(),
            resolver: self.resolver.clone(),
            options: self.options.clone(),
            last_value: Arc::clone(&last_value),
            revalidate: self.cache_options.revalidate_on_replay,
        };
        let coalescer = Coalescer::new(move |sink| loader.clone().run(sink));

        CacheEntry {
            id,
            coalescer,
            last_value,
        }
    }
}

struct Loader<T: TimestampedResource> {
    id: ResourceId,
    resolver: Resolver<T>,
    options: ResolveOptions<T>,
    last_value: LastValue<T>,
    revalidate: bool,
}

impl<T: TimestampedResource> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            resolver: self.resolver.clone(),
            options: self.options.clone(),
            last_value: Arc::clone(&self.last_value),
            revalidate: self.revalidate,
        }
    }
}

impl<T: TimestampedResource> Loader<T> {
    /// One production round. Resolver errors end the round as a plain
    /// completion so sharers of the id are never left in a failed state.
    async fn run(self, sink: Broadcast<ResourceEnvelope<T>>) {
        let remembered = lock(&self.last_value).clone();
        if let Some(value) = remembered {
            debug!(id = %self.id, "Replaying remembered value");
            sink.next(value);
            if !self.revalidate {
                sink.complete();
                return;
            }
        }

        let mut results = self
            .resolver
            .get_resource_by_id(self.id.clone(), self.options.clone());
        while let Some(result) = results.next().await {
            match result {
                Ok(envelope) => {
                    *lock(&self.last_value) = Some(envelope.clone());
                    sink.next(envelope);
                }
                Err(e) => {
                    sink.error(format!("resolving {} failed: {}", self.id, e));
                    break;
                }
            }
        }
        sink.complete();
    }
}

/// Handle to the shared stream of one id. Cheap to clone.
pub struct SharedResource<T: TimestampedResource> {
    entry: Arc<CacheEntry<T>>,
}

impl<T: TimestampedResource> Clone for SharedResource<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<T: TimestampedResource> SharedResource<T> {
    pub fn id(&self) -> &ResourceId {
        &self.entry.id
    }

    pub fn subscribe(&self) -> ResourceStream<T> {
        ResourceStream {
            inner: self.entry.coalescer.subscribe(),
            previous: None,
        }
    }

    pub fn last_value(&self) -> Option<ResourceEnvelope<T>> {
        lock(&self.entry.last_value).clone()
    }

    pub fn waiter_count(&self) -> usize {
        self.entry.coalescer.waiter_count()
    }

    /// True when both handles refer to the same cache entry.
    pub fn same_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

/// One subscriber's envelopes with consecutive duplicates removed.
pub struct ResourceStream<T: TimestampedResource> {
    inner: Subscription<ResourceEnvelope<T>>,
    previous: Option<ResourceEnvelope<T>>,
}

// Fields are never pinned.
impl<T: TimestampedResource> Unpin for ResourceStream<T> {}

impl<T: TimestampedResource> ResourceStream<T> {
    pub fn waiter_id(&self) -> WaiterId {
        self.inner.id()
    }

    pub fn unsubscribe(&mut self) {
        self.inner.unsubscribe();
    }
}

impl<T: TimestampedResource> Stream for ResourceStream<T> {
    type Item = ResourceEnvelope<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(envelope)) => {
                    if let Some(previous) = &this.previous {
                        if previous.same_data(&envelope) {
                            continue;
                        }
                    }
                    this.previous = Some(envelope.clone());
                    return Poll::Ready(Some(envelope));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
