//! shopcache core - resolve timestamped resources from the freshest tier.
//!
//! A resource is looked up in a hydration snapshot, then a persistent
//! store, then the network, with each result tagged by the tier that
//! supplied it. Concurrent requests for the same id share one in-flight
//! fetch, and the session remembers the last value per id.
//!
//! - `resource`: ids, envelopes, freshness policy, clock
//! - `coalescer`: at-most-one-producer broadcast to many waiters
//! - `storage`: object stores, hydration slot, backend selection
//! - `resolver`: the tier walk for one id
//! - `cache`: per-id shared streams with replay and duplicate suppression
//! - `api`, `models`: the shop endpoint and its payload
//! - `config`: file and environment configuration

pub mod api;
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod models;
pub mod resolver;
pub mod resource;
pub mod storage;

#[cfg(test)]
mod testing;

pub use api::{ApiError, ShopClient};
pub use cache::{CacheOptions, CacheState, ResourceCache, ResourceStream, SharedResource};
pub use coalescer::{Broadcast, Coalescer, Subscription, WaiterId};
pub use config::Config;
pub use models::Shop;
pub use resolver::{ResolveError, ResolveOptions, Resolver, ResourceFetcher};
pub use resource::{
    Clock, FreshnessPolicy, ResourceEnvelope, ResourceId, ResourceOrigin, SystemClock,
    TimestampedResource,
};
pub use storage::{
    HydrationSlot, JsonFileStore, MemoryStore, ObjectStore, StorageBackend, StorageError,
    StoreSchema,
};
