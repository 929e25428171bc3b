//! Session-level resource cache.
//!
//! This module provides the `ResourceCache` service, which hands out one
//! shared stream per resource id:
//! - concurrent subscribers to the same id share a single resolution
//! - the last envelope is remembered and replayed to later subscribers
//! - consecutive envelopes with identical payloads are delivered once
//! - resolver failures end the stream quietly instead of erroring

pub mod manager;

pub use manager::{CacheOptions, CacheState, ResourceCache, ResourceStream, SharedResource};
