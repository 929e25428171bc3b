//! Data contract shared by every storage tier.
//!
//! A resource is a domain payload carrying a millisecond `timestamp`. Tiers
//! hand resources around wrapped in a [`ResourceEnvelope`] that records which
//! tier supplied the value. The origin tag is informational only.

use std::fmt;

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Key identifying one resource instance. Remote APIs hand out both numeric
/// ids (`136`) and textual ones (`"A136"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Number(i64),
    Text(String),
}

impl ResourceId {
    /// Filesystem/key friendly representation.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Number(n) => write!(f, "{}", n),
            ResourceId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        ResourceId::Number(value)
    }
}

impl From<i32> for ResourceId {
    fn from(value: i32) -> Self {
        ResourceId::Number(i64::from(value))
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        ResourceId::Number(i64::from(value))
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::Text(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        ResourceId::Text(value)
    }
}

/// A payload that can travel through the tiers.
///
/// `timestamp` is milliseconds since the Unix epoch and is set to "now"
/// whenever a tier stores or revalidates the payload.
pub trait TimestampedResource:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Prefix for hydration keys, e.g. `shop` gives `shop-136`.
    const KIND: &'static str;

    fn id(&self) -> ResourceId;

    fn timestamp(&self) -> i64;

    fn set_timestamp(&mut self, millis: i64);
}

/// Which tier supplied a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum ResourceOrigin {
    /// Hydration transfer from a server-side resolution.
    Snapshot,
    /// Persistent local store.
    Store,
    /// Live fetch.
    Network,
}

impl fmt::Display for ResourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceOrigin::Snapshot => "snapshot",
            ResourceOrigin::Store => "store",
            ResourceOrigin::Network => "network",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope<T> {
    pub data: T,
    pub origin: ResourceOrigin,
}

impl<T: PartialEq> ResourceEnvelope<T> {
    pub fn new(data: T, origin: ResourceOrigin) -> Self {
        Self { data, origin }
    }

    /// Field-by-field payload comparison used to drop repeated emissions.
    /// The origin tag does not take part.
    pub fn same_data(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// Maximum age of a stored copy before a network refresh is warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub window_ms: i64,
}

impl FreshnessPolicy {
    pub fn from_millis(window_ms: i64) -> Self {
        Self { window_ms }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self {
            window_ms: (secs as i64).saturating_mul(1000),
        }
    }

    /// A stored copy is stale once `now - window` has moved past its
    /// timestamp. Landing exactly on the boundary still counts as fresh.
    pub fn is_stale(&self, now_ms: i64, stored_timestamp: i64) -> bool {
        now_ms.saturating_sub(self.window_ms) > stored_timestamp
    }
}

/// Source of "now" for stamping and freshness checks.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
