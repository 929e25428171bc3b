//! Ski rental shop, the resource type shopcache resolves.

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceId, TimestampedResource};
use crate::storage::StoreSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Shop {
    /// e.g. `136` or `A136`
    pub id: String,
    pub name: String,
    /// Postal address as a single line, e.g. `Austria, 1120 Vienna`
    pub address: String,
    /// Absolute URL of the large shop image
    pub image: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Shop {
    /// Store schema with lookup indexes on name, address and image.
    pub fn store_schema(name: &str, version: u32) -> StoreSchema {
        StoreSchema::new(name, version, |upgrade| {
            if upgrade.old_version < 1 {
                upgrade.create_index("name", "name", false)?;
                upgrade.create_index("address", "address", false)?;
                upgrade.create_index("image", "image", false)?;
            }
            Ok(())
        })
    }
}

impl TimestampedResource for Shop {
    const KIND: &'static str = "shop";

    /// Kept as text so ids like `007` address the same store record they
    /// were looked up by.
    fn id(&self) -> ResourceId {
        ResourceId::Text(self.id.clone())
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn set_timestamp(&mut self, millis: i64) {
        self.timestamp = millis;
    }
}

/// Shop as returned by the remote shop endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ShopResponse {
    pub id: ResourceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "imagePathBig", default)]
    pub image_path_big: Option<String>,
}

impl ShopResponse {
    pub fn to_shop(&self, now_ms: i64) -> Shop {
        Shop {
            id: self.id.to_string(),
            name: self.name.clone().unwrap_or_default(),
            address: self.address.clone().unwrap_or_default(),
            image: self.image_path_big.clone().unwrap_or_default(),
            timestamp: now_ms,
        }
    }
}
