//! Application configuration management.
//!
//! Configuration is stored at `~/.config/shopcache/config.json`. Every field
//! is optional; unset fields fall back to built-in defaults, and
//! `SHOPCACHE_BASE_URL` / `SHOPCACHE_FRESHNESS_SECS` override the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{ShopClient, DEFAULT_BASE_URL, DEFAULT_CURRENCY_CODE};
use crate::cache::ResourceCache;
use crate::models::Shop;
use crate::resolver::{ResolveOptions, Resolver};
use crate::resource::FreshnessPolicy;
use crate::storage::{StorageBackend, StoreSchema};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shopcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Shop data rarely changes within a browsing session; 10 seconds keeps
/// repeated views off the network without serving long-outdated copies.
const DEFAULT_FRESHNESS_SECS: u64 = 10;

const DEFAULT_STORE_NAME: &str = "shops";

const DEFAULT_STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub currency_code: Option<String>,
    pub freshness_window_secs: Option<u64>,
    pub store_name: Option<String>,
    pub store_version: Option<u32>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `SHOPCACHE_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SHOPCACHE_BASE_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(raw) = lookup("SHOPCACHE_FRESHNESS_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.freshness_window_secs = Some(secs),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid SHOPCACHE_FRESHNESS_SECS"),
            }
        }
    }

    pub fn base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn currency_code(&self) -> &str {
        self.currency_code.as_deref().unwrap_or(DEFAULT_CURRENCY_CODE)
    }

    pub fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy::from_secs(self.freshness_window_secs.unwrap_or(DEFAULT_FRESHNESS_SECS))
    }

    pub fn store_schema(&self) -> StoreSchema {
        Shop::store_schema(
            self.store_name.as_deref().unwrap_or(DEFAULT_STORE_NAME),
            self.store_version.unwrap_or(DEFAULT_STORE_VERSION),
        )
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Shop cache service over `backend`, fetching through a [`ShopClient`].
    pub fn shop_cache(&self, backend: StorageBackend<Shop>) -> Result<ResourceCache<Shop>> {
        let client = ShopClient::new(self.base_url(), self.currency_code())
            .context("Failed to create shop client")?;
        let resolver = Resolver::new(backend, self.store_schema());
        let options: ResolveOptions<Shop> = ResolveOptions::new(Arc::new(client), self.freshness());
        Ok(ResourceCache::new(resolver, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.currency_code(), "EUR");
        assert_eq!(config.freshness().window_ms, 10_000);
        let schema = config.store_schema();
        assert_eq!(schema.name, "shops");
        assert_eq!(schema.version, 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            currency_code: Some("CHF".to_string()),
            freshness_window_secs: Some(60),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "SHOPCACHE_BASE_URL" => Some("http://localhost:8080".to_string()),
            "SHOPCACHE_FRESHNESS_SECS" => Some("30".to_string()),
            _ => None,
        });
        assert_eq!(config.base_url(), "http://localhost:8080");
        assert_eq!(config.freshness().window_ms, 30_000);

        config.apply_overrides(|key| (key == "SHOPCACHE_FRESHNESS_SECS").then(|| "soon".to_string()));
        assert_eq!(config.freshness().window_ms, 30_000);
    }

    #[test]
    fn test_cache_dir_override() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/shops")),
            ..Default::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/shops"));
    }
}
