//! HTTP client for the ski rental shop endpoint.
//!
//! `ShopClient` is the network capability handed to the resolver: it fetches
//! one shop by id and maps the remote JSON into a [`Shop`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{Shop, ShopResponse};
use crate::resolver::ResourceFetcher;
use crate::resource::ResourceId;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL of the shop service
pub const DEFAULT_BASE_URL: &str = "https://www.alpinresorts.com/de/service/ski-rental";

/// Default currency for price fields in the shop payload
pub const DEFAULT_CURRENCY_CODE: &str = "EUR";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ShopClient {
    client: Client,
    base_url: String,
    currency_code: String,
}

impl ShopClient {
    pub fn new(base_url: &str, currency_code: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            currency_code: currency_code.to_string(),
        })
    }

    pub fn with_defaults() -> Result<Self, ApiError> {
        Self::new(DEFAULT_BASE_URL, DEFAULT_CURRENCY_CODE)
    }

    fn shop_url(&self, id: &ResourceId) -> String {
        format!(
            "{}/shops/{}?&currencyCode={}",
            self.base_url, id, self.currency_code
        )
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        url: &str,
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(url, status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(url, response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text)
                        .map_err(|e| ApiError::Decode {
                            url: url.to_string(),
                            reason: e.to_string(),
                        });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited { attempts: retries });
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    pub async fn fetch_shop(&self, id: &ResourceId) -> Result<ShopResponse, ApiError> {
        let url = self.shop_url(id);
        debug!(%id, url = %url, "Fetching shop");
        self.get(&url).await
    }
}

#[async_trait]
impl ResourceFetcher<Shop> for ShopClient {
    async fn fetch(&self, id: &ResourceId) -> Result<Shop, ApiError> {
        let response = self.fetch_shop(id).await?;
        Ok(response.to_shop(Utc::now().timestamp_millis()))
    }
}
