//! Network capability for shop resources.
//!
//! This module provides the `ShopClient` for fetching a single shop by id
//! from the remote shop service, plus the `ApiError` taxonomy for transport
//! and HTTP status failures.

pub mod client;
pub mod error;

pub use client::{ShopClient, DEFAULT_BASE_URL, DEFAULT_CURRENCY_CODE};
pub use error::ApiError;
