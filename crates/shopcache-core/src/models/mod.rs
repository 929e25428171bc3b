//! Domain payloads resolved through the tiers.
//!
//! - `Shop`: ski rental shop with display name, postal address and image
//! - `ShopResponse`: the remote JSON shape, mapped into `Shop`

pub mod shop;

pub use shop::{Shop, ShopResponse};
