//! # PriceWatch Scraper
//!
//! Reads product title and price from the marketplace's page-JSON API.
//! One `fetch` is one HTTP attempt; retries and timeouts are the caller's.

pub mod extract;
pub mod ozon;

pub use extract::{PagePrices, is_product_url};
pub use ozon::OzonScraper;
