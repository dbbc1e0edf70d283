//! Scraper trait: one remote lookup of a product page.

use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::types::ProductInfo;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Scraper name for logs.
    fn name(&self) -> &str;

    /// Fetch title and price for the product at `location`.
    ///
    /// One call is one attempt; retries and timeouts belong to the caller.
    async fn fetch(&self, location: &str) -> Result<ProductInfo, ScrapeError>;
}
