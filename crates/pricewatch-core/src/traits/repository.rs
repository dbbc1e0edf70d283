//! Repository trait: durable products and price history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Money, StateUpdate, TrackedProduct};

/// Storage used by the check cycle.
///
/// Implementations must accept concurrent calls for distinct products.
#[async_trait]
pub trait Repository: Send + Sync {
    /// All active products.
    async fn list_tracked_products(&self) -> Result<Vec<TrackedProduct>>;

    async fn get_product(&self, product_id: i64) -> Result<Option<TrackedProduct>>;

    /// Append a scheduler-sourced price sample.
    async fn append_price_sample(
        &self,
        product_id: i64,
        price: Money,
        observed_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_state(&self, product_id: i64, update: &StateUpdate) -> Result<()>;

    /// Persist one check result: the optional sample and the new state are
    /// written together or not at all.
    async fn record_check(
        &self,
        product_id: i64,
        sample: Option<(Money, DateTime<Utc>)>,
        update: &StateUpdate,
    ) -> Result<()>;
}
