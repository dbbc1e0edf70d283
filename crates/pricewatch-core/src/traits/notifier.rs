//! Notifier trait: outbound delivery to a product owner.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Notification;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one notification. Errors are logged by the caller, never retried.
    async fn send(&self, user_id: i64, notification: &Notification) -> Result<()>;
}
