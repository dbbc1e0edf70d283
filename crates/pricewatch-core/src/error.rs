//! Error types for PriceWatch.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PriceWatchError>;

#[derive(Debug, Error)]
pub enum PriceWatchError {
    /// Network or timeout problem; retried within a cycle.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Unparseable or removed content; not retried within a cycle.
    #[error("Structural fetch error: {0}")]
    StructuralFetch(String),

    /// Storage collaborator failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Delivery collaborator failure.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single scrape attempt, as reported by a [`Scraper`].
///
/// The variants carry enough signal for the fetch runner to tell
/// retryable problems from content problems.
///
/// [`Scraper`]: crate::traits::Scraper
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Anti-automation interstitial or empty API answer.
    #[error("blocked by remote: {0}")]
    Blocked(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Page loaded but carries no usable price (delisted, layout change).
    #[error("unusable page content: {0}")]
    Content(String),

    #[error("invalid product location: {0}")]
    InvalidLocation(String),
}
