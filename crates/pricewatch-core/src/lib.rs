//! # PriceWatch Core
//!
//! Shared vocabulary for the price-check engine: domain types, the traits
//! the engine talks to its collaborators through, configuration and errors.
//!
//! ## Collaborators
//! ```text
//! CheckCycle
//!   ├── Scraper     fetch(url) → title + price
//!   ├── Repository  products, price history, deal state
//!   └── Notifier    deal-reached / deal-over / fetch-failed
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PriceWatchConfig;
pub use error::{PriceWatchError, Result, ScrapeError};
pub use types::{
    CheckOutcome, DealState, Money, Notification, NotificationKind, PriceSample, ProductInfo,
    SampleSource, StateUpdate, TrackedProduct,
};
