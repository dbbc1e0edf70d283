//! # PriceWatch Scheduler
//!
//! Drives price checks three times a day and turns price movements into
//! owner notifications.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (Clock: sleep until next trigger time)
//!   └── CheckCycle::run_cycle(now)
//!         ├── Semaphore(K) + JoinSet: one task per product
//!         │     └── FetchRunner: timeout + bounded retry → CheckOutcome
//!         ├── deal::decide → new state + optional notification
//!         ├── Repository: price sample, then state
//!         └── Notifier: Telegram sendMessage / log
//! ```

pub mod clock;
pub mod cycle;
pub mod deal;
pub mod dispatch;
pub mod engine;
pub mod fetch;
pub mod persistence;
pub mod trigger;

pub use clock::{Clock, SystemClock};
pub use cycle::{CheckCycle, CycleReport, SuppressionPolicy};
pub use deal::{Decision, decide};
pub use dispatch::{LogNotifier, TelegramNotifier};
pub use engine::SchedulerEngine;
pub use fetch::{Backoff, FetchRunner, RetryPolicy};
pub use persistence::{MAX_PRODUCTS_PER_USER, NewProduct, SqliteRepository};
pub use trigger::TriggerSet;
