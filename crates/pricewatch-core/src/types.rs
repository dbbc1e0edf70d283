//! Domain types shared by the engine and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PriceWatchError;

/// Amount of money in minor currency units (kopecks, cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Whole major units, e.g. `Money::from_major(1000)` is 1000.00.
    pub const fn from_major(major: i64) -> Self {
        Self(major * 100)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Parse a human-entered price such as `1999.99`, `1 999,99` or `1200`.
    ///
    /// Whitespace (including non-breaking and thin spaces) is ignored and a
    /// comma is accepted as the decimal separator. A third fractional digit
    /// rounds half up; anything beyond it is ignored. Returns `None` for
    /// non-positive or malformed input.
    pub fn parse(text: &str) -> Option<Self> {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == ',' { '.' } else { c })
            .collect();

        let (whole, frac) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut digits = frac.bytes().map(|b| i64::from(b - b'0'));
        let tens = digits.next().unwrap_or(0);
        let ones = digits.next().unwrap_or(0);
        let round_up = digits.next().is_some_and(|d| d >= 5);

        let minor = whole
            .checked_mul(100)?
            .checked_add(tens * 10 + ones + i64::from(round_up))?;
        (minor > 0).then_some(Self(minor))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Persisted classification of a product's last known price against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealState {
    /// Never evaluated.
    #[default]
    None,
    /// Last price ≤ target.
    BelowTarget,
    /// Last price > target.
    AboveTarget,
}

impl DealState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealState::None => "none",
            DealState::BelowTarget => "below",
            DealState::AboveTarget => "above",
        }
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealState {
    type Err = PriceWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(DealState::None),
            "below" => Ok(DealState::BelowTarget),
            "above" => Ok(DealState::AboveTarget),
            other => Err(PriceWatchError::Persistence(format!(
                "unknown deal state '{other}'"
            ))),
        }
    }
}

/// A product whose price is re-checked every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProduct {
    pub id: i64,
    /// Owner; also the Telegram chat the owner is reached at.
    pub user_id: i64,
    pub url: String,
    /// Unknown until the first successful fetch.
    pub title: Option<String>,
    pub target_price: Money,
    pub current_price: Option<Money>,
    pub deal_state: DealState,
    /// Structural fetch failures since the last success.
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl TrackedProduct {
    /// Title for messages; falls back to the URL before the first fetch.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// Where a price sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Initial fetch when the product was added.
    Add,
    Scheduler,
    Manual,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Add => "add",
            SampleSource::Scheduler => "scheduler",
            SampleSource::Manual => "manual",
        }
    }
}

impl FromStr for SampleSource {
    type Err = PriceWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(SampleSource::Add),
            "scheduler" => Ok(SampleSource::Scheduler),
            "manual" => Ok(SampleSource::Manual),
            other => Err(PriceWatchError::Persistence(format!(
                "unknown sample source '{other}'"
            ))),
        }
    }
}

/// One observed price. Append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub product_id: i64,
    pub price: Money,
    pub observed_at: DateTime<Utc>,
    pub source: SampleSource,
}

/// What a scraper extracts from a product page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub title: String,
    pub price: Money,
}

/// Result of one fetch-runner invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Success { price: Money, title: String },
    /// Retries exhausted on timeouts or network trouble.
    SoftFailure { reason: String },
    /// Content problem; retrying cannot help.
    HardFailure { reason: String },
}

impl CheckOutcome {
    /// Title and price on success, otherwise the matching fetch error.
    pub fn into_result(self) -> Result<(String, Money), PriceWatchError> {
        match self {
            CheckOutcome::Success { price, title } => Ok((title, price)),
            CheckOutcome::SoftFailure { reason } => Err(PriceWatchError::TransientFetch(reason)),
            CheckOutcome::HardFailure { reason } => Err(PriceWatchError::StructuralFetch(reason)),
        }
    }
}

/// What the owner is told, and the data the message needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    DealReached { price: Money },
    DealOver { price: Money },
    FetchFailed { reason: String },
}

impl NotificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKind::DealReached { .. } => "deal-reached",
            NotificationKind::DealOver { .. } => "deal-over",
            NotificationKind::FetchFailed { .. } => "fetch-failed",
        }
    }
}

/// A notification addressed to a product's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub product_id: i64,
    pub title: String,
    pub url: String,
    pub target: Money,
}

/// Fields the orchestrator writes back after a product is checked.
///
/// `title` and `current_price` are `None` when the check produced no new
/// value; the stored value is then kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub deal_state: DealState,
    pub consecutive_failures: u32,
    pub last_checked: DateTime<Utc>,
    pub current_price: Option<Money>,
    pub title: Option<String>,
}
