//! Fetch task runner: one product lookup with per-attempt timeout and bounded retry.
//!
//! Timeouts and network trouble are retried up to `max_attempts`; content
//! problems (no price, delisted page, bad URL) end the run immediately since
//! another attempt would read the same page.

use std::sync::Arc;
use std::time::Duration;

use pricewatch_core::config::{BackoffConfig, FetchConfig};
use pricewatch_core::error::ScrapeError;
use pricewatch_core::traits::Scraper;
use pricewatch_core::types::CheckOutcome;

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial * 2^(attempt-1)`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        match config {
            BackoffConfig::Fixed { delay_ms } => Backoff::Fixed(Duration::from_millis(*delay_ms)),
            BackoffConfig::Exponential { initial_ms, max_ms } => Backoff::Exponential {
                initial: Duration::from_millis(*initial_ms),
                max: Duration::from_millis(*max_ms),
            },
        }
    }
}

/// Retry policy consumed by [`FetchRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            backoff: Backoff::from(&config.backoff),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Structural,
}

/// Decide whether another attempt could succeed.
pub fn classify(err: &ScrapeError) -> FailureClass {
    match err {
        ScrapeError::Timeout | ScrapeError::Network(_) | ScrapeError::Blocked(_) => {
            FailureClass::Transient
        }
        ScrapeError::Status(code) if *code == 408 || *code == 429 || *code >= 500 => {
            FailureClass::Transient
        }
        ScrapeError::Status(_) | ScrapeError::Content(_) | ScrapeError::InvalidLocation(_) => {
            FailureClass::Structural
        }
    }
}

/// Runs one product check against a [`Scraper`]. Stateless; clone freely.
#[derive(Clone)]
pub struct FetchRunner {
    scraper: Arc<dyn Scraper>,
    policy: RetryPolicy,
}

impl FetchRunner {
    pub fn new(scraper: Arc<dyn Scraper>, policy: RetryPolicy) -> Self {
        Self { scraper, policy }
    }

    /// Fetch `location` and classify the result.
    ///
    /// A timed-out attempt is dropped, so no attempt outlives `attempt_timeout`.
    pub async fn check(&self, location: &str) -> CheckOutcome {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = ScrapeError::Timeout;

        for attempt in 1..=attempts {
            let fetch = self.scraper.fetch(location);
            let result = tokio::time::timeout(self.policy.attempt_timeout, fetch).await;

            let err = match result {
                Ok(Ok(info)) => {
                    if attempt > 1 {
                        tracing::debug!("Fetch of {location} succeeded on attempt {attempt}");
                    }
                    return CheckOutcome::Success {
                        price: info.price,
                        title: info.title,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => ScrapeError::Timeout,
            };

            match classify(&err) {
                FailureClass::Structural => {
                    tracing::warn!("⚠️ {} cannot read {location}: {err}", self.scraper.name());
                    return CheckOutcome::HardFailure {
                        reason: err.to_string(),
                    };
                }
                FailureClass::Transient => {
                    tracing::debug!("Attempt {attempt}/{attempts} for {location} failed: {err}");
                    last_error = err;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff.delay(attempt)).await;
            }
        }

        tracing::warn!("⚠️ Giving up on {location} after {attempts} attempts: {last_error}");
        CheckOutcome::SoftFailure {
            reason: last_error.to_string(),
        }
    }
}
