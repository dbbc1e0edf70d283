//! Check cycle orchestrator.
//!
//! One cycle loads every active product, fans fetches out under a global
//! semaphore, and as each fetch resolves persists the sample and new state
//! before delivering any notification. A product's pipeline never touches
//! another product's, and none of them can abort the cycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pricewatch_core::config::CycleConfig;
use pricewatch_core::traits::{Notifier, Repository};
use pricewatch_core::types::{CheckOutcome, Notification, StateUpdate, TrackedProduct};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::deal;
use crate::fetch::FetchRunner;

/// Holds back products that keep failing structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionPolicy {
    /// Streak length that triggers suppression. 0 disables.
    pub after_failures: u32,
    /// How long after the last check a suppressed product is skipped.
    pub hold: Duration,
}

impl SuppressionPolicy {
    pub fn disabled() -> Self {
        Self {
            after_failures: 0,
            hold: Duration::zero(),
        }
    }

    pub fn is_suppressed(&self, product: &TrackedProduct, now: DateTime<Utc>) -> bool {
        if self.after_failures == 0 || product.consecutive_failures < self.after_failures {
            return false;
        }
        match product.last_checked {
            Some(last) => now - last < self.hold,
            None => false,
        }
    }
}

impl From<&CycleConfig> for SuppressionPolicy {
    fn from(config: &CycleConfig) -> Self {
        Self {
            after_failures: config.suppress_after_failures,
            hold: i64::try_from(config.suppress_for_hours)
                .ok()
                .and_then(Duration::try_hours)
                .unwrap_or(Duration::MAX),
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub eligible: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub soft_failures: usize,
    pub hard_failures: usize,
    pub notifications_sent: usize,
    pub notification_errors: usize,
    pub persistence_errors: usize,
    /// Product tasks that panicked.
    pub aborted: usize,
}

impl CycleReport {
    fn record(&mut self, result: &ProductResult) {
        match result.outcome {
            OutcomeClass::Success => self.succeeded += 1,
            OutcomeClass::Soft => self.soft_failures += 1,
            OutcomeClass::Hard => self.hard_failures += 1,
        }
        match result.delivery {
            Delivery::None => {}
            Delivery::Sent => self.notifications_sent += 1,
            Delivery::Failed => self.notification_errors += 1,
        }
        if result.persistence_failed {
            self.persistence_errors += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeClass {
    Success,
    Soft,
    Hard,
}

impl From<&CheckOutcome> for OutcomeClass {
    fn from(outcome: &CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::Success { .. } => OutcomeClass::Success,
            CheckOutcome::SoftFailure { .. } => OutcomeClass::Soft,
            CheckOutcome::HardFailure { .. } => OutcomeClass::Hard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    None,
    Sent,
    Failed,
}

#[derive(Debug)]
struct ProductResult {
    outcome: OutcomeClass,
    delivery: Delivery,
    persistence_failed: bool,
}

/// Everything one product task needs; cloned into each spawned task.
#[derive(Clone)]
struct Pipeline {
    repository: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    runner: FetchRunner,
    permits: Arc<Semaphore>,
}

impl Pipeline {
    async fn process(self, product: TrackedProduct, now: DateTime<Utc>) -> ProductResult {
        let outcome = {
            // The semaphore lives as long as the cycle and is never closed.
            let Ok(_permit) = self.permits.acquire().await else {
                return ProductResult {
                    outcome: OutcomeClass::Soft,
                    delivery: Delivery::None,
                    persistence_failed: false,
                };
            };
            self.runner.check(&product.url).await
        };

        let decision = deal::decide(
            product.deal_state,
            product.consecutive_failures,
            product.target_price,
            &outcome,
        );
        let mut result = ProductResult {
            outcome: OutcomeClass::from(&outcome),
            delivery: Delivery::None,
            persistence_failed: false,
        };

        let (price, fetched_title) = match &outcome {
            CheckOutcome::Success { price, title } => (Some(*price), Some(title.clone())),
            _ => (None, None),
        };

        let update = StateUpdate {
            deal_state: decision.state,
            consecutive_failures: decision.consecutive_failures,
            last_checked: now,
            current_price: price,
            title: fetched_title.clone(),
        };
        let sample = price.map(|p| (p, now));
        if let Err(e) = self.repository.record_check(product.id, sample, &update).await {
            tracing::error!("❌ Dropping result for product {}: {e}", product.id);
            result.persistence_failed = true;
            return result;
        }

        if decision.state != product.deal_state {
            tracing::info!(
                "🔁 Product {} {} → {}",
                product.id,
                product.deal_state,
                decision.state
            );
        }

        if let Some(kind) = decision.notification {
            let notification = Notification {
                kind,
                product_id: product.id,
                title: fetched_title.unwrap_or_else(|| product.display_title().to_string()),
                url: product.url.clone(),
                target: product.target_price,
            };
            result.delivery = match self.notifier.send(product.user_id, &notification).await {
                Ok(()) => {
                    tracing::info!(
                        "🔔 {} sent for product {} to {}",
                        notification.kind.name(),
                        product.id,
                        product.user_id
                    );
                    Delivery::Sent
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ {} for product {} not delivered via {}: {e}",
                        notification.kind.name(),
                        product.id,
                        self.notifier.name()
                    );
                    Delivery::Failed
                }
            };
        }

        result
    }
}

/// Runs check cycles over all tracked products.
pub struct CheckCycle {
    repository: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    runner: FetchRunner,
    max_concurrent: usize,
    suppression: SuppressionPolicy,
}

impl CheckCycle {
    pub fn new(
        repository: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        runner: FetchRunner,
        max_concurrent: usize,
    ) -> Self {
        Self {
            repository,
            notifier,
            runner,
            max_concurrent: max_concurrent.max(1),
            suppression: SuppressionPolicy::disabled(),
        }
    }

    pub fn with_suppression(mut self, suppression: SuppressionPolicy) -> Self {
        self.suppression = suppression;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Check every eligible product once. Returns after all fetches resolved.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            ..CycleReport::default()
        };

        let products = match self.repository.list_tracked_products().await {
            Ok(products) => products,
            Err(e) => {
                tracing::error!("❌ Cannot load tracked products, skipping cycle: {e}");
                report.persistence_errors += 1;
                return report;
            }
        };

        let pipeline = Pipeline {
            repository: Arc::clone(&self.repository),
            notifier: Arc::clone(&self.notifier),
            runner: self.runner.clone(),
            permits: Arc::new(Semaphore::new(self.max_concurrent)),
        };

        let mut tasks = JoinSet::new();
        for product in products {
            if self.suppression.is_suppressed(&product, now) {
                tracing::debug!(
                    "⏭️ Skipping product {} ({} structural failures in a row)",
                    product.id,
                    product.consecutive_failures
                );
                report.skipped += 1;
                continue;
            }
            report.eligible += 1;
            tasks.spawn(pipeline.clone().process(product, now));
        }

        tracing::info!(
            "🔎 Cycle started: {} products, up to {} fetches in flight",
            report.eligible,
            self.max_concurrent
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.record(&result),
                Err(e) => {
                    tracing::error!("❌ Product check task aborted: {e}");
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            "✅ Cycle done: {} ok, {} soft, {} hard, {} skipped, {} notified, \
             {} delivery errors, {} storage errors",
            report.succeeded,
            report.soft_failures,
            report.hard_failures,
            report.skipped,
            report.notifications_sent,
            report.notification_errors,
            report.persistence_errors
        );
        report
    }
}
