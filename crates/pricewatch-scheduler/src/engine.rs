//! Scheduler engine: sleeps until the next trigger time, runs one cycle, repeats.
//! The next trigger is always recomputed from the clock after a cycle, so a
//! slow cycle skips the triggers it overran instead of replaying them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::cycle::{CheckCycle, CycleReport};
use crate::trigger::TriggerSet;

pub struct SchedulerEngine {
    triggers: TriggerSet,
    cycle: CheckCycle,
    clock: Arc<dyn Clock>,
}

impl SchedulerEngine {
    pub fn new(triggers: TriggerSet, cycle: CheckCycle, clock: Arc<dyn Clock>) -> Self {
        Self {
            triggers,
            cycle,
            clock,
        }
    }

    /// Next trigger strictly after the current clock time.
    pub fn next_trigger(&self) -> DateTime<Utc> {
        self.triggers.next_after(self.clock.now())
    }

    /// Run one cycle immediately.
    pub async fn fire_now(&self) -> CycleReport {
        self.cycle.run_cycle(self.clock.now()).await
    }

    /// Drive cycles until `shutdown` turns true or its sender is dropped.
    /// A cycle in progress is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Scheduler started: {} ({} fetches max)",
            self.triggers,
            self.cycle.max_concurrent()
        );

        let mut after = self.clock.now();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = self.triggers.next_after(after);
            tracing::info!("⏳ Next check at {}", next.to_rfc3339());

            tokio::select! {
                _ = self.clock.sleep_until(next) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.fire_now().await;
            tracing::debug!("Cycle report: {report:?}");

            let now = self.clock.now();
            if now > next && self.triggers.next_after(next) <= now {
                tracing::warn!("⚠️ Cycle ran past the next trigger; skipping to the one after");
            }
            after = now.max(next);
        }

        tracing::info!("🛑 Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::cycle::tests::{
        MemoryRepository, RecordingNotifier, TableScraper, product, quick_policy,
    };
    use crate::fetch::FetchRunner;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pricewatch_core::error::ScrapeError;
    use pricewatch_core::traits::Scraper;
    use pricewatch_core::types::{Money, ProductInfo};

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, minute, second).unwrap()
    }

    fn triggers() -> TriggerSet {
        TriggerSet::new(&["09:00", "15:00", "21:00"], 0).unwrap()
    }

    /// Build an engine over one product whose price is always 1500.
    fn engine_with(
        clock: Arc<ManualClock>,
        scraper: Arc<dyn Scraper>,
    ) -> (SchedulerEngine, Arc<MemoryRepository>) {
        let repo = MemoryRepository::with_products(vec![product(1, 1000)]);
        let cycle = CheckCycle::new(
            repo.clone(),
            Arc::new(RecordingNotifier::default()),
            FetchRunner::new(scraper, quick_policy()),
            2,
        );
        (SchedulerEngine::new(triggers(), cycle, clock), repo)
    }

    fn steady_scraper() -> Arc<TableScraper> {
        let scraper = Arc::new(TableScraper::default());
        scraper.set_price(&product(1, 1000).url, 1500);
        scraper
    }

    fn cycle_times(repo: &MemoryRepository) -> Vec<DateTime<Utc>> {
        repo.samples.lock().unwrap().iter().map(|(_, _, t)| *t).collect()
    }

    async fn run_until_parked(engine: &SchedulerEngine, clock: &ManualClock) {
        let (_tx, rx) = watch::channel(false);
        tokio::select! {
            _ = engine.run(rx) => panic!("scheduler loop exited on its own"),
            _ = clock.parked() => {}
        }
    }

    /// Takes seven hours of virtual time per fetch.
    struct SlowScraper {
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl Scraper for SlowScraper {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _location: &str) -> Result<ProductInfo, ScrapeError> {
            self.clock.advance(chrono::Duration::hours(7));
            Ok(ProductInfo {
                title: "Lamp".into(),
                price: Money::from_major(1500),
            })
        }
    }

    #[tokio::test]
    async fn test_start_mid_day_does_not_catch_up() {
        let clock = Arc::new(ManualClock::new(at(14, 10, 0, 0), at(14, 16, 0, 0)));
        let (engine, repo) = engine_with(clock.clone(), steady_scraper());

        assert_eq!(engine.next_trigger(), at(14, 15, 0, 0));
        run_until_parked(&engine, &clock).await;

        assert_eq!(cycle_times(&repo), vec![at(14, 15, 0, 0)]);
    }

    #[tokio::test]
    async fn test_restart_after_two_missed_triggers_runs_once() {
        // 09:00 and 15:00 already passed while the process was down.
        let clock = Arc::new(ManualClock::new(at(14, 16, 0, 0), at(14, 22, 0, 0)));
        let (engine, repo) = engine_with(clock.clone(), steady_scraper());

        run_until_parked(&engine, &clock).await;

        assert_eq!(cycle_times(&repo), vec![at(14, 21, 0, 0)]);
    }

    #[tokio::test]
    async fn test_fires_at_configured_times_without_drift() {
        let clock = Arc::new(ManualClock::new(at(14, 8, 59, 30), at(15, 10, 0, 0)));
        let (engine, repo) = engine_with(clock.clone(), steady_scraper());

        run_until_parked(&engine, &clock).await;

        assert_eq!(
            cycle_times(&repo),
            vec![
                at(14, 9, 0, 0),
                at(14, 15, 0, 0),
                at(14, 21, 0, 0),
                at(15, 9, 0, 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_overrun_skips_missed_trigger() {
        let clock = Arc::new(ManualClock::new(at(14, 8, 0, 0), at(14, 22, 0, 0)));
        let scraper = Arc::new(SlowScraper { clock: clock.clone() });
        let (engine, repo) = engine_with(clock.clone(), scraper);

        run_until_parked(&engine, &clock).await;

        // 09:00 ran until 16:00, so 15:00 never fires.
        assert_eq!(cycle_times(&repo), vec![at(14, 9, 0, 0), at(14, 21, 0, 0)]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let clock = Arc::new(ManualClock::new(at(14, 10, 0, 0), at(14, 11, 0, 0)));
        let (engine, repo) = engine_with(clock.clone(), steady_scraper());
        let (tx, rx) = watch::channel(false);

        let run = engine.run(rx);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("scheduler loop exited on its own"),
            _ = clock.parked() => {}
        }

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), run)
            .await
            .expect("scheduler should stop on shutdown");
        assert!(cycle_times(&repo).is_empty());
    }

    #[tokio::test]
    async fn test_fire_now_uses_clock_time() {
        let clock = Arc::new(ManualClock::new(at(14, 12, 34, 0), at(14, 12, 34, 0)));
        let (engine, repo) = engine_with(clock.clone(), steady_scraper());

        let report = engine.fire_now().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(cycle_times(&repo), vec![at(14, 12, 34, 0)]);
    }
}
