//! SQLite-backed storage for tracked products and their price history.
//! One connection behind a mutex; the lock is held for a single call only.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pricewatch_core::error::{PriceWatchError, Result};
use pricewatch_core::traits::Repository;
use pricewatch_core::types::{
    DealState, Money, PriceSample, SampleSource, StateUpdate, TrackedProduct,
};
use rusqlite::{Connection, OptionalExtension, params};

/// Products one owner may track at a time.
pub const MAX_PRODUCTS_PER_USER: usize = 10;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    target_price INTEGER NOT NULL,            -- minor units
    current_price INTEGER,
    deal_state TEXT NOT NULL DEFAULT 'none',  -- 'none', 'below', 'above'
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    UNIQUE(user_id, url)
);
CREATE INDEX IF NOT EXISTS idx_products_user ON products(user_id);

CREATE TABLE IF NOT EXISTS price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    price INTEGER NOT NULL,
    observed_at TEXT NOT NULL,
    source TEXT NOT NULL CHECK (source IN ('add', 'scheduler', 'manual'))
);
CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id, observed_at DESC);
";

const PRODUCT_COLUMNS: &str = "id, user_id, url, title, target_price, current_price, deal_state, \
     consecutive_failures, last_checked, is_active, created_at";

/// Input for [`SqliteRepository::add_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub user_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub target_price: Money,
    /// Price seen by the initial fetch; stored as an `add` sample.
    pub initial_price: Option<Money>,
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| PriceWatchError::Persistence(format!("Migration: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PriceWatchError::Persistence(e.to_string()))
    }

    // ─── Operator operations ──────────────────────────────────

    /// Start tracking a product. Returns the new product id.
    pub fn add_product(&self, new: &NewProduct, at: DateTime<Utc>) -> Result<i64> {
        if new.target_price.minor() <= 0 {
            return Err(PriceWatchError::InvalidInput(
                "target price must be positive".into(),
            ));
        }
        let url = new.url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(PriceWatchError::InvalidInput(format!(
                "not an http(s) URL: {url}"
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        check_admission(&tx, new.user_id, url)?;

        tx.execute(
            "INSERT INTO products (user_id, url, title, target_price, current_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.user_id,
                url,
                new.title,
                new.target_price.minor(),
                new.initial_price.map(Money::minor),
                timestamp(at),
            ],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();

        if let Some(price) = new.initial_price {
            insert_sample(&tx, id, price, at, SampleSource::Add)?;
        }
        tx.commit().map_err(db_err)?;

        tracing::info!("📦 Product {id} added for user {} ({url})", new.user_id);
        Ok(id)
    }

    /// Fail fast with the error `add_product` would give for a duplicate
    /// URL or an owner at the limit, before any page is fetched.
    pub fn check_can_add(&self, user_id: i64, url: &str) -> Result<()> {
        let conn = self.conn()?;
        check_admission(&conn, user_id, url.trim())
    }

    pub fn list_products_for_user(&self, user_id: i64) -> Result<Vec<TrackedProduct>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = ?1 ORDER BY id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], ProductRow::read)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(ProductRow::into_product).collect()
    }

    /// Change a product's target. The deal state goes back to `none`, so the
    /// next check reports against the new target from scratch.
    pub fn update_target_price(&self, product_id: i64, target: Money) -> Result<()> {
        if target.minor() <= 0 {
            return Err(PriceWatchError::InvalidInput(
                "target price must be positive".into(),
            ));
        }
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE products SET target_price = ?1, deal_state = 'none', updated_at = ?2
                 WHERE id = ?3",
                params![target.minor(), timestamp(Utc::now()), product_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(PriceWatchError::ProductNotFound(product_id));
        }
        Ok(())
    }

    /// Pause or resume checks for a product.
    pub fn set_active(&self, product_id: i64, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE products SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active, timestamp(Utc::now()), product_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(PriceWatchError::ProductNotFound(product_id));
        }
        Ok(())
    }

    /// Delete a product and its history. Returns false if it did not exist.
    pub fn remove_product(&self, product_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM products WHERE id = ?1", params![product_id])
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Newest samples first.
    pub fn price_history(&self, product_id: i64, limit: usize) -> Result<Vec<PriceSample>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT price, observed_at, source FROM price_history
                 WHERE product_id = ?1 ORDER BY observed_at DESC, id DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![product_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        rows.into_iter()
            .map(|(price, observed_at, source)| {
                Ok(PriceSample {
                    product_id,
                    price: Money::from_minor(price),
                    observed_at: parse_timestamp(&observed_at)?,
                    source: source.parse()?,
                })
            })
            .collect()
    }

    /// Append a sample with an explicit source.
    pub fn record_sample(
        &self,
        product_id: i64,
        price: Money,
        observed_at: DateTime<Utc>,
        source: SampleSource,
    ) -> Result<()> {
        let conn = self.conn()?;
        insert_sample(&conn, product_id, price, observed_at, source)
    }

    fn find_product(&self, product_id: i64) -> Result<Option<TrackedProduct>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                params![product_id],
                ProductRow::read,
            )
            .optional()
            .map_err(db_err)?;
        row.map(ProductRow::into_product).transpose()
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn list_tracked_products(&self) -> Result<Vec<TrackedProduct>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], ProductRow::read)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(ProductRow::into_product).collect()
    }

    async fn get_product(&self, product_id: i64) -> Result<Option<TrackedProduct>> {
        self.find_product(product_id)
    }

    async fn append_price_sample(
        &self,
        product_id: i64,
        price: Money,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.record_sample(product_id, price, observed_at, SampleSource::Scheduler)
    }

    async fn update_state(&self, product_id: i64, update: &StateUpdate) -> Result<()> {
        let conn = self.conn()?;
        write_state(&conn, product_id, update)
    }

    async fn record_check(
        &self,
        product_id: i64,
        sample: Option<(Money, DateTime<Utc>)>,
        update: &StateUpdate,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        if let Some((price, observed_at)) = sample {
            insert_sample(&tx, product_id, price, observed_at, SampleSource::Scheduler)?;
        }
        write_state(&tx, product_id, update)?;
        tx.commit().map_err(db_err)
    }
}

struct ProductRow {
    id: i64,
    user_id: i64,
    url: String,
    title: Option<String>,
    target_price: i64,
    current_price: Option<i64>,
    deal_state: String,
    consecutive_failures: i64,
    last_checked: Option<String>,
    is_active: bool,
    created_at: String,
}

impl ProductRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            target_price: row.get(4)?,
            current_price: row.get(5)?,
            deal_state: row.get(6)?,
            consecutive_failures: row.get(7)?,
            last_checked: row.get(8)?,
            is_active: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_product(self) -> Result<TrackedProduct> {
        Ok(TrackedProduct {
            id: self.id,
            user_id: self.user_id,
            url: self.url,
            title: self.title,
            target_price: Money::from_minor(self.target_price),
            current_price: self.current_price.map(Money::from_minor),
            deal_state: self.deal_state.parse::<DealState>()?,
            consecutive_failures: u32::try_from(self.consecutive_failures).unwrap_or(u32::MAX),
            last_checked: self.last_checked.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            active: self.is_active,
        })
    }
}

fn check_admission(conn: &Connection, user_id: i64, url: &str) -> Result<()> {
    let owned: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM products WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    if owned >= MAX_PRODUCTS_PER_USER as i64 {
        return Err(PriceWatchError::InvalidInput(format!(
            "product limit reached ({MAX_PRODUCTS_PER_USER} per user)"
        )));
    }

    let duplicate = conn
        .query_row(
            "SELECT id FROM products WHERE user_id = ?1 AND url = ?2",
            params![user_id, url],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err)?;
    if let Some(existing) = duplicate {
        return Err(PriceWatchError::InvalidInput(format!(
            "already tracked as product {existing}"
        )));
    }
    Ok(())
}

fn write_state(conn: &Connection, product_id: i64, update: &StateUpdate) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE products SET
                deal_state = ?1,
                consecutive_failures = ?2,
                last_checked = ?3,
                current_price = COALESCE(?4, current_price),
                title = COALESCE(?5, title),
                updated_at = ?3
             WHERE id = ?6",
            params![
                update.deal_state.as_str(),
                update.consecutive_failures,
                timestamp(update.last_checked),
                update.current_price.map(Money::minor),
                update.title,
                product_id,
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(PriceWatchError::ProductNotFound(product_id));
    }
    Ok(())
}

fn insert_sample(
    conn: &Connection,
    product_id: i64,
    price: Money,
    observed_at: DateTime<Utc>,
    source: SampleSource,
) -> Result<()> {
    conn.execute(
        "INSERT INTO price_history (product_id, price, observed_at, source)
         VALUES (?1, ?2, ?3, ?4)",
        params![product_id, price.minor(), timestamp(observed_at), source.as_str()],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Fixed-width RFC 3339 so text order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PriceWatchError::Persistence(format!("bad timestamp '{text}': {e}")))
}

fn db_err(e: rusqlite::Error) -> PriceWatchError {
    PriceWatchError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, hour, 0, 0).unwrap()
    }

    fn new_product(user_id: i64, n: u32) -> NewProduct {
        NewProduct {
            user_id,
            url: format!("https://www.ozon.ru/product/thing-{n}/"),
            title: Some(format!("Thing {n}")),
            target_price: Money::from_major(1000),
            initial_price: Some(Money::from_major(1200)),
        }
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(7, 1), at(8)).unwrap();

        let products = repo.list_tracked_products().await.unwrap();
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.id, id);
        assert_eq!(p.user_id, 7);
        assert_eq!(p.deal_state, DealState::None);
        assert_eq!(p.current_price, Some(Money::from_major(1200)));
        assert_eq!(p.created_at, at(8));
        assert_eq!(p.last_checked, None);

        let history = repo.price_history(id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, SampleSource::Add);
    }

    #[test]
    fn test_rejects_duplicates_and_enforces_limit() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.add_product(&new_product(1, 0), at(8)).unwrap();
        assert!(matches!(
            repo.add_product(&new_product(1, 0), at(8)),
            Err(PriceWatchError::InvalidInput(_))
        ));
        // Same URL for another owner is fine.
        repo.add_product(&new_product(2, 0), at(8)).unwrap();

        for n in 1..MAX_PRODUCTS_PER_USER as u32 {
            repo.add_product(&new_product(1, n), at(8)).unwrap();
        }
        assert_eq!(repo.list_products_for_user(1).unwrap().len(), MAX_PRODUCTS_PER_USER);
        assert!(matches!(
            repo.add_product(&new_product(1, 99), at(8)),
            Err(PriceWatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut bad_url = new_product(1, 1);
        bad_url.url = "ozon.ru/product/1".into();
        assert!(repo.add_product(&bad_url, at(8)).is_err());

        let mut zero_target = new_product(1, 2);
        zero_target.target_price = Money::from_minor(0);
        assert!(repo.add_product(&zero_target, at(8)).is_err());
    }

    #[tokio::test]
    async fn test_update_state_keeps_unknown_fields() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(1, 1), at(8)).unwrap();

        repo.update_state(
            id,
            &StateUpdate {
                deal_state: DealState::BelowTarget,
                consecutive_failures: 0,
                last_checked: at(9),
                current_price: Some(Money::from_major(950)),
                title: Some("Renamed".into()),
            },
        )
        .await
        .unwrap();
        repo.update_state(
            id,
            &StateUpdate {
                deal_state: DealState::BelowTarget,
                consecutive_failures: 1,
                last_checked: at(15),
                current_price: None,
                title: None,
            },
        )
        .await
        .unwrap();

        let p = repo.get_product(id).await.unwrap().unwrap();
        assert_eq!(p.deal_state, DealState::BelowTarget);
        assert_eq!(p.consecutive_failures, 1);
        assert_eq!(p.last_checked, Some(at(15)));
        assert_eq!(p.current_price, Some(Money::from_major(950)));
        assert_eq!(p.title.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_missing_product_errors() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let update = StateUpdate {
            deal_state: DealState::AboveTarget,
            consecutive_failures: 0,
            last_checked: at(9),
            current_price: None,
            title: None,
        };
        assert!(matches!(
            repo.update_state(42, &update).await,
            Err(PriceWatchError::ProductNotFound(42))
        ));
        assert!(repo.append_price_sample(42, Money::from_major(1), at(9)).await.is_err());
        assert!(repo.get_product(42).await.unwrap().is_none());
        assert!(!repo.remove_product(42).unwrap());
    }

    #[tokio::test]
    async fn test_target_edit_resets_state() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(1, 1), at(8)).unwrap();
        repo.update_state(
            id,
            &StateUpdate {
                deal_state: DealState::AboveTarget,
                consecutive_failures: 0,
                last_checked: at(9),
                current_price: Some(Money::from_major(1200)),
                title: None,
            },
        )
        .await
        .unwrap();

        repo.update_target_price(id, Money::from_major(1300)).unwrap();
        let p = repo.get_product(id).await.unwrap().unwrap();
        assert_eq!(p.target_price, Money::from_major(1300));
        assert_eq!(p.deal_state, DealState::None);
        assert!(matches!(
            repo.update_target_price(999, Money::from_major(1)),
            Err(PriceWatchError::ProductNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_paused_products_are_not_tracked() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let a = repo.add_product(&new_product(1, 1), at(8)).unwrap();
        let b = repo.add_product(&new_product(1, 2), at(8)).unwrap();
        repo.set_active(a, false).unwrap();

        let tracked: Vec<i64> = repo
            .list_tracked_products()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(tracked, vec![b]);
        assert_eq!(repo.list_products_for_user(1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_removed_with_product() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(1, 1), at(8)).unwrap();
        repo.append_price_sample(id, Money::from_major(1100), at(9)).await.unwrap();
        repo.append_price_sample(id, Money::from_major(990), at(15)).await.unwrap();
        repo.record_sample(id, Money::from_major(980), at(16), SampleSource::Manual)
            .unwrap();

        let history = repo.price_history(id, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].price, Money::from_major(980));
        assert_eq!(history[0].source, SampleSource::Manual);
        assert_eq!(history[1].observed_at, at(15));
        assert_eq!(history[1].source, SampleSource::Scheduler);

        assert!(repo.remove_product(id).unwrap());
        assert!(repo.price_history(id, 10).unwrap().is_empty());
    }

    fn below_at(hour: u32) -> StateUpdate {
        StateUpdate {
            deal_state: DealState::BelowTarget,
            consecutive_failures: 0,
            last_checked: at(hour),
            current_price: Some(Money::from_major(900)),
            title: None,
        }
    }

    #[tokio::test]
    async fn test_record_check_writes_sample_and_state() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(1, 1), at(8)).unwrap();

        repo.record_check(id, Some((Money::from_major(900), at(9))), &below_at(9))
            .await
            .unwrap();

        let p = repo.get_product(id).await.unwrap().unwrap();
        assert_eq!(p.deal_state, DealState::BelowTarget);
        assert_eq!(p.last_checked, Some(at(9)));
        let history = repo.price_history(id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, SampleSource::Scheduler);
    }

    #[tokio::test]
    async fn test_record_check_rolls_back_sample_when_state_fails() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.add_product(&new_product(1, 1), at(8)).unwrap();
        repo.conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_state BEFORE UPDATE ON products
                 BEGIN SELECT RAISE(ABORT, 'state locked'); END;",
            )
            .unwrap();

        for hour in [9, 15, 21] {
            let result = repo
                .record_check(id, Some((Money::from_major(900), at(hour))), &below_at(hour))
                .await;
            assert!(matches!(result, Err(PriceWatchError::Persistence(_))));
        }

        // Only the `add` sample survives; state untouched.
        let history = repo.price_history(id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, SampleSource::Add);
        let p = repo.get_product(id).await.unwrap().unwrap();
        assert_eq!(p.deal_state, DealState::None);
        assert_eq!(p.last_checked, None);
    }

    #[test]
    fn test_check_can_add_before_fetching() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let first = new_product(1, 0);
        assert!(repo.check_can_add(1, &first.url).is_ok());
        repo.add_product(&first, at(8)).unwrap();

        assert!(matches!(
            repo.check_can_add(1, &format!("  {}  ", first.url)),
            Err(PriceWatchError::InvalidInput(_))
        ));
        assert!(repo.check_can_add(2, &first.url).is_ok());

        for n in 1..MAX_PRODUCTS_PER_USER as u32 {
            repo.add_product(&new_product(1, n), at(8)).unwrap();
        }
        assert!(matches!(
            repo.check_can_add(1, "https://www.ozon.ru/product/new-1/"),
            Err(PriceWatchError::InvalidInput(_))
        ));
    }
}
