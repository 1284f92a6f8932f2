use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use crate::models::{PriceObservation, PriceStats, PriceTrend, ScrapeLogEntry, TrackedProduct};
use crate::utils::error::{AppError, Result};

/// A single write requested by a batch run. Mutations accumulate during a
/// run and are applied atomically at its end: all of them commit together
/// or none do.
#[derive(Debug, Clone)]
pub enum Mutation {
    UpdateProduct {
        id: String,
        title: Option<String>,
        current_price: Decimal,
        last_checked: DateTime<Utc>,
    },
    AppendObservation(PriceObservation),
    AppendScrapeLog(ScrapeLogEntry),
}

/// Persistence collaborator for the scraping core. The core never owns
/// storage; it reads through these queries and requests writes as
/// [`Mutation`] batches.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn list_products(&self) -> Result<Vec<TrackedProduct>>;
    async fn list_active_products(&self) -> Result<Vec<TrackedProduct>>;
    async fn insert_product(&self, product: &TrackedProduct) -> Result<()>;

    /// Apply a batch of mutations in one transaction.
    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()>;

    async fn delete_observations_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn delete_scrape_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count_products(&self) -> Result<i64>;
    async fn count_active_products(&self) -> Result<i64>;
    async fn count_observations_since(&self, cutoff: DateTime<Utc>) -> Result<i64>;

    async fn price_stats(&self, product_id: &str) -> Result<Option<PriceStats>>;
}

pub struct SqliteProductStore {
    pool: SqlitePool,
}

// Prices live in TEXT columns: sqlx's SQLite driver has no Decimal codec,
// so conversion happens at this row boundary.
#[derive(FromRow)]
struct ProductRow {
    id: String,
    url: String,
    title: String,
    current_price: Option<String>,
    target_price: Option<String>,
    last_checked: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for TrackedProduct {
    type Error = AppError;

    fn try_from(row: ProductRow) -> Result<Self> {
        Ok(TrackedProduct {
            id: row.id,
            url: row.url,
            title: row.title,
            current_price: row.current_price.as_deref().map(parse_price).transpose()?,
            target_price: row.target_price.as_deref().map(parse_price).transpose()?,
            last_checked: row.last_checked,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_price(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| AppError::Parse {
        message: format!("stored price {:?} is not a decimal: {}", text, e),
    })
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        current_price TEXT,
        target_price TEXT,
        last_checked TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS price_history (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL REFERENCES products(id),
        price TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_history_product
        ON price_history(product_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS scrape_logs (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL,
        url TEXT NOT NULL,
        success INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
];

impl SqliteProductStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn list_products(&self) -> Result<Vec<TrackedProduct>> {
        let rows: Vec<ProductRow> =
            sqlx::query_as("SELECT * FROM products ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TrackedProduct::try_from).collect()
    }

    async fn list_active_products(&self) -> Result<Vec<TrackedProduct>> {
        let rows: Vec<ProductRow> =
            sqlx::query_as("SELECT * FROM products WHERE is_active = 1 ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TrackedProduct::try_from).collect()
    }

    async fn insert_product(&self, product: &TrackedProduct) -> Result<()> {
        sqlx::query(
            "INSERT INTO products
                (id, url, title, current_price, target_price, last_checked,
                 is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&product.id)
        .bind(&product.url)
        .bind(&product.title)
        .bind(product.current_price.map(|p| p.to_string()))
        .bind(product.target_price.map(|p| p.to_string()))
        .bind(product.last_checked)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        // Dropping the transaction on an early return rolls the whole
        // batch back
        let mut tx = self.pool.begin().await?;

        for mutation in mutations {
            match mutation {
                Mutation::UpdateProduct {
                    id,
                    title,
                    current_price,
                    last_checked,
                } => {
                    let result = sqlx::query(
                        "UPDATE products
                         SET title = COALESCE(?1, title),
                             current_price = ?2,
                             last_checked = ?3,
                             updated_at = ?4
                         WHERE id = ?5",
                    )
                    .bind(title)
                    .bind(current_price.to_string())
                    .bind(last_checked)
                    .bind(Utc::now())
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(AppError::NotFound {
                            resource: format!("product {}", id),
                        });
                    }
                }
                Mutation::AppendObservation(obs) => {
                    sqlx::query(
                        "INSERT INTO price_history (id, product_id, price, timestamp)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .bind(&obs.id)
                    .bind(&obs.product_id)
                    .bind(obs.price.to_string())
                    .bind(obs.timestamp)
                    .execute(&mut *tx)
                    .await?;
                }
                Mutation::AppendScrapeLog(entry) => {
                    sqlx::query(
                        "INSERT INTO scrape_logs
                            (id, product_id, url, success, outcome, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .bind(&entry.id)
                    .bind(&entry.product_id)
                    .bind(&entry.url)
                    .bind(entry.success)
                    .bind(&entry.outcome)
                    .bind(entry.timestamp)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_observations_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM price_history WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_scrape_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scrape_logs WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_products(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_active_products(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_observations_since(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM price_history WHERE timestamp > ?1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn price_stats(&self, product_id: &str) -> Result<Option<PriceStats>> {
        let prices: Vec<String> = sqlx::query_scalar(
            "SELECT price FROM price_history
             WHERE product_id = ?1
             ORDER BY timestamp DESC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        if prices.is_empty() {
            return Ok(None);
        }

        let parsed: Vec<Decimal> = prices
            .iter()
            .map(|p| parse_price(p))
            .collect::<Result<_>>()?;

        let trend = if parsed.len() < 2 {
            PriceTrend::Stable
        } else if parsed[0] > parsed[1] {
            PriceTrend::Up
        } else if parsed[0] < parsed[1] {
            PriceTrend::Down
        } else {
            PriceTrend::Stable
        };

        let lowest = parsed.iter().min().copied().unwrap_or(parsed[0]);
        let highest = parsed.iter().max().copied().unwrap_or(parsed[0]);

        Ok(Some(PriceStats {
            lowest,
            highest,
            trend,
        }))
    }
}
