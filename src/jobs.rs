use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backoff::Clock;
use crate::store::ProductStore;
use crate::utils::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub observations_deleted: u64,
    pub scrape_logs_deleted: u64,
}

/// Purges price observations and scrape logs older than the retention
/// window. Idempotent: a second run with no new old data deletes nothing.
pub struct RetentionCleaner {
    store: Arc<dyn ProductStore>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
}

impl RetentionCleaner {
    pub fn new(store: Arc<dyn ProductStore>, clock: Arc<dyn Clock>, retention_days: i64) -> Self {
        Self {
            store,
            clock,
            retention_days,
        }
    }

    pub async fn run_once(&self) -> Result<CleanupReport> {
        let cutoff = self.clock.now() - Duration::days(self.retention_days);
        tracing::info!(%cutoff, "starting retention cleanup");

        let observations_deleted = self.store.delete_observations_older_than(cutoff).await?;
        let scrape_logs_deleted = self.store.delete_scrape_logs_older_than(cutoff).await?;

        if observations_deleted > 0 || scrape_logs_deleted > 0 {
            tracing::info!(
                observations_deleted,
                scrape_logs_deleted,
                "cleaned up old records"
            );
        } else {
            tracing::info!("no old records to clean up");
        }

        Ok(CleanupReport {
            observations_deleted,
            scrape_logs_deleted,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub total_products: i64,
    pub active_products: i64,
    pub observations_24h: i64,
}

/// Reads aggregate counts from the store and logs them. No mutation.
pub struct HealthReporter {
    store: Arc<dyn ProductStore>,
    clock: Arc<dyn Clock>,
}

impl HealthReporter {
    pub fn new(store: Arc<dyn ProductStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn report(&self) -> Result<HealthReport> {
        let total_products = self.store.count_products().await?;
        let active_products = self.store.count_active_products().await?;
        let observations_24h = self
            .store
            .count_observations_since(self.clock.now() - Duration::hours(24))
            .await?;

        tracing::info!(
            total_products,
            active_products,
            observations_24h,
            "health check"
        );

        Ok(HealthReport {
            total_products,
            active_products,
            observations_24h,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockProductStore;
    use crate::utils::error::AppError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    struct FixedClock(DateTime<Utc>);

    #[async_trait]
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        async fn sleep(&self, _duration: std::time::Duration) {}
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 28, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cleaner_uses_retention_cutoff() {
        let now = fixed_now();
        let expected_cutoff = now - Duration::days(90);

        let mut store = MockProductStore::new();
        store
            .expect_delete_observations_older_than()
            .withf(move |cutoff| *cutoff == expected_cutoff)
            .returning(|_| Ok(3));
        store
            .expect_delete_scrape_logs_older_than()
            .withf(move |cutoff| *cutoff == expected_cutoff)
            .returning(|_| Ok(7));

        let cleaner = RetentionCleaner::new(Arc::new(store), Arc::new(FixedClock(now)), 90);
        let report = cleaner.run_once().await.unwrap();

        assert_eq!(
            report,
            CleanupReport {
                observations_deleted: 3,
                scrape_logs_deleted: 7,
            }
        );
    }

    #[tokio::test]
    async fn test_cleaner_propagates_store_errors() {
        let mut store = MockProductStore::new();
        store
            .expect_delete_observations_older_than()
            .returning(|_| Err(AppError::Internal("locked".to_string())));

        let cleaner = RetentionCleaner::new(Arc::new(store), Arc::new(FixedClock(fixed_now())), 90);
        assert!(cleaner.run_once().await.is_err());
    }

    #[tokio::test]
    async fn test_health_report_counts() {
        let now = fixed_now();
        let expected_cutoff = now - Duration::hours(24);

        let mut store = MockProductStore::new();
        store.expect_count_products().returning(|| Ok(12));
        store.expect_count_active_products().returning(|| Ok(9));
        store
            .expect_count_observations_since()
            .withf(move |cutoff| *cutoff == expected_cutoff)
            .returning(|_| Ok(42));

        let reporter = HealthReporter::new(Arc::new(store), Arc::new(FixedClock(now)));
        let report = reporter.report().await.unwrap();

        assert_eq!(
            report,
            HealthReport {
                total_products: 12,
                active_products: 9,
                observations_24h: 42,
            }
        );
    }
}
