use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::Clock;
use crate::change_detector::ChangeDetector;
use crate::models::{PriceObservation, ScrapeLogEntry};
use crate::scraper::{FetchOutcome, Fetcher};
use crate::store::{Mutation, ProductStore};

/// Aggregate result of one batch run over all active products.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeRunReport {
    pub products_checked: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub changes_recorded: usize,
    pub alerts_fired: usize,
    /// False when the batch transaction was rolled back.
    pub persisted: bool,
}

/// Iterates all active products, fetches each sequentially with a
/// politeness delay, applies change detection, and commits the
/// accumulated mutations in one transaction at the end of the run.
///
/// A single product's failure is never fatal to the batch, and no error
/// escapes `run_once`.
pub struct BulkScrapeRunner {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ProductStore>,
    change_detector: ChangeDetector,
    clock: Arc<dyn Clock>,
    politeness_delay: Duration,
}

// Matches the products.title column width
const MAX_TITLE_LEN: usize = 200;

impl BulkScrapeRunner {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ProductStore>,
        change_detector: ChangeDetector,
        clock: Arc<dyn Clock>,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            change_detector,
            clock,
            politeness_delay,
        }
    }

    pub async fn run_once(&self) -> ScrapeRunReport {
        tracing::info!("starting price scrape batch");
        let mut report = ScrapeRunReport::default();

        let products = match self.store.list_active_products().await {
            Ok(products) => products,
            Err(e) => {
                tracing::error!(error = %e, "could not load active products, skipping batch");
                return report;
            }
        };

        if products.is_empty() {
            tracing::info!("no active products to scrape");
            report.persisted = true;
            return report;
        }

        tracing::info!(count = products.len(), "found active products to scrape");
        report.products_checked = products.len();

        let mut mutations = Vec::new();
        let total = products.len();

        for (index, product) in products.iter().enumerate() {
            let outcome = self.fetcher.fetch(&product.url).await;
            let now = self.clock.now();

            mutations.push(Mutation::AppendScrapeLog(ScrapeLogEntry::new(
                product.id.clone(),
                product.url.clone(),
                outcome.is_success(),
                outcome.kind().to_string(),
                now,
            )));

            match outcome {
                FetchOutcome::Success(result) => {
                    report.succeeded += 1;

                    let decision = self.change_detector.decide(
                        product.current_price,
                        result.price,
                        product.target_price,
                    );

                    if decision.record_history {
                        report.changes_recorded += 1;
                        tracing::info!(
                            product = %product.short_title(),
                            old_price = ?product.current_price,
                            new_price = %result.price,
                            "price change detected"
                        );

                        let title: String = result.title.chars().take(MAX_TITLE_LEN).collect();
                        mutations.push(Mutation::UpdateProduct {
                            id: product.id.clone(),
                            title: Some(title),
                            current_price: result.price,
                            last_checked: now,
                        });
                        mutations.push(Mutation::AppendObservation(PriceObservation::new(
                            product.id.clone(),
                            result.price,
                            now,
                        )));
                    } else {
                        tracing::debug!(product = %product.short_title(), "price unchanged");
                    }

                    if decision.fire_alert {
                        report.alerts_fired += 1;
                        tracing::info!(
                            product = %product.short_title(),
                            price = %result.price,
                            target = ?product.target_price,
                            "target price reached"
                        );
                    }
                }
                other => {
                    report.failed += 1;
                    tracing::warn!(
                        product = %product.short_title(),
                        url = %product.url,
                        outcome = other.kind(),
                        "scrape failed"
                    );
                }
            }

            // Politeness delay between successive fetches, regardless of outcome
            if index + 1 < total {
                self.clock.sleep(self.politeness_delay).await;
            }
        }

        match self.store.apply(mutations).await {
            Ok(()) => report.persisted = true,
            Err(e) => {
                tracing::error!(error = %e, "batch commit failed, run discarded");
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            changes = report.changes_recorded,
            alerts = report.alerts_fired,
            persisted = report.persisted,
            "scrape batch completed"
        );

        report
    }
}
