use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// Record of one fetch pipeline run against a product page, kept for
/// offline diagnosis of block rates and markup drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeLogEntry {
    pub id: String,
    pub product_id: String,
    pub url: String,
    pub success: bool,
    /// Outcome kind: "success", "blocked", "network_error",
    /// "extraction_failure" or "retries_exhausted".
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl ScrapeLogEntry {
    pub fn new(
        product_id: String,
        url: String,
        success: bool,
        outcome: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_id(),
            product_id,
            url,
            success,
            outcome,
            timestamp,
        }
    }
}
