use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// A product whose page is checked on a recurring schedule.
///
/// Owned by the product store; the scraping core only reads it and
/// requests mutations through the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedProduct {
    pub id: String,
    pub url: String,
    pub title: String,

    // Current state
    pub current_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub last_checked: Option<DateTime<Utc>>,

    // Status
    pub is_active: bool,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub url: String,
    pub title: String,
    pub current_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
}

impl TrackedProduct {
    pub fn new(new_product: NewProduct) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            url: new_product.url,
            title: new_product.title,
            current_price: new_product.current_price,
            target_price: new_product.target_price,
            last_checked: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shortened title for log lines and CLI listings.
    pub fn short_title(&self) -> String {
        if self.title.chars().count() > 80 {
            let truncated: String = self.title.chars().take(80).collect();
            format!("{}...", truncated)
        } else {
            self.title.clone()
        }
    }
}
