use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod price_history;
pub mod product;
pub mod scrape_log;

// Re-exports for convenience
pub use price_history::*;
pub use product::*;
pub use scrape_log::*;

/// Direction of the most recent price movement, derived from the two
/// newest observations for a product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceTrend {
    Up,
    Down,
    Stable,
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
