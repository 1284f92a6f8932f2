use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// One observed price for a product. Append-only; rows are never mutated
/// after creation and are removed only by the retention cleaner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub id: String,
    pub product_id: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceObservation {
    pub fn new(product_id: String, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            product_id,
            price,
            timestamp,
        }
    }

    pub fn formatted_price(&self) -> String {
        format!("${:.2}", self.price)
    }
}

/// Lowest/highest observed price and the direction of the latest movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceStats {
    pub lowest: Decimal,
    pub highest: Decimal,
    pub trend: crate::models::PriceTrend,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_observation_creation() {
        let now = Utc::now();
        let obs = PriceObservation::new(
            "product123".to_string(),
            Decimal::from_str("19.99").unwrap(),
            now,
        );

        assert_eq!(obs.product_id, "product123");
        assert_eq!(obs.price, Decimal::from_str("19.99").unwrap());
        assert_eq!(obs.timestamp, now);
        assert_eq!(obs.id.len(), 32);
    }

    #[test]
    fn test_formatted_price() {
        let obs = PriceObservation::new(
            "p".to_string(),
            Decimal::from_str("1299.5").unwrap(),
            Utc::now(),
        );
        assert_eq!(obs.formatted_price(), "$1299.50");
    }
}
