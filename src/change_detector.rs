use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What to do with a freshly observed price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeDecision {
    /// Append a price observation and update the product's current price.
    pub record_history: bool,
    /// The target price was reached on a qualifying change.
    pub fire_alert: bool,
}

/// Compares a new price against the last known one under a tolerance and
/// decides persistence and alerting. Alerts are gated on `record_history`
/// so a price sitting unchanged at-or-below target does not alert on
/// every batch.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    epsilon: Decimal,
}

impl ChangeDetector {
    pub fn new(epsilon: Decimal) -> Self {
        Self { epsilon }
    }

    pub fn decide(
        &self,
        last_known_price: Option<Decimal>,
        new_price: Decimal,
        target_price: Option<Decimal>,
    ) -> ChangeDecision {
        let record_history = match last_known_price {
            None => true,
            Some(last) => (new_price - last).abs() >= self.epsilon,
        };

        let fire_alert = record_history
            && matches!(target_price, Some(target) if new_price <= target);

        ChangeDecision {
            record_history,
            fire_alert,
        }
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        // One cent tolerance
        Self::new(Decimal::new(1, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_first_observation_always_records() {
        let detector = ChangeDetector::default();
        let decision = detector.decide(None, dec("100.00"), None);

        assert!(decision.record_history);
        assert!(!decision.fire_alert);
    }

    #[test]
    fn test_change_below_tolerance_is_ignored() {
        let detector = ChangeDetector::default();
        let decision = detector.decide(Some(dec("100.00")), dec("100.005"), None);

        assert!(!decision.record_history);
    }

    #[test]
    fn test_change_at_or_above_tolerance_records() {
        let detector = ChangeDetector::default();

        assert!(detector
            .decide(Some(dec("100.00")), dec("100.02"), None)
            .record_history);
        // Exactly epsilon counts as changed
        assert!(detector
            .decide(Some(dec("100.00")), dec("100.01"), None)
            .record_history);
        // Drops count the same as rises
        assert!(detector
            .decide(Some(dec("100.00")), dec("99.50"), None)
            .record_history);
    }

    #[test]
    fn test_alert_fires_at_or_below_target() {
        let detector = ChangeDetector::default();

        let decision = detector.decide(Some(dec("60.00")), dec("49.99"), Some(dec("50.00")));
        assert!(decision.record_history);
        assert!(decision.fire_alert);

        let decision = detector.decide(Some(dec("60.00")), dec("50.00"), Some(dec("50.00")));
        assert!(decision.fire_alert);
    }

    #[test]
    fn test_no_alert_without_target() {
        let detector = ChangeDetector::default();
        let decision = detector.decide(Some(dec("60.00")), dec("1.00"), None);

        assert!(decision.record_history);
        assert!(!decision.fire_alert);
    }

    #[test]
    fn test_no_alert_above_target() {
        let detector = ChangeDetector::default();
        let decision = detector.decide(Some(dec("60.00")), dec("55.00"), Some(dec("50.00")));

        assert!(decision.record_history);
        assert!(!decision.fire_alert);
    }

    #[test]
    fn test_alert_suppressed_on_unchanged_price() {
        let detector = ChangeDetector::default();
        // Price already at target and unchanged: no history row, no repeat alert
        let decision = detector.decide(Some(dec("49.99")), dec("49.99"), Some(dec("50.00")));

        assert!(!decision.record_history);
        assert!(!decision.fire_alert);
    }

    #[test]
    fn test_alert_on_first_observation_below_target() {
        let detector = ChangeDetector::default();
        let decision = detector.decide(None, dec("45.00"), Some(dec("50.00")));

        assert!(decision.record_history);
        assert!(decision.fire_alert);
    }
}
