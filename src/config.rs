use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub tracking: TrackingConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub politeness_delay_secs: u64,
    pub dump_blocked_html: bool,
    pub dump_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Minimum price delta (absolute) for a change to be persisted.
    pub price_epsilon: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scrape_schedule: String,
    pub cleanup_schedule: String,
    pub health_schedule: String,
    pub misfire_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "PRICE_WATCH_"
            .add_source(Environment::with_prefix("PRICE_WATCH").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.scraper.user_agent.is_empty() {
            return Err(ConfigError::Message("Scraper user_agent must not be empty".into()));
        }

        if self.scraper.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Scraper request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.scraper.max_attempts == 0 {
            return Err(ConfigError::Message(
                "Scraper max_attempts must be greater than 0".into(),
            ));
        }

        if self.tracking.price_epsilon < Decimal::ZERO {
            return Err(ConfigError::Message(
                "Tracking price_epsilon must not be negative".into(),
            ));
        }

        for (name, expr) in [
            ("scheduler.scrape_schedule", &self.scheduler.scrape_schedule),
            ("scheduler.cleanup_schedule", &self.scheduler.cleanup_schedule),
            ("scheduler.health_schedule", &self.scheduler.health_schedule),
        ] {
            if !self.is_valid_cron(expr) {
                return Err(ConfigError::Message(format!(
                    "Invalid cron expression in {}",
                    name
                )));
            }
        }

        if self.retention.days <= 0 {
            return Err(ConfigError::Message(
                "Retention days must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn is_valid_cron(&self, cron_expr: &str) -> bool {
        // tokio-cron-scheduler expressions carry a seconds field:
        // 6 parts (sec min hour day month weekday), optionally a 7th for year
        let parts: Vec<&str> = cron_expr.split_whitespace().collect();
        if parts.len() != 6 && parts.len() != 7 {
            return false;
        }

        for part in parts {
            if part.is_empty() {
                return false;
            }
            // Allow numbers, ranges, lists, wildcards, and steps
            if !part
                .chars()
                .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn valid_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "sqlite://data/test.db".to_string(),
                max_connections: 5,
            },
            scraper: ScraperConfig {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0".to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                request_timeout_secs: 10,
                max_attempts: 3,
                initial_backoff_secs: 2,
                politeness_delay_secs: 2,
                dump_blocked_html: false,
                dump_dir: "data/debug".to_string(),
            },
            tracking: TrackingConfig {
                price_epsilon: Decimal::from_str("0.01").unwrap(),
            },
            scheduler: SchedulerConfig {
                scrape_schedule: "0 0 * * * *".to_string(),
                cleanup_schedule: "0 0 2 * * *".to_string(),
                health_schedule: "0 0 */6 * * *".to_string(),
                misfire_grace_secs: 300,
            },
            retention: RetentionConfig { days: 90 },
            logging: LoggingConfig { file: None },
        }
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_database_url() {
        let mut config = valid_config();
        config.database.url = "".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("url must not be empty"));
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = valid_config();
        config.scraper.max_attempts = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_attempts must be greater than 0"));
    }

    #[test]
    fn test_config_validation_negative_epsilon() {
        let mut config = valid_config();
        config.tracking.price_epsilon = Decimal::from_str("-0.01").unwrap();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("price_epsilon must not be negative"));
    }

    #[test]
    fn test_config_validation_invalid_cron() {
        let mut config = valid_config();
        config.scheduler.scrape_schedule = "invalid cron".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid cron expression"));
    }

    #[test]
    fn test_config_validation_zero_retention() {
        let mut config = valid_config();
        config.retention.days = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Retention days must be greater than 0"));
    }

    #[test]
    fn test_cron_validation() {
        let config = valid_config();

        assert!(config.is_valid_cron("0 0 * * * *"));
        assert!(config.is_valid_cron("0 */15 * * * *"));
        assert!(config.is_valid_cron("0 0 9-17 * * 1-5"));
        assert!(config.is_valid_cron("0 30 2 * * 0 2026"));

        assert!(!config.is_valid_cron("invalid"));
        assert!(!config.is_valid_cron("0 0 * * *")); // Missing seconds field
        assert!(!config.is_valid_cron("0 0 * * * * * *")); // Too many parts
        assert!(!config.is_valid_cron("")); // Empty
    }
}
