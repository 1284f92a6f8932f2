pub mod backoff;
pub mod change_detector;
pub mod config;
pub mod extractor;
pub mod jobs;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
