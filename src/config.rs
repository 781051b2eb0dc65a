//! Configuration module for upwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the SQLite database file (default: "upwatch.db")
    pub db_path: String,
    /// Floor applied to every service interval, in minutes (default: 15)
    pub min_interval_minutes: u64,
    /// Delay before retrying a connectivity-deferred check, in seconds (default: 30)
    pub retry_delay_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "upwatch.db".to_string(),
            min_interval_minutes: 15,
            retry_delay_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPWATCH_DB_PATH`: database file path (default: "upwatch.db")
    /// - `UPWATCH_MIN_INTERVAL_MINUTES`: schedule floor (default: 15)
    /// - `UPWATCH_RETRY_DELAY_SECS`: connectivity retry delay (default: 30)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(db_path) = env::var("UPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(minutes) = env::var("UPWATCH_MIN_INTERVAL_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                cfg.min_interval_minutes = minutes;
            }
        }

        if let Ok(secs) = env::var("UPWATCH_RETRY_DELAY_SECS") {
            if let Ok(secs) = secs.parse() {
                cfg.retry_delay_secs = secs;
            }
        }

        cfg
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_minutes * 60)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
