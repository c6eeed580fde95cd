//! Fetch configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! data_dir = "prices"
//! symbol_delay_ms = 3000
//!
//! [otc]
//! base_url = "https://www.tpex.org.tw"
//! ```

use crate::data::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Earliest trading day the listed-market endpoint serves.
pub const HISTORY_FLOOR: (i32, u32, u32) = (2010, 1, 4);

/// Base URL and any per-endpoint overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Root of the per-symbol CSV store.
    pub data_dir: PathBuf,
    /// Line-oriented symbol registry.
    pub registry_path: PathBuf,
    /// Window used by full fetches.
    pub lookback_days: u32,
    /// Window used by the incremental update.
    pub update_days: u32,
    /// Courtesy delay before each symbol after the first in a batch.
    pub symbol_delay_ms: u64,
    /// Courtesy delay between period requests of one symbol.
    pub request_delay_ms: u64,
    /// Total attempts per request, first try included.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub listed: EndpointConfig,
    pub otc: EndpointConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            registry_path: PathBuf::from("stocks_config.txt"),
            lookback_days: 365,
            update_days: 7,
            symbol_delay_ms: 2_000,
            request_delay_ms: 1_500,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            listed: EndpointConfig {
                base_url: "https://www.twse.com.tw".to_string(),
            },
            otc: EndpointConfig {
                base_url: "https://www.tpex.org.tw".to_string(),
            },
        }
    }
}

impl FetchConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DataError::Config(format!("parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if self.max_attempts == 0 {
            return Err(DataError::Config("max_attempts must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(DataError::Config("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn history_floor() -> NaiveDate {
        let (y, m, d) = HISTORY_FLOOR;
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
    }

    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
