//! Market fetcher trait, raw payload rows and structured error types.
//!
//! The MarketFetcher trait abstracts over the two exchange endpoints so the
//! unified fetcher can route by market tag and tests can script responses.
//! Fetchers know nothing about formatting or the on-disk store.

use super::period::{Granularity, PeriodSpec};
use crate::domain::Market;
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// One upstream row, keyed by the exchange's own column names.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub columns: Arc<[String]>,
    pub values: Vec<String>,
}

impl RawRow {
    pub fn new(columns: Arc<[String]>, values: Vec<String>) -> Self {
        Self { columns, values }
    }

    /// Value of the first column whose name matches one of `names`.
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| names.contains(&c.trim()))
            .and_then(|i| self.values.get(i))
            .map(|v| v.as_str())
    }
}

impl fmt::Display for RawRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.values.join(", "))
    }
}

/// Why a single period request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    /// Connection-level failure.
    Transport(String),
    Timeout,
    /// Non-2xx HTTP status.
    Status(u16),
    /// The payload could not be parsed.
    Malformed(String),
    /// The exchange answered with its "no matching data" sentinel.
    NoData,
}

impl FetchCause {
    /// Worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Transport(_) | FetchCause::Timeout => true,
            FetchCause::Status(code) => *code == 429 || *code >= 500,
            FetchCause::Malformed(_) | FetchCause::NoData => false,
        }
    }
}

impl fmt::Display for FetchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchCause::Transport(e) => write!(f, "transport error: {e}"),
            FetchCause::Timeout => f.write_str("request timed out"),
            FetchCause::Status(code) => write!(f, "HTTP {code}"),
            FetchCause::Malformed(e) => write!(f, "malformed payload: {e}"),
            FetchCause::NoData => f.write_str("no data for period"),
        }
    }
}

/// Failure of one (symbol, period) request.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{market} fetch of {code} for {period} failed: {cause}")]
pub struct MarketFetchError {
    pub market: Market,
    pub code: String,
    pub period: PeriodSpec,
    pub cause: FetchCause,
}

impl MarketFetchError {
    pub fn new(market: Market, code: &str, period: PeriodSpec, cause: FetchCause) -> Self {
        Self {
            market,
            code: code.to_string(),
            period,
            cause,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.cause == FetchCause::NoData
    }
}

/// A raw row the formatter could not turn into a canonical row.
///
/// Logged and dropped; never returned to callers.
#[derive(Debug, Clone, Error)]
#[error("dropped row {row}: {reason}")]
pub struct FormatError {
    pub reason: String,
    pub row: String,
}

/// Structured error types for fetch, registry and store operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    MarketFetch(#[from] MarketFetchError),

    /// Some periods failed; rows from the others were saved and the failed
    /// periods are re-requested by the next gap-fill.
    #[error("{code}: {} period(s) failed after retries, the rest were saved", .failed.len())]
    Incomplete {
        code: String,
        added: usize,
        failed: Vec<MarketFetchError>,
    },

    #[error("symbol {code} was not found on either market")]
    UnknownSymbol { code: String },

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("symbol registry not found at {}", path.display())]
    RegistryNotFound { path: PathBuf },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("http client error: {0}")]
    Http(String),
}

/// One exchange endpoint.
///
/// Implementations issue exactly one HTTP request per `fetch_period` call and
/// return the rows exactly as the exchange labels them.
pub trait MarketFetcher: Send + Sync {
    fn market(&self) -> Market;

    /// Native query unit of the endpoint.
    fn granularity(&self) -> Granularity;

    /// Fetch raw rows for one symbol and one native period.
    fn fetch_period(&self, code: &str, period: &PeriodSpec) -> Result<Vec<RawRow>, MarketFetchError>;

    /// Minimal request proving the endpoint is reachable and answering.
    fn probe(&self) -> Result<(), MarketFetchError>;
}

/// Progress callback for multi-symbol operations.
pub trait BatchProgress: Send + Sync {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, code: &str, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(&self, code: &str, index: usize, total: usize, result: &Result<usize, DataError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize);
}

/// Progress reporter that writes through `tracing`.
pub struct LogProgress;

impl BatchProgress for LogProgress {
    fn on_start(&self, code: &str, index: usize, total: usize) {
        info!("[{}/{}] fetching {code}", index + 1, total);
    }

    fn on_complete(&self, code: &str, _index: usize, _total: usize, result: &Result<usize, DataError>) {
        match result {
            Ok(added) => info!(code, added, "symbol done"),
            Err(e) => warn!(code, error = %e, "symbol failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize) {
        info!(succeeded, skipped, failed, total, "batch complete");
    }
}
