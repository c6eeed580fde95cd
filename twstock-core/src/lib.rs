//! twstock core: daily quotes from the Taiwan exchanges, normalized into
//! per-symbol CSV series.
//!
//! - Domain types (markets, canonical rows, per-symbol series)
//! - Symbol registry
//! - Listed (TWSE) and OTC (TPEx) fetchers behind one `MarketFetcher` trait
//! - Formatter from exchange payloads to canonical rows
//! - CSV store with merge-by-date and atomic rewrites
//! - Unified fetcher with routing, auto-detection, gap-filling and batches

pub mod config;
pub mod data;
pub mod domain;
pub mod fetcher;

pub use config::FetchConfig;
pub use data::DataError;
pub use fetcher::{BatchReport, BatchSummary, ConnectionStatus, FetchPolicy, UnifiedFetcher};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the unified fetcher and its parts can move to a
    /// worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::CanonicalRow>();
        require_sync::<domain::CanonicalRow>();
        require_send::<domain::SymbolSeries>();
        require_sync::<domain::SymbolSeries>();
        require_send::<data::Registry>();
        require_sync::<data::Registry>();
        require_send::<data::SeriesStore>();
        require_sync::<data::SeriesStore>();
        require_send::<data::ListedFetcher>();
        require_sync::<data::ListedFetcher>();
        require_send::<data::OtcFetcher>();
        require_sync::<data::OtcFetcher>();
        require_send::<UnifiedFetcher>();
        require_sync::<UnifiedFetcher>();
    }
}
