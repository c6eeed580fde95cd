//! Exchange access, formatting and the per-symbol store.

pub mod formatter;
pub mod http;
pub mod listed;
pub mod otc;
pub mod period;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod store;

pub use formatter::Formatter;
pub use listed::ListedFetcher;
pub use otc::OtcFetcher;
pub use period::{Granularity, PeriodSpec};
pub use provider::{
    BatchProgress, DataError, FetchCause, FormatError, LogProgress, MarketFetchError, MarketFetcher, RawRow,
};
pub use registry::Registry;
pub use retry::RetryPolicy;
pub use store::{MergeOutcome, SeriesStore, StoreTarget};
