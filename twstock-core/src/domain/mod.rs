//! Domain types: symbols, canonical rows and per-symbol series.

pub mod row;
pub mod series;
pub mod symbol;

pub use row::{CanonicalRow, Quote, NO_TRADE};
pub use series::{DateRangeSnapshot, SymbolSeries};
pub use symbol::{Market, SymbolRecord};
