//! Canonical daily row, the normalized record every exchange payload becomes.

use chrono::NaiveDate;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Literal written for a price on a day without trades.
pub const NO_TRADE: &str = "--";

/// A single price field.
///
/// Exchanges publish a dash for suspended or untraded days. That is kept as
/// an explicit marker instead of collapsing to zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quote {
    Price(f64),
    NoTrade,
}

impl Quote {
    pub fn price(self) -> Option<f64> {
        match self {
            Quote::Price(p) => Some(p),
            Quote::NoTrade => None,
        }
    }

    pub fn is_no_trade(self) -> bool {
        matches!(self, Quote::NoTrade)
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quote::Price(p) => write!(f, "{p}"),
            Quote::NoTrade => f.write_str(NO_TRADE),
        }
    }
}

impl Serialize for Quote {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Quote::Price(p) => serializer.serialize_f64(*p),
            Quote::NoTrade => serializer.serialize_str(NO_TRADE),
        }
    }
}

struct QuoteVisitor;

impl<'de> Visitor<'de> for QuoteVisitor {
    type Value = Quote;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a price or the no-trade marker '{NO_TRADE}'")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quote, E> {
        Ok(Quote::Price(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quote, E> {
        Ok(Quote::Price(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quote, E> {
        Ok(Quote::Price(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quote, E> {
        let v = v.trim();
        if v == NO_TRADE || v.is_empty() {
            return Ok(Quote::NoTrade);
        }
        v.parse::<f64>()
            .map(Quote::Price)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Quote {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuoteVisitor)
    }
}

/// Normalized daily OHLCV record for one symbol.
///
/// Field order is the column order of the per-symbol CSV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub date: NaiveDate,
    pub open: Quote,
    pub high: Quote,
    pub low: Quote,
    pub close: Quote,
    /// Shares traded.
    pub volume: u64,
    /// Traded value in NTD.
    pub turnover: Option<u64>,
    /// Close-to-close price change as published by the exchange.
    pub change: Option<f64>,
    /// Number of matched transactions.
    pub transactions: Option<u64>,
}

impl CanonicalRow {
    /// Canonical column names, in file order.
    pub const HEADER: [&'static str; 9] = [
        "date",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "turnover",
        "change",
        "transactions",
    ];

    /// True when the exchange reported no trades for the day.
    pub fn is_no_trade(&self) -> bool {
        self.close.is_no_trade()
    }
}
