//! Raw exchange rows → canonical rows.
//!
//! Both exchanges publish dates in the ROC calendar (`113/01/15`, year =
//! Gregorian − 1911), numbers with thousands separators, and dashes for
//! untraded days. Column names differ between the two and drift over time,
//! so every canonical field is looked up through a list of known spellings.
//! The rest of the crate never sees an exchange column name.

use super::provider::{FormatError, RawRow};
use crate::domain::{CanonicalRow, Market, Quote};
use chrono::NaiveDate;
use tracing::{debug, warn};

/// Offset between the ROC calendar year and the Gregorian year.
pub const ROC_YEAR_OFFSET: i32 = 1911;

const DATE: &[&str] = &["日期", "日 期", "交易日期"];
const OPEN: &[&str] = &["開盤價", "開盤"];
const HIGH: &[&str] = &["最高價", "最高"];
const LOW: &[&str] = &["最低價", "最低"];
const CLOSE: &[&str] = &["收盤價", "收盤"];
const CHANGE: &[&str] = &["漲跌價差", "漲跌"];
const TRANSACTIONS: &[&str] = &["成交筆數", "筆數"];

/// Volume columns and the factor that converts each to shares.
const VOLUME: &[(&str, f64)] = &[("成交股數", 1.0), ("成交仟股", 1000.0), ("成交張數", 1000.0)];
/// Turnover columns and the factor that converts each to NTD.
const TURNOVER: &[(&str, f64)] = &[("成交金額", 1.0), ("成交仟元", 1000.0)];

/// Stateless converter from exchange payload rows to canonical rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter;

impl Formatter {
    /// Convert a batch of raw rows, sorted ascending by date.
    ///
    /// Rows with an unparseable date or price are dropped with a warning; a
    /// bad row never aborts the batch.
    pub fn format(&self, rows: &[RawRow], market: Market) -> Vec<CanonicalRow> {
        let mut out: Vec<CanonicalRow> = rows
            .iter()
            .filter_map(|raw| match self.format_row(raw) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(%market, "{e}");
                    None
                }
            })
            .collect();

        // OTC payloads can arrive newest first.
        out.sort_by_key(|r| r.date);
        debug!(%market, input = rows.len(), output = out.len(), "formatted rows");
        out
    }

    /// Convert one raw row.
    pub fn format_row(&self, raw: &RawRow) -> Result<CanonicalRow, FormatError> {
        let fail = |reason: String| FormatError {
            reason,
            row: raw.to_string(),
        };

        let date_str = raw.get_any(DATE).ok_or_else(|| fail("missing date column".into()))?;
        let date = parse_exchange_date(date_str).ok_or_else(|| fail(format!("unparseable date '{date_str}'")))?;

        let price = |names: &[&str], label: &str| -> Result<Quote, FormatError> {
            let value = raw
                .get_any(names)
                .ok_or_else(|| fail(format!("missing {label} column")))?;
            parse_quote(value).ok_or_else(|| fail(format!("unparseable {label} '{value}'")))
        };
        let open = price(OPEN, "open")?;
        let high = price(HIGH, "high")?;
        let low = price(LOW, "low")?;
        let close = price(CLOSE, "close")?;

        let (volume_value, volume_scale) =
            scaled_column(raw, VOLUME).ok_or_else(|| fail("missing volume column".into()))?;
        let volume = match parse_number(volume_value) {
            Numeric::Value(v) if v >= 0.0 => (v * volume_scale).round() as u64,
            Numeric::Placeholder => 0,
            _ => return Err(fail(format!("unparseable volume '{volume_value}'"))),
        };

        let turnover = scaled_column(raw, TURNOVER).and_then(|(value, scale)| match parse_number(value) {
            Numeric::Value(v) if v >= 0.0 => Some((v * scale).round() as u64),
            _ => None,
        });

        let change = raw.get_any(CHANGE).and_then(parse_change);

        let transactions = raw.get_any(TRANSACTIONS).and_then(|value| match parse_number(value) {
            Numeric::Value(v) if v >= 0.0 => Some(v.round() as u64),
            _ => None,
        });

        Ok(CanonicalRow {
            date,
            open,
            high,
            low,
            close,
            volume,
            turnover,
            change,
            transactions,
        })
    }
}

fn scaled_column<'a>(raw: &'a RawRow, candidates: &[(&str, f64)]) -> Option<(&'a str, f64)> {
    candidates
        .iter()
        .find_map(|&(name, scale)| raw.get_any(&[name]).map(|v| (v, scale)))
}

/// Parse an exchange date.
///
/// Years below 1911 are ROC years (`113/01/15`, `99/1/4`); Gregorian
/// `2024/01/15` and ISO `2024-01-15` are accepted as-is. Trailing footnote
/// markers (`*`, `＊`) are ignored.
pub fn parse_exchange_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_end_matches(['*', '＊']).trim();
    let parts: Vec<&str> = s.split(['/', '-']).collect();
    let [y, m, d] = parts.as_slice() else {
        return None;
    };

    let year: i32 = y.trim().parse().ok()?;
    let month: u32 = m.trim().parse().ok()?;
    let day: u32 = d.trim().parse().ok()?;
    let year = if year < ROC_YEAR_OFFSET {
        year + ROC_YEAR_OFFSET
    } else {
        year
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Format a Gregorian date in the ROC calendar (`2024-01-15` → `113/01/15`).
pub fn to_roc_date(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!(
        "{:03}/{:02}/{:02}",
        date.year() - ROC_YEAR_OFFSET,
        date.month(),
        date.day()
    )
}

enum Numeric {
    Value(f64),
    Placeholder,
    Invalid,
}

fn is_placeholder(s: &str) -> bool {
    s.is_empty() || s.chars().all(|c| c == '-' || c == '\u{2014}') || s.eq_ignore_ascii_case("N/A")
}

fn parse_number(s: &str) -> Numeric {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if is_placeholder(&cleaned) {
        return Numeric::Placeholder;
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Numeric::Value(v),
        _ => Numeric::Invalid,
    }
}

fn parse_quote(s: &str) -> Option<Quote> {
    match parse_number(s) {
        Numeric::Value(v) if v >= 0.0 => Some(Quote::Price(v)),
        Numeric::Placeholder => Some(Quote::NoTrade),
        _ => None,
    }
}

/// Signed change column: `+1.50`, `-0.30`, ex-dividend `X0.00`, or a dash.
fn parse_change(s: &str) -> Option<f64> {
    let trimmed = s.trim().trim_start_matches(['X', 'x', '+']);
    match parse_number(trimmed) {
        Numeric::Value(v) => Some(v),
        _ => None,
    }
}
