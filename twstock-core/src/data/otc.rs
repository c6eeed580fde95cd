//! OTC-market (TPEX) fetcher.
//!
//! `GET /www/zh-tw/afterTrading/tradingStock?code=CODE&date=YYYY/MM/01&response=utf-8`
//! answers with a CSV document for one month: a few preamble lines, a header
//! line starting with `日 期`, the daily rows, and a `共N筆` footer. Requests
//! are made per date range; a range never crosses a month boundary, so each
//! range maps onto one monthly document and is trimmed to the range.

use super::formatter::parse_exchange_date;
use super::http::{build_client, get_text};
use super::period::{Granularity, PeriodSpec};
use super::provider::{DataError, FetchCause, MarketFetchError, MarketFetcher, RawRow};
use crate::config::FetchConfig;
use crate::domain::Market;
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use tracing::debug;

const TRADING_STOCK_PATH: &str = "/www/zh-tw/afterTrading/tradingStock";
const DAILY_CLOSE_PATH: &str = "/openapi/v1/tpex_mainboard_daily_close_quotes";
const PROBE_DATE: &str = "113/10/02";

const DATE_HEADERS: &[&str] = &["日 期", "日期"];
const VOLUME_HEADERS: &[&str] = &["成交仟股", "成交張數", "成交股數"];

pub struct OtcFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl OtcFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.otc.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, code: &str, start: NaiveDate) -> Result<String, FetchCause> {
        let url = format!("{}{TRADING_STOCK_PATH}", self.base_url);
        let query = [
            ("code", code.to_string()),
            ("date", format!("{:04}/{:02}/01", start.year(), start.month())),
            ("id", String::new()),
            ("response", "utf-8".to_string()),
        ];
        get_text(&self.client, &url, &query)
    }
}

/// Parse a tradingStock CSV body into raw rows.
pub fn parse_trading_stock(body: &str) -> Result<Vec<RawRow>, FetchCause> {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim_start().starts_with('<') {
        return Err(FetchCause::Malformed("expected CSV, got HTML".into()));
    }

    let lines: Vec<&str> = body.lines().collect();
    let Some(header_idx) = lines.iter().position(|l| is_header_line(l)) else {
        // Unknown codes get the preamble and nothing else.
        debug!("no header line in OTC payload");
        return Err(FetchCause::NoData);
    };

    let table = lines[header_idx..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());

    let columns: Arc<[String]> = reader
        .headers()
        .map_err(|e| FetchCause::Malformed(format!("OTC CSV header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FetchCause::Malformed(format!("OTC CSV row: {e}")))?;
        // Footer and note lines have a different shape.
        if record.len() != columns.len() || record.get(0).map_or(true, str::is_empty) {
            continue;
        }
        rows.push(RawRow::new(
            columns.clone(),
            record.iter().map(str::to_string).collect(),
        ));
    }

    if rows.is_empty() {
        return Err(FetchCause::NoData);
    }
    Ok(rows)
}

fn is_header_line(line: &str) -> bool {
    DATE_HEADERS.iter().any(|h| line.contains(h)) && VOLUME_HEADERS.iter().any(|h| line.contains(h))
}

/// Keep rows dated inside `[start, end]`. Rows whose date does not parse are
/// kept so the formatter can report them.
fn trim_to_range(rows: Vec<RawRow>, start: NaiveDate, end: NaiveDate) -> Vec<RawRow> {
    rows.into_iter()
        .filter(|row| {
            row.get_any(DATE_HEADERS)
                .and_then(parse_exchange_date)
                .map_or(true, |d| d >= start && d <= end)
        })
        .collect()
}

impl MarketFetcher for OtcFetcher {
    fn market(&self) -> Market {
        Market::Otc
    }

    fn granularity(&self) -> Granularity {
        Granularity::Range
    }

    fn fetch_period(&self, code: &str, period: &PeriodSpec) -> Result<Vec<RawRow>, MarketFetchError> {
        let (start, end) = period.bounds();
        let err = |cause| MarketFetchError::new(Market::Otc, code, *period, cause);

        let body = self.request(code, start).map_err(err)?;
        let rows = parse_trading_stock(&body).map_err(err)?;
        Ok(trim_to_range(rows, start, end))
    }

    fn probe(&self) -> Result<(), MarketFetchError> {
        let day = parse_exchange_date(PROBE_DATE).unwrap_or_default();
        let period = PeriodSpec::Range { start: day, end: day };
        let url = format!("{}{DAILY_CLOSE_PATH}", self.base_url);
        let body = get_text(&self.client, &url, &[("d", PROBE_DATE.to_string())])
            .map_err(|cause| MarketFetchError::new(Market::Otc, "-", period, cause))?;
        if body.trim().is_empty() {
            return Err(MarketFetchError::new(Market::Otc, "-", period, FetchCause::NoData));
        }
        Ok(())
    }
}
