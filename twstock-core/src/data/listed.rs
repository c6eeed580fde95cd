//! Listed-market (TWSE) fetcher.
//!
//! `GET /exchangeReport/STOCK_DAY?response=json&date=YYYYMM01&stockNo=CODE`
//! returns one calendar month of daily rows:
//!
//! ```json
//! {"stat":"OK","fields":["日期","成交股數",...],"data":[["113/01/02","1,234",...]]}
//! ```
//!
//! Any `stat` other than `OK` is the exchange's "no matching data" answer.

use super::http::{build_client, get_text};
use super::period::{Granularity, PeriodSpec};
use super::provider::{DataError, FetchCause, MarketFetchError, MarketFetcher, RawRow};
use crate::config::FetchConfig;
use crate::domain::Market;
use chrono::Datelike;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const STOCK_DAY_PATH: &str = "/exchangeReport/STOCK_DAY";
const STAT_OK: &str = "OK";

/// Symbol and month used by the connection probe.
const PROBE_CODE: &str = "2330";
const PROBE_PERIOD: PeriodSpec = PeriodSpec::Month { year: 2024, month: 11 };

#[derive(Debug, Deserialize)]
struct StockDayResponse {
    stat: String,
    #[serde(default)]
    fields: Option<Vec<String>>,
    #[serde(default)]
    data: Option<Vec<Vec<serde_json::Value>>>,
}

pub struct ListedFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl ListedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.listed.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, code: &str, period: &PeriodSpec) -> Result<String, FetchCause> {
        let (first, _) = period.bounds();
        let url = format!("{}{STOCK_DAY_PATH}", self.base_url);
        let query = [
            ("response", "json".to_string()),
            ("date", format!("{:04}{:02}01", first.year(), first.month())),
            ("stockNo", code.to_string()),
        ];
        get_text(&self.client, &url, &query)
    }
}

/// Parse a STOCK_DAY body into raw rows.
pub fn parse_stock_day(body: &str) -> Result<Vec<RawRow>, FetchCause> {
    let resp: StockDayResponse =
        serde_json::from_str(body).map_err(|e| FetchCause::Malformed(format!("STOCK_DAY JSON: {e}")))?;

    if resp.stat.trim() != STAT_OK {
        debug!(stat = %resp.stat, "listed market returned no data");
        return Err(FetchCause::NoData);
    }

    let data = match resp.data {
        Some(data) if !data.is_empty() => data,
        _ => return Err(FetchCause::NoData),
    };
    let fields = resp
        .fields
        .filter(|f| !f.is_empty())
        .ok_or_else(|| FetchCause::Malformed("STOCK_DAY response has data but no fields".into()))?;
    let columns: Arc<[String]> = fields.into();

    Ok(data
        .into_iter()
        .map(|cells| {
            let values = cells.into_iter().map(cell_to_string).collect();
            RawRow::new(columns.clone(), values)
        })
        .collect())
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl MarketFetcher for ListedFetcher {
    fn market(&self) -> Market {
        Market::Listed
    }

    fn granularity(&self) -> Granularity {
        Granularity::Monthly
    }

    fn fetch_period(&self, code: &str, period: &PeriodSpec) -> Result<Vec<RawRow>, MarketFetchError> {
        self.request(code, period)
            .and_then(|body| parse_stock_day(&body))
            .map_err(|cause| MarketFetchError::new(Market::Listed, code, *period, cause))
    }

    fn probe(&self) -> Result<(), MarketFetchError> {
        self.fetch_period(PROBE_CODE, &PROBE_PERIOD).map(|_| ())
    }
}
