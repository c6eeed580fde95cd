//! Unified fetcher: routes symbols to the right exchange, merges results into
//! the store and runs multi-symbol batches.
//!
//! Routing uses the registry's market tag. Symbols without one are
//! auto-detected by probing the listed market first, then OTC; the first
//! exchange answering with well-formed rows wins.
//!
//! A period that still fails after its retries does not stop the symbol: the
//! other periods are saved, the symbol is reported as failed, and the failed
//! period is recorded so the next gap-fill requests it again.
//!
//! Batches run strictly sequentially with a fixed courtesy delay between
//! symbols. Per-symbol failures are collected in the [`BatchSummary`] and never
//! abort the batch. A cancellation flag is checked between symbols; since each
//! symbol's file is replaced atomically, stopping early leaves every file that
//! was written complete.

use crate::config::FetchConfig;
use crate::data::{
    BatchProgress, DataError, Formatter, ListedFetcher, LogProgress, MarketFetchError, MarketFetcher, OtcFetcher,
    MergeOutcome, PeriodSpec, RawRow, Registry, RetryPolicy, SeriesStore, StoreTarget,
};
use crate::domain::{CanonicalRow, DateRangeSnapshot, Market, SymbolSeries};
use chrono::{Duration as Days, Local, NaiveDate};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Windows, delays and retry settings for one fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub lookback_days: u32,
    pub update_days: u32,
    pub symbol_delay: Duration,
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl FetchPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            update_days: config.update_days,
            symbol_delay: config.symbol_delay(),
            request_delay: config.request_delay(),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// No delays and a single attempt per request.
    pub fn immediate() -> Self {
        Self {
            lookback_days: 365,
            update_days: 7,
            symbol_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
            retry: RetryPolicy::no_retry(),
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Outcome counts of a multi-symbol operation.
///
/// `skipped` counts symbols that produced no new rows, plus symbols never
/// reached because the batch was cancelled.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub errors: Vec<(String, DataError)>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Per-symbol results of a batch plus its summary.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: BTreeMap<String, T>,
    pub summary: BatchSummary,
}

/// Reachability of the two exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub listed_ok: bool,
    pub otc_ok: bool,
}

impl ConnectionStatus {
    pub fn all_ok(&self) -> bool {
        self.listed_ok && self.otc_ok
    }
}

pub struct UnifiedFetcher {
    registry: Registry,
    listed: Box<dyn MarketFetcher>,
    otc: Box<dyn MarketFetcher>,
    formatter: Formatter,
    store: SeriesStore,
    policy: FetchPolicy,
    cancel: Arc<AtomicBool>,
    today: Option<NaiveDate>,
    progress: Box<dyn BatchProgress>,
}

impl UnifiedFetcher {
    pub fn new(
        registry: Registry,
        listed: Box<dyn MarketFetcher>,
        otc: Box<dyn MarketFetcher>,
        store: SeriesStore,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            registry,
            listed,
            otc,
            formatter: Formatter,
            store,
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
            today: None,
            progress: Box::new(LogProgress),
        }
    }

    /// Build a fetcher against the real exchanges from a config.
    ///
    /// Fails if the registry file is missing or the config is invalid.
    pub fn from_config(config: &FetchConfig) -> Result<Self, DataError> {
        config.validate()?;
        let registry = Registry::from_file(&config.registry_path)?;
        Ok(Self::new(
            registry,
            Box::new(ListedFetcher::new(config)?),
            Box::new(OtcFetcher::new(config)?),
            SeriesStore::new(&config.data_dir),
            FetchPolicy::from_config(config),
        ))
    }

    /// Pin "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that stops a running batch before its next symbol.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// `[today - days, today]`, never starting before the history floor.
    fn window(&self, days: u32) -> (NaiveDate, NaiveDate) {
        let end = self.today();
        let start = (end - Days::days(i64::from(days))).max(FetchConfig::history_floor());
        (start, end)
    }

    fn fetcher_for(&self, market: Market) -> &dyn MarketFetcher {
        match market {
            Market::Listed => self.listed.as_ref(),
            Market::Otc => self.otc.as_ref(),
        }
    }

    fn target_codes(&self) -> Vec<String> {
        self.registry.targets().map(|r| r.code.clone()).collect()
    }

    // ── Single-symbol operations ─────────────────────────────────────

    /// Fetch the lookback window for one symbol and merge it into its series.
    ///
    /// When some periods fail, the rows of the others are still saved and the
    /// failure is returned as [`DataError::Incomplete`].
    pub fn fetch_one(&self, code: &str) -> Result<SymbolSeries, DataError> {
        self.fetch_one_counted(code).map(|(series, _)| series)
    }

    fn fetch_one_counted(&self, code: &str) -> Result<(SymbolSeries, usize), DataError> {
        let window = [self.window(self.policy.lookback_days)];
        let collected = self.collect(code, &window)?;
        let outcome = self.commit(code, &window, collected, StoreTarget::Default)?;
        info!(code, added = outcome.added, total = outcome.series.len(), "series updated");
        Ok((outcome.series, outcome.added))
    }

    /// Fetch `[start, end]` for one symbol into its isolated snapshot.
    ///
    /// The default series is never read or written.
    pub fn fetch_one_by_date_range(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DateRangeSnapshot, DataError> {
        validate_range(start, end)?;
        self.fetch_snapshot_counted(code, start, end).map(|(snap, _)| snap)
    }

    fn fetch_snapshot_counted(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(DateRangeSnapshot, usize), DataError> {
        let fetch_start = start.max(FetchConfig::history_floor());
        let fetch_end = end.min(self.today());
        let ranges: Vec<(NaiveDate, NaiveDate)> = if fetch_start <= fetch_end {
            vec![(fetch_start, fetch_end)]
        } else {
            debug!(code, %start, %end, "requested range lies outside servable history");
            Vec::new()
        };

        let collected = self.collect(code, &ranges)?;
        let outcome = self.commit(code, &ranges, collected, StoreTarget::Snapshot { start, end })?;
        info!(code, %start, %end, rows = outcome.series.len(), "snapshot written");
        Ok((
            DateRangeSnapshot {
                start,
                end,
                series: outcome.series,
            },
            outcome.added,
        ))
    }

    /// Gap-fill the last `days` days of one symbol's series.
    ///
    /// Requests the leading and trailing parts of the window that the stored
    /// series does not cover, plus any earlier failed periods inside it.
    pub fn fetch_backward_days(&self, code: &str, days: u32) -> Result<SymbolSeries, DataError> {
        self.fetch_backward_counted(code, days).map(|(series, _)| series)
    }

    fn fetch_backward_counted(&self, code: &str, days: u32) -> Result<(SymbolSeries, usize), DataError> {
        let (start, end) = self.window(days);
        let existing = self.store.load(code)?;
        let pending = self
            .store
            .load_pending(code)?
            .into_iter()
            .map(|(s, e)| (s.max(start), e.min(end)))
            .filter(|(s, e)| s <= e);
        let missing = coalesce(existing.missing_ranges(start, end).into_iter().chain(pending).collect());
        if missing.is_empty() {
            info!(code, %start, %end, "already up to date");
            return Ok((existing, 0));
        }
        debug!(code, ?missing, "gap-filling");

        let collected = self.collect(code, &missing)?;
        let outcome = self.commit(code, &missing, collected, StoreTarget::Default)?;
        info!(code, added = outcome.added, total = outcome.series.len(), "gaps filled");
        Ok((outcome.series, outcome.added))
    }

    /// Merge collected rows into `target`, then settle the failed periods.
    ///
    /// Failed periods of the default series are recorded in the store so the
    /// next gap-fill asks for them again.
    fn commit(
        &self,
        code: &str,
        requested: &[(NaiveDate, NaiveDate)],
        collected: Collected,
        target: StoreTarget,
    ) -> Result<MergeOutcome, DataError> {
        let Collected {
            rows,
            succeeded,
            mut failed,
        } = collected;
        let outcome = self.store.merge_into(code, rows, target)?;

        if target == StoreTarget::Default {
            let failed_ranges: Vec<_> = failed
                .iter()
                .flat_map(|e| clip(e.period.bounds(), requested))
                .collect();
            self.store.update_pending(code, requested, &failed_ranges)?;
        }

        if failed.is_empty() {
            return Ok(outcome);
        }
        if succeeded == 0 {
            if let Some(e) = failed.pop() {
                return Err(e.into());
            }
        }
        Err(DataError::Incomplete {
            code: code.to_string(),
            added: outcome.added,
            failed,
        })
    }

    // ── Batch operations ─────────────────────────────────────────────

    /// Fetch the lookback window for every target symbol.
    pub fn fetch_all(&self) -> BatchReport<SymbolSeries> {
        let codes = self.target_codes();
        self.run_batch(&codes, |code| self.fetch_one_counted(code))
    }

    /// Snapshot `[start, end]` for every target symbol.
    ///
    /// The range is validated before any request is made.
    pub fn fetch_all_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BatchReport<DateRangeSnapshot>, DataError> {
        validate_range(start, end)?;
        let codes = self.target_codes();
        Ok(self.run_batch(&codes, |code| self.fetch_snapshot_counted(code, start, end)))
    }

    /// Gap-fill the last `days` days (the configured update window when
    /// `None`) for every target symbol.
    pub fn update_all(&self, days: Option<u32>) -> BatchReport<SymbolSeries> {
        let days = days.unwrap_or(self.policy.update_days);
        info!(days, "incremental update");
        let codes = self.target_codes();
        self.run_batch(&codes, |code| self.fetch_backward_counted(code, days))
    }

    /// Probe both exchanges. Failures are reported as `false`, never raised.
    pub fn test_connection(&self) -> ConnectionStatus {
        let check = |fetcher: &dyn MarketFetcher| match fetcher.probe() {
            Ok(()) => {
                info!(market = %fetcher.market(), "connection ok");
                true
            }
            Err(e) => {
                warn!(market = %fetcher.market(), error = %e, "connection failed");
                false
            }
        };
        ConnectionStatus {
            listed_ok: check(self.listed.as_ref()),
            otc_ok: check(self.otc.as_ref()),
        }
    }

    fn run_batch<T, F>(&self, codes: &[String], mut op: F) -> BatchReport<T>
    where
        F: FnMut(&str) -> Result<(T, usize), DataError>,
    {
        let total = codes.len();
        let mut results = BTreeMap::new();
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };

        for (i, code) in codes.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                let remaining = total - i;
                warn!(remaining, "batch cancelled");
                summary.skipped += remaining;
                summary.cancelled = true;
                break;
            }
            if i > 0 {
                pause(self.policy.symbol_delay);
            }

            self.progress.on_start(code, i, total);
            match op(code) {
                Ok((value, added)) => {
                    self.progress.on_complete(code, i, total, &Ok(added));
                    if added == 0 {
                        summary.skipped += 1;
                    } else {
                        summary.succeeded += 1;
                    }
                    results.insert(code.clone(), value);
                }
                Err(e) => {
                    let result = Err(e);
                    self.progress.on_complete(code, i, total, &result);
                    if let Err(e) = result {
                        summary.failed += 1;
                        summary.errors.push((code.clone(), e));
                    }
                }
            }
        }

        self.progress
            .on_batch_complete(summary.succeeded, summary.skipped, summary.failed, total);
        BatchReport { results, summary }
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Fetch and format every row of `code` inside `ranges`.
    fn collect(&self, code: &str, ranges: &[(NaiveDate, NaiveDate)]) -> Result<Collected, DataError> {
        if ranges.is_empty() {
            return Ok(Collected::default());
        }

        let mut collected = match self.registry.market_of(code) {
            Some(market) => self.fetch_ranges(self.fetcher_for(market), code, ranges, Vec::new()),
            None => {
                let (market, probed) = self.detect_market(code, ranges)?;
                info!(code, %market, "market detected");
                self.fetch_ranges(self.fetcher_for(market), code, ranges, probed)
            }
        };

        collected
            .rows
            .retain(|r| ranges.iter().any(|(s, e)| r.date >= *s && r.date <= *e));
        Ok(collected)
    }

    /// Probe each market in turn, newest period first.
    ///
    /// A market's current month is empty until its first session, so up to
    /// [`PROBE_DEPTH`] periods are tried before moving on. Returns the winning
    /// market with every period it answered, so none is requested twice.
    fn detect_market(
        &self,
        code: &str,
        ranges: &[(NaiveDate, NaiveDate)],
    ) -> Result<(Market, Vec<(PeriodSpec, Vec<RawRow>)>), DataError> {
        for market in Market::ALL {
            let fetcher = self.fetcher_for(market);
            let periods = PeriodSpec::decompose_all(ranges, fetcher.granularity());
            let mut answered = Vec::new();

            for (i, period) in periods.iter().rev().take(PROBE_DEPTH).enumerate() {
                if i > 0 {
                    pause(self.policy.request_delay);
                }
                match self.policy.retry.run(|_| fetcher.fetch_period(code, period)) {
                    Ok(raw) if !self.formatter.format(&raw, market).is_empty() => {
                        answered.push((*period, raw));
                        return Ok((market, answered));
                    }
                    Ok(raw) => {
                        debug!(code, %market, %period, "probe returned no usable rows");
                        answered.push((*period, raw));
                    }
                    Err(e) if e.is_no_data() => {
                        debug!(code, %market, %period, "probe found no data");
                        answered.push((*period, Vec::new()));
                    }
                    Err(e) => debug!(code, %market, error = %e, "probe failed"),
                }
            }
        }
        Err(DataError::UnknownSymbol {
            code: code.to_string(),
        })
    }

    /// Request every native period covering `ranges` from one market.
    ///
    /// A failed period never stops the others; it is returned in
    /// [`Collected::failed`]. The exchange's no-data answer is not a failure.
    fn fetch_ranges(
        &self,
        fetcher: &dyn MarketFetcher,
        code: &str,
        ranges: &[(NaiveDate, NaiveDate)],
        mut prefetched: Vec<(PeriodSpec, Vec<RawRow>)>,
    ) -> Collected {
        let market = fetcher.market();
        let periods = PeriodSpec::decompose_all(ranges, fetcher.granularity());
        let mut collected = Collected::default();
        let mut requests = 0usize;

        for period in &periods {
            let cached = prefetched
                .iter()
                .position(|(p, _)| p == period)
                .map(|i| prefetched.swap_remove(i).1);
            let result = match cached {
                Some(raw) => Ok(raw),
                None => {
                    if requests > 0 {
                        pause(self.policy.request_delay);
                    }
                    requests += 1;
                    self.policy.retry.run(|_| fetcher.fetch_period(code, period))
                }
            };

            match result {
                Ok(raw) => {
                    collected.succeeded += 1;
                    let formatted = self.formatter.format(&raw, market);
                    debug!(code, %market, %period, rows = formatted.len(), "period fetched");
                    collected.rows.extend(formatted);
                }
                Err(e) if e.is_no_data() => {
                    debug!(code, %market, %period, "no data for period");
                    collected.succeeded += 1;
                }
                Err(e) => {
                    warn!(error = %e, "period failed");
                    collected.failed.push(e);
                }
            }
        }
        collected
    }
}

/// Periods tried per market when auto-detecting.
const PROBE_DEPTH: usize = 3;

/// Formatted rows of one symbol plus the periods that could not be fetched.
#[derive(Debug, Default)]
struct Collected {
    rows: Vec<CanonicalRow>,
    succeeded: usize,
    failed: Vec<MarketFetchError>,
}

/// Parts of `bounds` that fall inside `ranges`.
fn clip(bounds: (NaiveDate, NaiveDate), ranges: &[(NaiveDate, NaiveDate)]) -> Vec<(NaiveDate, NaiveDate)> {
    ranges
        .iter()
        .map(|&(s, e)| (s.max(bounds.0), e.min(bounds.1)))
        .filter(|(s, e)| s <= e)
        .collect()
}

/// Sort ranges and join the ones that overlap or touch.
fn coalesce(mut ranges: Vec<(NaiveDate, NaiveDate)>) -> Vec<(NaiveDate, NaiveDate)> {
    ranges.sort();
    let mut joined: Vec<(NaiveDate, NaiveDate)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match joined.last_mut() {
            Some(last) if start <= last.1 + Days::days(1) => last.1 = last.1.max(end),
            _ => joined.push((start, end)),
        }
    }
    joined
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), DataError> {
    if start > end {
        return Err(DataError::InvalidRange { start, end });
    }
    Ok(())
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
