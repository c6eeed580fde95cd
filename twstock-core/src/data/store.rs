//! Per-symbol CSV store.
//!
//! Layout:
//! - default series: `{root}/{code}.csv`
//! - date-range snapshots: `{root}/date_range_{YYYYMMDD}_{YYYYMMDD}/{code}.csv`
//!
//! Files are always rewritten whole: the merged series is written to
//! `{code}.csv.tmp` and renamed into place, so an interrupted run leaves
//! either the old file or the new one.
//!
//! Periods that still failed after their retries are listed per symbol in
//! `{root}/{code}.pending.csv` until a later fetch covers them. The stored
//! series cannot show them: a failed month inside the stored span looks
//! exactly like a run of holidays.

use super::provider::DataError;
use crate::domain::{CanonicalRow, SymbolSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a merge lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    /// The symbol's long-lived series.
    Default,
    /// An isolated snapshot keyed by the literal requested range.
    Snapshot { start: NaiveDate, end: NaiveDate },
}

/// Result of merging rows into a stored series.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub series: SymbolSeries,
    /// Dates that were not stored before.
    pub added: usize,
    /// Where the series was written; `None` when there was nothing to write.
    pub path: Option<PathBuf>,
}

/// A date range whose fetch failed and must be requested again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct PendingRange {
    start: NaiveDate,
    end: NaiveDate,
}

pub struct SeriesStore {
    root: PathBuf,
}

impl SeriesStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{code}.csv`
    pub fn series_path(&self, code: &str) -> PathBuf {
        self.root.join(format!("{code}.csv"))
    }

    /// `{root}/date_range_{start}_{end}`
    pub fn snapshot_dir(&self, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.root.join(format!(
            "date_range_{}_{}",
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ))
    }

    pub fn path_for(&self, code: &str, target: StoreTarget) -> PathBuf {
        match target {
            StoreTarget::Default => self.series_path(code),
            StoreTarget::Snapshot { start, end } => self.snapshot_dir(start, end).join(format!("{code}.csv")),
        }
    }

    /// `{root}/{code}.pending.csv`
    pub fn pending_path(&self, code: &str) -> PathBuf {
        self.root.join(format!("{code}.pending.csv"))
    }

    /// Ranges of the default series whose fetch failed, oldest first.
    pub fn load_pending(&self, code: &str) -> Result<Vec<(NaiveDate, NaiveDate)>, DataError> {
        let path = self.pending_path(code);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| DataError::Store(format!("open {}: {e}", path.display())))?;
        reader
            .deserialize()
            .map(|r| r.map(|p: PendingRange| (p.start, p.end)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DataError::Store(format!("read {}: {e}", path.display())))
    }

    /// Replace the pending ranges that a fetch of `requested` has settled.
    ///
    /// Pending ranges lying entirely inside `requested` are dropped, since
    /// they were just requested again; `failed` ranges are added. The file is
    /// removed once nothing is pending.
    pub fn update_pending(
        &self,
        code: &str,
        requested: &[(NaiveDate, NaiveDate)],
        failed: &[(NaiveDate, NaiveDate)],
    ) -> Result<(), DataError> {
        let mut pending: Vec<PendingRange> = self
            .load_pending(code)?
            .into_iter()
            .filter(|(s, e)| !requested.iter().any(|(rs, re)| rs <= s && e <= re))
            .chain(failed.iter().copied())
            .map(|(start, end)| PendingRange { start, end })
            .collect();
        pending.sort();
        pending.dedup();

        let path = self.pending_path(code);
        if pending.is_empty() {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| DataError::Store(format!("remove {}: {e}", path.display())))?;
            }
            return Ok(());
        }

        fs::create_dir_all(&self.root)
            .map_err(|e| DataError::Store(format!("create {}: {e}", self.root.display())))?;
        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp_path)
            .map_err(|e| DataError::Store(format!("create {}: {e}", tmp_path.display())))?;
        for range in &pending {
            writer
                .serialize(range)
                .map_err(|e| DataError::Store(format!("write pending range: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| DataError::Store(format!("flush {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Store(format!("atomic rename to {} failed: {e}", path.display()))
        })?;
        debug!(code, pending = pending.len(), "recorded pending ranges");
        Ok(())
    }

    /// Load the default series for `code`. A missing file is an empty series.
    pub fn load(&self, code: &str) -> Result<SymbolSeries, DataError> {
        self.load_at(code, StoreTarget::Default)
    }

    pub fn load_at(&self, code: &str, target: StoreTarget) -> Result<SymbolSeries, DataError> {
        let path = self.path_for(code, target);
        if !path.exists() {
            return Ok(SymbolSeries::new(code));
        }
        let rows = read_rows(&path)?;
        debug!(code, rows = rows.len(), path = %path.display(), "loaded series");
        Ok(SymbolSeries::from_rows(code, rows))
    }

    /// Write a series to its target, replacing any previous file atomically.
    pub fn persist(&self, series: &SymbolSeries, target: StoreTarget) -> Result<PathBuf, DataError> {
        let path = self.path_for(series.code(), target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DataError::Store(format!("create {}: {e}", parent.display())))?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        write_rows(&tmp_path, series.rows())?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Store(format!("atomic rename to {} failed: {e}", path.display()))
        })?;

        debug!(code = series.code(), rows = series.len(), path = %path.display(), "persisted series");
        Ok(path)
    }

    /// Merge `rows` into whatever is stored at `target` and persist the result.
    ///
    /// Snapshots only ever merge with the snapshot at the same location; the
    /// default series is never read or touched for them. Nothing is written
    /// when both the stored series and `rows` are empty.
    pub fn merge_into(
        &self,
        code: &str,
        rows: Vec<CanonicalRow>,
        target: StoreTarget,
    ) -> Result<MergeOutcome, DataError> {
        let existing = self.load_at(code, target)?;
        let added = rows.iter().filter(|r| !existing.contains(r.date)).count();

        if rows.is_empty() {
            return Ok(MergeOutcome {
                series: existing,
                added: 0,
                path: None,
            });
        }

        let merged = existing.merge(rows);
        let path = self.persist(&merged, target)?;
        Ok(MergeOutcome {
            series: merged,
            added,
            path: Some(path),
        })
    }
}

fn read_rows(path: &Path) -> Result<Vec<CanonicalRow>, DataError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DataError::Store(format!("open {}: {e}", path.display())))?;
    reader
        .deserialize()
        .collect::<Result<Vec<CanonicalRow>, _>>()
        .map_err(|e| DataError::Store(format!("read {}: {e}", path.display())))
}

fn write_rows<'a>(path: &Path, rows: impl Iterator<Item = &'a CanonicalRow>) -> Result<(), DataError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| DataError::Store(format!("create {}: {e}", path.display())))?;

    // Written explicitly so an empty series still gets a header row.
    writer
        .write_record(CanonicalRow::HEADER)
        .map_err(|e| DataError::Store(format!("write header: {e}")))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| DataError::Store(format!("write row {}: {e}", row.date)))?;
    }
    writer
        .flush()
        .map_err(|e| DataError::Store(format!("flush {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Quote;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(d: NaiveDate, close: f64) -> CanonicalRow {
        CanonicalRow {
            date: d,
            open: Quote::Price(close),
            high: Quote::Price(close),
            low: Quote::Price(close),
            close: Quote::Price(close),
            volume: 1_000,
            turnover: Some(1_000 * close as u64),
            change: Some(0.5),
            transactions: None,
        }
    }

    #[test]
    fn missing_file_loads_as_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let series = store.load("2330").unwrap();
        assert!(series.is_empty());
        assert_eq!(series.code(), "2330");
    }

    #[test]
    fn persist_and_load_preserve_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let mut no_trade = row(date(2024, 1, 3), 0.0);
        no_trade.open = Quote::NoTrade;
        no_trade.high = Quote::NoTrade;
        no_trade.low = Quote::NoTrade;
        no_trade.close = Quote::NoTrade;
        no_trade.volume = 0;
        let series = SymbolSeries::from_rows("2330", vec![row(date(2024, 1, 2), 593.0), no_trade]);

        let path = store.persist(&series, StoreTarget::Default).unwrap();
        assert_eq!(path, dir.path().join("2330.csv"));
        assert!(!dir.path().join("2330.csv.tmp").exists());

        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, CanonicalRow::HEADER.join(","));
        assert!(text.contains("--"));

        assert_eq!(store.load("2330").unwrap(), series);
    }

    #[test]
    fn merge_into_counts_only_new_dates() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store
            .merge_into("2330", vec![row(date(2024, 1, 2), 5.0)], StoreTarget::Default)
            .unwrap();

        let outcome = store
            .merge_into(
                "2330",
                vec![row(date(2024, 1, 2), 7.0), row(date(2024, 1, 3), 8.0)],
                StoreTarget::Default,
            )
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.series.len(), 2);
        assert_eq!(outcome.series.get(date(2024, 1, 2)).unwrap().close, Quote::Price(7.0));
    }

    #[test]
    fn empty_merge_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let outcome = store.merge_into("6488", Vec::new(), StoreTarget::Default).unwrap();
        assert!(outcome.path.is_none());
        assert!(!store.series_path("6488").exists());
    }

    #[test]
    fn snapshot_is_isolated_from_default_series() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store
            .merge_into("2330", vec![row(date(2023, 12, 29), 1.0)], StoreTarget::Default)
            .unwrap();

        let target = StoreTarget::Snapshot {
            start: date(2024, 1, 1),
            end: date(2024, 1, 31),
        };
        let outcome = store
            .merge_into("2330", vec![row(date(2024, 1, 2), 2.0)], target)
            .unwrap();

        assert_eq!(outcome.series.len(), 1);
        assert_eq!(
            outcome.path.unwrap(),
            dir.path().join("date_range_20240101_20240131").join("2330.csv")
        );
        assert_eq!(store.load("2330").unwrap().len(), 1);
        assert!(store.load("2330").unwrap().contains(date(2023, 12, 29)));
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        fs::write(store.series_path("2330"), "date,open\nnot-a-date,1\n").unwrap();
        assert!(matches!(store.load("2330"), Err(DataError::Store(_))));
    }

    #[test]
    fn pending_ranges_settle_when_requested_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let sept = (date(2023, 9, 1), date(2023, 9, 30));
        let year = (date(2023, 3, 30), date(2024, 3, 29));

        store.update_pending("2330", &[year], &[sept]).unwrap();
        assert_eq!(store.load_pending("2330").unwrap(), vec![sept]);

        // A narrower request leaves the pending range alone.
        store
            .update_pending("2330", &[(date(2024, 3, 1), date(2024, 3, 29))], &[])
            .unwrap();
        assert_eq!(store.load_pending("2330").unwrap(), vec![sept]);

        store.update_pending("2330", &[sept], &[]).unwrap();
        assert!(store.load_pending("2330").unwrap().is_empty());
        assert!(!store.pending_path("2330").exists());
    }
}
