//! Per-symbol time series and the merge-by-date rule.

use super::row::CanonicalRow;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeMap;

/// Ordered daily rows for one symbol code.
///
/// Backed by a `BTreeMap` keyed by date, so dates are unique and iteration is
/// always ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolSeries {
    code: String,
    rows: BTreeMap<NaiveDate, CanonicalRow>,
}

impl SymbolSeries {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            rows: BTreeMap::new(),
        }
    }

    /// Build a series from rows in any order. Later rows win on date collisions.
    pub fn from_rows(code: impl Into<String>, rows: impl IntoIterator<Item = CanonicalRow>) -> Self {
        let mut series = Self::new(code);
        series.overlay(rows);
        series
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in ascending date order.
    pub fn rows(&self) -> impl Iterator<Item = &CanonicalRow> {
        self.rows.values()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&CanonicalRow> {
        self.rows.get(&date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.rows.contains_key(&date)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    fn overlay(&mut self, rows: impl IntoIterator<Item = CanonicalRow>) {
        for row in rows {
            self.rows.insert(row.date, row);
        }
    }

    /// Merge freshly fetched rows over this series.
    ///
    /// A new row replaces the stored row for the same date (last fetched
    /// wins). Merging the same rows twice yields the same series.
    pub fn merge(&self, new_rows: impl IntoIterator<Item = CanonicalRow>) -> SymbolSeries {
        let mut merged = self.clone();
        merged.overlay(new_rows);
        merged
    }

    /// Date ranges inside `[start, end]` that the series does not cover yet.
    ///
    /// The covered span is `[min, max]` of the stored dates within the window;
    /// holes inside that span are weekends and holidays, not gaps. What remains
    /// is at most a leading and a trailing range. Ranges without a single
    /// weekday are dropped since no exchange session can fall in them.
    pub fn missing_ranges(&self, start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
        if start > end {
            return Vec::new();
        }

        let mut covered = self.rows.range(start..=end).map(|(d, _)| *d);
        let min = covered.next();
        let max = covered.next_back().or(min);

        let candidates = match (min, max) {
            (Some(min), Some(max)) => vec![
                (start, min - Duration::days(1)),
                (max + Duration::days(1), end),
            ],
            _ => vec![(start, end)],
        };

        candidates
            .into_iter()
            .filter(|(s, e)| s <= e && has_weekday(*s, *e))
            .collect()
    }
}

fn has_weekday(start: NaiveDate, end: NaiveDate) -> bool {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .take(7)
        .any(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
}

/// A series scoped to one explicit `[start, end]` request.
///
/// Snapshots live in their own directory and never touch the default series.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRangeSnapshot {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub series: SymbolSeries,
}

impl DateRangeSnapshot {
    /// True when every stored date lies inside the requested range.
    pub fn is_within_range(&self) -> bool {
        self.series.dates().all(|d| d >= self.start && d <= self.end)
    }
}
