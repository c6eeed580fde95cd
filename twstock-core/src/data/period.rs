//! Query periods and their decomposition into each exchange's native unit.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unit an exchange endpoint is queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One calendar month per request.
    Monthly,
    /// An explicit date range per request, never crossing a month boundary.
    Range,
}

/// One request's worth of dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodSpec {
    Month { year: i32, month: u32 },
    Range { start: NaiveDate, end: NaiveDate },
}

impl PeriodSpec {
    /// The month containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        PeriodSpec::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First and last calendar day covered by this period.
    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            PeriodSpec::Month { year, month } => {
                let first = first_of_month(year, month);
                (first, last_of_month(first))
            }
            PeriodSpec::Range { start, end } => (start, end),
        }
    }

    /// Split `[start, end]` into periods of the given granularity, in
    /// chronological order.
    pub fn decompose(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> Vec<PeriodSpec> {
        let mut periods = Vec::new();
        if start > end {
            return periods;
        }

        let mut cursor = first_of_month(start.year(), start.month());
        while cursor <= end {
            let month_end = last_of_month(cursor);
            periods.push(match granularity {
                Granularity::Monthly => PeriodSpec::month_of(cursor),
                Granularity::Range => PeriodSpec::Range {
                    start: start.max(cursor),
                    end: end.min(month_end),
                },
            });
            cursor = month_end + Duration::days(1);
        }
        periods
    }

    /// Decompose several disjoint ranges, dropping repeated units so that a
    /// month touched by two ranges is requested once.
    pub fn decompose_all(ranges: &[(NaiveDate, NaiveDate)], granularity: Granularity) -> Vec<PeriodSpec> {
        let mut periods: Vec<PeriodSpec> = Vec::new();
        for &(start, end) in ranges {
            for period in Self::decompose(start, end, granularity) {
                if !periods.contains(&period) {
                    periods.push(period);
                }
            }
        }
        periods
    }
}

impl fmt::Display for PeriodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodSpec::Month { year, month } => write!(f, "{year}-{month:02}"),
            PeriodSpec::Range { start, end } => write!(f, "{start}..{end}"),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn last_of_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    first_of_month(year, month) - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_decomposition_spans_year_boundary() {
        let periods = PeriodSpec::decompose(date(2023, 11, 20), date(2024, 2, 3), Granularity::Monthly);
        assert_eq!(
            periods,
            vec![
                PeriodSpec::Month { year: 2023, month: 11 },
                PeriodSpec::Month { year: 2023, month: 12 },
                PeriodSpec::Month { year: 2024, month: 1 },
                PeriodSpec::Month { year: 2024, month: 2 },
            ]
        );
    }

    #[test]
    fn range_decomposition_clips_to_months() {
        let periods = PeriodSpec::decompose(date(2024, 1, 20), date(2024, 2, 10), Granularity::Range);
        assert_eq!(
            periods,
            vec![
                PeriodSpec::Range { start: date(2024, 1, 20), end: date(2024, 1, 31) },
                PeriodSpec::Range { start: date(2024, 2, 1), end: date(2024, 2, 10) },
            ]
        );
    }

    #[test]
    fn inverted_range_decomposes_to_nothing() {
        assert!(PeriodSpec::decompose(date(2024, 2, 1), date(2024, 1, 1), Granularity::Monthly).is_empty());
    }

    #[test]
    fn month_bounds_handle_leap_february() {
        let (first, last) = PeriodSpec::Month { year: 2024, month: 2 }.bounds();
        assert_eq!(first, date(2024, 2, 1));
        assert_eq!(last, date(2024, 2, 29));
        let (_, dec_last) = PeriodSpec::Month { year: 2023, month: 12 }.bounds();
        assert_eq!(dec_last, date(2023, 12, 31));
    }

    #[test]
    fn decompose_all_requests_shared_month_once() {
        let ranges = [
            (date(2024, 1, 2), date(2024, 1, 5)),
            (date(2024, 1, 25), date(2024, 2, 2)),
        ];
        let periods = PeriodSpec::decompose_all(&ranges, Granularity::Monthly);
        assert_eq!(
            periods,
            vec![
                PeriodSpec::Month { year: 2024, month: 1 },
                PeriodSpec::Month { year: 2024, month: 2 },
            ]
        );
    }
}
