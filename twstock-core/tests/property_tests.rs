//! Property tests for the merge-by-date rule and date conversion.
//!
//! 1. Merging the same rows twice equals merging them once
//! 2. The last merged value for a date wins, without duplicates
//! 3. Merged series stay strictly ascending
//! 4. ROC dates convert back and forth

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use twstock_core::data::formatter::{parse_exchange_date, to_roc_date};
use twstock_core::domain::{CanonicalRow, Quote, SymbolSeries};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (0i64..2000).prop_map(|offset| NaiveDate::from_ymd_opt(2015, 1, 1).unwrap() + Duration::days(offset))
}

fn arb_quote() -> impl Strategy<Value = Quote> {
    prop_oneof![
        9 => (1.0..2000.0_f64).prop_map(|p| Quote::Price((p * 100.0).round() / 100.0)),
        1 => Just(Quote::NoTrade),
    ]
}

fn arb_row() -> impl Strategy<Value = CanonicalRow> {
    (arb_date(), arb_quote(), 0u64..10_000_000).prop_map(|(date, close, volume)| CanonicalRow {
        date,
        open: close,
        high: close,
        low: close,
        close,
        volume,
        turnover: None,
        change: None,
        transactions: Some(volume / 100),
    })
}

fn arb_rows() -> impl Strategy<Value = Vec<CanonicalRow>> {
    prop::collection::vec(arb_row(), 0..60)
}

// ── Merge ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_is_idempotent(existing in arb_rows(), new_rows in arb_rows()) {
        let series = SymbolSeries::from_rows("2330", existing);
        let once = series.merge(new_rows.clone());
        let twice = once.merge(new_rows);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn last_write_wins(existing in arb_rows(), date in arb_date(), first in 1.0..500.0_f64, second in 500.0..1000.0_f64) {
        let row = |close: f64| CanonicalRow {
            date,
            open: Quote::Price(close),
            high: Quote::Price(close),
            low: Quote::Price(close),
            close: Quote::Price(close),
            volume: 1,
            turnover: None,
            change: None,
            transactions: None,
        };

        let series = SymbolSeries::from_rows("2330", existing);
        let result = series.merge(vec![row(first)]).merge(vec![row(second)]);

        prop_assert_eq!(result.get(date).map(|r| r.close), Some(Quote::Price(second)));
        prop_assert_eq!(result.dates().filter(|d| *d == date).count(), 1);
    }

    #[test]
    fn merged_series_is_strictly_ascending(existing in arb_rows(), new_rows in arb_rows()) {
        let merged = SymbolSeries::from_rows("2330", existing).merge(new_rows);
        let dates: Vec<_> = merged.dates().collect();
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn merge_keeps_every_date(existing in arb_rows(), new_rows in arb_rows()) {
        let series = SymbolSeries::from_rows("2330", existing.clone());
        let merged = series.merge(new_rows.clone());
        for row in existing.iter().chain(new_rows.iter()) {
            prop_assert!(merged.contains(row.date));
        }
    }
}

// ── Dates ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn roc_date_round_trips(date in arb_date()) {
        prop_assert_eq!(parse_exchange_date(&to_roc_date(date)), Some(date));
    }
}
