//! Pure projection of a `BacktestResult` into chart-ready data.

use crate::models::{
    AxisBounds, BacktestResult, ProjectedRecord, ProjectedTrade, Projection, TradeSide,
};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

/// Share of the value range added above and below the extremes.
pub const AXIS_PADDING_RATIO: f64 = 0.05;

/// In-sample share of the series, as a fraction `numerator / denominator`.
const SPLIT_NUMERATOR: usize = 7;
const SPLIT_DENOMINATOR: usize = 10;

/// Records are expected in ascending date order; that is not checked.
pub fn project(result: &BacktestResult, highlights: &BTreeSet<NaiveDate>) -> Projection {
    let records: Vec<ProjectedRecord> = result
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| ProjectedRecord {
            index,
            record: record.clone(),
        })
        .collect();

    let bounds = axis_bounds(result);

    let index_by_date: HashMap<NaiveDate, usize> = records
        .iter()
        .map(|projected| (projected.record.date, projected.index))
        .collect();

    let mut buys = Vec::new();
    let mut sells = Vec::new();
    let mut highlighted = Vec::new();
    for event in &result.trades {
        let Some(&index) = index_by_date.get(&event.date) else {
            continue;
        };
        let trade = ProjectedTrade {
            index,
            date: event.date,
            side: event.side,
            price: event.price,
            reason: event.reason.clone(),
        };
        if highlights.contains(&event.date) {
            highlighted.push(trade.clone());
        }
        match event.side {
            TradeSide::Buy => buys.push(trade),
            TradeSide::Sell => sells.push(trade),
        }
    }

    Projection {
        split_index: split_index(records.len()),
        records,
        bounds,
        buys,
        sells,
        highlighted,
    }
}

/// floor(0.7 * n), computed in integers.
pub fn split_index(record_count: usize) -> usize {
    record_count * SPLIT_NUMERATOR / SPLIT_DENOMINATOR
}

fn axis_bounds(result: &BacktestResult) -> Option<AxisBounds> {
    let mut values = result.records.iter().flat_map(|record| record.axis_values());
    let first = values.next()?;
    let (min, max) = values.fold((first, first), |(min, max), value| {
        (min.min(value), max.max(value))
    });

    let padding = (max - min) * AXIS_PADDING_RATIO;
    Some(AxisBounds {
        min: (min - padding).max(0.0),
        max: max + padding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacktestMetrics, PeriodRecord, TradeEvent};
    use std::collections::BTreeMap;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn record(offset: i64, close: f64) -> PeriodRecord {
        PeriodRecord {
            date: day(offset),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: Some(1_000.0),
            signal: None,
            indicators: BTreeMap::new(),
        }
    }

    fn trade(offset: i64, side: TradeSide, price: f64) -> TradeEvent {
        TradeEvent {
            date: day(offset),
            side,
            price,
            reason: "Signal Triggered".to_string(),
        }
    }

    fn result_with(records: usize, trades: Vec<TradeEvent>) -> BacktestResult {
        BacktestResult {
            records: (0..records as i64)
                .map(|offset| record(offset, 100.0 + offset as f64))
                .collect(),
            trades,
            metrics: BacktestMetrics::default(),
        }
    }

    #[test]
    fn indices_follow_input_order() {
        let projection = project(&result_with(25, Vec::new()), &BTreeSet::new());
        let indices: Vec<usize> = projection.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..25).collect::<Vec<_>>());
        assert_eq!(projection.records[3].record.date, day(3));
    }

    #[test]
    fn split_index_is_seventy_percent_floor() {
        assert_eq!(split_index(10), 7);
        assert_eq!(split_index(0), 0);
        assert_eq!(split_index(1), 0);
        assert_eq!(split_index(3), 2);
        assert_eq!(split_index(99), 69);
        for n in 1..500 {
            assert!(split_index(n) <= n - 1);
        }
    }

    #[test]
    fn empty_result_projects_to_empty_series() {
        let projection = project(&result_with(0, Vec::new()), &BTreeSet::new());
        assert!(projection.records.is_empty());
        assert_eq!(projection.split_index, 0);
        assert!(projection.bounds.is_none());
    }

    #[test]
    fn unmatched_trade_dates_are_dropped() {
        let trades = vec![
            trade(2, TradeSide::Buy, 102.0),
            trade(6, TradeSide::Sell, 106.5),
            trade(40, TradeSide::Sell, 140.0),
        ];
        let projection = project(&result_with(10, trades), &BTreeSet::new());
        assert_eq!(projection.buys.len() + projection.sells.len(), 2);
        assert_eq!(projection.buys[0].index, 2);
        assert_eq!(projection.sells[0].index, 6);
        assert_eq!(projection.sells[0].price, 106.5);
    }

    #[test]
    fn bounds_include_indicators_and_padding() {
        let mut result = result_with(2, Vec::new());
        result.records[1]
            .indicators
            .insert("upperBand".to_string(), 120.0);

        let bounds = project(&result, &BTreeSet::new()).bounds.unwrap();
        // Values span 99..=120, so padding is 1.05 on each side.
        assert!((bounds.min - 97.95).abs() < 1e-9);
        assert!((bounds.max - 121.05).abs() < 1e-9);
    }

    #[test]
    fn lower_bound_is_floored_at_zero() {
        let mut result = result_with(2, Vec::new());
        result.records[0].low = 0.5;
        result.records[1].indicators.insert("macd".to_string(), 300.0);

        let bounds = project(&result, &BTreeSet::new()).bounds.unwrap();
        assert_eq!(bounds.min, 0.0);
    }

    #[test]
    fn highlighted_subset_only_contains_matched_events() {
        let trades = vec![
            trade(1, TradeSide::Buy, 101.0),
            trade(4, TradeSide::Sell, 104.0),
            trade(30, TradeSide::Buy, 130.0),
        ];
        let highlights: BTreeSet<NaiveDate> = [day(4), day(30), day(7)].into_iter().collect();

        let projection = project(&result_with(10, trades), &highlights);
        assert_eq!(projection.highlighted.len(), 1);
        assert_eq!(projection.highlighted[0].date, day(4));
        assert_eq!(projection.highlighted[0].side, TradeSide::Sell);
    }

    #[test]
    fn projection_is_repeatable() {
        let trades = vec![trade(1, TradeSide::Buy, 101.0), trade(5, TradeSide::Sell, 105.0)];
        let result = result_with(12, trades);
        let highlights: BTreeSet<NaiveDate> = [day(5)].into_iter().collect();

        let first = project(&result, &highlights);
        let second = project(&result, &highlights);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
