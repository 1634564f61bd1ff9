//! Property tests for encoding, similarity, resolution, validation and backtesting.

use gridshape::prelude::*;
use proptest::prelude::*;

fn grid_strategy() -> impl Strategy<Value = Grid> {
    (1usize..5, 1usize..5).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(0.0f64..=1.0, rows * cols)
            .prop_map(move |values| Grid::new(GridSize::new(rows, cols), values).unwrap())
    })
}

fn grid_pair() -> impl Strategy<Value = (Grid, Grid)> {
    (1usize..5, 1usize..5).prop_flat_map(|(rows, cols)| {
        let cells = rows * cols;
        (
            prop::collection::vec(0.0f64..=1.0, cells),
            prop::collection::vec(0.0f64..=1.0, cells),
        )
            .prop_map(move |(a, b)| {
                let size = GridSize::new(rows, cols);
                (Grid::new(size, a).unwrap(), Grid::new(size, b).unwrap())
            })
    })
}

fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| PriceBar::new(i as i64 * 60, c, c + 1.0, c - 1.0, c))
        .collect()
}

fn trend_strategy() -> impl Strategy<Value = TrendBehavior> {
    prop_oneof![
        Just(TrendBehavior::Bullish),
        Just(TrendBehavior::Bearish),
        Just(TrendBehavior::NoTrend),
    ]
}

proptest! {
    #[test]
    fn prop_encoded_values_stay_in_unit_range(
        closes in prop::collection::vec(1.0f64..1000.0, 1..200),
        rows in 1usize..5,
        cols in 1usize..5,
    ) {
        match encode(&closes, rows, cols) {
            Ok(grid) => {
                prop_assert_eq!(grid.values().len(), rows * cols);
                prop_assert!(grid.values().iter().all(|v| (0.0..=1.0).contains(v)));
            }
            Err(PatternError::InsufficientData { .. }) => prop_assert!(closes.len() < rows * cols),
            Err(e) => prop_assert!(false, "unexpected error {e}"),
        }
    }

    #[test]
    fn prop_single_price_cells_hit_both_bounds(
        closes in prop::collection::vec(1.0f64..1000.0, 2..40),
    ) {
        let min = closes.iter().copied().fold(f64::INFINITY, f64::min);
        let max = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assume!(max > min);

        let grid = encode(&closes, 1, closes.len()).unwrap();
        prop_assert!(grid.values().contains(&0.0));
        prop_assert!(grid.values().contains(&1.0));
    }

    #[test]
    fn prop_flat_segment_is_half(price in 0.01f64..1e6, len in 1usize..100, rows in 1usize..4, cols in 1usize..4) {
        prop_assume!(len >= rows * cols);
        let grid = encode(&vec![price; len], rows, cols).unwrap();
        prop_assert!(grid.values().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn prop_self_distance_is_zero(grid in grid_strategy()) {
        prop_assert_eq!(distance(&grid, &grid).unwrap(), 0.0);
    }

    #[test]
    fn prop_distance_is_symmetric_and_non_negative((a, b) in grid_pair()) {
        let ab = distance(&a, &b).unwrap();
        let ba = distance(&b, &a).unwrap();
        prop_assert!(ab >= 0.0);
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn prop_pic_round_trip(grid in grid_strategy()) {
        let restored = Grid::from_pic(&grid.to_pic(), grid.size()).unwrap();
        prop_assert_eq!(restored, grid);
    }

    #[test]
    fn prop_unanimous_trends_resolve(trend in trend_strategy(), n in 1usize..10) {
        let expected = match trend {
            TrendBehavior::Bullish => Decision::EnterLong,
            TrendBehavior::Bearish => Decision::EnterShort,
            TrendBehavior::NoTrend => Decision::NotTrade,
        };
        prop_assert_eq!(resolve_trends(vec![trend; n]), expected);
    }

    #[test]
    fn prop_mixed_trends_conflict(trends in prop::collection::vec(trend_strategy(), 2..10)) {
        prop_assume!(trends.iter().any(|&t| t != trends[0]));
        prop_assert_eq!(resolve_trends(trends), Decision::Conflict);
    }

    #[test]
    fn prop_backtest_without_patterns_keeps_balance(
        closes in prop::collection::vec(1.0f64..1000.0, 0..100),
        balance in 1.0f64..1e6,
        stop in 0.0f64..50.0,
    ) {
        let data = bars_from(&closes);
        prop_assert_eq!(run_backtest(&data, &[], balance, stop).unwrap(), balance);
    }

    #[test]
    fn prop_validation_accuracy_is_a_percentage(
        closes in prop::collection::vec(1.0f64..1000.0, 0..80),
        values in prop::collection::vec(0.0f64..=1.0, 4),
        threshold in 0.0f64..4.0,
    ) {
        let pattern = Grid::new(GridSize::new(1, 4), values).unwrap();
        let config = ValidatorConfig {
            similarity_threshold: threshold,
            ..Default::default()
        };
        let data = bars_from(&closes);
        let accuracy = validate(&pattern, &data, &config).unwrap();
        if closes.len() <= 4 {
            prop_assert_eq!(accuracy, 0.0);
        } else {
            prop_assert!((0.0..=100.0).contains(&accuracy));
        }
    }
}
