//! End-to-end tests: discovery, persistence, resolution and backtesting.

use gridshape::prelude::*;

const BAR_SECS: i64 = 300;

/// Steady uptrend with a two-point high-low range on every bar
fn uptrend(n: usize) -> Vec<PriceBar> {
    (0..n)
        .map(|i| {
            let c = 100.0 + i as f64 * 0.5;
            PriceBar::new(i as i64 * BAR_SECS, c - 0.2, c + 1.0, c - 1.0, c)
        })
        .collect()
}

/// Small, seeded configuration where every window matches and every
/// forward predicate with two bars of data holds.
fn test_config() -> SystemConfig {
    let toml = format!(
        r#"
        grid_sizes = ["1x4", "20x15"]
        similarity_threshold = 4.0
        prediction_accuracy_threshold = 60.0
        validation_start = {start}

        [[timeframes]]
        code = "5T"
        label = "5-Minute"

        [evolution]
        population_size = 20
        generations = 5
        seed = 11

        [validation]
        segment_bars = 8
        trend_horizon = 5
        trend_min_move = 1.0
        predicates = [{{ periods = 2, min_range = 1.0 }}]

        [backtest]
        segment_bars = 8
        "#,
        start = 200 * BAR_SECS
    );
    SystemConfig::from_toml_str(&toml).unwrap()
}

#[test]
fn test_ramp_encodes_window_means() {
    let closes: Vec<f64> = (1..=10).map(f64::from).collect();
    let grid = encode(&closes, 1, 2).unwrap();
    assert!((grid.values()[0] - 2.0 / 9.0).abs() < 1e-9);
    assert!((grid.values()[1] - 7.0 / 9.0).abs() < 1e-9);
}

#[test]
fn test_offset_grids_distance() {
    let a = Grid::new(GridSize::new(2, 2), vec![0.1, 0.2, 0.3, 0.4]).unwrap();
    let b = Grid::new(GridSize::new(2, 2), vec![0.35, 0.45, 0.55, 0.65]).unwrap();
    assert_eq!(distance(&a, &a).unwrap(), 0.0);
    assert!((distance(&a, &b).unwrap() - 4.0 * 0.25).abs() < 1e-9);
}

#[test]
fn test_timeframe_run_stores_and_backtests() {
    let config = test_config();
    let spec = config.timeframes[0].clone();
    let mut pipeline = Pipeline::new(config, MemoryPatternStore::new()).unwrap();

    let bars = uptrend(300);
    let report = pipeline.run_timeframe(&bars, &spec).unwrap();

    assert_eq!(report.train_bars, 200);
    assert_eq!(report.validation_bars, 100);
    // 20x15 needs 300 training bars and is skipped
    assert_eq!(report.discoveries.len(), 1);
    assert!(report.failures.is_empty());

    let discovery = &report.discoveries[0];
    assert_eq!(discovery.size, GridSize::new(1, 4));
    assert_eq!(discovery.report.total_windows, 192);
    assert_eq!(discovery.report.hits, 191);
    assert_eq!(discovery.report.trend, TrendBehavior::Bullish);

    assert_eq!(report.inserted, vec![1]);
    assert_eq!(report.patterns, 1);
    assert_eq!(report.decision, Some(Decision::EnterLong));

    let backtest = report.backtest.unwrap();
    assert_eq!(backtest.steps, 92);
    assert!(backtest.trades.is_empty());
    assert_eq!(backtest.final_balance, 10_000.0);
    assert_eq!(backtest.open_position.map(|p| p.side), Some(Position::Long));

    let stored = pipeline.store().query(GridSize::new(1, 4), "5-Minute").unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].forecasting_power);
    assert_eq!(stored[0].grid, discovery.grid);
}

#[test]
fn test_conflicting_store_skips_backtest() {
    let config = test_config();
    let spec = config.timeframes[0].clone();

    let mut store = SqlitePatternStore::open_in_memory().unwrap();
    store
        .insert(&NewPattern {
            timeframe: "5-Minute".into(),
            grid: Grid::new(GridSize::new(1, 4), vec![1.0, 0.6, 0.3, 0.0]).unwrap(),
            prediction_accuracy: 65.0,
            forecasting_power: true,
            trend_behavior: TrendBehavior::Bearish,
        })
        .unwrap();

    let mut pipeline = Pipeline::new(config, store).unwrap();
    let report = pipeline.run_timeframe(&uptrend(300), &spec).unwrap();

    assert_eq!(report.inserted, vec![2]);
    assert_eq!(report.patterns, 2);
    assert_eq!(report.decision, Some(Decision::Conflict));
    assert!(report.backtest.is_none());
}

#[test]
fn test_no_patterns_skips_backtest() {
    let mut config = test_config();
    config.prediction_accuracy_threshold = 100.0;
    let spec = config.timeframes[0].clone();
    let mut pipeline = Pipeline::new(config, MemoryPatternStore::new()).unwrap();

    let report = pipeline.run_timeframe(&uptrend(300), &spec).unwrap();
    assert!(report.inserted.is_empty());
    assert_eq!(report.patterns, 0);
    assert!(report.decision.is_none());
    assert!(report.backtest.is_none());
}

#[test]
fn test_full_run_resamples_minute_bars() {
    let config = test_config();
    let mut pipeline = Pipeline::new(config, MemoryPatternStore::new()).unwrap();

    // five one-minute bars per five-minute bucket
    let raw: Vec<PriceBar> = uptrend(300)
        .iter()
        .flat_map(|b| {
            (0..5).map(move |k| PriceBar::new(b.timestamp + k * 60, b.open, b.high, b.low, b.close))
        })
        .collect();

    let reports = pipeline.run(&raw).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].label, "5-Minute");
    assert_eq!(reports[0].train_bars, 200);
    assert_eq!(reports[0].validation_bars, 100);
    assert_eq!(pipeline.into_store().len(), 1);
}

#[test]
fn test_run_rejects_bad_bars() {
    let mut pipeline = Pipeline::new(test_config(), MemoryPatternStore::new()).unwrap();
    let mut raw = uptrend(50);
    raw[10].high = raw[10].low - 1.0;
    assert!(matches!(
        pipeline.run(&raw),
        Err(PatternError::InvalidBar { index: 10, .. })
    ));
}

#[test]
fn test_cancelled_pipeline() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let config = test_config();
    let spec = config.timeframes[0].clone();
    let mut pipeline = Pipeline::new(config, MemoryPatternStore::new())
        .unwrap()
        .with_cancel(cancel);
    assert!(matches!(
        pipeline.run_timeframe(&uptrend(300), &spec),
        Err(PatternError::Cancelled)
    ));
}
