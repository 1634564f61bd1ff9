//! Discovery run: encode → evolve → validate → persist → resolve → backtest
//!
//! One discovery unit is a (timeframe, grid size) pair. Units of one timeframe
//! run in parallel; inserts into the pattern store happen afterwards on the
//! calling thread, in grid-size order.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::backtest::{BacktestEngine, BacktestReport};
use crate::config::{SystemConfig, TimeframeSpec};
use crate::data::{resample, split_at, validate_bars};
use crate::grid::{encode_bars, Grid, GridSize};
use crate::optimizer::evolve_detailed;
use crate::resolver::{resolve, Decision};
use crate::store::{NewPattern, PatternStore};
use crate::validation::{PatternValidator, ValidationReport};
use crate::{CancelToken, PatternError, Result, OHLC};

// ============================================================
// DISCOVERY
// ============================================================

/// Best evolved grid for one grid size and its validation outcome
#[derive(Debug, Clone)]
pub struct Discovery {
    pub size: GridSize,
    pub grid: Grid,
    pub fitness: f64,
    pub report: ValidationReport,
}

/// Error from one discovery unit
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub size: GridSize,
    pub error: PatternError,
}

/// Run one discovery unit over the training bars. A training set too short
/// for `size` is skipped with `Ok(None)`.
pub fn discover<T: OHLC + Sync>(
    train: &[T],
    size: GridSize,
    config: &SystemConfig,
    cancel: &CancelToken,
) -> Result<Option<Discovery>> {
    let target = match encode_bars(train, size) {
        Ok(grid) => grid,
        Err(e) if e.is_recoverable() => {
            warn!(%size, bars = train.len(), error = %e, "skipping grid size");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let evolution = evolve_detailed(&target, &config.evolution, cancel)?;
    let validator = PatternValidator::new(config.validation.clone())?;
    let report = validator.validate_detailed(&evolution.best, train, cancel)?;

    info!(
        %size,
        fitness = evolution.best_fitness,
        accuracy = report.accuracy,
        trend = %report.trend,
        "discovery finished"
    );

    Ok(Some(Discovery {
        size,
        grid: evolution.best,
        fitness: evolution.best_fitness,
        report,
    }))
}

/// Run every grid size in parallel, separating discoveries from failed units.
/// Skipped sizes appear in neither list. Discoveries keep the order of `sizes`.
pub fn discover_parallel<T: OHLC + Sync>(
    train: &[T],
    sizes: &[GridSize],
    config: &SystemConfig,
    cancel: &CancelToken,
) -> (Vec<Discovery>, Vec<DiscoveryError>) {
    let results: Vec<_> = sizes
        .par_iter()
        .map(|&size| {
            discover(train, size, config, cancel).map_err(|error| DiscoveryError { size, error })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(Some(d)) => successes.push(d),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// PIPELINE
// ============================================================

/// Outcome of one timeframe
#[derive(Debug, Clone)]
pub struct TimeframeReport {
    pub label: String,
    pub train_bars: usize,
    pub validation_bars: usize,
    pub discoveries: Vec<Discovery>,
    pub failures: Vec<DiscoveryError>,
    /// Ids of the patterns stored by this run
    pub inserted: Vec<i64>,
    /// Stored patterns for this timeframe across all configured sizes
    pub patterns: usize,
    /// `None` when no patterns are stored for the timeframe
    pub decision: Option<Decision>,
    /// `None` when there are no patterns or the decision is a conflict
    pub backtest: Option<BacktestReport>,
}

pub struct Pipeline<S> {
    config: SystemConfig,
    store: S,
    cancel: CancelToken,
}

impl<S: PatternStore> Pipeline<S> {
    pub fn new(config: SystemConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Validate the raw bars, then resample and run every configured timeframe
    pub fn run<T: OHLC>(&mut self, raw: &[T]) -> Result<Vec<TimeframeReport>> {
        validate_bars(raw)?;
        info!(bars = raw.len(), timeframes = self.config.timeframes.len(), "starting run");

        let timeframes = self.config.timeframes.clone();
        let mut reports = Vec::with_capacity(timeframes.len());
        for spec in &timeframes {
            let bars = resample(raw, spec.code);
            reports.push(self.run_timeframe(&bars, spec)?);
        }
        Ok(reports)
    }

    /// Run one timeframe over bars already sampled at that timeframe
    pub fn run_timeframe<T: OHLC + Sync>(
        &mut self,
        bars: &[T],
        spec: &TimeframeSpec,
    ) -> Result<TimeframeReport> {
        self.cancel.check()?;
        let label = spec.label.as_str();
        let (train, validation) = split_at(bars, self.config.validation_start);
        info!(
            timeframe = label,
            train = train.len(),
            validation = validation.len(),
            "processing timeframe"
        );

        let (discoveries, failures) =
            discover_parallel(train, &self.config.grid_sizes, &self.config, &self.cancel);
        for failure in &failures {
            if matches!(failure.error, PatternError::Cancelled) {
                return Err(PatternError::Cancelled);
            }
            warn!(timeframe = label, size = %failure.size, error = %failure.error, "discovery failed");
        }

        let mut inserted = Vec::new();
        for d in &discoveries {
            if d.report.accuracy < self.config.prediction_accuracy_threshold {
                continue;
            }
            let id = self.store.insert(&NewPattern {
                timeframe: label.to_string(),
                grid: d.grid.clone(),
                prediction_accuracy: d.report.accuracy,
                forecasting_power: true,
                trend_behavior: d.report.trend,
            })?;
            info!(timeframe = label, size = %d.size, id, accuracy = d.report.accuracy, "pattern stored");
            inserted.push(id);
        }

        let patterns = self.store.query_sizes(&self.config.grid_sizes, label)?;
        let mut report = TimeframeReport {
            label: label.to_string(),
            train_bars: train.len(),
            validation_bars: validation.len(),
            discoveries,
            failures,
            inserted,
            patterns: patterns.len(),
            decision: None,
            backtest: None,
        };

        if patterns.is_empty() {
            warn!(timeframe = label, "no validated patterns, skipping backtest");
            return Ok(report);
        }

        let decision = resolve(&patterns);
        report.decision = Some(decision);
        info!(timeframe = label, %decision, patterns = patterns.len(), "resolved decision");

        if decision == Decision::Conflict {
            warn!(timeframe = label, "conflicting patterns, no trades executed");
            return Ok(report);
        }

        let engine = BacktestEngine::new(self.config.backtest.clone())?;
        let backtest = engine.run_detailed(validation, &patterns, &self.cancel)?;
        info!(timeframe = label, final_balance = backtest.final_balance, "backtest complete");
        report.backtest = Some(backtest);
        Ok(report)
    }
}

// ============================================================
// TESTS
// ============================================================
