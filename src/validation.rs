//! Walk-forward validation of a candidate pattern
//!
//! A window of bars slides over the data one bar at a time. Each window is
//! encoded to the pattern's shape and compared with it; when the distance is
//! within the similarity threshold, the bars that follow are checked against a
//! list of forward predicates ("within `periods` bars the high-low range
//! reaches `min_range`"). The first predicate that holds makes the window a hit.
//! Accuracy is `hits / total_windows * 100`.

use rayon::prelude::*;
use tracing::debug;

use crate::grid::{distance, encode_bars, Grid};
use crate::{CancelToken, PatternError, Period, Result, TrendBehavior, OHLC};

// ============================================================
// CONFIG
// ============================================================

/// "Within `periods` bars, max(high) - min(low) >= `min_range`"
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForwardPredicate {
    pub periods: Period,
    pub min_range: f64,
}

impl ForwardPredicate {
    pub const fn new(periods: usize, min_range: f64) -> Self {
        Self {
            periods: Period::new_const(periods),
            min_range,
        }
    }

    /// `None` when fewer than `periods` bars are available
    fn holds<T: OHLC>(&self, future: &[T]) -> Option<bool> {
        let window = future.get(..self.periods.get())?;
        let (low, high) = window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), b| {
                (lo.min(b.low()), hi.max(b.high()))
            });
        Some(high - low >= self.min_range)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Maximum L1 distance for a window to match the pattern
    pub similarity_threshold: f64,
    /// Checked in order; the first one that holds counts the hit
    pub predicates: Vec<ForwardPredicate>,
    /// Slide-window length in bars; the pattern's column count when unset
    pub segment_bars: Option<Period>,
    /// Bars after a matched window used to classify the trend
    pub trend_horizon: Period,
    /// Mean close change that separates a trend from no trend
    pub trend_min_move: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 60.0,
            predicates: vec![
                ForwardPredicate::new(5, 10.0),
                ForwardPredicate::new(10, 20.0),
                ForwardPredicate::new(20, 30.0),
            ],
            segment_bars: None,
            trend_horizon: Period::new_const(5),
            trend_min_move: 5.0,
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.similarity_threshold.is_finite() || self.similarity_threshold < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "similarity_threshold must be finite and >= 0, got {}",
                self.similarity_threshold
            )));
        }
        if let Some(p) = self.predicates.iter().find(|p| !p.min_range.is_finite()) {
            return Err(PatternError::InvalidConfig(format!(
                "predicate min_range must be finite, got {}",
                p.min_range
            )));
        }
        if !self.trend_min_move.is_finite() || self.trend_min_move < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "trend_min_move must be finite and >= 0, got {}",
                self.trend_min_move
            )));
        }
        Ok(())
    }
}

// ============================================================
// REPORT
// ============================================================

/// Result of validating one pattern
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ValidationReport {
    /// Percentage in [0, 100]
    pub accuracy: f64,
    pub hits: usize,
    /// Windows within the similarity threshold
    pub matches: usize,
    /// Windows that could not be encoded (still counted in `total_windows`)
    pub skipped: usize,
    pub total_windows: usize,
    pub trend: TrendBehavior,
}

/// Per-window counts, summed across the parallel scan
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    hits: usize,
    matches: usize,
    skipped: usize,
    move_sum: f64,
    move_count: usize,
}

impl Tally {
    fn merge(self, other: Tally) -> Tally {
        Tally {
            hits: self.hits + other.hits,
            matches: self.matches + other.matches,
            skipped: self.skipped + other.skipped,
            move_sum: self.move_sum + other.move_sum,
            move_count: self.move_count + other.move_count,
        }
    }
}

// ============================================================
// VALIDATOR
// ============================================================

#[derive(Debug, Clone)]
pub struct PatternValidator {
    config: ValidatorConfig,
}

impl PatternValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Slide-window length used for `pattern`
    pub fn window_len(&self, pattern: &Grid) -> usize {
        self.config
            .segment_bars
            .map_or(pattern.cols(), Period::get)
    }

    /// Percentage accuracy of `pattern` over `data`; 0 when the data is no
    /// longer than one window.
    pub fn validate<T: OHLC + Sync>(&self, pattern: &Grid, data: &[T]) -> Result<f64> {
        self.validate_detailed(pattern, data, &CancelToken::new())
            .map(|r| r.accuracy)
    }

    pub fn validate_detailed<T: OHLC + Sync>(
        &self,
        pattern: &Grid,
        data: &[T],
        cancel: &CancelToken,
    ) -> Result<ValidationReport> {
        let w = self.window_len(pattern);
        let total_windows = data.len().saturating_sub(w);
        if total_windows == 0 {
            return Ok(ValidationReport {
                accuracy: 0.0,
                hits: 0,
                matches: 0,
                skipped: 0,
                total_windows: 0,
                trend: TrendBehavior::NoTrend,
            });
        }

        let tally = (0..total_windows)
            .into_par_iter()
            .map(|i| self.score_window(pattern, data, i, w, cancel))
            .try_reduce(Tally::default, |a, b| Ok(a.merge(b)))?;

        let accuracy = tally.hits as f64 / total_windows as f64 * 100.0;
        let trend = self.classify(&tally);
        debug!(
            size = %pattern.size(),
            total_windows,
            matches = tally.matches,
            hits = tally.hits,
            skipped = tally.skipped,
            accuracy,
            "pattern validated"
        );

        Ok(ValidationReport {
            accuracy,
            hits: tally.hits,
            matches: tally.matches,
            skipped: tally.skipped,
            total_windows,
            trend,
        })
    }

    fn score_window<T: OHLC>(
        &self,
        pattern: &Grid,
        data: &[T],
        start: usize,
        w: usize,
        cancel: &CancelToken,
    ) -> Result<Tally> {
        cancel.check()?;

        let segment = &data[start..start + w];
        let grid = match encode_bars(segment, pattern.size()) {
            Ok(g) => g,
            Err(e) if e.is_recoverable() => {
                return Ok(Tally {
                    skipped: 1,
                    ..Tally::default()
                })
            }
            Err(e) => return Err(e),
        };

        if distance(&grid, pattern)? > self.config.similarity_threshold {
            return Ok(Tally::default());
        }

        let future = &data[start + w..];
        let hit = self
            .config
            .predicates
            .iter()
            .filter_map(|p| p.holds(future))
            .any(|held| held);

        let mut tally = Tally {
            hits: usize::from(hit),
            matches: 1,
            ..Tally::default()
        };

        let horizon = self.config.trend_horizon.get();
        if let (Some(after), Some(last)) = (future.get(horizon - 1), segment.last()) {
            let delta = after.close() - last.close();
            if delta.is_finite() {
                tally.move_sum = delta;
                tally.move_count = 1;
            }
        }

        Ok(tally)
    }

    fn classify(&self, tally: &Tally) -> TrendBehavior {
        if tally.move_count == 0 {
            return TrendBehavior::NoTrend;
        }
        let mean = tally.move_sum / tally.move_count as f64;
        match mean {
            m if m > self.config.trend_min_move => TrendBehavior::Bullish,
            m if m < -self.config.trend_min_move => TrendBehavior::Bearish,
            _ => TrendBehavior::NoTrend,
        }
    }
}

/// Percentage accuracy of `pattern` over `data` using `config`
pub fn validate<T: OHLC + Sync>(pattern: &Grid, data: &[T], config: &ValidatorConfig) -> Result<f64> {
    PatternValidator::new(config.clone())?.validate(pattern, data)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{encode, GridSize};
    use crate::PriceBar;

    /// Closes follow `f(i)`, high/low half a unit either side
    fn bars(n: usize, f: impl Fn(usize) -> f64) -> Vec<PriceBar> {
        (0..n)
            .map(|i| {
                let c = f(i);
                PriceBar::new(i as i64 * 60, c, c + 0.5, c - 0.5, c)
            })
            .collect()
    }

    fn rising_pattern() -> Grid {
        encode(&[1.0, 2.0, 3.0, 4.0], 1, 4).unwrap()
    }

    fn config(predicates: Vec<ForwardPredicate>) -> ValidatorConfig {
        ValidatorConfig {
            similarity_threshold: 0.01,
            predicates,
            trend_horizon: Period::new(2).unwrap(),
            trend_min_move: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_too_little_data_scores_zero() {
        let data = bars(4, |i| i as f64);
        assert_eq!(validate(&rising_pattern(), &data, &ValidatorConfig::default()).unwrap(), 0.0);
        assert_eq!(validate(&rising_pattern(), &data[..2], &ValidatorConfig::default()).unwrap(), 0.0);
    }

    #[test]
    fn test_hits_and_end_of_data_skip() {
        // every window is a perfect ramp; the last window has one future bar
        let data = bars(24, |i| i as f64);
        let validator = PatternValidator::new(config(vec![ForwardPredicate::new(2, 1.5)])).unwrap();
        let report = validator
            .validate_detailed(&rising_pattern(), &data, &CancelToken::new())
            .unwrap();

        assert_eq!(report.total_windows, 20);
        assert_eq!(report.matches, 20);
        assert_eq!(report.hits, 19);
        assert!((report.accuracy - 95.0).abs() < 1e-9);
        assert_eq!(report.trend, TrendBehavior::Bullish);
    }

    #[test]
    fn test_later_predicate_used_when_first_fails() {
        let data = bars(24, |i| i as f64);
        let predicates = vec![ForwardPredicate::new(2, 100.0), ForwardPredicate::new(3, 2.5)];
        let accuracy = validate(&rising_pattern(), &data, &config(predicates)).unwrap();
        assert!((accuracy - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_matching_windows_count_toward_total() {
        let data = bars(24, |i| 100.0 - i as f64);
        let validator = PatternValidator::new(config(vec![ForwardPredicate::new(2, 0.0)])).unwrap();
        let report = validator
            .validate_detailed(&rising_pattern(), &data, &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_windows, 20);
        assert_eq!(report.matches, 0);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.trend, TrendBehavior::NoTrend);
    }

    #[test]
    fn test_bearish_trend() {
        let falling = encode(&[4.0, 3.0, 2.0, 1.0], 1, 4).unwrap();
        let data = bars(24, |i| 100.0 - i as f64);
        let validator = PatternValidator::new(config(vec![ForwardPredicate::new(2, 1.5)])).unwrap();
        let report = validator
            .validate_detailed(&falling, &data, &CancelToken::new())
            .unwrap();
        assert_eq!(report.matches, 20);
        assert_eq!(report.trend, TrendBehavior::Bearish);
    }

    #[test]
    fn test_unencodable_windows_are_skipped() {
        // default window length is the column count: 2 bars cannot fill 4 cells
        let pattern = Grid::new(GridSize::new(2, 2), vec![0.0, 0.3, 0.6, 1.0]).unwrap();
        let data = bars(30, |i| i as f64);
        let validator = PatternValidator::new(ValidatorConfig::default()).unwrap();
        let report = validator
            .validate_detailed(&pattern, &data, &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_windows, 28);
        assert_eq!(report.skipped, 28);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn test_segment_override() {
        let data = bars(40, |i| i as f64);
        let ramp: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let pattern = encode(&ramp, 2, 2).unwrap();
        let cfg = ValidatorConfig {
            segment_bars: Some(Period::new(8).unwrap()),
            ..config(vec![ForwardPredicate::new(2, 1.5)])
        };
        let validator = PatternValidator::new(cfg).unwrap();
        assert_eq!(validator.window_len(&pattern), 8);

        let report = validator
            .validate_detailed(&pattern, &data, &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_windows, 32);
        assert_eq!(report.matches, 32);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_nan_window_is_skipped() {
        let mut data = bars(24, |i| i as f64);
        data[10].close = f64::NAN;
        let validator = PatternValidator::new(config(vec![ForwardPredicate::new(2, 1.5)])).unwrap();
        let report = validator
            .validate_detailed(&rising_pattern(), &data, &CancelToken::new())
            .unwrap();
        // windows starting at 7..=10 contain the NaN bar
        assert_eq!(report.skipped, 4);
        assert!((0.0..=100.0).contains(&report.accuracy));
    }

    #[test]
    fn test_cancelled_validation() {
        let data = bars(24, |i| i as f64);
        let cancel = CancelToken::new();
        cancel.cancel();
        let validator = PatternValidator::new(ValidatorConfig::default()).unwrap();
        assert!(matches!(
            validator.validate_detailed(&rising_pattern(), &data, &cancel),
            Err(PatternError::Cancelled)
        ));
    }

    #[test]
    fn test_invalid_config() {
        let cfg = ValidatorConfig {
            similarity_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(PatternValidator::new(cfg).is_err());
    }
}
