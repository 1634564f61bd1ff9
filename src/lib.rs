//! # gridshape - grid-shape price pattern discovery
//!
//! Searches historical price series for recurring small-grid "shape" patterns,
//! scores their forward predictive power, and replays a trading strategy that
//! fires when live data matches a stored pattern.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridshape::prelude::*;
//!
//! let closes: Vec<f64> = (1..=10).map(f64::from).collect();
//! let grid = encode(&closes, 1, 2).unwrap();
//! assert_eq!(grid.size(), GridSize::new(1, 2));
//!
//! let config = EvolutionConfig { generations: 5, seed: Some(7), ..Default::default() };
//! let candidate = evolve(&grid, &config).unwrap();
//! assert_eq!(candidate.size(), grid.size());
//!
//! assert_eq!(resolve_trends([TrendBehavior::Bullish]), Decision::EnterLong);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod backtest;
pub mod config;
pub mod data;
pub mod grid;
pub mod optimizer;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod validation;

pub mod prelude {
    pub use crate::{
        // Backtest
        backtest::{run_backtest, BacktestConfig, BacktestEngine, BacktestReport, Position, Trade},
        // Configuration
        config::{SystemConfig, TimeframeSpec},
        // Data
        data::{resample, split_at, validate_bars, Timeframe},
        // Grid
        grid::{distance, encode, Grid, GridSize},
        // Optimizer
        optimizer::{evolve, evolve_detailed, Candidate, Evolution, EvolutionConfig},
        // Pipeline
        pipeline::{discover, discover_parallel, Discovery, Pipeline, TimeframeReport},
        // Resolver
        resolver::{resolve, resolve_trends, Decision},
        // Store
        store::{MemoryPatternStore, NewPattern, Pattern, PatternStore, SqlitePatternStore},
        // Validation
        validation::{validate, ForwardPredicate, PatternValidator, ValidationReport, ValidatorConfig},
        // Core
        CancelToken,
        OHLCExt,
        PatternError,
        Period,
        PriceBar,
        Ratio,
        Result,
        TrendBehavior,
        OHLC,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised by encoding, search, validation and the collaborators around them
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} values, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Grid shape mismatch: {left} vs {right}")]
    ShapeMismatch {
        left: grid::GridSize,
        right: grid::GridSize,
    },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("Invalid PIC string: {0}")]
    InvalidPic(String),

    #[error("Pattern store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PatternError {
    /// Data-quality errors that loops recover from by skipping the offending
    /// window, pattern or grid size.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PatternError::InsufficientData { .. }
                | PatternError::InvalidValue(_)
                | PatternError::InvalidBar { .. }
        )
    }
}

impl From<rusqlite::Error> for PatternError {
    fn from(e: rusqlite::Error) -> Self {
        PatternError::Store(e.to_string())
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0 (rates and probabilities)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Count or length that must be > 0 (population size, tournament size)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core price bar trait
pub trait OHLC {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    /// Bar open time in unix seconds
    fn timestamp(&self) -> i64;
}

/// Extension trait with checks shared by the data and search layers
pub trait OHLCExt: OHLC {
    /// Validate bar consistency (finite prices, high >= low)
    fn validate(&self) -> Result<()> {
        if self.open().is_nan() || self.high().is_nan() || self.low().is_nan() || self.close().is_nan()
        {
            return Err(PatternError::InvalidBar {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
        {
            return Err(PatternError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLC> OHLCExt for T {}

/// Plain OHLC bar with a unix-seconds timestamp
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceBar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }
}

impl OHLC for PriceBar {
    #[inline]
    fn open(&self) -> f64 {
        self.open
    }

    #[inline]
    fn high(&self) -> f64 {
        self.high
    }

    #[inline]
    fn low(&self) -> f64 {
        self.low
    }

    #[inline]
    fn close(&self) -> f64 {
        self.close
    }

    #[inline]
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

// ============================================================
// TREND BEHAVIOR
// ============================================================

/// Directional label attached to a validated pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TrendBehavior {
    Bullish,
    Bearish,
    NoTrend,
}

impl TrendBehavior {
    /// Label as persisted by the pattern store
    pub fn as_str(self) -> &'static str {
        match self {
            TrendBehavior::Bullish => "Bullish",
            TrendBehavior::Bearish => "Bearish",
            TrendBehavior::NoTrend => "NoTrend",
        }
    }
}

impl fmt::Display for TrendBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendBehavior {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Bullish" => Ok(TrendBehavior::Bullish),
            "Bearish" => Ok(TrendBehavior::Bearish),
            "NoTrend" => Ok(TrendBehavior::NoTrend),
            _ => Err(PatternError::InvalidValue("unknown trend behavior")),
        }
    }
}

// ============================================================
// CANCELLATION
// ============================================================

/// Cooperative cancellation flag, checked between generations and windows
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once [`CancelToken::cancel`] has been called
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PatternError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ratio_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Ratio>("0.25").is_ok());
        assert!(serde_json::from_str::<Ratio>("1.5").is_err());
        assert!(serde_json::from_str::<Period>("0").is_err());
    }

    #[test]
    fn test_bar_validate() {
        assert!(PriceBar::new(0, 1.0, 2.0, 0.5, 1.5).validate().is_ok());
        assert!(PriceBar::new(0, 1.0, 0.5, 2.0, 1.5).validate().is_err());
        assert!(PriceBar::new(0, f64::NAN, 2.0, 0.5, 1.5).validate().is_err());
        assert!(PriceBar::new(0, 1.0, f64::INFINITY, 0.5, 1.5).validate().is_err());
    }

    #[test]
    fn test_trend_behavior_round_trip() {
        for trend in [TrendBehavior::Bullish, TrendBehavior::Bearish, TrendBehavior::NoTrend] {
            assert_eq!(trend.as_str().parse::<TrendBehavior>().unwrap(), trend);
        }
        assert!("Sideways".parse::<TrendBehavior>().is_err());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(PatternError::Cancelled)));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(PatternError::InsufficientData { need: 4, got: 2 }.is_recoverable());
        assert!(!PatternError::ShapeMismatch {
            left: grid::GridSize::new(2, 2),
            right: grid::GridSize::new(1, 4),
        }
        .is_recoverable());
        assert!(!PatternError::Cancelled.is_recoverable());
    }
}
