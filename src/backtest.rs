//! Sequential replay of a pattern-driven strategy
//!
//! At every step the current window is encoded once per stored pattern and
//! compared with it; the trend labels of the matching patterns go through the
//! resolver and the resulting decision drives a `Flat / Long / Short` state
//! machine with a fixed stop distance. Only realized P&L reaches the balance.

use tracing::{debug, info};

use crate::grid::{distance, encode_bars};
use crate::resolver::{resolve_trends, Decision};
use crate::store::Pattern;
use crate::{CancelToken, PatternError, Period, Result, OHLC};

// ============================================================
// CONFIG
// ============================================================

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Maximum L1 distance for a pattern to fire on a window
    pub similarity_threshold: f64,
    pub initial_balance: f64,
    /// Stop level offset from the entry price, in price units (pips)
    pub stop_distance: f64,
    /// Window length in bars; the first pattern's row count when unset
    pub segment_bars: Option<Period>,
    /// Close the open position at the current close (realizing its P&L) before
    /// entering the opposite side. When off, the new position replaces the old
    /// one and nothing is realized.
    pub realize_on_reversal: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 60.0,
            initial_balance: 10_000.0,
            stop_distance: 10.0,
            segment_bars: None,
            realize_on_reversal: false,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.similarity_threshold.is_finite() || self.similarity_threshold < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "similarity_threshold must be finite and >= 0, got {}",
                self.similarity_threshold
            )));
        }
        if !self.initial_balance.is_finite() {
            return Err(PatternError::InvalidConfig(format!(
                "initial_balance must be finite, got {}",
                self.initial_balance
            )));
        }
        if !self.stop_distance.is_finite() || self.stop_distance < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "stop_distance must be finite and >= 0, got {}",
                self.stop_distance
            )));
        }
        Ok(())
    }
}

// ============================================================
// STATE
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Position {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ExitReason {
    StopLoss,
    /// Closed to enter the opposite side (`realize_on_reversal` only)
    Reversal,
}

/// The single open position of a run
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct OpenPosition {
    /// `Long` or `Short`
    pub side: Position,
    pub entry_price: f64,
    pub stop_level: f64,
    pub entry_ts: i64,
}

/// A completed trade
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Trade {
    pub side: Position,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub exit_reason: ExitReason,
}

/// Mutable state of one run; created at start, dropped at the end
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestState {
    pub balance: f64,
    pub open: Option<OpenPosition>,
}

impl BacktestState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            open: None,
        }
    }

    pub fn position(&self) -> Position {
        self.open.map_or(Position::Flat, |p| p.side)
    }

    fn enter(
        &mut self,
        side: Position,
        price: f64,
        ts: i64,
        config: &BacktestConfig,
        trades: &mut Vec<Trade>,
    ) {
        if let Some(open) = self.open {
            if config.realize_on_reversal {
                self.close(open, price, ts, ExitReason::Reversal, trades);
            } else {
                debug!(side = ?open.side, entry = open.entry_price, "position replaced");
            }
        }
        let stop_distance = config.stop_distance;
        let stop_level = match side {
            Position::Short => price + stop_distance,
            _ => price - stop_distance,
        };
        debug!(?side, entry = price, stop = stop_level, ts, "position opened");
        self.open = Some(OpenPosition {
            side,
            entry_price: price,
            stop_level,
            entry_ts: ts,
        });
    }

    fn check_stop(&mut self, price: f64, ts: i64, trades: &mut Vec<Trade>) {
        let Some(open) = self.open else { return };
        let hit = match open.side {
            Position::Long => price < open.stop_level,
            Position::Short => price > open.stop_level,
            Position::Flat => false,
        };
        if hit {
            self.close(open, price, ts, ExitReason::StopLoss, trades);
        }
    }

    fn close(&mut self, open: OpenPosition, price: f64, ts: i64, reason: ExitReason, trades: &mut Vec<Trade>) {
        let pnl = match open.side {
            Position::Short => open.entry_price - price,
            _ => price - open.entry_price,
        };
        self.balance += pnl;
        self.open = None;
        debug!(side = ?open.side, exit = price, pnl, ?reason, balance = self.balance, "position closed");
        trades.push(Trade {
            side: open.side,
            entry_price: open.entry_price,
            exit_price: price,
            pnl,
            entry_ts: open.entry_ts,
            exit_ts: ts,
            exit_reason: reason,
        });
    }
}

/// Outcome of [`BacktestEngine::run_detailed`]
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BacktestReport {
    /// Initial balance plus realized P&L
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    /// Position still open when the data ran out; its P&L is not in the balance
    pub open_position: Option<OpenPosition>,
    pub steps: usize,
}

// ============================================================
// ENGINE
// ============================================================

#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Final balance after replaying `data` against `patterns`
    pub fn run<T: OHLC>(&self, data: &[T], patterns: &[Pattern]) -> Result<f64> {
        self.run_detailed(data, patterns, &CancelToken::new())
            .map(|r| r.final_balance)
    }

    pub fn run_detailed<T: OHLC>(
        &self,
        data: &[T],
        patterns: &[Pattern],
        cancel: &CancelToken,
    ) -> Result<BacktestReport> {
        let mut state = BacktestState::new(self.config.initial_balance);
        let mut trades = Vec::new();

        let Some(first) = patterns.first() else {
            return Ok(BacktestReport {
                final_balance: state.balance,
                trades,
                open_position: None,
                steps: 0,
            });
        };

        let w = self.config.segment_bars.map_or(first.grid.rows(), Period::get);
        let steps = data.len().saturating_sub(w);

        for i in 0..steps {
            cancel.check()?;
            let segment = &data[i..i + w];
            let Some(bar) = segment.last() else { break };
            let (price, ts) = (bar.close(), bar.timestamp());

            match self.signal(segment, patterns)? {
                Decision::EnterLong if state.position() != Position::Long => {
                    state.enter(Position::Long, price, ts, &self.config, &mut trades);
                }
                Decision::EnterShort if state.position() != Position::Short => {
                    state.enter(Position::Short, price, ts, &self.config, &mut trades);
                }
                _ => {}
            }
            state.check_stop(price, ts, &mut trades);
        }

        info!(
            steps,
            trades = trades.len(),
            final_balance = state.balance,
            open = ?state.position(),
            "backtest finished"
        );

        Ok(BacktestReport {
            final_balance: state.balance,
            trades,
            open_position: state.open,
            steps,
        })
    }

    /// Resolve the trend labels of every pattern matching `segment`. A pattern
    /// whose shape cannot be encoded from the segment does not match.
    pub fn signal<T: OHLC>(&self, segment: &[T], patterns: &[Pattern]) -> Result<Decision> {
        let mut matching = Vec::new();
        for pattern in patterns {
            let grid = match encode_bars(segment, pattern.grid.size()) {
                Ok(g) => g,
                Err(e) if e.is_recoverable() => continue,
                Err(e) => return Err(e),
            };
            if distance(&grid, &pattern.grid)? <= self.config.similarity_threshold {
                matching.push(pattern.trend_behavior);
            }
        }
        Ok(resolve_trends(matching))
    }
}

/// Replay with the default similarity threshold and window length
pub fn run_backtest<T: OHLC>(
    data: &[T],
    patterns: &[Pattern],
    initial_balance: f64,
    stop_distance: f64,
) -> Result<f64> {
    let config = BacktestConfig {
        initial_balance,
        stop_distance,
        ..BacktestConfig::default()
    };
    BacktestEngine::new(config)?.run(data, patterns)
}

// ============================================================
// TESTS
// ============================================================
