//! Pattern store: append-only persistence of validated patterns
//!
//! Patterns are written once and never updated. Ids are assigned by the store
//! and start at 1. Queries filter on grid size and timeframe label and return
//! patterns in insertion order.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::grid::{Grid, GridSize};
use crate::{PatternError, Result, TrendBehavior};

/// A persisted pattern
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Pattern {
    pub id: i64,
    pub grid_size: GridSize,
    /// Timeframe label, e.g. "5-Minute"
    pub timeframe: String,
    pub grid: Grid,
    /// Percentage in [0, 100]
    pub prediction_accuracy: f64,
    pub forecasting_power: bool,
    pub trend_behavior: TrendBehavior,
}

/// A pattern ready for insertion; the grid size is taken from `grid`
#[derive(Debug, Clone, PartialEq)]
pub struct NewPattern {
    pub timeframe: String,
    pub grid: Grid,
    pub prediction_accuracy: f64,
    pub forecasting_power: bool,
    pub trend_behavior: TrendBehavior,
}

impl NewPattern {
    fn check(&self) -> Result<()> {
        let accuracy = self.prediction_accuracy;
        if !(0.0..=100.0).contains(&accuracy) {
            return Err(PatternError::OutOfRange {
                field: "prediction_accuracy",
                value: accuracy,
                min: 0.0,
                max: 100.0,
            });
        }
        Ok(())
    }

    fn into_pattern(self, id: i64) -> Pattern {
        Pattern {
            id,
            grid_size: self.grid.size(),
            timeframe: self.timeframe,
            grid: self.grid,
            prediction_accuracy: self.prediction_accuracy,
            forecasting_power: self.forecasting_power,
            trend_behavior: self.trend_behavior,
        }
    }
}

pub trait PatternStore {
    /// Persist `pattern`, returning its id
    fn insert(&mut self, pattern: &NewPattern) -> Result<i64>;

    /// Patterns with the given size and timeframe label, oldest first
    fn query(&self, size: GridSize, timeframe: &str) -> Result<Vec<Pattern>>;

    /// Union of [`PatternStore::query`] over several sizes, in the order given
    fn query_sizes(&self, sizes: &[GridSize], timeframe: &str) -> Result<Vec<Pattern>> {
        let mut out = Vec::new();
        for &size in sizes {
            out.extend(self.query(size, timeframe)?);
        }
        Ok(out)
    }
}

// ============================================================
// IN-MEMORY
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryPatternStore {
    patterns: Vec<Pattern>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

impl PatternStore for MemoryPatternStore {
    fn insert(&mut self, pattern: &NewPattern) -> Result<i64> {
        pattern.check()?;
        let id = self.patterns.len() as i64 + 1;
        self.patterns.push(pattern.clone().into_pattern(id));
        Ok(id)
    }

    fn query(&self, size: GridSize, timeframe: &str) -> Result<Vec<Pattern>> {
        Ok(self
            .patterns
            .iter()
            .filter(|p| p.grid_size == size && p.timeframe == timeframe)
            .cloned()
            .collect())
    }
}

// ============================================================
// SQLITE
// ============================================================

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS PrototypePatterns (
    Pattern_ID INTEGER PRIMARY KEY AUTOINCREMENT,
    Grid_Size TEXT NOT NULL,
    Time_Frame TEXT NOT NULL,
    PIC TEXT NOT NULL,
    Prediction_Accuracy REAL NOT NULL,
    Forecasting_Power BOOLEAN NOT NULL,
    Trend_Behavior TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_patterns_size_tf
    ON PrototypePatterns (Grid_Size, Time_Frame);
";

/// SQLite-backed store using the `PrototypePatterns` table
pub struct SqlitePatternStore {
    conn: Connection,
}

impl SqlitePatternStore {
    /// Open or create the database at `path` and ensure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.create()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.create()?;
        Ok(store)
    }

    /// Create the table and index if missing
    pub fn create(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }
}

/// Raw column values, decoded outside the row closure
type PatternRow = (i64, String, String, String, f64, bool, String);

fn decode_row(row: PatternRow) -> Result<Pattern> {
    let (id, size, timeframe, pic, accuracy, forecasting_power, trend) = row;
    let grid_size: GridSize = size.parse()?;
    Ok(Pattern {
        id,
        grid_size,
        timeframe,
        grid: Grid::from_pic(&pic, grid_size)?,
        prediction_accuracy: accuracy,
        forecasting_power,
        trend_behavior: trend
            .parse()
            .map_err(|_| PatternError::Store(format!("pattern {id}: unknown trend {trend:?}")))?,
    })
}

impl PatternStore for SqlitePatternStore {
    fn insert(&mut self, pattern: &NewPattern) -> Result<i64> {
        pattern.check()?;
        self.conn.execute(
            "INSERT INTO PrototypePatterns \
             (Grid_Size, Time_Frame, PIC, Prediction_Accuracy, Forecasting_Power, Trend_Behavior) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pattern.grid.size().to_string(),
                pattern.timeframe,
                pattern.grid.to_pic(),
                pattern.prediction_accuracy,
                pattern.forecasting_power,
                pattern.trend_behavior.as_str(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, size = %pattern.grid.size(), timeframe = %pattern.timeframe, "pattern inserted");
        Ok(id)
    }

    fn query(&self, size: GridSize, timeframe: &str) -> Result<Vec<Pattern>> {
        let mut stmt = self.conn.prepare(
            "SELECT Pattern_ID, Grid_Size, Time_Frame, PIC, Prediction_Accuracy, \
             Forecasting_Power, Trend_Behavior \
             FROM PrototypePatterns WHERE Grid_Size = ?1 AND Time_Frame = ?2 \
             ORDER BY Pattern_ID",
        )?;
        let rows = stmt
            .query_map(params![size.to_string(), timeframe], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<PatternRow>>>()?;

        rows.into_iter().map(decode_row).collect()
    }
}

// ============================================================
// TESTS
// ============================================================
