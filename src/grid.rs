//! Grid encoding and grid similarity
//!
//! A [`Grid`] is a rows×cols matrix of min-max normalized values describing the
//! trajectory of a price segment. Two grids are only ever compared when their
//! [`GridSize`] is identical; [`distance`] is the L1 distance between them and
//! smaller means more similar.

use std::fmt;
use std::str::FromStr;

use crate::{PatternError, Result, OHLC};

// ============================================================
// GRID SIZE
// ============================================================

/// Shape of a grid, written as `"RxC"` (e.g. `"10x10"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub rows: usize,
    pub cols: usize,
}

impl GridSize {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of cells (`rows * cols`)
    #[inline]
    pub fn cells(self) -> usize {
        self.rows * self.cols
    }

    /// Non-empty sides and a cell count that fits in `usize`
    pub(crate) fn check(self) -> Result<Self> {
        if self.rows == 0 || self.cols == 0 {
            return Err(PatternError::InvalidValue("grid rows and cols must be > 0"));
        }
        if self.rows.checked_mul(self.cols).is_none() {
            return Err(PatternError::InvalidConfig(format!(
                "grid size {self} has too many cells"
            )));
        }
        Ok(self)
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl FromStr for GridSize {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PatternError::InvalidConfig(format!("grid size must look like RxC, got {s:?}"));
        let (rows, cols) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let rows = rows.trim().parse::<usize>().map_err(|_| invalid())?;
        let cols = cols.trim().parse::<usize>().map_err(|_| invalid())?;
        GridSize::new(rows, cols).check().map_err(|e| match e {
            PatternError::InvalidConfig(_) => e,
            _ => invalid(),
        })
    }
}

impl serde::Serialize for GridSize {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for GridSize {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================
// GRID
// ============================================================

/// Immutable rows×cols matrix of values in [0, 1], stored row-major
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Grid {
    size: GridSize,
    values: Vec<f64>,
}

impl Grid {
    /// Build a grid from row-major values, checking length and the [0, 1] range
    pub fn new(size: GridSize, values: Vec<f64>) -> Result<Self> {
        let size = size.check()?;
        if values.len() != size.cells() {
            return Err(PatternError::InsufficientData {
                need: size.cells(),
                got: values.len(),
            });
        }
        if let Some(&bad) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(PatternError::OutOfRange {
                field: "grid value",
                value: bad,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self { size, values })
    }

    /// Caller guarantees `values.len() == size.cells()` and the [0, 1] range
    pub(crate) fn from_parts(size: GridSize, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), size.cells());
        Self { size, values }
    }

    #[inline]
    pub fn size(&self) -> GridSize {
        self.size
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.size.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.size.cols
    }

    /// Row-major values
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.size.rows || col >= self.size.cols {
            return None;
        }
        self.values.get(row * self.size.cols + col).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        let start = row.checked_mul(self.size.cols)?;
        self.values.get(start..start + self.size.cols)
    }

    /// Serialize to the persisted PIC form: a flattened row-major list such as
    /// `[0.25,0.5,1]`. Float formatting is shortest-round-trip, so
    /// [`Grid::from_pic`] restores the values exactly.
    pub fn to_pic(&self) -> String {
        let body: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        format!("[{}]", body.join(","))
    }

    /// Parse a PIC string for a grid of the given size. Accepts any whitespace
    /// between elements (`"[0.1, 0.2]"` and `"[0.1,0.2]"` are equivalent).
    pub fn from_pic(pic: &str, size: GridSize) -> Result<Self> {
        let size = size.check()?;
        let values: Vec<f64> = serde_json::from_str(pic.trim())
            .map_err(|e| PatternError::InvalidPic(e.to_string()))?;
        if values.len() != size.cells() {
            return Err(PatternError::InvalidPic(format!(
                "expected {} values for {}, got {}",
                size.cells(),
                size,
                values.len()
            )));
        }
        Grid::new(size, values)
    }
}

// ============================================================
// ENCODER
// ============================================================

/// Encode a close-price segment into a normalized rows×cols grid.
///
/// Prices are min-max normalized over the whole segment (a flat segment maps
/// to 0.5 everywhere), cut into consecutive windows of
/// `len / (rows * cols)` prices (trailing partial window dropped), and each
/// cell is the mean of one window, in order, reshaped row-major.
pub fn encode(close_prices: &[f64], rows: usize, cols: usize) -> Result<Grid> {
    let size = GridSize::new(rows, cols).check()?;
    let cells = size.cells();

    if close_prices.iter().any(|p| !p.is_finite()) {
        return Err(PatternError::InvalidValue("close prices must be finite"));
    }

    let step = close_prices.len() / cells;
    if step == 0 {
        return Err(PatternError::InsufficientData {
            need: cells,
            got: close_prices.len(),
        });
    }

    let (min, max) = close_prices
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    // halved so that the span of any two finite prices stays finite
    let (lo, span) = (min / 2.0, max / 2.0 - min / 2.0);
    let normalize = |p: f64| if span > 0.0 { (p / 2.0 - lo) / span } else { 0.5 };

    let values: Vec<f64> = close_prices
        .chunks_exact(step)
        .take(cells)
        .map(|window| {
            let sum: f64 = window.iter().map(|&p| normalize(p)).sum();
            (sum / step as f64).clamp(0.0, 1.0)
        })
        .collect();

    if values.len() < cells {
        return Err(PatternError::InsufficientData {
            need: cells * step,
            got: close_prices.len(),
        });
    }

    Ok(Grid::from_parts(size, values))
}

/// Encode the closes of a bar segment into a grid of the given size
pub fn encode_bars<T: OHLC>(bars: &[T], size: GridSize) -> Result<Grid> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
    encode(&closes, size.rows, size.cols)
}

// ============================================================
// SIMILARITY
// ============================================================

/// L1 distance between two grids of identical shape (0 = identical)
pub fn distance(a: &Grid, b: &Grid) -> Result<f64> {
    if a.size != b.size {
        return Err(PatternError::ShapeMismatch {
            left: a.size,
            right: b.size,
        });
    }
    Ok(l1(&a.values, &b.values))
}

#[inline]
pub(crate) fn l1(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

// ============================================================
// TESTS
// ============================================================
