//! Bar preparation: validation, timeframe resampling and the train/validation split

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::{OHLCExt, PatternError, PriceBar, Result, OHLC};

// ============================================================
// TIMEFRAME
// ============================================================

/// Fixed bucket width in seconds, parsed from codes such as `5T`, `30T`, `1H`,
/// `1D` or `45S` (`MIN` is accepted for minutes; a missing count means 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    seconds: i64,
}

impl Timeframe {
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(PatternError::InvalidValue("timeframe must be > 0 seconds"));
        }
        Ok(Self { seconds })
    }

    #[inline]
    pub fn seconds(self) -> i64 {
        self.seconds
    }

    /// Start of the bucket containing `timestamp`
    #[inline]
    pub fn bucket(self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.seconds) * self.seconds
    }
}

impl FromStr for Timeframe {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim();
        let split = code
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| PatternError::InvalidConfig(format!("timeframe {s:?} has no unit")))?;
        let (count, unit) = code.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| PatternError::InvalidConfig(format!("bad timeframe count in {s:?}")))?
        };
        let unit_seconds = match unit.to_ascii_uppercase().as_str() {
            "S" => 1,
            "T" | "MIN" => 60,
            "H" => 3_600,
            "D" => 86_400,
            _ => {
                return Err(PatternError::InvalidConfig(format!(
                    "unknown timeframe unit {unit:?} in {s:?}"
                )))
            }
        };
        count
            .checked_mul(unit_seconds)
            .ok_or_else(|| PatternError::InvalidConfig(format!("timeframe {s:?} overflows")))
            .and_then(Timeframe::from_seconds)
            .map_err(|e| match e {
                PatternError::InvalidValue(msg) => PatternError::InvalidConfig(format!("{s:?}: {msg}")),
                other => other,
            })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        match s {
            _ if s % 86_400 == 0 => write!(f, "{}D", s / 86_400),
            _ if s % 3_600 == 0 => write!(f, "{}H", s / 3_600),
            _ if s % 60 == 0 => write!(f, "{}T", s / 60),
            _ => write!(f, "{s}S"),
        }
    }
}

impl serde::Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================
// VALIDATION
// ============================================================

/// Check every bar (finite prices, high >= low) and that timestamps are
/// strictly increasing. Errors carry the offending index.
pub fn validate_bars<T: OHLC>(bars: &[T]) -> Result<()> {
    for (index, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            PatternError::InvalidBar { reason, .. } => PatternError::InvalidBar { index, reason },
            other => other,
        })?;
    }
    if let Some(i) = bars.windows(2).position(|w| w[1].timestamp() <= w[0].timestamp()) {
        return Err(PatternError::InvalidBar {
            index: i + 1,
            reason: "timestamps not strictly increasing",
        });
    }
    Ok(())
}

// ============================================================
// RESAMPLING
// ============================================================

/// Aggregate time-ordered bars into `timeframe` buckets: open of the first bar,
/// max high, min low, close of the last bar. The bar is stamped with the
/// bucket start; buckets without bars are not emitted.
pub fn resample<T: OHLC>(bars: &[T], timeframe: Timeframe) -> Vec<PriceBar> {
    let mut out: Vec<PriceBar> = Vec::new();
    for bar in bars {
        let bucket = timeframe.bucket(bar.timestamp());
        match out.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(bar.high());
                current.low = current.low.min(bar.low());
                current.close = bar.close();
            }
            _ => out.push(PriceBar::new(bucket, bar.open(), bar.high(), bar.low(), bar.close())),
        }
    }
    debug!(input = bars.len(), output = out.len(), %timeframe, "resampled bars");
    out
}

/// Split at `timestamp`: bars strictly before it, and bars at or after it
pub fn split_at<T: OHLC>(bars: &[T], timestamp: i64) -> (&[T], &[T]) {
    let idx = bars.partition_point(|b| b.timestamp() < timestamp);
    bars.split_at(idx)
}

// ============================================================
// TESTS
// ============================================================
