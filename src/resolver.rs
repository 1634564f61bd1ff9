//! Unified trading decision from a set of pattern trend labels

use std::fmt;

use crate::store::Pattern;
use crate::TrendBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Decision {
    EnterLong,
    EnterShort,
    NotTrade,
    Conflict,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::EnterLong => "ENTER LONG",
            Decision::EnterShort => "ENTER SHORT",
            Decision::NotTrade => "NOT TRADE",
            Decision::Conflict => "CONFLICT",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve stored patterns; only `trend_behavior` is read
pub fn resolve(patterns: &[Pattern]) -> Decision {
    resolve_trends(patterns.iter().map(|p| p.trend_behavior))
}

/// Unanimous labels map to their action, any mixture is a conflict and an
/// empty input is `NotTrade`.
pub fn resolve_trends<I>(trends: I) -> Decision
where
    I: IntoIterator<Item = TrendBehavior>,
{
    let mut trends = trends.into_iter();
    let Some(first) = trends.next() else {
        return Decision::NotTrade;
    };
    if trends.any(|t| t != first) {
        return Decision::Conflict;
    }
    match first {
        TrendBehavior::Bullish => Decision::EnterLong,
        TrendBehavior::Bearish => Decision::EnterShort,
        TrendBehavior::NoTrend => Decision::NotTrade,
    }
}
