//! TOML configuration for a full discovery run
//!
//! Every key is optional. A top-level `similarity_threshold` applies to both
//! the `[validation]` and `[backtest]` sections, overriding whatever they set.
//!
//! ```toml
//! grid_sizes = ["10x10", "15x10"]
//! similarity_threshold = 60.0
//! prediction_accuracy_threshold = 60.0
//! validation_start = 1609459200
//!
//! [[timeframes]]
//! code = "5T"
//! label = "5-Minute"
//!
//! [evolution]
//! population_size = 100
//! generations = 50
//! seed = 7
//!
//! [backtest]
//! stop_distance = 10.0
//! ```

use std::collections::HashSet;
use std::path::Path;

use crate::backtest::BacktestConfig;
use crate::data::Timeframe;
use crate::grid::GridSize;
use crate::optimizer::EvolutionConfig;
use crate::validation::ValidatorConfig;
use crate::{PatternError, Result};

/// 2021-01-01T00:00:00Z
const DEFAULT_VALIDATION_START: i64 = 1_609_459_200;

/// Resampling code and the label patterns are stored under
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeframeSpec {
    pub code: Timeframe,
    pub label: String,
}

impl TimeframeSpec {
    pub fn new(code: &str, label: &str) -> Result<Self> {
        Ok(Self {
            code: code.parse()?,
            label: label.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    /// Grid shapes searched for every timeframe
    pub grid_sizes: Vec<GridSize>,
    /// Minimum validation accuracy (percent) for a pattern to be stored
    pub prediction_accuracy_threshold: f64,
    /// Unix seconds; bars before it train, bars at or after it validate
    pub validation_start: i64,
    pub timeframes: Vec<TimeframeSpec>,
    pub evolution: EvolutionConfig,
    pub validation: ValidatorConfig,
    pub backtest: BacktestConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfigRaw::default().into()
    }
}

impl SystemConfig {
    pub fn from_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PatternError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| PatternError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and merge several files; later files override earlier ones table by table
    pub fn from_toml_files(paths: &[&Path]) -> Result<Self> {
        let Some((first, rest)) = paths.split_first() else {
            return Err(PatternError::InvalidConfig("no config files provided".into()));
        };
        let mut base = read_value(first)?;
        for path in rest {
            merge_toml(&mut base, read_value(path)?);
        }
        let config: Self = base
            .try_into()
            .map_err(|e: toml::de::Error| PatternError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_sizes.is_empty() {
            return Err(PatternError::InvalidConfig("grid_sizes is empty".into()));
        }
        if let Some(bad) = self.grid_sizes.iter().find(|s| s.rows == 0 || s.cols == 0) {
            return Err(PatternError::InvalidConfig(format!("grid size {bad} has an empty side")));
        }
        if let Some(bad) = self.grid_sizes.iter().find(|s| s.rows.checked_mul(s.cols).is_none()) {
            return Err(PatternError::InvalidConfig(format!("grid size {bad} has too many cells")));
        }
        if !(0.0..=100.0).contains(&self.prediction_accuracy_threshold) {
            return Err(PatternError::InvalidConfig(format!(
                "prediction_accuracy_threshold must be in [0, 100], got {}",
                self.prediction_accuracy_threshold
            )));
        }
        if self.timeframes.is_empty() {
            return Err(PatternError::InvalidConfig("timeframes is empty".into()));
        }
        let mut labels = HashSet::new();
        if let Some(dup) = self.timeframes.iter().find(|t| !labels.insert(t.label.as_str())) {
            return Err(PatternError::InvalidConfig(format!(
                "duplicate timeframe label {:?}",
                dup.label
            )));
        }
        self.evolution.validate()?;
        self.validation.validate()?;
        self.backtest.validate()
    }
}

fn read_value(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PatternError::Io(format!("{}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| PatternError::InvalidConfig(format!("{}: {e}", path.display())))
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    if let (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) = (base, overlay) {
        for (key, value) in overlay_table {
            if let Some(base_value) = base_table.get_mut(&key) {
                if base_value.is_table() && value.is_table() {
                    merge_toml(base_value, value);
                    continue;
                }
            }
            base_table.insert(key, value);
        }
    }
}

// ============================================================
// RAW FORM
// ============================================================

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
struct SystemConfigRaw {
    grid_sizes: Vec<GridSize>,
    similarity_threshold: Option<f64>,
    prediction_accuracy_threshold: f64,
    validation_start: i64,
    timeframes: Vec<TimeframeSpec>,
    evolution: EvolutionConfig,
    validation: ValidatorConfig,
    backtest: BacktestConfig,
}

impl Default for SystemConfigRaw {
    fn default() -> Self {
        Self {
            grid_sizes: vec![
                GridSize::new(10, 10),
                GridSize::new(15, 10),
                GridSize::new(20, 15),
                GridSize::new(25, 15),
            ],
            similarity_threshold: None,
            prediction_accuracy_threshold: 60.0,
            validation_start: DEFAULT_VALIDATION_START,
            timeframes: default_timeframes(),
            evolution: EvolutionConfig::default(),
            validation: ValidatorConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

fn default_timeframes() -> Vec<TimeframeSpec> {
    [(300, "5-Minute"), (1_800, "30-Minute"), (3_600, "1-Hour")]
        .into_iter()
        .filter_map(|(secs, label)| {
            Timeframe::from_seconds(secs).ok().map(|code| TimeframeSpec {
                code,
                label: label.to_string(),
            })
        })
        .collect()
}

impl From<SystemConfigRaw> for SystemConfig {
    fn from(raw: SystemConfigRaw) -> Self {
        let mut validation = raw.validation;
        let mut backtest = raw.backtest;
        if let Some(threshold) = raw.similarity_threshold {
            validation.similarity_threshold = threshold;
            backtest.similarity_threshold = threshold;
        }
        Self {
            grid_sizes: raw.grid_sizes,
            prediction_accuracy_threshold: raw.prediction_accuracy_threshold,
            validation_start: raw.validation_start,
            timeframes: raw.timeframes,
            evolution: raw.evolution,
            validation,
            backtest,
        }
    }
}

impl<'de> serde::Deserialize<'de> for SystemConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = SystemConfigRaw::deserialize(deserializer)?;
        Ok(raw.into())
    }
}

// ============================================================
// TESTS
// ============================================================
