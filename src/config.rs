//! Enumerated hyperparameters (spec §6) plus validation.
//!
//! Kept as concrete typed fields rather than the teacher's stringly-keyed
//! `HyperparameterValue` map (see `ml::Hyperparameters`) because this
//! engine's option set is closed and known at compile time; concrete fields
//! let `validate()` catch out-of-range values before any table is touched.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LossFunction {
    SquareLoss,
    CrossEntropyLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Aggregation {
    Avg,
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    CountDistinctOverCount,
    CountAboveMean,
    CountBelowMean,
    Sum,
    Min,
    Max,
    NumMin,
    NumMax,
    Median,
    Mode,
    Stddev,
    Var,
    VariationCoefficient,
    Skew,
    Kurtosis,
    Q1,
    Q5,
    Q10,
    Q25,
    Q75,
    Q90,
    Q95,
    Q99,
    First,
    Last,
    AvgTimeBetween,
    Trend,
}

impl Aggregation {
    pub const ALL: &'static [Aggregation] = &[
        Aggregation::Avg,
        Aggregation::Count,
        Aggregation::CountDistinct,
        Aggregation::CountMinusCountDistinct,
        Aggregation::CountDistinctOverCount,
        Aggregation::CountAboveMean,
        Aggregation::CountBelowMean,
        Aggregation::Sum,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::NumMin,
        Aggregation::NumMax,
        Aggregation::Median,
        Aggregation::Mode,
        Aggregation::Stddev,
        Aggregation::Var,
        Aggregation::VariationCoefficient,
        Aggregation::Skew,
        Aggregation::Kurtosis,
        Aggregation::Q1,
        Aggregation::Q5,
        Aggregation::Q10,
        Aggregation::Q25,
        Aggregation::Q75,
        Aggregation::Q90,
        Aggregation::Q95,
        Aggregation::Q99,
        Aggregation::First,
        Aggregation::Last,
        Aggregation::AvgTimeBetween,
        Aggregation::Trend,
    ];

    /// `first`/`last` require both tables to carry timestamps (spec §4.7).
    pub fn requires_time_stamps(&self) -> bool {
        matches!(self, Aggregation::First | Aggregation::Last | Aggregation::AvgTimeBetween | Aggregation::Trend)
    }

    /// Categorical-only aggregations (spec §4.7): apply only to non-same-unit
    /// categorical columns and cannot combine with categorical conditions.
    pub fn is_categorical_only(&self) -> bool {
        matches!(self, Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct)
    }
}

/// Builder-validated configuration for every learning strategy (spec §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub num_features: usize,
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_num_samples: usize,
    pub gamma: f64,
    pub shrinkage: f64,
    pub delta_t: f64,
    pub sampling_factor: f64,
    pub seed: u64,
    pub min_freq: usize,
    pub min_df: usize,
    pub vocab_size: usize,
    pub split_text_fields: bool,
    pub n_most_frequent: usize,
    pub num_threads: usize,
    pub aggregations: Vec<Aggregation>,
    pub loss_function: LossFunction,
    /// Required, no default — spec §9 Open Question: the overlapping-window
    /// policy for lagged targets is ambiguous in the original and must be
    /// an explicit caller decision, not a guessed default.
    pub allow_lagged_targets: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_features: 100,
            num_trees: 50,
            max_depth: 4,
            min_num_samples: 30,
            gamma: 0.0,
            shrinkage: 0.1,
            delta_t: 0.0,
            sampling_factor: 1.0,
            seed: 42,
            min_freq: 1,
            min_df: 1,
            vocab_size: 500,
            split_text_fields: true,
            n_most_frequent: 10,
            num_threads: 0,
            aggregations: Aggregation::ALL.to_vec(),
            loss_function: LossFunction::SquareLoss,
            allow_lagged_targets: None,
        }
    }
}

impl Config {
    pub fn resolved_num_threads(&self) -> usize {
        if self.num_threads == 0 {
            (num_cpus::get() / 2).max(2)
        } else {
            self.num_threads
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_num_samples < 1 {
            return Err(EngineError::InvalidArgument(
                "min_num_samples must be >= 1".to_string(),
            ));
        }
        if !self.shrinkage.is_finite() {
            return Err(EngineError::InvalidArgument(
                "shrinkage must be finite".to_string(),
            ));
        }
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err(EngineError::InvalidArgument(
                "gamma must be a finite, non-negative loss reduction threshold".to_string(),
            ));
        }
        if self.sampling_factor < 0.0 {
            return Err(EngineError::InvalidArgument(
                "sampling_factor must be non-negative".to_string(),
            ));
        }
        if self.delta_t < 0.0 || !self.delta_t.is_finite() {
            return Err(EngineError::InvalidArgument(
                "delta_t must be finite and non-negative".to_string(),
            ));
        }
        if self.vocab_size == 0 {
            return Err(EngineError::InvalidArgument(
                "vocab_size must be >= 1".to_string(),
            ));
        }
        if self.allow_lagged_targets.is_none() {
            return Err(EngineError::InvalidArgument(
                "allow_lagged_targets must be set explicitly (no safe default exists)".to_string(),
            ));
        }
        Ok(())
    }
}
