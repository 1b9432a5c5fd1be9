//! Predicate families and the split descriptor.
//!
//! Modeled as a tagged variant per family (`Family`) dispatched through a
//! single `match`, rather than one type per predicate kind.

pub mod critical;
pub mod partition;

use std::sync::Arc;

/// Which predicate family a split belongs to. Every family has a matching
/// `is_greater`, `sort`, and `next_split` in `partition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Family {
    CategoricalPop,
    CategoricalPer,
    DiscretePop,
    DiscretePer,
    NumericalPop,
    NumericalPer,
    DiscretePopIsNan,
    DiscretePerIsNan,
    NumericalPopIsNan,
    NumericalPerIsNan,
    SameUnitsCategorical,
    SameUnitsDiscrete,
    SameUnitsNumerical,
    SameUnitsDiscreteIsNan,
    SameUnitsNumericalIsNan,
    Subfeature,
    TimeStampsDiff,
    TimeStampsWindow,
}

impl Family {
    pub fn is_categorical(self) -> bool {
        matches!(self, Family::CategoricalPop | Family::CategoricalPer | Family::SameUnitsCategorical)
    }

    pub fn is_same_units(self) -> bool {
        matches!(
            self,
            Family::SameUnitsCategorical
                | Family::SameUnitsDiscrete
                | Family::SameUnitsNumerical
                | Family::SameUnitsDiscreteIsNan
                | Family::SameUnitsNumericalIsNan
        )
    }

    pub fn is_nan_family(self) -> bool {
        matches!(
            self,
            Family::DiscretePopIsNan
                | Family::DiscretePerIsNan
                | Family::NumericalPopIsNan
                | Family::NumericalPerIsNan
                | Family::SameUnitsDiscreteIsNan
                | Family::SameUnitsNumericalIsNan
        )
    }

    /// Ascending for category codes, descending for everything else.
    pub fn sort_ascending(self) -> bool {
        self.is_categorical()
    }
}

/// A split descriptor, immutable once committed to a node.
///
/// Exactly the fields required by `family` are meaningful; the rest are
/// left at their defaults and ignored.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Split {
    pub family: Family,
    pub column_pop: usize,
    pub column_per: usize,
    pub critical_value: f64,
    /// Window length for `TimeStampsWindow`; unused otherwise.
    pub lag: f64,
    /// Shared, sorted set of category codes for categorical families.
    pub categories_used: Option<Arc<Vec<i64>>>,
}

impl Split {
    pub fn numerical(family: Family, column_pop: usize, column_per: usize, critical_value: f64) -> Self {
        Self { family, column_pop, column_per, critical_value, lag: 0.0, categories_used: None }
    }

    pub fn categorical(family: Family, column_pop: usize, column_per: usize, categories: Arc<Vec<i64>>) -> Self {
        Self {
            family,
            column_pop,
            column_per,
            critical_value: 0.0,
            lag: 0.0,
            categories_used: Some(categories),
        }
    }

    pub fn time_window(critical_value: f64, lag: f64) -> Self {
        Self {
            family: Family::TimeStampsWindow,
            column_pop: 0,
            column_per: 0,
            critical_value,
            lag,
            categories_used: None,
        }
    }
}
