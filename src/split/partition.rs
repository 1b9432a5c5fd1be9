//! Per-family `is_greater`, `partition`, `sort`, and `next_split` (spec §4.2).

use super::{Family, Split};
use crate::matching::Match;
use crate::table::Table;

/// The raw (unmapped-to-predicate) value a family compares against its
/// critical value, or `None` when the underlying cell is NaN — callers
/// that need is-nan semantics check this directly; callers that need the
/// comparison value unwrap and compare.
fn raw_value(split: &Split, pop: &dyn Table, per: &dyn Table, m: Match) -> Option<f64> {
    let i = m.ix_pop as usize;
    let j = m.ix_per as usize;
    let v = match split.family {
        Family::DiscretePop | Family::DiscretePopIsNan => pop.discrete(i, split.column_pop),
        Family::DiscretePer | Family::DiscretePerIsNan => per.discrete(j, split.column_per),
        Family::NumericalPop | Family::NumericalPopIsNan => pop.numerical(i, split.column_pop),
        Family::NumericalPer | Family::NumericalPerIsNan => per.numerical(j, split.column_per),
        Family::SameUnitsDiscrete | Family::SameUnitsDiscreteIsNan => {
            pop.discrete(i, split.column_pop) - per.discrete(j, split.column_per)
        }
        Family::SameUnitsNumerical | Family::SameUnitsNumericalIsNan => {
            pop.numerical(i, split.column_pop) - per.numerical(j, split.column_per)
        }
        Family::TimeStampsDiff | Family::TimeStampsWindow => {
            let t_pop = pop.primary_time_stamp(i).unwrap_or(f64::NAN);
            let t_per = per.primary_time_stamp(j).unwrap_or(f64::NAN);
            t_pop - t_per
        }
        Family::CategoricalPop | Family::CategoricalPer | Family::SameUnitsCategorical | Family::Subfeature => {
            return None;
        }
    };
    Some(v)
}

fn category_code_pop(split: &Split, pop: &dyn Table, m: Match) -> i64 {
    pop.categorical(m.ix_pop as usize, split.column_pop)
}

fn category_code_per(split: &Split, per: &dyn Table, m: Match) -> i64 {
    per.categorical(m.ix_per as usize, split.column_per)
}

/// The per-family predicate that decides which side of a split a match
/// falls on (spec §4.2 table).
pub fn is_greater(split: &Split, pop: &dyn Table, per: &dyn Table, subfeatures: Option<&[f64]>, m: Match) -> bool {
    match split.family {
        Family::CategoricalPop => {
            let code = category_code_pop(split, pop, m);
            split.categories_used.as_ref().is_some_and(|set| set.binary_search(&code).is_ok())
        }
        Family::CategoricalPer => {
            let code = category_code_per(split, per, m);
            split.categories_used.as_ref().is_some_and(|set| set.binary_search(&code).is_ok())
        }
        Family::SameUnitsCategorical => category_code_pop(split, pop, m) == category_code_per(split, per, m),
        Family::DiscretePop
        | Family::DiscretePer
        | Family::NumericalPop
        | Family::NumericalPer
        | Family::SameUnitsDiscrete
        | Family::SameUnitsNumerical => raw_value(split, pop, per, m).unwrap() > split.critical_value,
        Family::DiscretePopIsNan
        | Family::DiscretePerIsNan
        | Family::NumericalPopIsNan
        | Family::NumericalPerIsNan
        | Family::SameUnitsDiscreteIsNan
        | Family::SameUnitsNumericalIsNan => !raw_value(split, pop, per, m).unwrap().is_nan(),
        Family::Subfeature => {
            let value = subfeatures.expect("subfeature column required for Subfeature family")[m.ix_per as usize];
            value > split.critical_value
        }
        Family::TimeStampsDiff => raw_value(split, pop, per, m).unwrap() > split.critical_value,
        Family::TimeStampsWindow => {
            let diff = raw_value(split, pop, per, m).unwrap();
            split.critical_value < diff && diff <= split.critical_value + split.lag
        }
    }
}

/// Rearranges `[0, matches.len())` so every match for which `is_greater`
/// holds comes first; returns the boundary index. Equivalent to
/// `std::partition` in the original (spec invariant 1).
pub fn partition(
    split: &Split,
    pop: &dyn Table,
    per: &dyn Table,
    subfeatures: Option<&[f64]>,
    matches: &mut [Match],
) -> usize {
    let mut lo = 0usize;
    let mut hi = matches.len();
    while lo < hi {
        if is_greater(split, pop, per, subfeatures, matches[lo]) {
            lo += 1;
        } else {
            hi -= 1;
            matches.swap(lo, hi);
        }
    }
    lo
}

/// The sort key a family's sweep relies on: categories sort ascending by
/// code, everything else sorts descending by comparison value (spec §4.2).
///
/// A NaN cell (ordinary families coexist with their `*_is_nan` counterpart,
/// spec §8 S4) sorts as `NEG_INFINITY`: `is_greater` already treats NaN as
/// "not greater than any threshold", so pinning it to the low end of the
/// sweep keeps the sort order consistent with the partition it produces.
pub fn sort_key(split: &Split, pop: &dyn Table, per: &dyn Table, subfeatures: Option<&[f64]>, m: Match) -> f64 {
    match split.family {
        Family::CategoricalPop => category_code_pop(split, pop, m) as f64,
        Family::CategoricalPer => category_code_per(split, per, m) as f64,
        Family::SameUnitsCategorical => category_code_pop(split, pop, m) as f64,
        Family::Subfeature => subfeatures.expect("subfeature column required")[m.ix_per as usize],
        _ => match raw_value(split, pop, per, m) {
            Some(v) if v.is_nan() => f64::NEG_INFINITY,
            Some(v) => v,
            None => f64::NEG_INFINITY,
        },
    }
}

/// Sorts `matches` in place by the family's sort key, ascending for
/// categorical families and descending otherwise. Uses `total_cmp` rather
/// than `partial_cmp` so a NaN sort key (possible via `Subfeature`) can
/// never panic the sort.
pub fn sort(split: &Split, pop: &dyn Table, per: &dyn Table, subfeatures: Option<&[f64]>, matches: &mut [Match]) {
    let ascending = split.family.sort_ascending();
    matches.sort_by(|&a, &b| {
        let ka = sort_key(split, pop, per, subfeatures, a);
        let kb = sort_key(split, pop, per, subfeatures, b);
        if ascending {
            ka.total_cmp(&kb)
        } else {
            kb.total_cmp(&ka)
        }
    });
}

/// Advances `it` (an index into a slice already sorted via `sort`) past
/// every match whose sort key still clears `critical_value` — i.e. the
/// boundary of the "greater" prefix for that threshold. Monotonic in
/// `critical_value` for a fixed sort order (spec invariant 2): calling this
/// with an increasing sequence of thresholds never needs to move `it`
/// backwards.
pub fn next_split(
    split: &Split,
    pop: &dyn Table,
    per: &dyn Table,
    subfeatures: Option<&[f64]>,
    matches: &[Match],
    start: usize,
    critical_value: f64,
) -> usize {
    let ascending = split.family.sort_ascending();
    let mut it = start;
    while it < matches.len() {
        let key = sort_key(split, pop, per, subfeatures, matches[it]);
        let still_greater = if ascending { key <= critical_value } else { key > critical_value };
        if !still_greater {
            break;
        }
        it += 1;
    }
    it
}
