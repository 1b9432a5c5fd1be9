//! Critical-value enumeration and binning.

use super::partition::sort_key;
use super::{Family, Split};
use crate::error::{EngineError, Result};
use crate::matching::Match;
use crate::reducer::Reducer;
use crate::table::Table;

const MAX_BINS: usize = 1_000_000;

/// `⌈√n⌉` threshold candidates spread evenly through `[min, max]`, with
/// the min/max reduced across workers when a non-trivial `Reducer` is
/// present.
pub fn quantile_candidates(
    split_template: &Split,
    pop: &dyn Table,
    per: &dyn Table,
    subfeatures: Option<&[f64]>,
    matches: &[Match],
    reducer: &dyn Reducer,
    integer_valued: bool,
) -> Vec<f64> {
    if matches.is_empty() {
        return Vec::new();
    }

    let (mut local_min, mut local_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &m in matches {
        let v = sort_key(split_template, pop, per, subfeatures, m);
        if v < local_min {
            local_min = v;
        }
        if v > local_max {
            local_max = v;
        }
    }
    let min = reducer.reduce_min_f64(local_min);
    let max = reducer.reduce_max_f64(local_max);

    let num_values = (matches.len() as f64).sqrt().ceil().max(1.0) as usize;

    if !(max > min) {
        return vec![min];
    }

    let step = (max - min) / num_values as f64;
    (0..num_values)
        .map(|i| {
            let raw = min + step * (i as f64 + 1.0);
            if integer_valued {
                raw.ceil()
            } else {
                raw
            }
        })
        .collect()
}

/// Bucket boundaries for `matches`, already sorted via `partition::sort`:
/// bin `i` spans `[indptr[i], indptr[i + 1])`. Used when a sweep needs bin
/// edges rather than threshold values — categorical enumeration and
/// time-window sweeps.
pub fn bin_boundaries(num_bins: usize, len: usize) -> Result<Vec<usize>> {
    if num_bins > MAX_BINS {
        return Err(EngineError::NumericOverflow(format!(
            "requested {num_bins} bins exceeds the {MAX_BINS} guard"
        )));
    }
    if num_bins == 0 || len == 0 {
        return Ok(vec![0]);
    }
    let mut indptr = Vec::with_capacity(num_bins + 1);
    let base = len / num_bins;
    let remainder = len % num_bins;
    let mut acc = 0usize;
    indptr.push(0);
    for i in 0..num_bins {
        acc += base + usize::from(i < remainder);
        indptr.push(acc);
    }
    Ok(indptr)
}

/// Critical values for the `TimeStampsWindow` family: every distinct
/// `t_pop - t_per` difference observed, used as the window's lower edge
/// (the upper edge follows from `+ delta_t`), guarded against an
/// unreasonably fine `delta_t` producing a degenerate bin count.
pub fn time_window_candidates(delta_t: f64, matches: &[Match], pop: &dyn Table, per: &dyn Table) -> Result<Vec<f64>> {
    if delta_t <= 0.0 || matches.is_empty() {
        return Ok(Vec::new());
    }
    let mut diffs: Vec<f64> = matches
        .iter()
        .filter_map(|&m| {
            let t_pop = pop.primary_time_stamp(m.ix_pop as usize)?;
            let t_per = per.primary_time_stamp(m.ix_per as usize)?;
            Some(t_pop - t_per)
        })
        .collect();
    if diffs.is_empty() {
        return Ok(Vec::new());
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let span = diffs.last().unwrap() - diffs.first().unwrap();
    let num_bins = ((span / delta_t).ceil() as i64).max(1);
    if num_bins as usize > MAX_BINS {
        return Err(EngineError::NumericOverflow(format!(
            "delta_t={delta_t} would require {num_bins} windows, exceeding the {MAX_BINS} guard"
        )));
    }
    diffs.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    Ok(diffs)
}

pub fn categorical_codes(split_template: &Split, family: Family, pop: &dyn Table, per: &dyn Table, matches: &[Match]) -> Vec<i64> {
    let mut codes: Vec<i64> = matches
        .iter()
        .map(|&m| match family {
            Family::CategoricalPop => pop.categorical(m.ix_pop as usize, split_template.column_pop),
            Family::CategoricalPer | Family::SameUnitsCategorical => {
                per.categorical(m.ix_per as usize, split_template.column_per)
            }
            _ => unreachable!("categorical_codes called for non-categorical family"),
        })
        .collect();
    codes.sort_unstable();
    codes.dedup();
    codes
}
