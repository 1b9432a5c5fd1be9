//! The relational decision-tree node (spec §4.5): the component that
//! composes match array, partitioner, critical-value finder, and loss
//! accumulator into a recursive split search.

mod linear;

pub use linear::LinearLeaf;

use rayon::prelude::*;
use std::sync::Arc;

use crate::config::{Config, LossFunction};
use crate::loss::{LossAccumulator, Update};
use crate::matching::Match;
use crate::reducer::Reducer;
use crate::split::critical::{categorical_codes, quantile_candidates, time_window_candidates};
use crate::split::partition::{is_greater, next_split, partition};
use crate::split::{Family, Split};
use crate::table::{Schema, Table};

/// Which decision-tree variant is being fit: plain relational boosting
/// (scalar leaf weight) or a split-plus-linear-leaf variant (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVariant {
    Relboost,
    Relcit,
    Relmt,
}

impl TreeVariant {
    fn fits_linear_leaves(self) -> bool {
        matches!(self, TreeVariant::Relcit | TreeVariant::Relmt)
    }
}

/// One instance of a predicate family bound to concrete column indices.
#[derive(Debug, Clone, Copy)]
struct FamilyInstance {
    family: Family,
    column_pop: usize,
    column_per: usize,
}

/// Enumerates every predicate family admissible on this schema pair, in a
/// deterministic order (column order, then family order — spec §5's
/// requirement for cross-worker-identical candidate sequences).
fn admissible_families(pop: &Schema, per: &Schema, has_subfeatures: bool, delta_t: f64, has_time_stamps: bool) -> Vec<FamilyInstance> {
    let mut out = Vec::new();

    for c in 0..pop.categoricals.len() {
        out.push(FamilyInstance { family: Family::CategoricalPop, column_pop: c, column_per: 0 });
    }
    for c in 0..per.categoricals.len() {
        out.push(FamilyInstance { family: Family::CategoricalPer, column_pop: 0, column_per: c });
    }
    for c in 0..pop.discretes.len() {
        out.push(FamilyInstance { family: Family::DiscretePop, column_pop: c, column_per: 0 });
        out.push(FamilyInstance { family: Family::DiscretePopIsNan, column_pop: c, column_per: 0 });
    }
    for c in 0..per.discretes.len() {
        out.push(FamilyInstance { family: Family::DiscretePer, column_pop: 0, column_per: c });
        out.push(FamilyInstance { family: Family::DiscretePerIsNan, column_pop: 0, column_per: c });
    }
    for c in 0..pop.numericals.len() {
        out.push(FamilyInstance { family: Family::NumericalPop, column_pop: c, column_per: 0 });
        out.push(FamilyInstance { family: Family::NumericalPopIsNan, column_pop: c, column_per: 0 });
    }
    for c in 0..per.numericals.len() {
        out.push(FamilyInstance { family: Family::NumericalPer, column_pop: 0, column_per: c });
        out.push(FamilyInstance { family: Family::NumericalPerIsNan, column_pop: 0, column_per: c });
    }

    for (i, cat_pop) in pop.categoricals.iter().enumerate() {
        for (j, cat_per) in per.categoricals.iter().enumerate() {
            if !cat_pop.unit.is_empty() && cat_pop.unit == cat_per.unit {
                out.push(FamilyInstance { family: Family::SameUnitsCategorical, column_pop: i, column_per: j });
            }
        }
    }
    for (i, d_pop) in pop.discretes.iter().enumerate() {
        for (j, d_per) in per.discretes.iter().enumerate() {
            if !d_pop.unit.is_empty() && d_pop.unit == d_per.unit {
                out.push(FamilyInstance { family: Family::SameUnitsDiscrete, column_pop: i, column_per: j });
                out.push(FamilyInstance { family: Family::SameUnitsDiscreteIsNan, column_pop: i, column_per: j });
            }
        }
    }
    for (i, n_pop) in pop.numericals.iter().enumerate() {
        for (j, n_per) in per.numericals.iter().enumerate() {
            if !n_pop.unit.is_empty() && n_pop.unit == n_per.unit {
                out.push(FamilyInstance { family: Family::SameUnitsNumerical, column_pop: i, column_per: j });
                out.push(FamilyInstance { family: Family::SameUnitsNumericalIsNan, column_pop: i, column_per: j });
            }
        }
    }

    if has_subfeatures {
        out.push(FamilyInstance { family: Family::Subfeature, column_pop: 0, column_per: 0 });
    }
    if has_time_stamps {
        out.push(FamilyInstance { family: Family::TimeStampsDiff, column_pop: 0, column_per: 0 });
        if delta_t > 0.0 {
            out.push(FamilyInstance { family: Family::TimeStampsWindow, column_pop: 0, column_per: 0 });
        }
    }

    out
}

/// One evaluated candidate split. `partial_loss` is the loss *reduction*
/// achieved by taking it (spec §4.4's closed-form gain) — despite the
/// name, a larger value is a better candidate.
#[derive(Debug, Clone)]
struct CandidateSplit {
    partial_loss: f64,
    split: Split,
    weights: (f64, f64),
}

/// Everything a node's candidate search needs, borrowed for the duration
/// of one `TreeNode::fit` call tree.
pub struct FitContext<'a> {
    pub pop: &'a dyn Table,
    pub per: &'a dyn Table,
    pub subfeatures: Option<&'a [f64]>,
    pub reducer: &'a dyn Reducer,
    pub config: &'a Config,
    pub target_col: usize,
    /// Current ensemble prediction per population row (zeros for the
    /// first tree).
    pub predictions: &'a [f64],
    pub variant: TreeVariant,
}

impl<'a> FitContext<'a> {
    fn gradient_hessian_per_match(&self, matches: &[Match], loss_function: LossFunction) -> (Vec<f64>, Vec<f64>) {
        let acc = LossAccumulator::new(loss_function, self.config.min_num_samples);
        let mut g = Vec::with_capacity(matches.len());
        let mut h = Vec::with_capacity(matches.len());
        for m in matches {
            let row = m.ix_pop as usize;
            let target = self.pop.target(row, self.target_col);
            let prediction = self.predictions[row];
            let (gi, hi) = acc.gradient_hessian(target, prediction);
            g.push(gi);
            h.push(hi);
        }
        (g, h)
    }
}

/// A leaf: either a plain weight (relboost) or a weight plus a linear
/// correction over rescaled peripheral features (relcit/relmt).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Leaf {
    pub weight: f64,
    pub linear: Option<LinearLeaf>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Internal {
    pub depth: usize,
    pub split: Split,
    pub greater: Box<TreeNode>,
    pub not_greater: Box<TreeNode>,
}

/// Invariant enforced by construction (not by optional fields, unlike the
/// C++ original's `{ split?, child_greater?, child_not_greater? }`): a node
/// either carries a split and both children, or is a leaf. There is no
/// representable state in between.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum TreeNode {
    Leaf(Leaf),
    Internal(Internal),
}

impl TreeNode {
    fn leaf(weight: f64) -> Self {
        TreeNode::Leaf(Leaf { weight, linear: None })
    }

    /// Recursive fit entry point (spec §4.5's state machine: Candidate
    /// search -> Select -> Validate -> Commit -> Recurse).
    pub fn fit(matches: &mut [Match], depth: usize, parent_weight: f64, ctx: &FitContext) -> TreeNode {
        if matches.len() < 2 * ctx.config.min_num_samples {
            return Self::finalize_leaf(matches, parent_weight, ctx);
        }
        if ctx.config.max_depth != 0 && depth >= ctx.config.max_depth {
            return Self::finalize_leaf(matches, parent_weight, ctx);
        }

        let (g, h) = ctx.gradient_hessian_per_match(matches, ctx.config.loss_function);

        let families = admissible_families(
            ctx.pop.schema(),
            ctx.per.schema(),
            ctx.subfeatures.is_some(),
            ctx.config.delta_t,
            ctx.pop.num_time_stamps() > 0 && ctx.per.num_time_stamps() > 0,
        );

        let candidates: Vec<Option<CandidateSplit>> = families
            .par_iter()
            .map(|instance| search_family(*instance, ctx, matches, &g, &h))
            .collect();

        // Select: highest loss reduction wins; the family list is visited
        // in a fixed order and an equal-gain candidate never displaces an
        // earlier one (spec's "earliest candidate wins ties").
        let mut best: Option<CandidateSplit> = None;
        for candidate in candidates.into_iter().flatten() {
            let replace = match &best {
                None => true,
                Some(current) => candidate.partial_loss > current.partial_loss,
            };
            if replace {
                best = Some(candidate);
            }
        }

        let Some(best) = best else {
            return Self::finalize_leaf(matches, parent_weight, ctx);
        };

        // Validate: fully re-evaluate the chosen split with calc_all. The
        // regroup must happen before `partition` reorders `matches` in
        // place, since `g`/`h` are indexed against the pre-partition order.
        let (left_g, left_h, right_g, right_h) = regroup(matches, &g, &h, &best.split, ctx);
        let boundary = left_g.len();
        partition(&best.split, ctx.pop, ctx.per, ctx.subfeatures, matches);

        let mut acc = LossAccumulator::new(ctx.config.loss_function, ctx.config.min_num_samples);
        let all_g = concat(&left_g, &right_g);
        let all_h = concat(&left_h, &right_h);
        acc.reset(&all_g, &all_h);
        let (loss_reduction, weights) = acc
            .evaluate_candidate(Update::CalcAll, &all_g, &all_h, 0, 0, boundary, matches.len())
            .unwrap_or((f64::NEG_INFINITY, best.weights));

        if loss_reduction < ctx.config.gamma {
            return Self::finalize_leaf(matches, parent_weight, ctx);
        }

        acc.commit();

        let (left, right) = matches.split_at_mut(boundary);
        let greater = Box::new(TreeNode::fit(left, depth + 1, weights.0, ctx));
        let not_greater = Box::new(TreeNode::fit(right, depth + 1, weights.1, ctx));

        TreeNode::Internal(Internal { depth, split: best.split, greater, not_greater })
    }

    fn finalize_leaf(matches: &[Match], parent_weight: f64, ctx: &FitContext) -> TreeNode {
        if !ctx.variant.fits_linear_leaves() || matches.is_empty() {
            return Self::leaf(parent_weight);
        }
        let (g, _h) = ctx.gradient_hessian_per_match(matches, ctx.config.loss_function);
        match linear::fit_linear_leaf(matches, ctx.per, &g, parent_weight) {
            Some(linear) => TreeNode::Leaf(Leaf { weight: parent_weight, linear: Some(linear) }),
            None => Self::leaf(parent_weight),
        }
    }

    /// Descends the tree for one match, returning its leaf contribution.
    pub fn predict_match(&self, pop: &dyn Table, per: &dyn Table, subfeatures: Option<&[f64]>, m: Match) -> f64 {
        match self {
            TreeNode::Leaf(leaf) => match &leaf.linear {
                Some(linear) => leaf.weight + linear.predict(per, m),
                None => leaf.weight,
            },
            TreeNode::Internal(node) => {
                if is_greater(&node.split, pop, per, subfeatures, m) {
                    node.greater.predict_match(pop, per, subfeatures, m)
                } else {
                    node.not_greater.predict_match(pop, per, subfeatures, m)
                }
            }
        }
    }

    /// Aggregates every match belonging to one population row by summing
    /// the tree's per-match contribution — the tree's output is a
    /// per-row correction built from however many peripheral rows matched
    /// (spec leaves the match -> row aggregation unstated; sum is the
    /// natural choice for an additive boosting correction, recorded in
    /// DESIGN.md).
    pub fn predict_row(&self, pop: &dyn Table, per: &dyn Table, subfeatures: Option<&[f64]>, row_matches: &[Match]) -> f64 {
        row_matches.iter().map(|&m| self.predict_match(pop, per, subfeatures, m)).sum()
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 0,
            TreeNode::Internal(node) => 1 + node.greater.depth().max(node.not_greater.depth()),
        }
    }
}

fn concat(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// Regroups `g`/`h` (indexed like the pre-partition `matches`) into the
/// post-partition left (`greater`)/right (`not_greater`) order, so the
/// validation step's `calc_all` sees contiguous, correctly-ordered slices.
fn regroup(matches: &[Match], g: &[f64], h: &[f64], split: &Split, ctx: &FitContext) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut left_g = Vec::new();
    let mut left_h = Vec::new();
    let mut right_g = Vec::new();
    let mut right_h = Vec::new();
    for (i, &m) in matches.iter().enumerate() {
        if is_greater(split, ctx.pop, ctx.per, ctx.subfeatures, m) {
            left_g.push(g[i]);
            left_h.push(h[i]);
        } else {
            right_g.push(g[i]);
            right_h.push(h[i]);
        }
    }
    (left_g, left_h, right_g, right_h)
}

fn search_family(instance: FamilyInstance, ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    match instance.family {
        Family::CategoricalPop | Family::CategoricalPer => search_categorical(instance, ctx, matches, g, h),
        Family::SameUnitsCategorical => search_same_units_categorical(instance, ctx, matches, g, h),
        Family::TimeStampsWindow => search_time_window(ctx, matches, g, h),
        _ => search_ordinary(instance, ctx, matches, g, h),
    }
}

fn template_split(instance: FamilyInstance) -> Split {
    Split::numerical(instance.family, instance.column_pop, instance.column_per, 0.0)
}

/// Ordinary threshold families: sort, enumerate critical values, sweep
/// left to right with `calc_diff` (spec §4.5 candidate search).
fn search_ordinary(instance: FamilyInstance, ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    let template = template_split(instance);
    let integer_valued = matches!(
        instance.family,
        Family::DiscretePop | Family::DiscretePer | Family::SameUnitsDiscrete
    );

    if instance.family.is_nan_family() {
        return search_is_nan(instance, ctx, matches, g, h);
    }

    let mut local: Vec<(Match, f64, f64)> = matches.iter().zip(g.iter()).zip(h.iter()).map(|((&m, &gi), &hi)| (m, gi, hi)).collect();
    local.sort_by(|a, b| {
        let ka = crate::split::partition::sort_key(&template, ctx.pop, ctx.per, ctx.subfeatures, a.0);
        let kb = crate::split::partition::sort_key(&template, ctx.pop, ctx.per, ctx.subfeatures, b.0);
        kb.total_cmp(&ka)
    });
    let local_matches: Vec<Match> = local.iter().map(|t| t.0).collect();
    let local_g: Vec<f64> = local.iter().map(|t| t.1).collect();
    let local_h: Vec<f64> = local.iter().map(|t| t.2).collect();

    // `quantile_candidates` returns ascending values; the sweep below walks
    // `local_matches` (sorted descending, since no family routed here sorts
    // ascending) so candidates must be visited largest-first to keep
    // `next_split`'s boundary monotonically non-decreasing.
    let mut candidate_values = quantile_candidates(&template, ctx.pop, ctx.per, ctx.subfeatures, &local_matches, ctx.reducer, integer_valued);
    candidate_values.reverse();

    let mut acc = LossAccumulator::new(ctx.config.loss_function, ctx.config.min_num_samples);
    acc.reset(&local_g, &local_h);

    let mut best: Option<CandidateSplit> = None;
    let mut last_it = 0usize;
    for cv in candidate_values {
        let it = next_split(&template, ctx.pop, ctx.per, ctx.subfeatures, &local_matches, last_it, cv);
        let Some((loss, weights)) = acc.evaluate_candidate(Update::CalcDiff, &local_g, &local_h, 0, last_it, it, local_matches.len()) else {
            last_it = it;
            continue;
        };
        last_it = it;
        let better = best.as_ref().map_or(true, |b| loss > b.partial_loss);
        if better {
            let mut split = template.clone();
            split.critical_value = cv;
            best = Some(CandidateSplit { partial_loss: loss, split, weights });
        }
    }
    best
}

fn search_is_nan(instance: FamilyInstance, ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    let template = template_split(instance);
    let band: Vec<bool> = matches.iter().map(|&m| is_greater(&template, ctx.pop, ctx.per, ctx.subfeatures, m)).collect();
    let total = sum_all(g, h);
    let band_stats = sum_where(g, h, &band);
    score_from_band(total, band_stats, ctx.config.min_num_samples).map(|(loss, weights)| CandidateSplit { partial_loss: loss, split: template, weights })
}

/// Categorical families: enumerate each single category (reverted after),
/// then cumulative prefixes of categories sorted by standalone weight
/// (not reverted — builds "set of categories" splits), per spec §4.5.
fn search_categorical(instance: FamilyInstance, ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    let codes = categorical_codes(&template_split(instance), instance.family, ctx.pop, ctx.per, matches);
    if codes.is_empty() {
        return None;
    }

    let code_of = |m: Match| -> i64 {
        match instance.family {
            Family::CategoricalPop => ctx.pop.categorical(m.ix_pop as usize, instance.column_pop),
            Family::CategoricalPer => ctx.per.categorical(m.ix_per as usize, instance.column_per),
            _ => unreachable!(),
        }
    };

    let total = sum_all(g, h);
    let mut best: Option<CandidateSplit> = None;
    let mut standalone: Vec<(i64, f64)> = Vec::with_capacity(codes.len());

    for &code in &codes {
        let band: Vec<bool> = matches.iter().map(|&m| code_of(m) == code).collect();
        let band_stats = sum_where(g, h, &band);
        standalone.push((code, band_stats.weight()));
        if let Some((loss, weights)) = score_from_band(total, band_stats, ctx.config.min_num_samples) {
            let split = Split::categorical(instance.family, instance.column_pop, instance.column_per, Arc::new(vec![code]));
            let better = best.as_ref().map_or(true, |b| loss > b.partial_loss);
            if better {
                best = Some(CandidateSplit { partial_loss: loss, split, weights });
            }
        }
    }

    standalone.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    let mut prefix = Vec::new();
    for (code, _weight) in standalone {
        prefix.push(code);
        let mut sorted_set = prefix.clone();
        sorted_set.sort_unstable();
        let band: Vec<bool> = matches.iter().map(|&m| sorted_set.binary_search(&code_of(m)).is_ok()).collect();
        let band_stats = sum_where(g, h, &band);
        if let Some((loss, weights)) = score_from_band(total, band_stats, ctx.config.min_num_samples) {
            let split = Split::categorical(instance.family, instance.column_pop, instance.column_per, Arc::new(sorted_set));
            let better = best.as_ref().map_or(true, |b| loss > b.partial_loss);
            if better {
                best = Some(CandidateSplit { partial_loss: loss, split, weights });
            }
        }
    }

    best
}

fn search_same_units_categorical(instance: FamilyInstance, ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    let template = template_split(instance);
    let band: Vec<bool> = matches.iter().map(|&m| is_greater(&template, ctx.pop, ctx.per, ctx.subfeatures, m)).collect();
    let total = sum_all(g, h);
    let band_stats = sum_where(g, h, &band);
    score_from_band(total, band_stats, ctx.config.min_num_samples).map(|(loss, weights)| CandidateSplit { partial_loss: loss, split: template, weights })
}

/// `TimeStampsWindow`: because matches are sorted by `t_pop - t_per`, the
/// in-window set for any candidate critical value is a contiguous band in
/// that order, found here via binary search over prefix sums rather than
/// the accumulator's prefix/suffix sweep (spec §4.2's window predicate is
/// a band, not a one-sided threshold).
fn search_time_window(ctx: &FitContext, matches: &[Match], g: &[f64], h: &[f64]) -> Option<CandidateSplit> {
    let delta_t = ctx.config.delta_t;
    let candidates = time_window_candidates(delta_t, matches, ctx.pop, ctx.per).ok()?;
    if candidates.is_empty() {
        return None;
    }

    let mut indexed: Vec<(f64, f64, f64)> = matches
        .iter()
        .zip(g.iter())
        .zip(h.iter())
        .filter_map(|((&m, &gi), &hi)| {
            let t_pop = ctx.pop.primary_time_stamp(m.ix_pop as usize)?;
            let t_per = ctx.per.primary_time_stamp(m.ix_per as usize)?;
            Some((t_pop - t_per, gi, hi))
        })
        .collect();
    indexed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let diffs: Vec<f64> = indexed.iter().map(|t| t.0).collect();
    let mut prefix_g = vec![0.0; diffs.len() + 1];
    let mut prefix_h = vec![0.0; diffs.len() + 1];
    for (i, &(_, gi, hi)) in indexed.iter().enumerate() {
        prefix_g[i + 1] = prefix_g[i] + gi;
        prefix_h[i + 1] = prefix_h[i] + hi;
    }

    let total = sum_all(g, h);
    let mut best: Option<CandidateSplit> = None;
    for &cv in &candidates {
        let lo = diffs.partition_point(|&d| d <= cv);
        let hi = diffs.partition_point(|&d| d <= cv + delta_t);
        let band_n = hi - lo;
        let band = crate::loss::LeafStats { g: prefix_g[hi] - prefix_g[lo], h: prefix_h[hi] - prefix_h[lo], n: band_n };
        if let Some((loss, weights)) = score_from_band(total, band, ctx.config.min_num_samples) {
            let split = Split::time_window(cv, delta_t);
            let better = best.as_ref().map_or(true, |b| loss > b.partial_loss);
            if better {
                best = Some(CandidateSplit { partial_loss: loss, split, weights });
            }
        }
    }
    best
}

fn sum_all(g: &[f64], h: &[f64]) -> crate::loss::LeafStats {
    let mut acc = crate::loss::LeafStats::default();
    for i in 0..g.len() {
        acc.g += g[i];
        acc.h += h[i];
        acc.n += 1;
    }
    acc
}

fn sum_where(g: &[f64], h: &[f64], selector: &[bool]) -> crate::loss::LeafStats {
    let mut acc = crate::loss::LeafStats::default();
    for i in 0..g.len() {
        if selector[i] {
            acc.g += g[i];
            acc.h += h[i];
            acc.n += 1;
        }
    }
    acc
}

/// Shared closed-form gain for a two-way split into `band` ("greater") and
/// its complement (spec's loss-reduction formula, generalized from the
/// accumulator's prefix/suffix case to an arbitrary selector).
fn score_from_band(total: crate::loss::LeafStats, band: crate::loss::LeafStats, min_num_samples: usize) -> Option<(f64, (f64, f64))> {
    let rest_n = total.n - band.n;
    if band.n < min_num_samples || rest_n < min_num_samples {
        return None;
    }
    let rest_g = total.g - band.g;
    let rest_h = total.h - band.h;
    let score = |gv: f64, hv: f64| if hv.abs() < 1e-12 { 0.0 } else { gv * gv / hv };
    let loss_reduction = 0.5 * (score(band.g, band.h) + score(rest_g, rest_h) - score(total.g, total.h));
    let weight = |gv: f64, hv: f64| if hv.abs() < 1e-12 { 0.0 } else { gv / hv };
    Some((loss_reduction, (weight(band.g, band.h), weight(rest_g, rest_h))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LossFunction};
    use crate::table::{ColumnMeta, InMemoryTable, Schema};

    fn cfg() -> Config {
        let mut c = Config::default();
        c.allow_lagged_targets = Some(true);
        c.min_num_samples = 1;
        c.max_depth = 3;
        c.gamma = 0.0;
        c
    }

    // Spec §8 scenario S2. Three distinct categories so the winning split
    // isn't a symmetric two-way tie (any single-category split against its
    // complement scores identically under the gain formula).
    #[test]
    fn s2_categorical_split_found() {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], ..Default::default() };
        let mut pop = InMemoryTable::new(3, pop_schema);
        pop.targets[0] = vec![10.0, 10.0, 0.0];

        let per_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], categoricals: vec![ColumnMeta::new("cat", "")], ..Default::default() };
        let mut per = InMemoryTable::new(4, per_schema);
        per.categoricals[0] = vec![7, 7, 1, 2];

        let matches = vec![Match::new(0, 0), Match::new(1, 1), Match::new(2, 2), Match::new(2, 3)];
        let predictions = vec![0.0, 0.0, 0.0];
        let config = cfg();
        let reducer = crate::reducer::SingleProcessReducer;
        let ctx = FitContext {
            pop: &pop,
            per: &per,
            subfeatures: None,
            reducer: &reducer,
            config: &config,
            target_col: 0,
            predictions: &predictions,
            variant: TreeVariant::Relboost,
        };

        let mut matches = matches;
        let tree = TreeNode::fit(&mut matches, 0, 0.0, &ctx);
        match tree {
            TreeNode::Internal(node) => {
                assert_eq!(node.split.family, Family::CategoricalPer);
                assert_eq!(node.split.categories_used.as_deref(), Some(&vec![7]));
            }
            TreeNode::Leaf(_) => panic!("expected a split"),
        }
    }

    #[test]
    fn depth_respects_max_depth() {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], numericals: vec![ColumnMeta::new("x", "")], ..Default::default() };
        let mut pop = InMemoryTable::new(4, pop_schema);
        pop.targets[0] = vec![0.0, 1.0, 2.0, 3.0];
        pop.numericals[0] = vec![0.0, 1.0, 2.0, 3.0];

        let per_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], numericals: vec![ColumnMeta::new("v", "")], ..Default::default() };
        let mut per = InMemoryTable::new(4, per_schema);
        per.numericals[0] = vec![1.0, 2.0, 3.0, 4.0];

        let matches: Vec<Match> = (0..4).map(|i| Match::new(i, i)).collect();
        let predictions = vec![0.0; 4];
        let mut config = cfg();
        config.max_depth = 1;
        config.min_num_samples = 1;
        let reducer = crate::reducer::SingleProcessReducer;
        let ctx = FitContext { pop: &pop, per: &per, subfeatures: None, reducer: &reducer, config: &config, target_col: 0, predictions: &predictions, variant: TreeVariant::Relboost };

        let mut matches = matches;
        let tree = TreeNode::fit(&mut matches, 0, 0.0, &ctx);
        assert!(tree.depth() <= 1);
    }
}
