//! Propositionalization engine (spec §4.7, "FastProp"): enumerates
//! `aggregation x condition x column` feature templates over a peripheral
//! table, evaluates each against the target via R², and keeps the
//! top-`num_features` ranked templates.

mod vocab;

pub use vocab::Vocabulary;

use crossbeam::atomic::AtomicCell;
use rayon::prelude::*;

use crate::config::{Aggregation, Config};
use crate::matching::Match;
use crate::table::Table;

/// One condition a feature template can be gated by: unconditional, or
/// "peripheral categorical column equals code" (spec §4.7's condition
/// axis — same-units conditions are a straightforward extension left for
/// a future column template and are not enumerated here, noted in
/// DESIGN.md).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    None,
    CategoricalEquals { column: usize, code: i64 },
}

/// One aggregation x condition x column feature template (spec §4.7's
/// `AbstractFeature`), not yet bound to a fitted value.
#[derive(Debug, Clone)]
pub struct AbstractFeature {
    pub aggregation: Aggregation,
    pub condition: Condition,
    pub column: usize,
}

/// A feature template ranked and kept after fitting, with the R² it
/// achieved against the target at fit time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FittedFeature {
    pub aggregation: Aggregation,
    pub condition_column: Option<usize>,
    pub condition_code: Option<i64>,
    pub column: usize,
    pub r_squared: f64,
}

impl FittedFeature {
    fn condition(&self) -> Condition {
        match (self.condition_column, self.condition_code) {
            (Some(column), Some(code)) => Condition::CategoricalEquals { column, code },
            _ => Condition::None,
        }
    }
}

/// A fitted propositionalization model: the ranked list of templates plus
/// how many to actually transform with.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FastProp {
    pub features: Vec<FittedFeature>,
}

/// Column indices (in the combined numerical-then-discrete numbering
/// `numeric_value` uses) eligible for aggregation. A unit string containing
/// "comparison only" marks a column as join/comparison-only — spec §4.7
/// excludes such columns from aggregation while still allowing them to
/// participate in condition generation (handled separately, since
/// conditions here are drawn from categorical columns only).
fn aggregable_numeric_columns(per: &dyn Table) -> Vec<usize> {
    let schema = per.schema();
    let numericals = schema.numericals.iter().enumerate().filter(|(_, meta)| !meta.comparison_only()).map(|(c, _)| c);
    let discretes = schema
        .discretes
        .iter()
        .enumerate()
        .filter(|(_, meta)| !meta.comparison_only())
        .map(|(c, _)| per.num_numericals() + c);
    numericals.chain(discretes).collect()
}

/// Peripheral categorical columns not paired by unit with any population
/// categorical column (spec §4.7: `count_distinct`/`count_minus_count_distinct`
/// "apply only to non-same-unit categorical columns").
fn non_same_units_categoricals(pop: &dyn Table, per: &dyn Table) -> Vec<usize> {
    let pop_units: std::collections::HashSet<&str> =
        pop.schema().categoricals.iter().map(|m| m.unit.as_str()).filter(|u| !u.is_empty()).collect();
    per.schema()
        .categoricals
        .iter()
        .enumerate()
        .filter(|(_, meta)| meta.unit.is_empty() || !pop_units.contains(meta.unit.as_str()))
        .map(|(c, _)| c)
        .collect()
}

fn enumerate_templates(pop: &dyn Table, per: &dyn Table, config: &Config) -> Vec<AbstractFeature> {
    let mut templates = Vec::new();
    let numeric_like_cols = aggregable_numeric_columns(per);

    for &agg in &config.aggregations {
        if agg.requires_time_stamps() && per.num_time_stamps() == 0 {
            continue;
        }
        if agg.is_categorical_only() {
            for c in non_same_units_categoricals(pop, per) {
                templates.push(AbstractFeature { aggregation: agg, condition: Condition::None, column: c });
            }
            continue;
        }
        for &c in &numeric_like_cols {
            templates.push(AbstractFeature { aggregation: agg, condition: Condition::None, column: c });
        }
        // Conditioned variants: one feature per (aggregation, numeric
        // column, categorical value) combination, up to `n_most_frequent`
        // categories per categorical column (spec §4.7).
        for cat_col in 0..per.num_categoricals() {
            for &code in &top_categories(per, cat_col, config.n_most_frequent) {
                for &c in &numeric_like_cols {
                    templates.push(AbstractFeature {
                        aggregation: agg,
                        condition: Condition::CategoricalEquals { column: cat_col, code },
                        column: c,
                    });
                }
            }
        }
    }
    templates
}

fn top_categories(per: &dyn Table, column: usize, n_most_frequent: usize) -> Vec<i64> {
    use std::collections::HashMap;
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for row in 0..per.nrows() {
        *counts.entry(per.categorical(row, column)).or_insert(0) += 1;
    }
    let mut pairs: Vec<(i64, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs.truncate(n_most_frequent);
    pairs.into_iter().map(|(code, _)| code).collect()
}

fn numeric_value(per: &dyn Table, row: usize, column: usize) -> f64 {
    if column < per.num_numericals() {
        per.numerical(row, column)
    } else {
        per.discrete(row, column - per.num_numericals())
    }
}

/// Evaluates one template against one population row's matched peripheral
/// rows, applying `condition` as a row filter first.
fn evaluate_row(per: &dyn Table, matches: &[Match], template: &AbstractFeature, pop_time_stamp: Option<f64>) -> f64 {
    let filtered: Vec<u32> = matches
        .iter()
        .filter(|m| match &template.condition {
            Condition::None => true,
            Condition::CategoricalEquals { column, code } => per.categorical(m.ix_per as usize, *column) == *code,
        })
        .map(|m| m.ix_per)
        .collect();

    aggregate(per, &filtered, template.aggregation, template.column, pop_time_stamp)
}

/// All 30 aggregations from spec §6's enumerated list. Returns `0.0` for
/// an empty input wherever the original doesn't define a natural value
/// (spec §9's resolved open question for `AvgTimeBetween`: fewer than two
/// matches also returns `0.0` by the same convention).
fn aggregate(per: &dyn Table, rows: &[u32], agg: Aggregation, column: usize, pop_time_stamp: Option<f64>) -> f64 {
    if rows.is_empty() && !matches!(agg, Aggregation::Count | Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct) {
        return 0.0;
    }

    match agg {
        Aggregation::Count => rows.len() as f64,
        Aggregation::CountDistinct => {
            let mut v: Vec<i64> = rows.iter().map(|&r| per.categorical(r as usize, column)).collect();
            v.sort_unstable();
            v.dedup();
            v.len() as f64
        }
        Aggregation::CountMinusCountDistinct => {
            let mut v: Vec<i64> = rows.iter().map(|&r| per.categorical(r as usize, column)).collect();
            let total = v.len();
            v.sort_unstable();
            v.dedup();
            (total - v.len()) as f64
        }
        Aggregation::CountDistinctOverCount => {
            let mut v: Vec<i64> = rows.iter().map(|&r| per.categorical(r as usize, column)).collect();
            let total = v.len();
            v.sort_unstable();
            v.dedup();
            if total == 0 {
                0.0
            } else {
                v.len() as f64 / total as f64
            }
        }
        Aggregation::Sum => values(per, rows, column).iter().sum(),
        Aggregation::Avg => mean(&values(per, rows, column)),
        Aggregation::Min => values(per, rows, column).into_iter().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values(per, rows, column).into_iter().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::NumMin => {
            let v = values(per, rows, column);
            let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
            v.iter().filter(|&&x| x == min).count() as f64
        }
        Aggregation::NumMax => {
            let v = values(per, rows, column);
            let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            v.iter().filter(|&&x| x == max).count() as f64
        }
        Aggregation::CountAboveMean => {
            let v = values(per, rows, column);
            let m = mean(&v);
            v.iter().filter(|&&x| x > m).count() as f64
        }
        Aggregation::CountBelowMean => {
            let v = values(per, rows, column);
            let m = mean(&v);
            v.iter().filter(|&&x| x < m).count() as f64
        }
        Aggregation::Median => quantile(&mut values(per, rows, column), 0.5),
        Aggregation::Mode => {
            let v = values(per, rows, column);
            mode(&v)
        }
        Aggregation::Stddev => stddev(&values(per, rows, column)),
        Aggregation::Var => variance(&values(per, rows, column)),
        Aggregation::VariationCoefficient => {
            let v = values(per, rows, column);
            let m = mean(&v);
            if m.abs() < 1e-12 {
                0.0
            } else {
                stddev(&v) / m
            }
        }
        Aggregation::Skew => moment_ratio(&values(per, rows, column), 3),
        Aggregation::Kurtosis => moment_ratio(&values(per, rows, column), 4),
        Aggregation::Q1 => quantile(&mut values(per, rows, column), 0.01),
        Aggregation::Q5 => quantile(&mut values(per, rows, column), 0.05),
        Aggregation::Q10 => quantile(&mut values(per, rows, column), 0.10),
        Aggregation::Q25 => quantile(&mut values(per, rows, column), 0.25),
        Aggregation::Q75 => quantile(&mut values(per, rows, column), 0.75),
        Aggregation::Q90 => quantile(&mut values(per, rows, column), 0.90),
        Aggregation::Q95 => quantile(&mut values(per, rows, column), 0.95),
        Aggregation::Q99 => quantile(&mut values(per, rows, column), 0.99),
        Aggregation::First | Aggregation::Last => {
            let Some(pop_ts) = pop_time_stamp else { return 0.0 };
            let mut best: Option<(f64, f64)> = None; // (time_stamp, value)
            for &r in rows {
                let ts = per.primary_time_stamp(r as usize).unwrap_or(f64::NEG_INFINITY);
                if ts > pop_ts {
                    continue;
                }
                let take = match (&best, agg) {
                    (None, _) => true,
                    (Some((bts, _)), Aggregation::First) => ts < *bts,
                    (Some((bts, _)), Aggregation::Last) => ts > *bts,
                    _ => unreachable!(),
                };
                if take {
                    best = Some((ts, numeric_value(per, r as usize, column)));
                }
            }
            best.map(|(_, v)| v).unwrap_or(0.0)
        }
        Aggregation::AvgTimeBetween => {
            let mut stamps: Vec<f64> = rows.iter().filter_map(|&r| per.primary_time_stamp(r as usize)).collect();
            if stamps.len() < 2 {
                return 0.0;
            }
            stamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let span = stamps.last().unwrap() - stamps.first().unwrap();
            span / (stamps.len() - 1) as f64
        }
        Aggregation::Trend => {
            let mut points: Vec<(f64, f64)> = rows
                .iter()
                .filter_map(|&r| per.primary_time_stamp(r as usize).map(|t| (t, numeric_value(per, r as usize, column))))
                .collect();
            if points.len() < 2 {
                return 0.0;
            }
            points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            linear_slope(&points)
        }
    }
}

fn values(per: &dyn Table, rows: &[u32], column: usize) -> Vec<f64> {
    rows.iter().map(|&r| numeric_value(per, r as usize, column)).collect()
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

fn variance(v: &[f64]) -> f64 {
    if v.len() < 2 {
        return 0.0;
    }
    let m = mean(v);
    v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (v.len() - 1) as f64
}

fn stddev(v: &[f64]) -> f64 {
    variance(v).sqrt()
}

fn moment_ratio(v: &[f64], order: i32) -> f64 {
    if v.len() < 2 {
        return 0.0;
    }
    let m = mean(v);
    let sd = stddev(v);
    if sd.abs() < 1e-12 {
        return 0.0;
    }
    v.iter().map(|x| ((x - m) / sd).powi(order)).sum::<f64>() / v.len() as f64
}

fn quantile(v: &mut [f64], q: f64) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((v.len() - 1) as f64 * q).round() as usize;
    v[idx.min(v.len() - 1)]
}

fn mode(v: &[f64]) -> f64 {
    use std::collections::HashMap;
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for &x in v {
        let entry = counts.entry(x.to_bits()).or_insert((x, 0));
        entry.1 += 1;
    }
    counts.values().max_by_key(|&&(_, c)| c).map(|&(x, _)| x).unwrap_or(0.0)
}

fn linear_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|p| p.0).sum();
    let sum_y: f64 = points.iter().map(|p| p.1).sum();
    let sum_xy: f64 = points.iter().map(|p| p.0 * p.1).sum();
    let sum_xx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < 1e-12 {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denom
    }
}

fn r_squared(values: &[f64], target: &[f64]) -> f64 {
    let m = mean(target);
    let ss_tot: f64 = target.iter().map(|y| (y - m).powi(2)).sum();
    if ss_tot.abs() < 1e-12 {
        return 0.0;
    }
    let slope_intercept = fit_line(values, target);
    let ss_res: f64 = values
        .iter()
        .zip(target.iter())
        .map(|(&x, &y)| {
            let pred = slope_intercept.0 + slope_intercept.1 * x;
            (y - pred).powi(2)
        })
        .sum();
    (1.0 - ss_res / ss_tot).max(0.0)
}

fn fit_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    if n < 2.0 {
        return (mean(y), 0.0);
    }
    let mx = mean(x);
    let my = mean(y);
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..x.len() {
        num += (x[i] - mx) * (y[i] - my);
        den += (x[i] - mx).powi(2);
    }
    if den.abs() < 1e-12 {
        return (my, 0.0);
    }
    let slope = num / den;
    (my - slope * mx, slope)
}

impl FastProp {
    /// Enumerates every admissible template, evaluates each against the
    /// target by R², and keeps the top `config.num_features` (spec §4.7).
    pub fn fit(population: &dyn Table, peripheral: &dyn Table, row_matches: &[Vec<Match>], target_col: usize, config: &Config) -> Self {
        let templates = enumerate_templates(population, peripheral, config);
        let target: Vec<f64> = (0..population.nrows()).map(|i| population.target(i, target_col)).collect();
        let pop_stamps: Vec<Option<f64>> = (0..population.nrows()).map(|i| population.primary_time_stamp(i)).collect();

        let mut scored: Vec<FittedFeature> = templates
            .par_iter()
            .map(|template| {
                let column_values: Vec<f64> = row_matches
                    .iter()
                    .zip(pop_stamps.iter())
                    .map(|(matches, &ts)| {
                        let v = evaluate_row(peripheral, matches, template, ts);
                        if v.is_finite() {
                            v
                        } else {
                            0.0
                        }
                    })
                    .collect();
                let r2 = r_squared(&column_values, &target);
                let (condition_column, condition_code) = match template.condition {
                    Condition::None => (None, None),
                    Condition::CategoricalEquals { column, code } => (Some(column), Some(code)),
                };
                FittedFeature { aggregation: template.aggregation, condition_column, condition_code, column: template.column, r_squared: r2 }
            })
            .collect();

        scored.sort_by(|a, b| b.r_squared.partial_cmp(&a.r_squared).unwrap());
        scored.truncate(config.num_features);

        FastProp { features: scored }
    }

    /// Materializes every kept feature for one population row's matches.
    pub fn transform_row(&self, peripheral: &dyn Table, matches: &[Match], pop_time_stamp: Option<f64>) -> Vec<f64> {
        self.features
            .iter()
            .map(|f| {
                let template = AbstractFeature { aggregation: f.aggregation, condition: f.condition(), column: f.column };
                let v = evaluate_row(peripheral, matches, &template, pop_time_stamp);
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Transforms every population row, sharded across the worker pool by
    /// row range (spec §4.7), logging progress every 5000 rows completed.
    pub fn transform(&self, population: &dyn Table, peripheral: &dyn Table, row_matches: &[Vec<Match>]) -> Vec<Vec<f64>> {
        let total = row_matches.len();
        let rows_done = AtomicCell::new(0usize);
        row_matches
            .par_iter()
            .enumerate()
            .map(|(i, matches)| {
                let ts = population.primary_time_stamp(i);
                let row = self.transform_row(peripheral, matches, ts);
                let done = rows_done.fetch_add(1) + 1;
                if done % 5000 == 0 {
                    tracing::info!(rows_done = done, total, "fastprop transform progress");
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnMeta, InMemoryTable, Schema};

    fn cfg() -> Config {
        let mut c = Config::default();
        c.allow_lagged_targets = Some(true);
        c.num_features = 3;
        c
    }

    // Spec §4.7: a "comparison only" unit tag excludes a numerical column
    // from aggregation entirely, even though it remains a legal aggregation
    // input for every other column.
    #[test]
    fn comparison_only_column_is_excluded_from_aggregation() {
        let per_schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            numericals: vec![ColumnMeta::new("v", ""), ColumnMeta::new("join_dist", "comparison only")],
            ..Default::default()
        };
        let per = InMemoryTable::new(1, per_schema);
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], ..Default::default() };
        let pop = InMemoryTable::new(1, pop_schema);
        let config = cfg();
        let templates = enumerate_templates(&pop, &per, &config);
        assert!(templates.iter().all(|t| t.column != 1), "comparison-only column must not appear as an aggregation input");
        assert!(templates.iter().any(|t| t.column == 0), "the ordinary numerical column should still be aggregated");
    }

    // Spec §4.7: count_distinct / count_minus_count_distinct apply only to
    // peripheral categorical columns that are not same-units-paired with a
    // population categorical column.
    #[test]
    fn same_units_categorical_is_excluded_from_count_distinct() {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], categoricals: vec![ColumnMeta::new("city", "city_name")], ..Default::default() };
        let pop = InMemoryTable::new(1, pop_schema);

        let per_schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            categoricals: vec![ColumnMeta::new("c1", "city_name"), ColumnMeta::new("c2", "color_name")],
            ..Default::default()
        };
        let per = InMemoryTable::new(1, per_schema);

        let mut config = cfg();
        config.aggregations = vec![Aggregation::CountDistinct];
        let templates = enumerate_templates(&pop, &per, &config);
        assert!(templates.iter().all(|t| t.column != 0), "same-units categorical column must be excluded");
        assert!(templates.iter().any(|t| t.column == 1), "non-same-units categorical column should still be eligible");
    }

    #[test]
    fn ranks_count_feature_highest_when_perfectly_correlated() {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], ..Default::default() };
        let mut pop = InMemoryTable::new(3, pop_schema);
        pop.targets[0] = vec![1.0, 2.0, 3.0];

        let per_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], numericals: vec![ColumnMeta::new("v", "")], ..Default::default() };
        let per = InMemoryTable::new(6, per_schema);

        let row_matches = vec![
            vec![Match::new(0, 0)],
            vec![Match::new(1, 1), Match::new(1, 2)],
            vec![Match::new(2, 3), Match::new(2, 4), Match::new(2, 5)],
        ];

        let config = cfg();
        let model = FastProp::fit(&pop, &per, &row_matches, 0, &config);
        assert!(!model.features.is_empty());
        assert_eq!(model.features[0].aggregation, Aggregation::Count);
        assert!(model.features[0].r_squared > 0.99);
    }

    #[test]
    fn avg_time_between_is_zero_for_fewer_than_two_matches() {
        let per_schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            time_stamps: vec![ColumnMeta::new("t", "")],
            ..Default::default()
        };
        let mut per = InMemoryTable::new(1, per_schema);
        per.time_stamps[0] = vec![10.0];
        let v = aggregate(&per, &[0], Aggregation::AvgTimeBetween, 0, None);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn transform_row_matches_feature_count() {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], ..Default::default() };
        let mut pop = InMemoryTable::new(2, pop_schema);
        pop.targets[0] = vec![1.0, 5.0];

        let per_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], numericals: vec![ColumnMeta::new("v", "")], ..Default::default() };
        let mut per = InMemoryTable::new(3, per_schema);
        per.numericals[0] = vec![1.0, 2.0, 3.0];

        let row_matches = vec![vec![Match::new(0, 0)], vec![Match::new(1, 1), Match::new(1, 2)]];
        let config = cfg();
        let model = FastProp::fit(&pop, &per, &row_matches, 0, &config);

        for matches in &row_matches {
            let row = model.transform_row(&per, matches, None);
            assert_eq!(row.len(), model.features.len());
        }
    }
}
