//! Category-to-target mapping preprocessor (spec §4.8).
//!
//! Fits one `key -> per-target aggregate vector` table per categorical,
//! discrete, or text column of a peripheral table, where the key's
//! aggregate is computed over the population rows reachable by walking the
//! join chain up from the matching peripheral rows. Mappings on
//! sub-joined (chained) peripherals are fit first and applied before the
//! mapping on their parent, so a chain is walked most-recently-joined
//! first both at fit and at transform time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Aggregation, Config};
use crate::matching::Match;
use crate::propositional::Vocabulary;
use crate::table::{ColumnMeta, Schema, Table};

/// Which column a mapping's key is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MappedColumn {
    Categorical(usize),
    Discrete(usize),
    Text(usize),
}

/// A fitted mapping for one peripheral column: `key -> per-target
/// aggregate vector`, vector length `num_targets * aggregations.len()`
/// for every entry (spec §3's mapping-entry invariant).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Mapping {
    pub column: MappedColumn,
    pub aggregations: Vec<Aggregation>,
    pub num_targets: usize,
    pub depth: usize,
    entries: HashMap<i64, Vec<f64>>,
    vocabulary: Option<Arc<Vocabulary>>,
}

fn discrete_key(value: f64) -> i64 {
    value.round() as i64
}

/// Inverts a population-row-indexed match array into a peripheral-row
/// index: `per_row -> population rows matching it`. Needed because
/// fitting walks the join chain upward (peripheral row known, population
/// rows sought), the opposite direction `row_matches` is stored in.
fn invert(row_matches: &[Vec<Match>], per_nrows: usize) -> Vec<Vec<usize>> {
    let mut inverted = vec![Vec::new(); per_nrows];
    for matches in row_matches {
        for m in matches {
            inverted[m.ix_per as usize].push(m.ix_pop as usize);
        }
    }
    inverted
}

fn aggregate_targets(population: &dyn Table, pop_rows: &[usize], aggregations: &[Aggregation]) -> Vec<f64> {
    let mut out = Vec::with_capacity(population.num_targets() * aggregations.len());
    for target_col in 0..population.num_targets() {
        let values: Vec<f64> = pop_rows.iter().map(|&r| population.target(r, target_col)).collect();
        for &agg in aggregations {
            out.push(scalar_aggregate(&values, agg));
        }
    }
    out
}

/// A reduced subset of the propositional engine's aggregations that make
/// sense over an unordered population-row set (mapping has no peripheral
/// time stamps to order by, so `first`/`last`/`avg_time_between`/`trend`
/// fall back to `0.0`).
fn scalar_aggregate(values: &[f64], agg: Aggregation) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    match agg {
        Aggregation::Count => n,
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Avg => mean,
        Aggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Median => {
            let mut v = values.to_vec();
            v.sort_by(|a, b| a.partial_cmp(b).unwrap());
            v[v.len() / 2]
        }
        Aggregation::Stddev | Aggregation::Var => {
            if values.len() < 2 {
                0.0
            } else {
                let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                if agg == Aggregation::Var {
                    var
                } else {
                    var.sqrt()
                }
            }
        }
        _ => mean,
    }
}

impl Mapping {
    /// Fits one mapping. `row_matches` gives, per population row, the
    /// matching rows in `peripheral` at this join level. `min_freq` is the
    /// minimum count of distinct *peripheral* rows carrying a key for that
    /// key to produce an entry (spec §8 scenario S5).
    pub fn fit(peripheral: &dyn Table, population: &dyn Table, row_matches: &[Vec<Match>], column: MappedColumn, config: &Config, depth: usize, vocabulary: Option<Arc<Vocabulary>>) -> Self {
        let inverted = invert(row_matches, peripheral.nrows());
        let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();

        match column {
            MappedColumn::Categorical(col) => {
                for row in 0..peripheral.nrows() {
                    groups.entry(peripheral.categorical(row, col)).or_default().push(row);
                }
            }
            MappedColumn::Discrete(col) => {
                for row in 0..peripheral.nrows() {
                    groups.entry(discrete_key(peripheral.discrete(row, col))).or_default().push(row);
                }
            }
            MappedColumn::Text(col) => {
                let vocab = vocabulary.as_ref().expect("text mapping requires a vocabulary");
                for row in 0..peripheral.nrows() {
                    let token = peripheral.text(row, col);
                    if token >= 0 {
                        groups.entry(token).or_default().push(row);
                    }
                }
            }
        }

        let mut entries = HashMap::with_capacity(groups.len());
        for (key, per_rows) in groups {
            if per_rows.len() < config.min_freq {
                continue;
            }
            let mut pop_rows: Vec<usize> = per_rows.iter().flat_map(|&r| inverted[r].iter().copied()).collect();
            pop_rows.sort_unstable();
            pop_rows.dedup();
            if pop_rows.is_empty() {
                continue;
            }
            entries.insert(key, aggregate_targets(population, &pop_rows, &config.aggregations));
        }

        Mapping { column, aggregations: config.aggregations.clone(), num_targets: population.num_targets(), depth, entries, vocabulary }
    }

    fn vector_len(&self) -> usize {
        self.num_targets * self.aggregations.len()
    }

    /// Looks up one peripheral row's mapped vector. An unknown key (never
    /// seen at fit time, or pruned by `min_freq`) contributes all zeros
    /// (spec §7: "unknown categorical values... produce a 0 contribution").
    pub fn transform_row(&self, peripheral: &dyn Table, row: usize) -> Vec<f64> {
        match self.column {
            MappedColumn::Categorical(col) => self.entries.get(&peripheral.categorical(row, col)).cloned().unwrap_or_else(|| vec![0.0; self.vector_len()]),
            MappedColumn::Discrete(col) => self.entries.get(&discrete_key(peripheral.discrete(row, col))).cloned().unwrap_or_else(|| vec![0.0; self.vector_len()]),
            MappedColumn::Text(col) => {
                self.vocabulary.as_ref().expect("text mapping requires a vocabulary");
                let token = peripheral.text(row, col);
                if token < 0 {
                    return vec![0.0; self.vector_len()];
                }
                self.entries.get(&token).cloned().unwrap_or_else(|| vec![0.0; self.vector_len()])
            }
        }
    }

    /// Staging column names for this mapping's output vector, encoding the
    /// original column, the chain depth, and the (target, aggregation)
    /// pair each slot came from (spec §4.8's staging-name contract).
    pub fn staging_names(&self) -> Vec<String> {
        let column_tag = match self.column {
            MappedColumn::Categorical(c) => format!("categorical{c}"),
            MappedColumn::Discrete(c) => format!("discrete{c}"),
            MappedColumn::Text(c) => format!("text{c}"),
        };
        let mut names = Vec::with_capacity(self.vector_len());
        for target in 0..self.num_targets {
            for agg in &self.aggregations {
                names.push(format!("mapping.depth{}.{}.target{}.{:?}", self.depth, column_tag, target, agg));
            }
        }
        names
    }
}

/// A whole peripheral table's worth of fitted mappings, one per eligible
/// column, plus the token vocabularies used by its text columns.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MappingTable {
    pub mappings: Vec<Mapping>,
}

impl MappingTable {
    /// Fits a mapping for every categorical, discrete, and text column of
    /// `peripheral` at join depth `depth` (depth 0 is the immediate
    /// peripheral of the population; deeper values are sub-joined tables,
    /// fit and applied most-recently-joined first per spec §4.8).
    pub fn fit(peripheral: &dyn Table, population: &dyn Table, row_matches: &[Vec<Match>], config: &Config, depth: usize, text_documents: impl Fn(usize) -> String) -> Self {
        let mut mappings = Vec::new();
        let schema = peripheral.schema();

        for c in 0..schema.categoricals.len() {
            mappings.push(Mapping::fit(peripheral, population, row_matches, MappedColumn::Categorical(c), config, depth, None));
        }
        for c in 0..schema.discretes.len() {
            mappings.push(Mapping::fit(peripheral, population, row_matches, MappedColumn::Discrete(c), config, depth, None));
        }
        for c in 0..schema.text.len() {
            let docs: Vec<String> = (0..peripheral.nrows()).map(&text_documents).collect();
            let vocab = Arc::new(Vocabulary::fit(docs.iter().map(String::as_str), config.min_df, config.vocab_size));
            mappings.push(Mapping::fit(peripheral, population, row_matches, MappedColumn::Text(c), config, depth, Some(vocab)));
        }

        MappingTable { mappings }
    }

    /// Concatenates every mapping's vector for one peripheral row.
    pub fn transform_row(&self, peripheral: &dyn Table, row: usize) -> Vec<f64> {
        self.mappings.iter().flat_map(|m| m.transform_row(peripheral, row)).collect()
    }

    pub fn staging_names(&self) -> Vec<String> {
        self.mappings.iter().flat_map(Mapping::staging_names).collect()
    }
}

/// Wraps a peripheral table with its fitted mapping's output appended as
/// extra numerical columns (spec §2: "joins them back as numerical
/// columns"; spec §4.8's staging-column contract). Every other role is
/// passed through unchanged; the mapping's columns are always appended
/// after the backing table's own numericals, so existing numerical column
/// indices keep meaning and only grow new ones past `backing_numericals`.
pub struct MappingAugmentedTable {
    backing: Arc<dyn Table>,
    mapping: MappingTable,
    schema: Schema,
    backing_numericals: usize,
}

impl MappingAugmentedTable {
    pub fn new(backing: Arc<dyn Table>, mapping: MappingTable) -> Self {
        let backing_numericals = backing.num_numericals();
        let mut schema = backing.schema().clone();
        for name in mapping.staging_names() {
            schema.numericals.push(ColumnMeta::new(name, ""));
        }
        Self { backing, mapping, schema, backing_numericals }
    }
}

impl Table for MappingAugmentedTable {
    fn nrows(&self) -> usize {
        self.backing.nrows()
    }
    fn schema(&self) -> &Schema {
        &self.schema
    }
    fn join_key(&self, row: usize, col: usize) -> i64 {
        self.backing.join_key(row, col)
    }
    fn categorical(&self, row: usize, col: usize) -> i64 {
        self.backing.categorical(row, col)
    }
    fn discrete(&self, row: usize, col: usize) -> f64 {
        self.backing.discrete(row, col)
    }
    fn numerical(&self, row: usize, col: usize) -> f64 {
        if col < self.backing_numericals {
            self.backing.numerical(row, col)
        } else {
            self.mapping.transform_row(self.backing.as_ref(), row)[col - self.backing_numericals]
        }
    }
    fn time_stamp(&self, row: usize, col: usize) -> f64 {
        self.backing.time_stamp(row, col)
    }
    fn target(&self, row: usize, col: usize) -> f64 {
        self.backing.target(row, col)
    }
    fn text(&self, row: usize, col: usize) -> i64 {
        self.backing.text(row, col)
    }
}
