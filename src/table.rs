//! The table-provider contract.
//!
//! The DataFrame / column-container implementation, ingest, and schema
//! inference are out of scope here — this module defines
//! only the narrow interface the match-and-split core needs from a table,
//! plus a minimal in-memory reference implementation used by this crate's
//! own tests and by callers who don't have a richer table provider handy.

use std::sync::Arc;

use crate::error::{EngineError, Result};

/// One column's metadata: its display name and its unit tag.
///
/// Two columns across a population/peripheral pair with equal, non-empty
/// unit strings admit same-units predicates. A unit string
/// containing `"comparison only"` marks the column join/comparison-only —
/// excluded from aggregation but retained for condition generation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub unit: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self { name: name.into(), unit: unit.into() }
    }

    pub fn comparison_only(&self) -> bool {
        self.unit.contains("comparison only")
    }
}

/// Column roles and counts for one table, independent of the backing data.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    pub join_keys: Vec<ColumnMeta>,
    pub categoricals: Vec<ColumnMeta>,
    pub discretes: Vec<ColumnMeta>,
    pub numericals: Vec<ColumnMeta>,
    pub time_stamps: Vec<ColumnMeta>,
    pub targets: Vec<ColumnMeta>,
    pub text: Vec<ColumnMeta>,
}

impl Schema {
    /// Matching fails outright if the population carries no join key at
    /// all, surfaced one layer up as `SchemaMismatch`.
    pub fn require_join_key(&self) -> Result<()> {
        if self.join_keys.is_empty() {
            return Err(EngineError::SchemaMismatch(
                "table has no join-key column".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_time_stamps(&self) -> bool {
        !self.time_stamps.is_empty()
    }
}

/// Read-only access to one table's rows, classified by role.
///
/// Invariant upheld by every implementation: all columns of a table have
/// the same row count (`nrows`).
pub trait Table: Send + Sync {
    fn nrows(&self) -> usize;
    fn schema(&self) -> &Schema;

    fn join_key(&self, row: usize, col: usize) -> i64;
    fn categorical(&self, row: usize, col: usize) -> i64;
    fn discrete(&self, row: usize, col: usize) -> f64;
    fn numerical(&self, row: usize, col: usize) -> f64;
    fn time_stamp(&self, row: usize, col: usize) -> f64;
    fn target(&self, row: usize, col: usize) -> f64;
    /// Interned token id; `-1` marks an absent cell.
    fn text(&self, row: usize, col: usize) -> i64;

    fn num_join_keys(&self) -> usize {
        self.schema().join_keys.len()
    }
    fn num_categoricals(&self) -> usize {
        self.schema().categoricals.len()
    }
    fn num_discretes(&self) -> usize {
        self.schema().discretes.len()
    }
    fn num_numericals(&self) -> usize {
        self.schema().numericals.len()
    }
    fn num_time_stamps(&self) -> usize {
        self.schema().time_stamps.len()
    }
    fn num_targets(&self) -> usize {
        self.schema().targets.len()
    }
    fn num_text(&self) -> usize {
        self.schema().text.len()
    }

    /// The timestamp used for join-window matching; column 0
    /// by convention when a table carries more than one timestamp column.
    fn primary_time_stamp(&self, row: usize) -> Option<f64> {
        if self.num_time_stamps() == 0 {
            None
        } else {
            Some(self.time_stamp(row, 0))
        }
    }
}

/// A sub-view over a backing table: a row-index remapping plus an optional
/// upper timestamp bound.
///
/// Chained mappings walk a stack of these to translate
/// peripheral row indices up the join chain into population row indices.
pub struct View {
    backing: Arc<dyn Table>,
    row_indices: Vec<usize>,
    upper_ts: Option<f64>,
}

impl View {
    pub fn new(backing: Arc<dyn Table>, row_indices: Vec<usize>, upper_ts: Option<f64>) -> Self {
        Self { backing, row_indices, upper_ts }
    }

    pub fn upper_ts(&self) -> Option<f64> {
        self.upper_ts
    }

    fn map(&self, row: usize) -> usize {
        self.row_indices[row]
    }
}

impl Table for View {
    fn nrows(&self) -> usize {
        self.row_indices.len()
    }
    fn schema(&self) -> &Schema {
        self.backing.schema()
    }
    fn join_key(&self, row: usize, col: usize) -> i64 {
        self.backing.join_key(self.map(row), col)
    }
    fn categorical(&self, row: usize, col: usize) -> i64 {
        self.backing.categorical(self.map(row), col)
    }
    fn discrete(&self, row: usize, col: usize) -> f64 {
        self.backing.discrete(self.map(row), col)
    }
    fn numerical(&self, row: usize, col: usize) -> f64 {
        self.backing.numerical(self.map(row), col)
    }
    fn time_stamp(&self, row: usize, col: usize) -> f64 {
        self.backing.time_stamp(self.map(row), col)
    }
    fn target(&self, row: usize, col: usize) -> f64 {
        self.backing.target(self.map(row), col)
    }
    fn text(&self, row: usize, col: usize) -> i64 {
        self.backing.text(self.map(row), col)
    }
}

/// A minimal in-memory `Table` implementation: column-major `Vec<Vec<_>>`
/// storage. Good enough for unit tests and small embedding callers; real
/// deployments bring their own table provider (Arrow-backed, mmap-backed,
/// etc.) and only need to implement the `Table` trait above.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTable {
    pub schema: Schema,
    pub join_keys: Vec<Vec<i64>>,
    pub categoricals: Vec<Vec<i64>>,
    pub discretes: Vec<Vec<f64>>,
    pub numericals: Vec<Vec<f64>>,
    pub time_stamps: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
    pub text: Vec<Vec<i64>>,
    nrows: usize,
}

impl InMemoryTable {
    pub fn new(nrows: usize, schema: Schema) -> Self {
        Self {
            join_keys: vec![vec![0; nrows]; schema.join_keys.len()],
            categoricals: vec![vec![0; nrows]; schema.categoricals.len()],
            discretes: vec![vec![0.0; nrows]; schema.discretes.len()],
            numericals: vec![vec![0.0; nrows]; schema.numericals.len()],
            time_stamps: vec![vec![0.0; nrows]; schema.time_stamps.len()],
            targets: vec![vec![0.0; nrows]; schema.targets.len()],
            text: vec![vec![-1; nrows]; schema.text.len()],
            schema,
            nrows,
        }
    }

}

/// Rejects a target column containing NaN or Inf (spec §7): every loss and
/// gradient computation downstream assumes a finite target, and a non-finite
/// value silently poisons every split's gain rather than failing loudly.
pub fn validate_target_column(table: &dyn Table, target_col: usize) -> Result<()> {
    for row in 0..table.nrows() {
        let v = table.target(row, target_col);
        if v.is_nan() || v.is_infinite() {
            return Err(EngineError::NullInTarget(format!(
                "target column {target_col} contains a NaN or Inf value at row {row}"
            )));
        }
    }
    Ok(())
}

impl Table for InMemoryTable {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn schema(&self) -> &Schema {
        &self.schema
    }
    fn join_key(&self, row: usize, col: usize) -> i64 {
        self.join_keys[col][row]
    }
    fn categorical(&self, row: usize, col: usize) -> i64 {
        self.categoricals[col][row]
    }
    fn discrete(&self, row: usize, col: usize) -> f64 {
        self.discretes[col][row]
    }
    fn numerical(&self, row: usize, col: usize) -> f64 {
        self.numericals[col][row]
    }
    fn time_stamp(&self, row: usize, col: usize) -> f64 {
        self.time_stamps[col][row]
    }
    fn target(&self, row: usize, col: usize) -> f64 {
        self.targets[col][row]
    }
    fn text(&self, row: usize, col: usize) -> i64 {
        self.text[col][row]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_schema() -> Schema {
        Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            time_stamps: vec![ColumnMeta::new("t", "")],
            numericals: vec![ColumnMeta::new("v", "")],
            ..Default::default()
        }
    }

    #[test]
    fn require_join_key_rejects_empty() {
        let schema = Schema::default();
        assert!(schema.require_join_key().is_err());
    }

    #[test]
    fn view_remaps_rows() {
        let mut table = InMemoryTable::new(3, tiny_schema());
        table.numericals[0] = vec![10.0, 20.0, 30.0];
        let backing: Arc<dyn Table> = Arc::new(table);
        let view = View::new(backing, vec![2, 0], None);
        assert_eq!(view.nrows(), 2);
        assert_eq!(view.numerical(0, 0), 30.0);
        assert_eq!(view.numerical(1, 0), 10.0);
    }
}
