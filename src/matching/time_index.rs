//! Hash index from join key to a time-sorted vector of peripheral row
//! indices (spec §4.1), with a lazily-populated, lock-once cache variant
//! for callers that rebuild the same peripheral's matches across many
//! training iterations (ensemble rounds, propositional feature batches).

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::table::Table;

#[derive(Debug, Clone, Default)]
pub struct TimeIndex {
    // join key -> (timestamp, row index), sorted ascending by timestamp.
    groups: HashMap<Vec<i64>, Vec<(f64, usize)>>,
    has_time_stamps: bool,
}

impl TimeIndex {
    /// Groups every peripheral row by join key with a concurrent builder
    /// (spec §9's "mutable builder that transitions to an immutable
    /// snapshot"): rows fan out across the worker pool into a `DashMap`,
    /// then the map is drained into the plain `HashMap` the rest of the
    /// index works with once built — nothing downstream of `build` ever
    /// sees concurrent mutation again.
    pub fn build(peripheral: &dyn Table) -> Self {
        let num_keys = peripheral.num_join_keys();
        let has_time_stamps = peripheral.num_time_stamps() > 0;
        let building: DashMap<Vec<i64>, Vec<(f64, usize)>> = DashMap::new();

        (0..peripheral.nrows()).into_par_iter().for_each(|row| {
            let key: Vec<i64> = (0..num_keys).map(|c| peripheral.join_key(row, c)).collect();
            let ts = if has_time_stamps { peripheral.time_stamp(row, 0) } else { 0.0 };
            building.entry(key).or_default().push((ts, row));
        });

        let mut groups: HashMap<Vec<i64>, Vec<(f64, usize)>> = building.into_iter().collect();
        for group in groups.values_mut() {
            // Tie-break on row index: concurrent insertion order from the
            // parallel builder above is otherwise unspecified for rows that
            // share a timestamp (or share none), which would make match
            // order depend on thread scheduling (spec invariant 6).
            group.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        }

        Self { groups, has_time_stamps }
    }

    pub fn candidates(&self, key: &[i64]) -> Option<Candidates<'_>> {
        self.groups.get(key).map(|sorted| Candidates { sorted, has_time_stamps: self.has_time_stamps })
    }
}

pub struct Candidates<'a> {
    sorted: &'a [(f64, usize)],
    has_time_stamps: bool,
}

impl<'a> Candidates<'a> {
    /// Every row regardless of timestamp (used when the peripheral carries
    /// no timestamp column — spec §4.1: "upper bound may be open-ended when
    /// no time stamps exist").
    pub fn all(&self) -> Vec<usize> {
        self.sorted.iter().map(|&(_, ix)| ix).collect()
    }

    /// Rows with `lower <= t_per <= upper`, found via a lower-bound scan
    /// over the timestamp-sorted group.
    pub fn window(&self, lower: Option<f64>, upper: Option<f64>) -> Vec<usize> {
        if !self.has_time_stamps {
            return self.all();
        }
        let start = match lower {
            Some(lo) => self.sorted.partition_point(|&(t, _)| t < lo),
            None => 0,
        };
        self.sorted[start..]
            .iter()
            .take_while(|&&(t, _)| upper.map_or(true, |hi| t <= hi))
            .map(|&(_, ix)| ix)
            .collect()
    }
}

/// Shared, once-built index behind an `Arc`, guarded with `OnceCell` so
/// concurrent first callers race to build it exactly once (spec §5:
/// "Building matches is CPU-bound; it may lock the lazily-populated index
/// on first use").
#[derive(Default)]
pub struct SharedTimeIndex {
    cell: OnceCell<TimeIndex>,
}

impl SharedTimeIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { cell: OnceCell::new() })
    }

    pub fn get_or_build(&self, peripheral: &dyn Table) -> &TimeIndex {
        self.cell.get_or_init(|| TimeIndex::build(peripheral))
    }
}
