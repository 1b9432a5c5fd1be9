//! Match array and match-making (spec §3, §4.1).
//!
//! A match array is the fundamental working set of the whole engine: an
//! ordered sequence of `(ix_pop, ix_per)` pairs, mutable only via sort and
//! partition. It is built once per training iteration by the match-maker
//! below, then lent to the tree root — children receive non-overlapping
//! subranges by slicing, never by copying or aliasing (spec §9).

mod time_index;

pub use time_index::TimeIndex;

use crate::error::{EngineError, Result};
use crate::table::Table;
use std::sync::Arc;

/// One (population-row, peripheral-row) pair.
///
/// Invariant: `ix_pop < population.nrows()` and `ix_per < peripheral.nrows()`
/// for the tables the match array was built from. Not checked on every
/// access (hot path); checked once at construction in `MatchMaker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub ix_pop: u32,
    pub ix_per: u32,
}

impl Match {
    pub fn new(ix_pop: u32, ix_per: u32) -> Self {
        Self { ix_pop, ix_per }
    }
}

/// An ordered, in-place sortable/partitionable sequence of matches.
///
/// Ownership: built once by `MatchMaker::build_full_match_array`, then
/// handed to the tree root. A tree node that owns `[begin, end)` may split
/// that range into two non-overlapping subranges and recurse — no node
/// ever sees a range outside what it was given.
#[derive(Debug, Clone, Default)]
pub struct MatchArray {
    matches: Vec<Match>,
}

impl MatchArray {
    pub fn new(matches: Vec<Match>) -> Self {
        Self { matches }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    pub fn as_mut_slice(&mut self) -> &mut [Match] {
        &mut self.matches
    }

    /// Splits `[begin, end)` into two non-overlapping mutable slices at
    /// `mid`, enforcing at the type level that no child can alias another
    /// child's range (spec §9's "raw iterator pairs" replacement).
    pub fn split_at_mut(&mut self, begin: usize, mid: usize, end: usize) -> (&mut [Match], &mut [Match]) {
        let (left, right) = self.matches[begin..end].split_at_mut(mid - begin);
        (left, right)
    }
}

/// Given a population row, yields the peripheral rows matching on join key
/// and within a timestamp window (spec §4.1).
///
/// `delta_t`: lower bound on the window width, `t_pop - delta_t <= t_per`.
/// `Some(0.0)` means "exactly at or before `t_pop`"; `None` means no lower
/// bound (peripheral has no timestamps, so every row with a matching join
/// key is a candidate — "upper bound may be open-ended when no time stamps
/// exist").
pub struct MatchMaker<'a> {
    population: &'a dyn Table,
    peripheral: &'a dyn Table,
    index: TimeIndex,
    delta_t: Option<f64>,
}

impl<'a> MatchMaker<'a> {
    pub fn new(population: &'a dyn Table, peripheral: &'a dyn Table, delta_t: Option<f64>) -> Result<Self> {
        population.schema().require_join_key()?;
        peripheral.schema().require_join_key()?;
        let index = TimeIndex::build(peripheral);
        Ok(Self { population, peripheral, index, delta_t })
    }

    fn join_key_of(table: &dyn Table, row: usize) -> Vec<i64> {
        (0..table.num_join_keys()).map(|c| table.join_key(row, c)).collect()
    }

    /// For one population row, return every peripheral row whose join key
    /// equals the population row's join key and whose timestamp satisfies
    /// `t_pop - delta_t <= t_per <= t_pop` (lower bound optional).
    pub fn build_matches(&self, ix_pop: usize) -> Vec<u32> {
        let key = Self::join_key_of(self.population, ix_pop);
        let candidates = self.index.candidates(&key);
        let Some(candidates) = candidates else {
            return Vec::new();
        };

        let t_pop = self.population.primary_time_stamp(ix_pop);
        match (t_pop, self.peripheral.num_time_stamps() > 0) {
            (Some(t_pop), true) => {
                let lower = self.delta_t.map(|d| t_pop - d);
                candidates
                    .window(lower, Some(t_pop))
                    .iter()
                    .map(|&ix| ix as u32)
                    .collect()
            }
            _ => candidates.all().iter().map(|&ix| ix as u32).collect(),
        }
    }

    /// For every population row, concatenate `build_matches`. The per-row
    /// grouping is preserved in the resulting order.
    pub fn build_full_match_array(&self) -> MatchArray {
        let mut matches = Vec::new();
        for ix_pop in 0..self.population.nrows() {
            for ix_per in self.build_matches(ix_pop) {
                matches.push(Match::new(ix_pop as u32, ix_per));
            }
        }
        MatchArray::new(matches)
    }
}

/// Composes two adjacent join-chain levels into one hop (spec §4.8: "walk
/// up the join chain ... transforming peripheral row indices to population
/// row indices that respect every intermediate time-stamp window").
///
/// `parent_to_mid[i]` lists the mid-level rows matched by parent row `i`
/// (already time-window-constrained by whatever `MatchMaker` built it);
/// `mid_to_leaf[j]` lists the leaf-level rows matched by mid-level row
/// `j`, under the same constraint. The result gives, per parent row, the
/// deduplicated set of leaf rows reachable through any matched mid row —
/// chaining arbitrarily many levels is just repeated application.
pub fn compose_chain(parent_to_mid: &[Vec<Match>], mid_to_leaf: &[Vec<Match>]) -> Vec<Vec<Match>> {
    parent_to_mid
        .iter()
        .enumerate()
        .map(|(parent_ix, mid_matches)| {
            let mut leaf_rows: Vec<u32> = mid_matches
                .iter()
                .flat_map(|m| mid_to_leaf[m.ix_per as usize].iter().map(|leaf| leaf.ix_per))
                .collect();
            leaf_rows.sort_unstable();
            leaf_rows.dedup();
            leaf_rows.into_iter().map(|ix_per| Match::new(parent_ix as u32, ix_per)).collect()
        })
        .collect()
}

/// Builds a full match array against a peripheral table shared by `Arc`,
/// for callers (ensemble, propositional engine) that need to keep the
/// tables alive across many training iterations without re-borrowing.
pub fn build_full_match_array(
    population: &Arc<dyn Table>,
    peripheral: &Arc<dyn Table>,
    delta_t: Option<f64>,
) -> Result<MatchArray> {
    if population.nrows() == 0 {
        return Err(EngineError::InvalidArgument("population has zero rows".to_string()));
    }
    let maker = MatchMaker::new(population.as_ref(), peripheral.as_ref(), delta_t)?;
    Ok(maker.build_full_match_array())
}
