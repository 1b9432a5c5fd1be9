//! Loss accumulator.
//!
//! Carries, for each leaf, the sufficient statistics needed for the
//! closed-form optimal leaf weight: a gradient sum `g` and a hessian-like
//! weight sum `h`, in the usual gradient-boosting sense. For square loss
//! `g = Σy`, `h = Σ1`; for cross-entropy `g = Σ(y - p)`, `h = Σp(1-p)` at
//! the current prediction `p` — both cases generalized
//! behind one (g, h) pair so the sweep code doesn't need to know which
//! loss it's under.

use crate::config::LossFunction;

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeafStats {
    pub g: f64,
    pub h: f64,
    pub n: usize,
}

impl LeafStats {
    pub fn weight(&self) -> f64 {
        if self.h.abs() < EPS {
            0.0
        } else {
            self.g / self.h
        }
    }

    fn score(&self) -> f64 {
        if self.h.abs() < EPS {
            0.0
        } else {
            self.g * self.g / self.h
        }
    }

    fn add(&mut self, g: f64, h: f64) {
        self.g += g;
        self.h += h;
        self.n += 1;
    }

    fn sub(&mut self, g: f64, h: f64) {
        self.g -= g;
        self.h -= h;
        self.n -= 1;
    }

    fn sum(g: &[f64], h: &[f64]) -> Self {
        let mut acc = LeafStats::default();
        for i in 0..g.len() {
            acc.add(g[i], h[i]);
        }
        acc
    }
}

/// Whether a candidate evaluation recomputes from scratch or incrementally
/// moves matches from right to left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    CalcAll,
    CalcDiff,
}

/// Per-(node, candidate-sweep) accumulator. One instance lives for the
/// duration of one node's candidate search; it is never shared across
/// worker threads.
pub struct LossAccumulator {
    loss_function: LossFunction,
    min_num_samples: usize,
    left: LeafStats,
    right: LeafStats,
    committed_left: LeafStats,
    committed_right: LeafStats,
}

impl LossAccumulator {
    pub fn new(loss_function: LossFunction, min_num_samples: usize) -> Self {
        Self {
            loss_function,
            min_num_samples,
            left: LeafStats::default(),
            right: LeafStats::default(),
            committed_left: LeafStats::default(),
            committed_right: LeafStats::default(),
        }
    }

    pub fn loss_function(&self) -> LossFunction {
        self.loss_function
    }

    /// Computes `g`/`h` for one match given its population row's target
    /// and current prediction. Both
    /// cases are a residual against the running prediction — `target -
    /// prediction` for square loss, `target - p` for cross-entropy — so
    /// every round's tree is grown on what's left to explain, not on the
    /// raw target.
    pub fn gradient_hessian(&self, target: f64, prediction: f64) -> (f64, f64) {
        match self.loss_function {
            LossFunction::SquareLoss => (target - prediction, 1.0),
            LossFunction::CrossEntropyLoss => {
                let p = 1.0 / (1.0 + (-prediction).exp());
                (target - p, (p * (1.0 - p)).max(EPS))
            }
        }
    }

    /// Puts every match on the "right" side and commits that as the
    /// baseline before a fresh candidate sweep begins.
    pub fn reset(&mut self, g: &[f64], h: &[f64]) {
        self.right = LeafStats::sum(g, h);
        self.left = LeafStats::default();
        self.commit();
    }

    /// Evaluates the candidate split that currently divides the range at
    /// `it`. Returns `None` if either resulting
    /// leaf would hold fewer than `min_num_samples`.
    pub fn evaluate_candidate(
        &mut self,
        update: Update,
        g: &[f64],
        h: &[f64],
        begin: usize,
        last_it: usize,
        it: usize,
        end: usize,
    ) -> Option<(f64, (f64, f64))> {
        match update {
            Update::CalcAll => {
                self.left = LeafStats::sum(&g[begin..it], &h[begin..it]);
                self.right = LeafStats::sum(&g[it..end], &h[it..end]);
            }
            Update::CalcDiff => {
                for idx in last_it..it {
                    self.left.add(g[idx], h[idx]);
                    self.right.sub(g[idx], h[idx]);
                }
            }
        }

        if self.left.n < self.min_num_samples || self.right.n < self.min_num_samples {
            return None;
        }

        let parent_g = self.left.g + self.right.g;
        let parent_h = self.left.h + self.right.h;
        let parent_score = if parent_h.abs() < EPS { 0.0 } else { parent_g * parent_g / parent_h };
        let loss_reduction = 0.5 * (self.left.score() + self.right.score() - parent_score);

        Some((loss_reduction, (self.left.weight(), self.right.weight())))
    }

    /// Makes the current tentative state the new committed baseline.
    pub fn commit(&mut self) {
        self.committed_left = self.left;
        self.committed_right = self.right;
    }

    /// Restores the last commit, discarding the candidate search's
    /// tentative sweep state. In this single-level accumulator `revert`
    /// and `revert_to_commit` coincide: there is only ever one committed
    /// baseline in flight per node, so "undo everything since the last
    /// commit" and "undo this sweep, keep committed counts" are the same
    /// restore.
    pub fn revert(&mut self) {
        self.left = self.committed_left;
        self.right = self.committed_right;
    }

    pub fn revert_to_commit(&mut self) {
        self.revert();
    }

    pub fn committed(&self) -> (LeafStats, LeafStats) {
        (self.committed_left, self.committed_right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<f64>, Vec<f64>) {
        let g = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let h = vec![1.0; 5];
        (g, h)
    }

    #[test]
    fn calc_all_and_calc_diff_agree() {
        let (g, h) = sample();
        let mut acc_all = LossAccumulator::new(LossFunction::SquareLoss, 1);
        acc_all.reset(&g, &h);
        let (reduction_all, _) = acc_all.evaluate_candidate(Update::CalcAll, &g, &h, 0, 0, 3, 5).unwrap();

        let mut acc_diff = LossAccumulator::new(LossFunction::SquareLoss, 1);
        acc_diff.reset(&g, &h);
        let (reduction_diff, _) = acc_diff.evaluate_candidate(Update::CalcDiff, &g, &h, 0, 0, 3, 5).unwrap();

        assert!((reduction_all - reduction_diff).abs() < 1e-9);
    }

    #[test]
    fn rejects_leaves_below_min_samples() {
        let (g, h) = sample();
        let mut acc = LossAccumulator::new(LossFunction::SquareLoss, 3);
        acc.reset(&g, &h);
        assert!(acc.evaluate_candidate(Update::CalcAll, &g, &h, 0, 0, 1, 5).is_none());
    }

    #[test]
    fn loss_reduction_is_never_negative() {
        let (g, h) = sample();
        let mut acc = LossAccumulator::new(LossFunction::SquareLoss, 1);
        acc.reset(&g, &h);
        for it in 1..5 {
            let (reduction, _) = acc.evaluate_candidate(Update::CalcAll, &g, &h, 0, 0, it, 5).unwrap();
            assert!(reduction >= -1e-9, "loss reduction {reduction} at it={it}");
        }
    }

    #[test]
    fn commit_revert_round_trip() {
        let (g, h) = sample();
        let mut acc = LossAccumulator::new(LossFunction::SquareLoss, 1);
        acc.reset(&g, &h);
        let baseline = acc.evaluate_candidate(Update::CalcAll, &g, &h, 0, 0, 2, 5).unwrap();
        acc.commit();
        acc.revert_to_commit();
        let replayed = acc.evaluate_candidate(Update::CalcAll, &g, &h, 0, 0, 2, 5).unwrap();
        assert_eq!(baseline, replayed);
    }

    #[test]
    fn cross_entropy_gradient_hessian() {
        let acc = LossAccumulator::new(LossFunction::CrossEntropyLoss, 1);
        let (g, h) = acc.gradient_hessian(1.0, 0.0);
        assert!((g - 0.5).abs() < 1e-9);
        assert!(h > 0.0);
    }
}
