//! Linear-leaf fitting for the split-plus-linear-leaf tree variant (spec
//! §4.5's closing paragraph: relcit/relmt leaves carry a linear regression
//! over peripheral numerical columns in addition to their scalar weight).

use crate::matching::Match;
use crate::table::Table;

const MAX_LINEAR_FEATURES: usize = 8;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinearLeaf {
    intercept: f64,
    /// (peripheral numerical column, coefficient) pairs.
    coefficients: Vec<(usize, f64)>,
}

impl LinearLeaf {
    pub fn predict(&self, per: &dyn Table, m: Match) -> f64 {
        self.coefficients
            .iter()
            .fold(self.intercept, |acc, &(col, w)| acc + w * per.numerical(m.ix_per as usize, col))
    }
}

/// Fits an ordinary-least-squares correction of the leaf's residual (`g`,
/// one value per match, already net of the leaf's scalar `parent_weight`)
/// onto up to `MAX_LINEAR_FEATURES` peripheral numerical columns. Falls
/// back to `None` (leaving the leaf a plain scalar weight) when there are
/// no numerical columns, too few matches to identify the system, or the
/// normal equations are singular.
pub fn fit_linear_leaf(matches: &[Match], per: &dyn Table, g: &[f64], parent_weight: f64) -> Option<LinearLeaf> {
    let num_cols = per.num_numericals().min(MAX_LINEAR_FEATURES);
    if num_cols == 0 || matches.len() < num_cols + 2 {
        return None;
    }

    let p = num_cols + 1;
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];

    for (row, &m) in matches.iter().enumerate() {
        let mut x = vec![1.0; p];
        for (c, slot) in x.iter_mut().enumerate().skip(1) {
            *slot = per.numerical(m.ix_per as usize, c - 1);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let y = g[row] - parent_weight;
        for a in 0..p {
            xty[a] += x[a] * y;
            for b in 0..p {
                xtx[a][b] += x[a] * x[b];
            }
        }
    }

    solve(&mut xtx, &mut xty).map(|coeffs| LinearLeaf {
        intercept: coeffs[0],
        coefficients: (0..num_cols).map(|c| (c, coeffs[c + 1])).collect(),
    })
}

/// Gauss-Jordan elimination with partial pivoting. `None` on a singular
/// (or near-singular) system — small leaf feature counts make this cheap
/// enough to not need a linear-algebra crate.
fn solve(a: &mut [Vec<f64>], b: &mut [f64]) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap())?;
        if a[pivot_row][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        for v in a[col].iter_mut() {
            *v /= pivot;
        }
        b[col] /= pivot;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnMeta, InMemoryTable, Schema};

    #[test]
    fn fits_exact_linear_relationship() {
        let schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            numericals: vec![ColumnMeta::new("x", "")],
            ..Default::default()
        };
        let mut per = InMemoryTable::new(5, schema);
        per.numericals[0] = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let matches: Vec<Match> = (0..5).map(|i| Match::new(0, i)).collect();
        let g: Vec<f64> = per.numericals[0].iter().map(|&x| 2.0 * x + 1.0).collect();

        let leaf = fit_linear_leaf(&matches, &per, &g, 0.0).unwrap();
        for (&m, &expected) in matches.iter().zip(g.iter()) {
            assert!((leaf.predict(&per, m) - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn returns_none_without_numerical_columns() {
        let schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], ..Default::default() };
        let per = InMemoryTable::new(3, schema);
        let matches: Vec<Match> = (0..3).map(|i| Match::new(0, i)).collect();
        let g = vec![1.0, 2.0, 3.0];
        assert!(fit_linear_leaf(&matches, &per, &g, 0.0).is_none());
    }
}
