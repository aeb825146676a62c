#![allow(non_snake_case)]
//! Square sparse matrix in compressed-row storage with a fixed sparsity pattern.
//!
//! The pattern comes from `nalgebra_sparse` and always contains the diagonal. `lu()` computes an
//! incomplete factorization without fill-in (ILU(0)), which is exact whenever the pattern is closed
//! under fill-in (e.g. tridiagonal or block-diagonal patterns). The module also provides the greedy
//! column coloring used by the finite-difference Jacobian generator.
use nalgebra_sparse::pattern::SparsityPattern;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use strum_macros::Display;

use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixError, MatrixInterface, check_len};

#[derive(Debug, Clone)]
pub struct SparseMatrixCSR {
    n: usize,
    pattern: SparsityPattern,
    values: Vec<f64>,
    ilu: Vec<f64>,
    diag_index: Vec<usize>,
    factorized: bool,
}

impl SparseMatrixCSR {
    /// Builds the pattern from the column indices of every row; the diagonal is always added.
    pub fn from_row_indices(n: usize, rows: &[Vec<usize>]) -> Result<Self, MatrixError> {
        check_len(n, rows.len())?;
        let mut offsets = Vec::with_capacity(n + 1);
        let mut indices = Vec::new();
        offsets.push(0);
        for (i, row) in rows.iter().enumerate() {
            let mut cols = row.clone();
            cols.push(i);
            cols.sort_unstable();
            cols.dedup();
            if let Some(&last) = cols.last() {
                if last >= n {
                    return Err(MatrixError::OutsidePattern { row: i, col: last });
                }
            }
            indices.extend(cols);
            offsets.push(indices.len());
        }
        let pattern = SparsityPattern::try_from_offsets_and_indices(n, n, offsets, indices)
            .map_err(|_| MatrixError::DimensionMismatch { expected: n, found: rows.len() })?;
        Self::from_pattern(pattern)
    }

    /// Uses an existing square pattern, which must contain every diagonal element.
    pub fn from_pattern(pattern: SparsityPattern) -> Result<Self, MatrixError> {
        let n = pattern.major_dim();
        check_len(n, pattern.minor_dim())?;
        let mut diag_index = Vec::with_capacity(n);
        for i in 0..n {
            let lane = pattern.lane(i);
            let k = lane.binary_search(&i).map_err(|_| MatrixError::OutsidePattern { row: i, col: i })?;
            diag_index.push(pattern.major_offsets()[i] + k);
        }
        let nnz = pattern.nnz();
        Ok(SparseMatrixCSR {
            n,
            pattern,
            values: vec![0.0; nnz],
            ilu: vec![0.0; nnz],
            diag_index,
            factorized: false,
        })
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Copies the values of a matrix with the same pattern.
    pub fn copy_values_from(&mut self, other: &SparseMatrixCSR) -> Result<(), MatrixError> {
        if self.pattern != other.pattern {
            return Err(MatrixError::DimensionMismatch { expected: self.nnz(), found: other.nnz() });
        }
        self.values.copy_from_slice(&other.values);
        self.factorized = false;
        Ok(())
    }

    /// position of (row, col) in the value array
    pub fn index_of(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.n {
            return None;
        }
        self.pattern
            .lane(row)
            .binary_search(&col)
            .ok()
            .map(|k| self.pattern.major_offsets()[row] + k)
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        let offsets = self.pattern.major_offsets();
        offsets[row]..offsets[row + 1]
    }
}

impl MatrixInterface for SparseMatrixCSR {
    fn dim(&self) -> usize {
        self.n
    }

    fn set_zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.factorized = false;
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self.index_of(row, col).map_or(0.0, |k| self.values[k])
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        let k = self.index_of(row, col).ok_or(MatrixError::OutsidePattern { row, col })?;
        self.values[k] = value;
        self.factorized = false;
        Ok(())
    }

    fn scale(&mut self, a: f64) {
        self.values.iter_mut().for_each(|v| *v *= a);
        self.factorized = false;
    }

    fn add_to_diagonal(&mut self, a: f64) {
        for &k in &self.diag_index {
            self.values[k] += a;
        }
        self.factorized = false;
    }

    /// ILU(0), row-wise (IKJ) variant
    fn lu(&mut self) -> Result<(), MatrixError> {
        self.factorized = false;
        self.ilu.copy_from_slice(&self.values);
        let cols = self.pattern.minor_indices();
        for i in 0..self.n {
            let range = self.row_range(i);
            for kk in range.start..self.diag_index[i] {
                let k = cols[kk];
                let pivot = self.ilu[self.diag_index[k]];
                if pivot == 0.0 || !pivot.is_finite() {
                    return Err(MatrixError::Singular { index: k });
                }
                let lik = self.ilu[kk] / pivot;
                self.ilu[kk] = lik;
                for jj in kk + 1..range.end {
                    if let Some(kj) = self.index_of(k, cols[jj]) {
                        self.ilu[jj] -= lik * self.ilu[kj];
                    }
                }
            }
            let d = self.ilu[self.diag_index[i]];
            if d == 0.0 || !d.is_finite() {
                return Err(MatrixError::Singular { index: i });
            }
        }
        self.factorized = true;
        Ok(())
    }

    fn backsolve(&self, rhs: &mut [f64]) -> Result<(), MatrixError> {
        if !self.factorized {
            return Err(MatrixError::NotFactorized);
        }
        check_len(self.n, rhs.len())?;
        let cols = self.pattern.minor_indices();
        for i in 0..self.n {
            let start = self.row_range(i).start;
            let mut s = rhs[i];
            for kk in start..self.diag_index[i] {
                s -= self.ilu[kk] * rhs[cols[kk]];
            }
            rhs[i] = s;
        }
        for i in (0..self.n).rev() {
            let end = self.row_range(i).end;
            let mut s = rhs[i];
            for kk in self.diag_index[i] + 1..end {
                s -= self.ilu[kk] * rhs[cols[kk]];
            }
            rhs[i] = s / self.ilu[self.diag_index[i]];
        }
        Ok(())
    }

    fn multiply(&self, x: &[f64], y: &mut [f64]) {
        let cols = self.pattern.minor_indices();
        for i in 0..self.n {
            y[i] = self
                .row_range(i)
                .map(|k| self.values[k] * x[cols[k]])
                .sum();
        }
    }

    fn is_factorized(&self) -> bool {
        self.factorized
    }
}

/// Order in which columns are visited by the greedy coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ColumnOrder {
    Natural,
    /// random permutation, reproducible through the seed
    Shuffled(u64),
}

/// Greedy coloring of the column intersection graph: two columns get different colors when they
/// have a non-zero in a common row. Returns the columns of every color.
pub fn color_columns(pattern: &SparsityPattern, order: ColumnOrder) -> Vec<Vec<usize>> {
    let n_cols = pattern.minor_dim();
    let by_column = pattern.transpose();
    let mut visit: Vec<usize> = (0..n_cols).collect();
    if let ColumnOrder::Shuffled(seed) = order {
        let mut rng = StdRng::seed_from_u64(seed);
        visit.shuffle(&mut rng);
    }
    const UNCOLORED: usize = usize::MAX;
    let mut color = vec![UNCOLORED; n_cols];
    // forbidden[c] == stamp marks color c as used by a neighbour of the current column
    let mut forbidden: Vec<usize> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (stamp, &j) in visit.iter().enumerate() {
        for &row in by_column.lane(j) {
            for &neighbour in pattern.lane(row) {
                let c = color[neighbour];
                if c != UNCOLORED {
                    forbidden[c] = stamp;
                }
            }
        }
        let c = (0..groups.len()).find(|&c| forbidden[c] != stamp).unwrap_or(groups.len());
        if c == groups.len() {
            groups.push(Vec::new());
            forbidden.push(UNCOLORED);
        }
        color[j] = c;
        groups[c].push(j);
    }
    for group in groups.iter_mut() {
        group.sort_unstable();
    }
    groups
}
