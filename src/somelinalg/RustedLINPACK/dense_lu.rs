#![allow(non_snake_case)]
use nalgebra::{DMatrix, DVectorView, DVectorViewMut};

use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixError, MatrixInterface, check_len};

/// Dense n x n matrix with an in-place LU factorization (partial row pivoting).
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    n: usize,
    data: DMatrix<f64>,
    lu: DMatrix<f64>,
    pivots: Vec<usize>,
    factorized: bool,
}

impl DenseMatrix {
    pub fn new(n: usize) -> Self {
        DenseMatrix {
            n,
            data: DMatrix::zeros(n, n),
            lu: DMatrix::zeros(n, n),
            pivots: vec![0; n],
            factorized: false,
        }
    }

    pub fn from_dmatrix(matrix: DMatrix<f64>) -> Result<Self, MatrixError> {
        check_len(matrix.nrows(), matrix.ncols())?;
        let mut dense = DenseMatrix::new(matrix.nrows());
        dense.data = matrix;
        Ok(dense)
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DMatrix<f64> {
        self.factorized = false;
        &mut self.data
    }
}

/// One step of gaussian elimination on the i-th row and column of `matrix`,
/// the pivot `matrix[(i, i)] == diag` is already in place.
fn gauss_step(matrix: &mut DMatrix<f64>, diag: f64, i: usize) {
    let mut submat = matrix.view_range_mut(i.., i..);
    let inv_diag = 1.0 / diag;
    let (mut coeffs, mut submat) = submat.columns_range_pair_mut(0, 1..);
    let mut coeffs = coeffs.rows_range_mut(1..);
    coeffs *= inv_diag;
    let (pivot_row, mut down) = submat.rows_range_pair_mut(0, 1..);
    for k in 0..pivot_row.ncols() {
        // down[:, k] -= pivot_row[k] * coeffs
        down.column_mut(k).axpy(-pivot_row[k], &coeffs, 1.0);
    }
}

/// In-place LU with partial pivoting. Rows are swapped over the full width,
/// `pivots[i]` is the row exchanged with row i at step i.
/// Returns the local index of a zero pivot on failure.
pub(crate) fn lu_factor_in_place(A: &mut DMatrix<f64>, pivots: &mut [usize]) -> Result<(), usize> {
    let n = A.nrows();
    for i in 0..n {
        let piv = A.view_range(i.., i).icamax() + i;
        let diag = A[(piv, i)];
        if diag == 0.0 || !diag.is_finite() {
            return Err(i);
        }
        pivots[i] = piv;
        if piv != i {
            A.swap_rows(i, piv);
        }
        gauss_step(A, diag, i);
    }
    Ok(())
}

/// Solves with a factorization from `lu_factor_in_place`, `b` is overwritten by the solution.
pub(crate) fn lu_solve_in_place(lu: &DMatrix<f64>, pivots: &[usize], b: &mut [f64]) {
    let n = lu.nrows();
    for i in 0..n {
        let p = pivots[i];
        if p != i {
            b.swap(i, p);
        }
    }
    // L has unit diagonal
    for k in 0..n {
        let bk = b[k];
        if bk != 0.0 {
            for i in k + 1..n {
                b[i] -= lu[(i, k)] * bk;
            }
        }
    }
    for k in (0..n).rev() {
        b[k] /= lu[(k, k)];
        let bk = b[k];
        for i in 0..k {
            b[i] -= lu[(i, k)] * bk;
        }
    }
}

impl MatrixInterface for DenseMatrix {
    fn dim(&self) -> usize {
        self.n
    }

    fn set_zero(&mut self) {
        self.data.fill(0.0);
        self.factorized = false;
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        if row >= self.n || col >= self.n {
            return Err(MatrixError::OutsidePattern { row, col });
        }
        self.data[(row, col)] = value;
        self.factorized = false;
        Ok(())
    }

    fn scale(&mut self, a: f64) {
        self.data *= a;
        self.factorized = false;
    }

    fn add_to_diagonal(&mut self, a: f64) {
        for i in 0..self.n {
            self.data[(i, i)] += a;
        }
        self.factorized = false;
    }

    fn lu(&mut self) -> Result<(), MatrixError> {
        self.lu.copy_from(&self.data);
        self.factorized = false;
        lu_factor_in_place(&mut self.lu, &mut self.pivots)
            .map_err(|index| MatrixError::Singular { index })?;
        self.factorized = true;
        Ok(())
    }

    fn backsolve(&self, rhs: &mut [f64]) -> Result<(), MatrixError> {
        if !self.factorized {
            return Err(MatrixError::NotFactorized);
        }
        check_len(self.n, rhs.len())?;
        lu_solve_in_place(&self.lu, &self.pivots, rhs);
        Ok(())
    }

    fn multiply(&self, x: &[f64], y: &mut [f64]) {
        let x = DVectorView::from_slice(x, self.n);
        let mut y = DVectorViewMut::from_slice(y, self.n);
        y.gemv(1.0, &self.data, &x, 0.0);
    }

    fn is_factorized(&self) -> bool {
        self.factorized
    }
}
