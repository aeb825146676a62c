#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
use nalgebra::DMatrix;
use std::cmp::min;

use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixError, MatrixInterface, check_len};

/// Band matrix with `ml` sub- and `mu` super-diagonals and LU decomposition with partial (row) pivoting.
///
/// The assembled values are kept in compact storage of (ml + mu + 1) rows: element (i, j) lives at
/// row `mu + i - j` of column j. The factorization needs `ml` additional rows for the fill-in
/// created by row exchanges (LINPACK layout): element (i, j) of the factors lives at row
/// `ml + mu + i - j` of column j. Cost of the factorization is O(n * ml * (ml + mu)) instead of O(n^3).
#[derive(Debug, Clone)]
pub struct BandMatrix {
    n: usize,
    ml: usize,
    mu: usize,
    band: DMatrix<f64>,
    lu: DMatrix<f64>,
    p: Vec<usize>,
    factorized: bool,
}

impl BandMatrix {
    pub fn new(n: usize, ml: usize, mu: usize) -> BandMatrix {
        BandMatrix {
            n,
            ml,
            mu,
            band: DMatrix::zeros(ml + mu + 1, n),
            lu: DMatrix::zeros(2 * ml + mu + 1, n),
            p: vec![0; n],
            factorized: false,
        }
    }

    /// Copies the band of a dense matrix; bandwidths are detected when not given.
    pub fn from_dense(matrix: &DMatrix<f64>, bandwidth: Option<(usize, usize)>) -> Result<BandMatrix, MatrixError> {
        check_len(matrix.nrows(), matrix.ncols())?;
        let (kl, ku) = if let Some((kl_, ku_)) = bandwidth { (kl_, ku_) } else { find_bandwidths(matrix) };
        let n = matrix.nrows();
        let mut band = BandMatrix::new(n, kl, ku);
        for j in 0..n {
            for i in j.saturating_sub(ku)..=min(j + kl, n - 1) {
                band.band[(ku + i - j, j)] = matrix[(i, j)];
            }
        }
        Ok(band)
    }

    pub fn ml(&self) -> usize {
        self.ml
    }

    pub fn mu(&self) -> usize {
        self.mu
    }

    #[inline]
    fn in_band(&self, i: usize, j: usize) -> bool {
        i < self.n && j < self.n && i + self.mu >= j && i <= j + self.ml
    }

    /// row index of element (i, j) inside the factor storage
    #[inline]
    fn f(&self, i: usize, j: usize) -> usize {
        self.ml + self.mu + i - j
    }

    /// Unpacks the band into a dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n, self.n);
        for j in 0..self.n {
            for i in j.saturating_sub(self.mu)..=min(j + self.ml, self.n - 1) {
                dense[(i, j)] = self.band[(self.mu + i - j, j)];
            }
        }
        dense
    }
}

/// Number of sub- and super-diagonals holding non-zero elements.
pub fn find_bandwidths(A: &DMatrix<f64>) -> (usize, usize) {
    let n = A.nrows();
    let mut kl = 0;
    let mut ku = 0;
    for i in 0..n {
        for j in 0..n {
            if A[(i, j)] != 0.0 {
                if j > i {
                    ku = std::cmp::max(ku, j - i);
                } else if i > j {
                    kl = std::cmp::max(kl, i - j);
                }
            }
        }
    }
    (kl, ku)
}

impl MatrixInterface for BandMatrix {
    fn dim(&self) -> usize {
        self.n
    }

    fn set_zero(&mut self) {
        self.band.fill(0.0);
        self.factorized = false;
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        if self.in_band(row, col) { self.band[(self.mu + row - col, col)] } else { 0.0 }
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        if !self.in_band(row, col) {
            return Err(MatrixError::OutsidePattern { row, col });
        }
        self.band[(self.mu + row - col, col)] = value;
        self.factorized = false;
        Ok(())
    }

    fn scale(&mut self, a: f64) {
        self.band *= a;
        self.factorized = false;
    }

    fn add_to_diagonal(&mut self, a: f64) {
        let mu = self.mu;
        for j in 0..self.n {
            self.band[(mu, j)] += a;
        }
        self.factorized = false;
    }

    fn lu(&mut self) -> Result<(), MatrixError> {
        let (n, ml, mu) = (self.n, self.ml, self.mu);
        self.factorized = false;
        self.lu.fill(0.0);
        self.lu.rows_range_mut(ml..).copy_from(&self.band);
        for k in 0..n {
            let last_row = min(n - 1, k + ml);
            // pivot search in column k
            let mut piv = k;
            let mut max_abs = self.lu[(self.f(k, k), k)].abs();
            for i in k + 1..=last_row {
                let v = self.lu[(self.f(i, k), k)].abs();
                if v > max_abs {
                    max_abs = v;
                    piv = i;
                }
            }
            self.p[k] = piv;
            if max_abs == 0.0 || !max_abs.is_finite() {
                return Err(MatrixError::Singular { index: k });
            }
            let last_col = min(n - 1, k + ml + mu);
            if piv != k {
                for j in k..=last_col {
                    let (a, b) = (self.f(k, j), self.f(piv, j));
                    self.lu.swap((a, j), (b, j));
                }
            }
            let inv_diag = 1.0 / self.lu[(self.f(k, k), k)];
            for i in k + 1..=last_row {
                let fik = self.f(i, k);
                let l = self.lu[(fik, k)] * inv_diag;
                self.lu[(fik, k)] = l;
                if l != 0.0 {
                    for j in k + 1..=last_col {
                        let (fij, fkj) = (self.f(i, j), self.f(k, j));
                        self.lu[(fij, j)] -= l * self.lu[(fkj, j)];
                    }
                }
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
        let (n, ml, mu) = (self.n, self.ml, self.mu);
        // forward: apply row exchanges and unit lower factor
        for k in 0..n {
            let piv = self.p[k];
            if piv != k {
                rhs.swap(k, piv);
            }
            let bk = rhs[k];
            for i in k + 1..=min(n - 1, k + ml) {
                rhs[i] -= self.lu[(self.f(i, k), k)] * bk;
            }
        }
        // backward: upper factor with bandwidth ml + mu
        for k in (0..n).rev() {
            rhs[k] /= self.lu[(self.f(k, k), k)];
            let bk = rhs[k];
            for i in k.saturating_sub(ml + mu)..k {
                rhs[i] -= self.lu[(self.f(i, k), k)] * bk;
            }
        }
        Ok(())
    }

    fn multiply(&self, x: &[f64], y: &mut [f64]) {
        let n = self.n;
        for i in 0..n {
            let mut sum = 0.0;
            for j in i.saturating_sub(self.ml)..=min(n - 1, i + self.mu) {
                sum += self.band[(self.mu + i - j, j)] * x[j];
            }
            y[i] = sum;
        }
    }

    fn is_factorized(&self) -> bool {
        self.factorized
    }
}
