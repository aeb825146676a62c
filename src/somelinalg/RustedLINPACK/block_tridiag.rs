#![allow(non_snake_case)]
//! Block-tridiagonal matrix of `n_blocks` x `n_blocks` blocks, each block `m` x `m`.
//!
//! Block row i holds `lower[i]` (coupling to block i-1), `main[i]` and `upper[i]` (coupling to block i+1).
//! `lower[0]` and `upper[n_blocks-1]` are never used. The factorization is the block Thomas algorithm:
//!
//! D_0 = main_0,  D_i = main_i - lower_i * X_{i-1},  X_i = D_i^{-1} * upper_i
//!
//! with every D_i LU-factorized with partial pivoting.
use nalgebra::DMatrix;

use crate::somelinalg::RustedLINPACK::dense_lu::{lu_factor_in_place, lu_solve_in_place};
use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixError, MatrixInterface, check_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPosition {
    Lower,
    Main,
    Upper,
}

#[derive(Debug, Clone)]
pub struct BlockTridiagMatrix {
    n_blocks: usize,
    m: usize,
    lower: Vec<DMatrix<f64>>,
    main: Vec<DMatrix<f64>>,
    upper: Vec<DMatrix<f64>>,
    // factorization
    d_lu: Vec<DMatrix<f64>>,
    d_pivots: Vec<Vec<usize>>,
    x_upper: Vec<DMatrix<f64>>,
    factorized: bool,
}

impl BlockTridiagMatrix {
    pub fn new(n_blocks: usize, m: usize) -> Self {
        let blocks = || vec![DMatrix::zeros(m, m); n_blocks];
        BlockTridiagMatrix {
            n_blocks,
            m,
            lower: blocks(),
            main: blocks(),
            upper: blocks(),
            d_lu: blocks(),
            d_pivots: vec![vec![0; m]; n_blocks],
            x_upper: blocks(),
            factorized: false,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    pub fn block_size(&self) -> usize {
        self.m
    }

    /// block of block-row `k` at the given position
    pub fn submatrix(&self, k: usize, pos: BlockPosition) -> &DMatrix<f64> {
        match pos {
            BlockPosition::Lower => &self.lower[k],
            BlockPosition::Main => &self.main[k],
            BlockPosition::Upper => &self.upper[k],
        }
    }

    pub fn submatrix_mut(&mut self, k: usize, pos: BlockPosition) -> &mut DMatrix<f64> {
        self.factorized = false;
        match pos {
            BlockPosition::Lower => &mut self.lower[k],
            BlockPosition::Main => &mut self.main[k],
            BlockPosition::Upper => &mut self.upper[k],
        }
    }

    /// Locates a scalar element: (block row, position, row inside block, column inside block).
    fn locate(&self, row: usize, col: usize) -> Option<(usize, BlockPosition, usize, usize)> {
        let (bi, bj) = (row / self.m, col / self.m);
        if bi >= self.n_blocks || bj >= self.n_blocks {
            return None;
        }
        let pos = if bj + 1 == bi {
            BlockPosition::Lower
        } else if bj == bi {
            BlockPosition::Main
        } else if bj == bi + 1 {
            BlockPosition::Upper
        } else {
            return None;
        };
        Some((bi, pos, row % self.m, col % self.m))
    }
}

impl MatrixInterface for BlockTridiagMatrix {
    fn dim(&self) -> usize {
        self.n_blocks * self.m
    }

    fn set_zero(&mut self) {
        for k in 0..self.n_blocks {
            self.lower[k].fill(0.0);
            self.main[k].fill(0.0);
            self.upper[k].fill(0.0);
        }
        self.factorized = false;
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        match self.locate(row, col) {
            Some((k, pos, r, c)) => self.submatrix(k, pos)[(r, c)],
            None => 0.0,
        }
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        let (k, pos, r, c) = self.locate(row, col).ok_or(MatrixError::OutsidePattern { row, col })?;
        self.submatrix_mut(k, pos)[(r, c)] = value;
        Ok(())
    }

    fn scale(&mut self, a: f64) {
        for k in 0..self.n_blocks {
            self.lower[k] *= a;
            self.main[k] *= a;
            self.upper[k] *= a;
        }
        self.factorized = false;
    }

    fn add_to_diagonal(&mut self, a: f64) {
        for block in self.main.iter_mut() {
            for i in 0..self.m {
                block[(i, i)] += a;
            }
        }
        self.factorized = false;
    }

    fn lu(&mut self) -> Result<(), MatrixError> {
        let (nb, m) = (self.n_blocks, self.m);
        self.factorized = false;
        for i in 0..nb {
            self.d_lu[i].copy_from(&self.main[i]);
            if i > 0 {
                self.d_lu[i].gemm(-1.0, &self.lower[i], &self.x_upper[i - 1], 1.0);
            }
            lu_factor_in_place(&mut self.d_lu[i], &mut self.d_pivots[i])
                .map_err(|local| MatrixError::Singular { index: i * m + local })?;
            if i + 1 < nb {
                self.x_upper[i].copy_from(&self.upper[i]);
                for column in self.x_upper[i].as_mut_slice().chunks_exact_mut(m) {
                    lu_solve_in_place(&self.d_lu[i], &self.d_pivots[i], column);
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
        check_len(self.dim(), rhs.len())?;
        let (nb, m) = (self.n_blocks, self.m);
        // forward sweep: z_i = D_i^{-1} (b_i - lower_i z_{i-1})
        for i in 0..nb {
            let (done, rest) = rhs.split_at_mut(i * m);
            let current = &mut rest[..m];
            if i > 0 {
                let previous = &done[(i - 1) * m..];
                let lower = &self.lower[i];
                for c in 0..m {
                    let zc = previous[c];
                    if zc != 0.0 {
                        for r in 0..m {
                            current[r] -= lower[(r, c)] * zc;
                        }
                    }
                }
            }
            lu_solve_in_place(&self.d_lu[i], &self.d_pivots[i], current);
        }
        // backward sweep: x_i = z_i - X_i x_{i+1}
        for i in (0..nb.saturating_sub(1)).rev() {
            let (head, tail) = rhs.split_at_mut((i + 1) * m);
            let current = &mut head[i * m..];
            let next = &tail[..m];
            let x = &self.x_upper[i];
            for c in 0..m {
                let xc = next[c];
                for r in 0..m {
                    current[r] -= x[(r, c)] * xc;
                }
            }
        }
        Ok(())
    }

    fn multiply(&self, x: &[f64], y: &mut [f64]) {
        let (nb, m) = (self.n_blocks, self.m);
        for i in 0..nb {
            let yi = &mut y[i * m..(i + 1) * m];
            yi.iter_mut().for_each(|v| *v = 0.0);
            let mut add_block = |block: &DMatrix<f64>, xj: &[f64]| {
                for c in 0..m {
                    for r in 0..m {
                        yi[r] += block[(r, c)] * xj[c];
                    }
                }
            };
            if i > 0 {
                add_block(&self.lower[i], &x[(i - 1) * m..i * m]);
            }
            add_block(&self.main[i], &x[i * m..(i + 1) * m]);
            if i + 1 < nb {
                add_block(&self.upper[i], &x[(i + 1) * m..(i + 2) * m]);
            }
        }
    }

    fn is_factorized(&self) -> bool {
        self.factorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::somelinalg::RustedLINPACK::dense_lu::DenseMatrix;
    use approx::assert_relative_eq;

    fn filled(nb: usize, m: usize) -> BlockTridiagMatrix {
        let mut a = BlockTridiagMatrix::new(nb, m);
        let n = nb * m;
        for row in 0..n {
            for col in 0..n {
                let v = if row == col {
                    4.0 + (row % 3) as f64
                } else {
                    ((row * 7 + col * 3) % 5) as f64 * 0.2 - 0.4
                };
                // only elements inside the three block diagonals are accepted
                let _ = a.set_value(row, col, v);
            }
        }
        a
    }

    #[test]
    fn block_thomas_matches_dense_lu() {
        let (nb, m) = (5, 3);
        let n = nb * m;
        let mut a = filled(nb, m);
        let mut dense = DenseMatrix::new(n);
        for i in 0..n {
            for j in 0..n {
                dense.set_value(i, j, a.value(i, j)).unwrap();
            }
        }
        let x_exact: Vec<f64> = (0..n).map(|i| (i as f64).sin() + 2.0).collect();
        let mut b = vec![0.0; n];
        a.multiply(&x_exact, &mut b);
        let mut b_dense = vec![0.0; n];
        dense.multiply(&x_exact, &mut b_dense);
        for i in 0..n {
            assert_relative_eq!(b[i], b_dense[i], epsilon = 1e-12);
        }
        a.lu().unwrap();
        a.backsolve(&mut b).unwrap();
        for i in 0..n {
            assert_relative_eq!(b[i], x_exact[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn elements_outside_block_diagonals_are_rejected() {
        let mut a = BlockTridiagMatrix::new(4, 2);
        assert!(a.set_value(2, 1, 1.0).is_ok());
        assert_eq!(a.submatrix(1, BlockPosition::Lower)[(0, 1)], 1.0);
        assert_eq!(a.set_value(0, 4, 1.0), Err(MatrixError::OutsidePattern { row: 0, col: 4 }));
        assert_eq!(a.value(7, 0), 0.0);
    }
}
