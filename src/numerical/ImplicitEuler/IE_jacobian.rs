//! Finite-difference approximation of df/dy.
//!
//! Columns are perturbed in groups: all columns of a group have disjoint row supports, so one model
//! evaluation yields the difference quotients of the whole group. The grouping depends on the storage:
//! one column per group (dense), stride `ml + mu + 1` (band), stride of three blocks per equation
//! (block-tridiagonal) or a greedy coloring of the column intersection graph (sparse CSR).
use log::{debug, info};
use std::cmp::min;

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::model_interface::ModelInterface;
use crate::somelinalg::RustedLINPACK::block_tridiag::BlockTridiagMatrix;
use crate::somelinalg::RustedLINPACK::dense_lu::DenseMatrix;
use crate::somelinalg::RustedLINPACK::lu_band_nalg::BandMatrix;
use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixInterface, StructuredMatrix};
use crate::somelinalg::RustedLINPACK::sparse_csr::{ColumnOrder, SparseMatrixCSR, color_columns};
use crate::somelinalg::vector_ops::vector_copy;

/// Storage kind of the generated Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub enum JacobianKind {
    Dense,
    Band { ml: usize, mu: usize },
    BlockTridiag { n_blocks: usize, block_size: usize },
    /// column indices of every row and the visiting order of the coloring
    SparseCSR { rows: Vec<Vec<usize>>, order: ColumnOrder },
}

/// rows that can hold a non-zero in a given column
#[derive(Debug, Clone)]
enum ColumnSupport {
    All,
    Band { ml: usize, mu: usize },
    Blocks { block_size: usize, n_blocks: usize },
    Pattern(Vec<Vec<usize>>),
}

impl ColumnSupport {
    fn rows(&self, j: usize, n: usize) -> RowIter<'_> {
        match self {
            ColumnSupport::All => RowIter::Range(0..n),
            ColumnSupport::Band { ml, mu } => RowIter::Range(j.saturating_sub(*mu)..min(j + ml, n - 1) + 1),
            ColumnSupport::Blocks { block_size, n_blocks } => {
                let b = j / block_size;
                let first = b.saturating_sub(1) * block_size;
                let last = min(b + 2, *n_blocks) * block_size;
                RowIter::Range(first..last)
            }
            ColumnSupport::Pattern(columns) => RowIter::List(columns[j].iter()),
        }
    }
}

enum RowIter<'a> {
    Range(std::ops::Range<usize>),
    List(std::slice::Iter<'a, usize>),
}

impl Iterator for RowIter<'_> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        match self {
            RowIter::Range(r) => r.next(),
            RowIter::List(it) => it.next().copied(),
        }
    }
}

/// relative part of the default perturbation
pub const DEFAULT_REL_TOL_DQ: f64 = 1e-7;
/// absolute part of the default perturbation
pub const DEFAULT_ABS_TOL_DQ: f64 = 1e-8;

/// Finite-difference increment of unknown `j`; a zero or non-finite increment is an error.
pub fn fd_increment(j: usize, y_j: f64, rel_tol_dq: f64, abs_tol_dq: f64) -> Result<f64, IntegratorError> {
    let diff = y_j.abs() * rel_tol_dq + abs_tol_dq;
    if diff == 0.0 || !diff.is_finite() {
        return Err(IntegratorError::Config(format!("zero finite-difference increment for y[{}] = {}", j, y_j)));
    }
    Ok(diff)
}

#[derive(Debug, Clone)]
pub struct JacobianGenerator {
    n: usize,
    kind_name: &'static str,
    matrix: StructuredMatrix,
    support: ColumnSupport,
    groups: Vec<Vec<usize>>,
    y_mod: Vec<f64>,
    ydot_mod: Vec<f64>,
    ydiff: Vec<f64>,
    /// relative part of the perturbation
    pub rel_tol_dq: f64,
    /// absolute part of the perturbation
    pub abs_tol_dq: f64,
    n_rhs_evals: usize,
    n_jac_evals: usize,
}

impl JacobianGenerator {
    pub fn new(n: usize, kind: JacobianKind) -> Result<Self, IntegratorError> {
        if n == 0 {
            return Err(IntegratorError::Config("Jacobian of an empty system".to_string()));
        }
        let (matrix, support, groups) = match kind {
            JacobianKind::Dense => (
                StructuredMatrix::from(DenseMatrix::new(n)),
                ColumnSupport::All,
                (0..n).map(|j| vec![j]).collect::<Vec<_>>(),
            ),
            JacobianKind::Band { ml, mu } => {
                if ml >= n || mu >= n {
                    return Err(IntegratorError::Config(format!(
                        "band widths ml = {}, mu = {} exceed the system size {}",
                        ml, mu, n
                    )));
                }
                let stride = min(n, ml + mu + 1);
                let groups: Vec<Vec<usize>> = (0..stride).map(|g| (g..n).step_by(stride).collect()).collect();
                (StructuredMatrix::from(BandMatrix::new(n, ml, mu)), ColumnSupport::Band { ml, mu }, groups)
            }
            JacobianKind::BlockTridiag { n_blocks, block_size } => {
                if n_blocks * block_size != n || block_size == 0 {
                    return Err(IntegratorError::Config(format!(
                        "{} blocks of size {} do not match the system size {}",
                        n_blocks, block_size, n
                    )));
                }
                let mut groups: Vec<Vec<usize>> = Vec::with_capacity(3 * block_size);
                for var in 0..block_size {
                    for first in 0..min(3, n_blocks) {
                        groups.push((first..n_blocks).step_by(3).map(|b| b * block_size + var).collect());
                    }
                }
                (
                    StructuredMatrix::from(BlockTridiagMatrix::new(n_blocks, block_size)),
                    ColumnSupport::Blocks { block_size, n_blocks },
                    groups,
                )
            }
            JacobianKind::SparseCSR { rows, order } => {
                let sparse = SparseMatrixCSR::from_row_indices(n, &rows)?;
                let groups = color_columns(sparse.pattern(), order);
                let transposed = sparse.pattern().transpose();
                let columns: Vec<Vec<usize>> = (0..n).map(|j| transposed.lane(j).to_vec()).collect();
                info!("sparse Jacobian: {} non-zeros, {} colors ({} order)", sparse.nnz(), groups.len(), order);
                (StructuredMatrix::from(sparse), ColumnSupport::Pattern(columns), groups)
            }
        };
        let kind_name = matrix.kind_name();
        debug!("{} Jacobian generator: n = {}, {} perturbation groups", kind_name, n, groups.len());
        Ok(JacobianGenerator {
            n,
            kind_name,
            matrix,
            support,
            groups,
            y_mod: vec![0.0; n],
            ydot_mod: vec![0.0; n],
            ydiff: vec![0.0; n],
            rel_tol_dq: DEFAULT_REL_TOL_DQ,
            abs_tol_dq: DEFAULT_ABS_TOL_DQ,
            n_rhs_evals: 0,
            n_jac_evals: 0,
        })
    }

    /// Fills the matrix with df/dy at (t, y); `ydot` must hold f(t, y).
    /// The model time must already be set to `t`; the model state is restored to `y` afterwards.
    pub fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        _t: f64,
        y: &[f64],
        ydot: &[f64],
    ) -> Result<(), IntegratorError> {
        self.matrix.set_zero();
        vector_copy(y, &mut self.y_mod);
        for g in 0..self.groups.len() {
            for &j in &self.groups[g] {
                let diff = fd_increment(j, y[j], self.rel_tol_dq, self.abs_tol_dq)?;
                self.ydiff[j] = diff;
                self.y_mod[j] += diff;
            }
            model.set_y(&self.y_mod).into_result("set_y (Jacobian)")?;
            model.ydot(&mut self.ydot_mod).into_result("ydot (Jacobian)")?;
            self.n_rhs_evals += 1;
            for &j in &self.groups[g] {
                for i in self.support.rows(j, self.n) {
                    let val = (self.ydot_mod[i] - ydot[i]) / self.ydiff[j];
                    self.matrix.set_value(i, j, val)?;
                }
                self.y_mod[j] = y[j];
            }
        }
        model.set_y(y).into_result("set_y")?;
        self.n_jac_evals += 1;
        Ok(())
    }

    /// jv = J v with the unfactorized Jacobian
    pub fn jac_times_vec(&self, v: &[f64], jv: &mut [f64]) {
        self.matrix.multiply(v, jv);
    }

    pub fn matrix(&self) -> &StructuredMatrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut StructuredMatrix {
        &mut self.matrix
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind_name
    }

    /// model evaluations per Jacobian
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn n_rhs_evals(&self) -> usize {
        self.n_rhs_evals
    }

    pub fn n_jac_evals(&self) -> usize {
        self.n_jac_evals
    }
}
