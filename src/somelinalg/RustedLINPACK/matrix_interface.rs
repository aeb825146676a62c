//! Common interface of the structured matrices used for Jacobians and Newton system matrices.
//!
//! All matrix kinds keep two buffers: the assembled values (used by `value()` and `multiply()`)
//! and a separate factorization produced by `lu()` (used by `backsolve()`). The buffers are
//! allocated once by the constructor, nothing is reallocated afterwards.
use enum_dispatch::enum_dispatch;
use std::fmt;

use crate::somelinalg::RustedLINPACK::block_tridiag::BlockTridiagMatrix;
use crate::somelinalg::RustedLINPACK::dense_lu::DenseMatrix;
use crate::somelinalg::RustedLINPACK::lu_band_nalg::BandMatrix;
use crate::somelinalg::RustedLINPACK::sparse_csr::SparseMatrixCSR;

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixError {
    /// zero pivot met at the given (global) row
    Singular { index: usize },
    /// element outside of the structural pattern
    OutsidePattern { row: usize, col: usize },
    DimensionMismatch { expected: usize, found: usize },
    /// backsolve requested without a valid factorization
    NotFactorized,
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::Singular { index } => write!(f, "singular matrix: zero pivot at row {}", index),
            MatrixError::OutsidePattern { row, col } => {
                write!(f, "element ({}, {}) is outside of the matrix pattern", row, col)
            }
            MatrixError::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {}, found {}", expected, found)
            }
            MatrixError::NotFactorized => write!(f, "matrix has not been factorized"),
        }
    }
}

impl std::error::Error for MatrixError {}

#[enum_dispatch]
pub trait MatrixInterface {
    /// number of rows (= number of columns)
    fn dim(&self) -> usize;
    /// sets all assembled values to zero and invalidates the factorization
    fn set_zero(&mut self);
    /// assembled value, zero outside of the pattern
    fn value(&self, row: usize, col: usize) -> f64;
    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError>;
    /// multiplies all assembled values with `a`
    fn scale(&mut self, a: f64);
    /// adds `a` to all diagonal elements
    fn add_to_diagonal(&mut self, a: f64);
    /// in-place LU factorization of the assembled values
    fn lu(&mut self) -> Result<(), MatrixError>;
    /// solves A x = rhs in place with the stored factorization
    fn backsolve(&self, rhs: &mut [f64]) -> Result<(), MatrixError>;
    /// y = A x with the assembled (not factorized) values
    fn multiply(&self, x: &[f64], y: &mut [f64]);
    /// true when a factorization for the current values is available
    fn is_factorized(&self) -> bool;
}

/// Closed set of matrix storage kinds.
#[enum_dispatch(MatrixInterface)]
#[derive(Debug, Clone)]
pub enum StructuredMatrix {
    Dense(DenseMatrix),
    Band(BandMatrix),
    BlockTridiag(BlockTridiagMatrix),
    SparseCSR(SparseMatrixCSR),
}

impl StructuredMatrix {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StructuredMatrix::Dense(_) => "Dense",
            StructuredMatrix::Band(_) => "Band",
            StructuredMatrix::BlockTridiag(_) => "BlockTridiag",
            StructuredMatrix::SparseCSR(_) => "SparseCSR",
        }
    }
}

pub(crate) fn check_len(expected: usize, found: usize) -> Result<(), MatrixError> {
    if expected != found {
        return Err(MatrixError::DimensionMismatch { expected, found });
    }
    Ok(())
}
