//! Structured matrices with in-place LU factorization
/// common interface, error type and the closed set of matrix kinds
pub mod matrix_interface;
/// dense matrix, LU with partial pivoting
pub mod dense_lu;
/// band matrix in compact LINPACK storage
pub mod lu_band_nalg;
/// block-tridiagonal matrix, block Thomas algorithm
pub mod block_tridiag;
/// compressed-row sparse matrix, ILU(0) and column coloring
pub mod sparse_csr;
