//! some linear algebra functions used throughout the code
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// BiConjugate Gradient Stabilized (BICGSTAB) method for solving linear systems
pub mod BICGSTAB;
/// structured matrices with LU factorization: dense, band, block-tridiagonal, sparse CSR
pub mod RustedLINPACK;
/// slice kernels: linear combinations, dot products, weighted norms
pub mod vector_ops;
