//! Stabilized bi-conjugate gradient solver for A x = b, suitable for non-symmetric matrices.
//!
//! Matrix-free: the operator is passed as a closure `op(v, out)` computing `out = A v` (for a left
//! preconditioned system `out = M^-1 A v`, with `b` already preconditioned). All work vectors are
//! allocated by `new()` and reused by every `solve()`.
//!
//! # Example
//! ```rust
//! use RustedSolverFramework::somelinalg::BICGSTAB::BiCGSTAB;
//! let a = [[4.0, 1.0], [2.0, 3.0]];
//! let mut solver = BiCGSTAB::new(2, 50, 1e-12);
//! let mut x = vec![0.0; 2];
//! let converged = solver
//!     .solve(
//!         |v: &[f64], out: &mut [f64]| -> Result<(), ()> {
//!             for i in 0..2 {
//!                 out[i] = a[i][0] * v[0] + a[i][1] * v[1];
//!             }
//!             Ok(())
//!         },
//!         &[1.0, 2.0],
//!         &mut x,
//!     )
//!     .unwrap();
//! assert!(converged);
//! assert!((x[0] - 0.1).abs() < 1e-10 && (x[1] - 0.6).abs() < 1e-10);
//! ```
use log::debug;

use crate::somelinalg::vector_ops::{dot, l2_norm, vector_add, vector_copy, vector_fill, vector_linear_sum};

#[derive(Debug, Clone)]
pub struct BiCGSTAB {
    n: usize,
    max_iter: usize,
    tol: f64,
    soft_restart_threshold: f64,
    iteration_count: usize,
    total_iterations: usize,
    soft_restart_count: usize,
    hard_restart_count: usize,
    err: f64,
    r: Vec<f64>,
    // arbitrary w/ dot(rhat, r) != 0
    rhat: Vec<f64>,
    p: Vec<f64>,
    v: Vec<f64>,
    s: Vec<f64>,
    t: Vec<f64>,
    rho: f64,
}

impl BiCGSTAB {
    pub fn new(n: usize, max_iter: usize, tol: f64) -> Self {
        BiCGSTAB {
            n,
            max_iter,
            tol,
            soft_restart_threshold: 0.1,
            iteration_count: 0,
            total_iterations: 0,
            soft_restart_count: 0,
            hard_restart_count: 0,
            err: 0.0,
            r: vec![0.0; n],
            rhat: vec![0.0; n],
            p: vec![0.0; n],
            v: vec![0.0; n],
            s: vec![0.0; n],
            t: vec![0.0; n],
            rho: 0.0,
        }
    }

    /// Set the minimum value of `rho` to trigger a soft restart
    pub fn with_restart_threshold(mut self, thresh: f64) -> Self {
        self.soft_restart_threshold = thresh;
        self
    }

    /// Solves starting from x = 0. Returns `Ok(true)` when `|b - A x| <= tol * |b|` was reached
    /// within `max_iter` iterations, `Ok(false)` on breakdown or iteration limit (x holds the last
    /// iterate). Errors of the operator are passed through.
    pub fn solve<E, F>(&mut self, mut op: F, b: &[f64], x: &mut [f64]) -> Result<bool, E>
    where
        F: FnMut(&[f64], &mut [f64]) -> Result<(), E>,
    {
        debug_assert_eq!(b.len(), self.n);
        self.iteration_count = 0;
        vector_fill(x, 0.0);
        let b_norm = l2_norm(b);
        if b_norm == 0.0 {
            self.err = 0.0;
            return Ok(true);
        }
        let target = self.tol * b_norm;
        vector_copy(b, &mut self.r);
        self.err = b_norm;
        self.soft_restart();
        self.soft_restart_count -= 1;

        while self.iteration_count < self.max_iter {
            self.iteration_count += 1;
            self.total_iterations += 1;
            // gradient descent step
            op(&self.p, &mut self.v)?;
            let rv = dot(&self.rhat, &self.v);
            if rv == 0.0 {
                debug!("BiCGSTAB breakdown: (rhat, v) = 0 at iteration {}", self.iteration_count);
                return Ok(false);
            }
            let alpha = self.rho / rv;
            vector_add(alpha, &self.p, x);
            vector_linear_sum(1.0, &self.r, -alpha, &self.v, &mut self.s);
            if l2_norm(&self.s) <= target {
                if self.hard_restart(&mut op, b, x)? <= target {
                    return Ok(true);
                }
                continue;
            }
            // conjugate direction step
            op(&self.s, &mut self.t)?;
            let tt = dot(&self.t, &self.t);
            if tt == 0.0 {
                return Ok(false);
            }
            let omega = dot(&self.t, &self.s) / tt;
            vector_add(omega, &self.s, x);
            vector_linear_sum(1.0, &self.s, -omega, &self.t, &mut self.r);
            self.err = l2_norm(&self.r);
            if self.err <= target {
                // check true error, which may not match the running estimate
                if self.hard_restart(&mut op, b, x)? <= target {
                    return Ok(true);
                }
                continue;
            }
            if omega == 0.0 {
                return Ok(false);
            }
            let rho_prev = self.rho;
            self.rho = dot(&self.rhat, &self.r);
            if self.rho.abs() / (self.err * self.err) < self.soft_restart_threshold {
                self.soft_restart();
            } else {
                let beta = (self.rho / rho_prev) * (alpha / omega);
                // p = r + beta * (p - omega * v)
                vector_add(-omega, &self.v, &mut self.p);
                vector_linear_sum(1.0, &self.r, beta, &self.p, &mut self.s);
                std::mem::swap(&mut self.p, &mut self.s);
            }
        }
        Ok(false)
    }

    /// Reset the reference direction `rhat` to be equal to `r`
    /// to prevent a singularity in `1 / rho`.
    fn soft_restart(&mut self) {
        self.soft_restart_count += 1;
        vector_copy(&self.r, &mut self.rhat);
        self.rho = self.err * self.err;
        vector_copy(&self.r, &mut self.p);
    }

    /// Recalculate the residual from scratch, returns its norm.
    fn hard_restart<E, F>(&mut self, op: &mut F, b: &[f64], x: &[f64]) -> Result<f64, E>
    where
        F: FnMut(&[f64], &mut [f64]) -> Result<(), E>,
    {
        self.hard_restart_count += 1;
        op(x, &mut self.t)?;
        vector_linear_sum(1.0, b, -1.0, &self.t, &mut self.r);
        self.err = l2_norm(&self.r);
        self.soft_restart();
        // don't count soft restarts caused by hard restarts
        self.soft_restart_count -= 1;
        Ok(self.err)
    }

    /// Iterations of the last solve
    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    /// Iterations of all solves
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn soft_restart_count(&self) -> usize {
        self.soft_restart_count
    }

    pub fn hard_restart_count(&self) -> usize {
        self.hard_restart_count
    }

    /// Latest estimate of normed error
    pub fn err(&self) -> f64 {
        self.err
    }

    pub fn tol(&self) -> f64 {
        self.tol
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bicgstab_nonsymmetric() {
        // 4x4 system
        let a = [
            [1.0, 0.0, 0.0, 2.0],
            [0.0, 21.0, 6.0, 0.0],
            [0.0, 6.0, 2.0, 0.0],
            [2.0, 0.0, 0.0, 8.0],
        ];
        let op = |v: &[f64], out: &mut [f64]| -> Result<(), ()> {
            for i in 0..4 {
                out[i] = (0..4).map(|j| a[i][j] * v[j]).sum();
            }
            Ok(())
        };
        let mut solver = BiCGSTAB::new(4, 50, 1e-12);
        let b = vec![1.0; 4];
        let mut x = vec![0.0; 4];
        assert!(solver.solve(op, &b, &mut x).unwrap());
        let mut b_recovered = vec![0.0; 4];
        op(&x, &mut b_recovered).unwrap();
        for i in 0..4 {
            assert_relative_eq!(b_recovered[i], 1.0, epsilon = 1e-9);
        }
        assert!(solver.iteration_count() > 0);
    }

    #[test]
    fn test_iteration_limit_reported() {
        let op = |v: &[f64], out: &mut [f64]| -> Result<(), ()> {
            for i in 0..v.len() {
                out[i] = (i as f64 + 1.0) * v[i] + if i + 1 < v.len() { v[i + 1] } else { 0.0 };
            }
            Ok(())
        };
        let mut solver = BiCGSTAB::new(30, 1, 1e-14);
        let b = vec![1.0; 30];
        let mut x = vec![0.0; 30];
        assert!(!solver.solve(op, &b, &mut x).unwrap());
        assert_eq!(solver.iteration_count(), 1);
    }

    #[test]
    fn test_zero_rhs_gives_zero_solution() {
        let mut solver = BiCGSTAB::new(3, 10, 1e-10);
        let mut x = vec![5.0; 3];
        let converged = solver
            .solve(|_: &[f64], _: &mut [f64]| -> Result<(), ()> { Ok(()) }, &[0.0; 3], &mut x)
            .unwrap();
        assert!(converged);
        assert_eq!(x, vec![0.0; 3]);
    }
}
