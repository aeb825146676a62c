//! Elementary kernels over flat buffers of equal length.
//!
//! Every function works in place on caller-owned slices and never allocates.
//! For long vectors (`len >= PARALLEL_THRESHOLD`) the loops run data-parallel on the rayon pool,
//! the norm kernels stay sequential so that results are reproducible bit by bit.
use itertools::izip;
use rayon::prelude::*;

/// vector length from which the element-wise kernels go parallel
pub const PARALLEL_THRESHOLD: usize = 20_000;

/// dst = src
pub fn vector_copy(src: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(src.len(), dst.len());
    dst.copy_from_slice(src);
}

/// x[i] = value
pub fn vector_fill(x: &mut [f64], value: f64) {
    if x.len() >= PARALLEL_THRESHOLD {
        x.par_iter_mut().for_each(|xi| *xi = value);
    } else {
        x.iter_mut().for_each(|xi| *xi = value);
    }
}

/// x *= a
pub fn vector_scale_by(a: f64, x: &mut [f64]) {
    if x.len() >= PARALLEL_THRESHOLD {
        x.par_iter_mut().for_each(|xi| *xi *= a);
    } else {
        x.iter_mut().for_each(|xi| *xi *= a);
    }
}

/// z = a*x
pub fn vector_scale(a: f64, x: &[f64], z: &mut [f64]) {
    debug_assert_eq!(x.len(), z.len());
    if x.len() >= PARALLEL_THRESHOLD {
        z.par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(zi, xi)| *zi = a * xi);
    } else {
        for (zi, xi) in z.iter_mut().zip(x) {
            *zi = a * xi;
        }
    }
}

/// y += a*x
pub fn vector_add(a: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    if x.len() >= PARALLEL_THRESHOLD {
        y.par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(yi, xi)| *yi += a * xi);
    } else {
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi += a * xi;
        }
    }
}

/// z = a*x + b*y
pub fn vector_linear_sum(a: f64, x: &[f64], b: f64, y: &[f64], z: &mut [f64]) {
    debug_assert_eq!(x.len(), z.len());
    debug_assert_eq!(y.len(), z.len());
    if x.len() >= PARALLEL_THRESHOLD {
        z.par_iter_mut()
            .zip(x.par_iter().zip(y.par_iter()))
            .for_each(|(zi, (xi, yi))| *zi = a * xi + b * yi);
    } else {
        for (zi, xi, yi) in izip!(z.iter_mut(), x, y) {
            *zi = a * xi + b * yi;
        }
    }
}

/// dot product
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Euclidean norm
pub fn l2_norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

/// Weighted root-mean-square norm sqrt( 1/n * sum (v_i*w_i)^2 ).
/// An empty vector has norm 0.
pub fn wrms_norm(v: &[f64], w: &[f64]) -> f64 {
    debug_assert_eq!(v.len(), w.len());
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().zip(w).map(|(vi, wi)| (vi * wi).powi(2)).sum();
    (sum / v.len() as f64).sqrt()
}

/// Error weights 1/(|y_i|*rel_tol + abs_tol_i); `abs_tol_vec` overrides the scalar tolerance.
pub fn error_weights(y: &[f64], rel_tol: f64, abs_tol: f64, abs_tol_vec: Option<&[f64]>, w: &mut [f64]) {
    debug_assert_eq!(y.len(), w.len());
    match abs_tol_vec {
        Some(atol) => {
            for (wi, yi, ai) in izip!(w.iter_mut(), y, atol) {
                *wi = 1.0 / (yi.abs() * rel_tol + ai);
            }
        }
        None => {
            for (wi, yi) in w.iter_mut().zip(y) {
                *wi = 1.0 / (yi.abs() * rel_tol + abs_tol);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_sum_and_add() {
        let x = vec![1.0, 2.0, 3.0];
        let y = vec![4.0, 5.0, 6.0];
        let mut z = vec![0.0; 3];
        vector_linear_sum(2.0, &x, -1.0, &y, &mut z);
        assert_eq!(z, vec![-2.0, -1.0, 0.0]);
        vector_add(0.5, &x, &mut z);
        assert_eq!(z, vec![-1.5, 0.0, 1.5]);
        vector_scale_by(2.0, &mut z);
        assert_eq!(z, vec![-3.0, 0.0, 3.0]);
    }

    #[test]
    fn parallel_path_matches_sequential() {
        let n = PARALLEL_THRESHOLD + 7;
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = (0..n).map(|i| 1.0 - i as f64).collect();
        let mut z = vec![0.0; n];
        vector_linear_sum(3.0, &x, 2.0, &y, &mut z);
        for i in [0, 17, n / 2, n - 1] {
            assert_eq!(z[i], 3.0 * x[i] + 2.0 * y[i]);
        }
        vector_fill(&mut z, 1.25);
        assert!(z.iter().all(|&v| v == 1.25));
    }

    #[test]
    fn wrms_norm_of_weighted_vector() {
        let v = vec![3.0, 4.0];
        let w = vec![1.0, 1.0];
        assert_relative_eq!(wrms_norm(&v, &w), (12.5f64).sqrt(), epsilon = 1e-14);
        assert_eq!(wrms_norm(&[], &[]), 0.0);
    }

    #[test]
    fn error_weights_scalar_and_vector_tolerance() {
        let y = vec![1.0, -2.0];
        let mut w = vec![0.0; 2];
        error_weights(&y, 1e-3, 1e-6, None, &mut w);
        assert_relative_eq!(w[1], 1.0 / (2e-3 + 1e-6), epsilon = 1e-9);
        error_weights(&y, 1e-3, 1e-6, Some(&[1.0, 2.0]), &mut w);
        assert_relative_eq!(w[0], 1.0 / (1e-3 + 1.0), epsilon = 1e-12);
        assert_relative_eq!(w[1], 1.0 / (2e-3 + 2.0), epsilon = 1e-12);
    }
}
