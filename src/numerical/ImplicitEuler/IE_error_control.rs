//! Local error test and step-size adaptation.
//!
//! Step-size factors are `1/((safety*err)^p + 1e-6)` with `p = 1/2` for the implicit Euler estimate and
//! `p = 1/3` for the ADI truncation error.
use crate::numerical::ImplicitEuler::IE_config::Tunables;
use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::somelinalg::vector_ops::wrms_norm;

/// Exponent of the step-size factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorExponent {
    SquareRoot,
    CubeRoot,
}

impl ErrorExponent {
    fn apply(self, x: f64) -> f64 {
        match self {
            ErrorExponent::SquareRoot => x.sqrt(),
            ErrorExponent::CubeRoot => x.cbrt(),
        }
    }
}

/// Unbounded step-size factor for the error norm `err_norm`.
pub fn step_scale(err_norm: f64, exponent: ErrorExponent, tun: &Tunables) -> f64 {
    1.0 / (exponent.apply(tun.error_norm_safety * err_norm) + 1e-6)
}

/// err_i = 0.5*(y_i - y_pred_i); returns the WRMS norm of the error vector.
pub fn local_error_norm(y: &[f64], y_pred: &[f64], weights: &[f64], errors: &mut [f64]) -> f64 {
    for ((e, yi), pi) in errors.iter_mut().zip(y).zip(y_pred) {
        *e = 0.5 * (yi - pi);
    }
    wrms_norm(errors, weights)
}

/// Next step size after a failed error test; always below `dt`.
pub fn reduce_after_error_failure(
    t: f64,
    dt: f64,
    err_norm: f64,
    exponent: ErrorExponent,
    tun: &Tunables,
) -> Result<f64, IntegratorError> {
    let scale = step_scale(err_norm, exponent, tun).min(tun.min_error_scale);
    let dt_next = dt * scale;
    if t + dt_next == t {
        return Err(IntegratorError::StepSizeUnderflow { t, dt: dt_next });
    }
    Ok(dt_next)
}

/// Next step size after a Newton failure: half the step.
pub fn reduce_after_nonlinear_failure(t: f64, dt: f64) -> Result<f64, IntegratorError> {
    let dt_next = 0.5 * dt;
    if t + dt_next == t {
        return Err(IntegratorError::StepSizeUnderflow { t, dt: dt_next });
    }
    Ok(dt_next)
}

/// Growth of the step size after an accepted step. The step is never reduced here; factors below
/// `dt_scale_threshold` are ignored unless `allow_small_growth`.
pub fn grow_after_success(
    dt_next: f64,
    dt_max: f64,
    err_norm: f64,
    dt_scale_max: f64,
    allow_small_growth: bool,
    exponent: ErrorExponent,
    tun: &Tunables,
) -> f64 {
    let mut scale = step_scale(err_norm, exponent, tun).min(dt_scale_max).max(1.0);
    if scale < tun.dt_scale_threshold && !allow_small_growth {
        scale = 1.0;
    }
    dt_max.min(dt_next * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejected_steps_always_shrink() {
        let tun = Tunables::default();
        for err in [1.0, 1.5, 10.0, 1e6] {
            for exponent in [ErrorExponent::SquareRoot, ErrorExponent::CubeRoot] {
                let dt_next = reduce_after_error_failure(0.0, 1.0, err, exponent, &tun).unwrap();
                assert!(dt_next <= 0.2);
            }
        }
        let dt_next = reduce_after_error_failure(0.0, 1.0, 1e4, ErrorExponent::SquareRoot, &tun).unwrap();
        assert_relative_eq!(dt_next, 1.0 / (6e4_f64.sqrt() + 1e-6), max_relative = 1e-12);
    }

    #[test]
    fn underflow_is_reported() {
        let tun = Tunables::default();
        let err = reduce_after_error_failure(1e10, 1e-7, 100.0, ErrorExponent::SquareRoot, &tun).unwrap_err();
        assert!(matches!(err, IntegratorError::StepSizeUnderflow { .. }));
        assert!(reduce_after_nonlinear_failure(1.0, 1e-17).is_err());
        assert_eq!(reduce_after_nonlinear_failure(1.0, 0.5).unwrap(), 0.25);
    }

    #[test]
    fn growth_hysteresis() {
        let tun = Tunables::default();
        // 1/sqrt(6*0.2) = 0.91: no growth, never a reduction
        assert_eq!(grow_after_success(1.0, 100.0, 0.2, 10.0, false, ErrorExponent::SquareRoot, &tun), 1.0);
        // factor 1.29 is below the threshold of 1.5
        let small = 1.0 / 6.0 / 1.29_f64.powi(2);
        assert_eq!(grow_after_success(1.0, 100.0, small, 10.0, false, ErrorExponent::SquareRoot, &tun), 1.0);
        assert!(grow_after_success(1.0, 100.0, small, 10.0, true, ErrorExponent::SquareRoot, &tun) > 1.2);
        // limited by dt_scale_max and dt_max
        assert_relative_eq!(grow_after_success(1.0, 100.0, 1e-12, 10.0, false, ErrorExponent::SquareRoot, &tun), 10.0);
        assert_eq!(grow_after_success(1.0, 100.0, 1e-12, 1.0, false, ErrorExponent::SquareRoot, &tun), 1.0);
        assert_eq!(grow_after_success(50.0, 100.0, 1e-12, 10.0, false, ErrorExponent::SquareRoot, &tun), 100.0);
    }

    #[test]
    fn error_vector_is_half_the_predictor_difference() {
        let y = [1.0, 2.0];
        let pred = [0.9, 2.2];
        let w = [1.0, 1.0];
        let mut e = [0.0; 2];
        let norm = local_error_norm(&y, &pred, &w, &mut e);
        assert_relative_eq!(e[0], 0.05, epsilon = 1e-14);
        assert_relative_eq!(e[1], -0.1, epsilon = 1e-14);
        assert_relative_eq!(norm, ((0.05f64.powi(2) + 0.01) / 2.0).sqrt(), epsilon = 1e-14);
    }
}
