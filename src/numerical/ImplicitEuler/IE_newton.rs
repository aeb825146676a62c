//! Modified Newton iteration shared by the implicit Euler and the ADI integrators.
//!
//! The integrator owns the buffers and the model; it exposes them through the `NewtonSystem` trait
//! while `NewtonState` keeps the Jacobian age, the convergence-rate estimate and the counters of one
//! Newton system (the ADI integrator has one state per direction).
use log::{trace, warn};
use strum_macros::{Display, EnumIter, EnumString};

use crate::numerical::ImplicitEuler::IE_config::IntegratorSettings;
use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;

/// When the Newton matrix is regenerated. Variants are ordered by strictness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, EnumIter)]
pub enum ModifiedNewtonStrategy {
    /// reuse the matrix across steps while the step size stays close
    #[default]
    OnceAtStepStart,
    OnceEveryStep,
    /// regenerate after every iteration while the residual norm is above a threshold
    EveryIterationUntilThreshold,
    EveryIteration,
}

/// Terminal states of one Newton solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NewtonOutcome {
    Converged,
    Diverged,
    IterationLimitExceeded,
    /// the matrix was not generated in this attempt: regenerate it and iterate again with the same dt
    RetryWithUpdatedJacobian,
}

/// What the Newton engine needs from an integrator.
pub trait NewtonSystem {
    /// Solves `(I - gamma*J) delta = -residuals`, multiplies delta by `scale` and returns its WRMS norm.
    fn compute_correction(&mut self, scale: f64) -> Result<f64, IntegratorError>;
    /// y += delta
    fn apply_correction(&mut self);
    /// Evaluates the model at the current iterate and returns the WRMS norm of the residuals.
    fn evaluate(&mut self) -> Result<f64, IntegratorError>;
    /// Regenerates and factorizes the Newton matrix at the current iterate.
    fn update_jacobian(&mut self) -> Result<(), IntegratorError>;
}

/// Jacobian age, convergence estimate and counters of one Newton system.
#[derive(Debug, Clone, Default)]
pub struct NewtonState {
    /// total Newton iterations
    pub n_iterations: usize,
    /// iterations of the current attempt
    pub n_local_iterations: usize,
    pub n_conv_fails: usize,
    pub n_diverged: usize,
    pub n_jac_evals: usize,
    pub n_steps_since_jac_update: usize,
    pub dt_jac_update: f64,
    /// the matrix was generated with the current iterate in this attempt
    pub jac_current: bool,
    /// the last regeneration succeeded, the factorization can be used
    pub jac_valid: bool,
    /// the previous attempt ended with a Newton failure
    pub newton_convergence_error: bool,
    pub conv_rate_delta_norm: f64,
    /// norm of the residuals of the current iterate
    pub residual_norm: f64,
}

impl NewtonState {
    pub fn new(dt0: f64) -> Self {
        NewtonState { dt_jac_update: dt0, conv_rate_delta_norm: 1.0, ..Default::default() }
    }

    /// Decides whether the Newton matrix has to be regenerated before iterating with step size `dt`.
    pub fn determine_jacobian_update(&self, dt: f64, settings: &IntegratorSettings) -> bool {
        let tun = &settings.tunables;
        if self.n_iterations == 0 || !self.jac_valid {
            return true;
        }
        if settings.modified_newton_strategy > ModifiedNewtonStrategy::OnceAtStepStart {
            return true;
        }
        if self.newton_convergence_error {
            return true;
        }
        let dt_ratio = dt / self.dt_jac_update;
        if dt_ratio > tun.max_dt_ratio || 1.0 / dt_ratio > tun.max_dt_ratio {
            return true;
        }
        self.n_steps_since_jac_update > tun.max_steps_since_jac_update && dt_ratio != 1.0
    }

    /// Bookkeeping after the Newton matrix was regenerated for step size `dt`.
    pub fn jacobian_updated(&mut self, dt: f64, reset_conv_rate: bool) {
        self.n_jac_evals += 1;
        self.n_steps_since_jac_update = 0;
        self.jac_current = true;
        self.jac_valid = true;
        self.dt_jac_update = dt;
        if reset_conv_rate {
            self.conv_rate_delta_norm = 1.0;
        }
    }

    /// Prepares a new attempt: regenerates the matrix when needed and clears the attempt flags.
    pub fn begin_attempt<S: NewtonSystem>(
        &mut self,
        sys: &mut S,
        dt: f64,
        settings: &IntegratorSettings,
    ) -> Result<(), IntegratorError> {
        self.jac_current = false;
        self.n_local_iterations = 0;
        let update = self.determine_jacobian_update(dt, settings);
        self.newton_convergence_error = false;
        if update {
            self.refresh_jacobian(sys, dt, true)?;
        }
        Ok(())
    }

    /// Regenerates the matrix; a failed regeneration forces a new one in the next attempt.
    fn refresh_jacobian<S: NewtonSystem>(&mut self, sys: &mut S, dt: f64, reset_conv_rate: bool) -> Result<(), IntegratorError> {
        match sys.update_jacobian() {
            Ok(()) => {
                self.jacobian_updated(dt, reset_conv_rate);
                Ok(())
            }
            Err(e) => {
                self.jac_valid = false;
                self.jac_current = false;
                self.newton_convergence_error = true;
                Err(e)
            }
        }
    }

    fn failure(&self, outcome: NewtonOutcome) -> NewtonOutcome {
        if self.jac_current { outcome } else { NewtonOutcome::RetryWithUpdatedJacobian }
    }
}

/// Runs the modified Newton iteration from the current iterate, whose residual norm must be stored
/// in `state.residual_norm`.
pub fn newton_iteration<S: NewtonSystem>(
    sys: &mut S,
    state: &mut NewtonState,
    settings: &IntegratorSettings,
    dt: f64,
) -> Result<NewtonOutcome, IntegratorError> {
    let tun = &settings.tunables;
    if settings.nl_residual_tolerance > 0.0 && state.residual_norm < settings.nl_residual_tolerance {
        state.n_steps_since_jac_update += 1;
        return Ok(NewtonOutcome::Converged);
    }
    let mut residual_norm_last = state.residual_norm;
    let mut delta_norm_last = 1.0;
    loop {
        let scale = if state.dt_jac_update != dt { state.dt_jac_update / dt } else { 1.0 };
        let delta_norm = sys.compute_correction(scale)?;
        state.n_iterations += 1;
        state.n_local_iterations += 1;

        if delta_norm > tun.divergence_delta_norm {
            state.n_diverged += 1;
            warn!(
                "Newton diverging (dt ratio = {}), correction norm {:e} too large",
                dt / state.dt_jac_update,
                delta_norm
            );
            return Ok(state.failure(NewtonOutcome::Diverged));
        }
        sys.apply_correction();

        let conv_rate_delta = delta_norm / delta_norm_last;
        if state.n_local_iterations > 1 {
            state.conv_rate_delta_norm =
                (tun.convergence_rate_reduction * state.conv_rate_delta_norm).max(conv_rate_delta);
        }
        // estimate of the remaining correction, 0.5 comes from the error test
        let delta_norm_scaled = state.conv_rate_delta_norm.min(1.0) * delta_norm / settings.non_lin_conv_coeff * 0.5;
        if delta_norm_scaled <= 1.0 {
            trace_iteration(state, dt, 0.0, delta_norm, conv_rate_delta);
            break;
        }

        if state.n_local_iterations >= settings.max_non_lin_iters {
            state.n_conv_fails += 1;
            state.n_local_iterations = 0;
            if state.jac_current {
                warn!("too many Newton iterations, reducing time step");
                return Ok(NewtonOutcome::IterationLimitExceeded);
            }
            state.newton_convergence_error = true;
            warn!(
                "too many Newton iterations (dt ratio = {}), retrying with a new Jacobian",
                dt / state.dt_jac_update
            );
            return Ok(NewtonOutcome::RetryWithUpdatedJacobian);
        }

        state.residual_norm = sys.evaluate()?;
        let conv_rate_residuals = state.residual_norm / residual_norm_last;
        residual_norm_last = state.residual_norm;
        delta_norm_last = delta_norm;
        trace_iteration(state, dt, conv_rate_residuals, delta_norm, conv_rate_delta);

        if state.n_local_iterations > tun.divergence_check_iter_limit
            && conv_rate_residuals > 1.0
            && conv_rate_delta > 1.0
        {
            state.n_diverged += 1;
            warn!("Newton diverging (dt ratio = {})", dt / state.dt_jac_update);
            return Ok(state.failure(NewtonOutcome::Diverged));
        }

        // strict Newton variants keep the convergence rate
        let refresh = match settings.modified_newton_strategy {
            ModifiedNewtonStrategy::EveryIteration => true,
            ModifiedNewtonStrategy::EveryIterationUntilThreshold => {
                state.residual_norm > tun.newton_threshold_residual
            }
            _ => false,
        };
        if refresh {
            state.refresh_jacobian(sys, dt, false)?;
        }
    }
    state.n_steps_since_jac_update += 1;
    Ok(NewtonOutcome::Converged)
}

fn trace_iteration(state: &NewtonState, dt: f64, conv_rate_residuals: f64, delta_norm: f64, conv_rate_delta: f64) {
    trace!(
        "iters {:>6} dt {:>10.4e} local {:>3} since_jac {:>4} jac_current {} |res| {:>10.3e} res_rate {:>8.3} |delta| {:>10.3e} delta_rate {:>8.3}",
        state.n_iterations,
        dt,
        state.n_local_iterations,
        state.n_steps_since_jac_update,
        state.jac_current,
        state.residual_norm,
        conv_rate_residuals,
        delta_norm,
        conv_rate_delta
    );
}
