//! Adaptive implicit Euler integrator with modified Newton iteration.
//!
//! One call of `step()` advances the solution by one accepted step:
//! the explicit Euler predictor is corrected by Newton iterations on
//! `G(y) = y - yn - dt*f(t+dt, y) = 0`, the local error is estimated from the predictor difference
//! and failed attempts are repeated with a reduced step size.
//! The model is borrowed for every call, the integrator owns the linear solver.
use log::{debug, info, warn};
use std::mem::swap;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};

use crate::Utils::logger::{StatisticsWriter, format_step_size, format_time, log_metrics};
use crate::numerical::ImplicitEuler::IE_config::IntegratorSettings;
use crate::numerical::ImplicitEuler::IE_error_control::{
    ErrorExponent, grow_after_success, local_error_norm, reduce_after_error_failure,
    reduce_after_nonlinear_failure,
};
use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::JacobianGenerator;
use crate::numerical::ImplicitEuler::IE_les::{LESInterface, LESSolver, LESStatistics};
use crate::numerical::ImplicitEuler::IE_newton::{NewtonOutcome, NewtonState, NewtonSystem, newton_iteration};
use crate::numerical::ImplicitEuler::IE_precond::Preconditioner;
use crate::numerical::ImplicitEuler::model_interface::{CalculationResult, ModelInterface};
use crate::somelinalg::vector_ops::{error_weights, vector_copy, vector_linear_sum, vector_scale, vector_scale_by, wrms_norm};

/// Capability tag of the integrators, checked by the linear solvers at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum IntegratorKind {
    ImplicitEuler,
    ADI,
}

/// Computes the error weights of `y` into `weights`, by the model or from the tolerances.
pub(crate) fn compute_weights(
    model: &mut dyn ModelInterface,
    settings: &IntegratorSettings,
    y: &[f64],
    weights: &mut [f64],
) -> Result<(), IntegratorError> {
    if model.has_error_weights_function() {
        model.calculate_error_weights(y, weights).into_result("calculate_error_weights")
    } else {
        error_weights(y, settings.rel_tol, settings.abs_tol, settings.abs_tol_vec.as_deref(), weights);
        Ok(())
    }
}

/// `set_time` failures are never absorbed by the step reduction.
pub(crate) fn set_model_time(model: &mut dyn ModelInterface, t: f64) -> Result<(), IntegratorError> {
    match model.set_time(t) {
        CalculationResult::Success => Ok(()),
        other => Err(IntegratorError::ModelAbort(format!("set_time({}) returned {}", t, other))),
    }
}

/// Recoverable failures inside a Newton attempt count as divergence.
pub(crate) fn absorb_recoverable(result: Result<NewtonOutcome, IntegratorError>) -> Result<NewtonOutcome, IntegratorError> {
    match result {
        Err(e) if e.is_recoverable() => {
            warn!("recoverable failure during the Newton iteration: {}", e);
            Ok(NewtonOutcome::Diverged)
        }
        other => other,
    }
}

/// Binary snapshot: 8 byte tag, t, dt, dt_next, n, then the vectors, all little endian.
pub(crate) fn write_snapshot(tag: &[u8; 8], t: f64, dt: f64, dt_next: f64, vectors: &[&[f64]]) -> Vec<u8> {
    let n = vectors.first().map_or(0, |v| v.len());
    let mut out = Vec::with_capacity(40 + 8 * n * vectors.len());
    out.extend_from_slice(tag);
    for x in [t, dt, dt_next] {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out.extend_from_slice(&(n as u64).to_le_bytes());
    for v in vectors {
        for x in v.iter() {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    out
}

/// Reads a snapshot written by `write_snapshot` into `vectors`; returns (t, dt, dt_next).
pub(crate) fn read_snapshot(tag: &[u8; 8], data: &[u8], vectors: &mut [&mut [f64]]) -> Result<(f64, f64, f64), IntegratorError> {
    let n = vectors.first().map_or(0, |v| v.len());
    let expected = 40 + 8 * n * vectors.len();
    if data.len() < 8 || &data[..8] != tag {
        return Err(IntegratorError::Restart("snapshot tag does not match the integrator".to_string()));
    }
    if data.len() != expected {
        return Err(IntegratorError::Restart(format!(
            "snapshot has {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    let mut words = data[8..].chunks_exact(8).map(|c| {
        let mut b = [0u8; 8];
        b.copy_from_slice(c);
        b
    });
    let mut next = || words.next().ok_or_else(|| IntegratorError::Restart("truncated snapshot".to_string()));
    let t = f64::from_le_bytes(next()?);
    let dt = f64::from_le_bytes(next()?);
    let dt_next = f64::from_le_bytes(next()?);
    let stored_n = u64::from_le_bytes(next()?) as usize;
    if stored_n != n {
        return Err(IntegratorError::Restart(format!("snapshot of size {} for a model of size {}", stored_n, n)));
    }
    for v in vectors.iter_mut() {
        for x in v.iter_mut() {
            *x = f64::from_le_bytes(next()?);
        }
    }
    Ok((t, dt, dt_next))
}

pub(crate) fn les_metrics(stats: &LESStatistics, iterative: bool) -> Vec<(&'static str, String)> {
    let mut m = vec![("LESRHSEvalsJacGeneration", stats.n_rhs_evals.to_string())];
    if iterative {
        m.extend([
            ("LESLinearIters", stats.n_lin_iters.to_string()),
            ("LESLinearConvFails", stats.n_lin_conv_fails.to_string()),
            ("LESMatrixVectorMult", stats.n_jv_evals.to_string()),
            ("LESPreSetup", stats.n_prec_evals.to_string()),
            ("LESPreSolves", stats.n_prec_solves.to_string()),
        ]);
    }
    m
}

pub(crate) const LES_STATS_FILE: &str = "LES_iterative_stats.tsv";
pub(crate) const LES_STATS_HEADER: [&str; 7] =
    ["Time [s]", "NLIters", "NLCFails", "NPEvals", "NPSolve", "NJvEvals", "NRhsEvals"];

pub(crate) fn les_stats_row(t: f64, stats: &LESStatistics) -> Vec<String> {
    vec![
        format_time(t),
        stats.n_lin_iters.to_string(),
        stats.n_lin_conv_fails.to_string(),
        stats.n_prec_evals.to_string(),
        stats.n_prec_solves.to_string(),
        stats.n_jv_evals.to_string(),
        stats.n_rhs_evals.to_string(),
    ]
}

/// Solution and scratch buffers, sized once at init.
#[derive(Debug, Clone, Default)]
struct EulerVars {
    n: usize,
    t: f64,
    /// end of the step being attempted
    t_new: f64,
    dt: f64,
    dt_next: f64,
    y: Vec<f64>,
    ydot: Vec<f64>,
    yn: Vec<f64>,
    ydotn: Vec<f64>,
    y_pred: Vec<f64>,
    y_out: Vec<f64>,
    residuals: Vec<f64>,
    delta: Vec<f64>,
    weights: Vec<f64>,
    errors: Vec<f64>,
    n_rhs_evals: usize,
}

impl EulerVars {
    fn new(n: usize) -> Self {
        let z = || vec![0.0; n];
        EulerVars {
            n,
            y: z(),
            ydot: z(),
            yn: z(),
            ydotn: z(),
            y_pred: z(),
            y_out: z(),
            residuals: z(),
            delta: z(),
            weights: z(),
            errors: z(),
            ..Default::default()
        }
    }

    /// ydot, residuals y - yn - dt*ydot and weights at the current y; returns the residual norm.
    fn evaluate(&mut self, model: &mut dyn ModelInterface, settings: &IntegratorSettings) -> Result<f64, IntegratorError> {
        model.set_y(&self.y).into_result("set_y")?;
        model.ydot(&mut self.ydot).into_result("ydot")?;
        self.n_rhs_evals += 1;
        vector_linear_sum(1.0, &self.y, -1.0, &self.yn, &mut self.residuals);
        for (r, yd) in self.residuals.iter_mut().zip(&self.ydot) {
            *r -= self.dt * yd;
        }
        compute_weights(model, settings, &self.y, &mut self.weights)?;
        Ok(wrms_norm(&self.residuals, &self.weights))
    }
}

/// Newton view of one attempt.
struct EulerNewton<'a> {
    vars: &'a mut EulerVars,
    les: &'a mut LESSolver,
    model: &'a mut dyn ModelInterface,
    settings: &'a IntegratorSettings,
}

impl NewtonSystem for EulerNewton<'_> {
    fn compute_correction(&mut self, scale: f64) -> Result<f64, IntegratorError> {
        let v = &mut *self.vars;
        vector_scale(-1.0, &v.residuals, &mut v.delta);
        self.les.solve(&mut v.delta)?;
        if scale != 1.0 {
            vector_scale_by(scale, &mut v.delta);
        }
        Ok(wrms_norm(&v.delta, &v.weights))
    }

    fn apply_correction(&mut self) {
        let v = &mut *self.vars;
        for (y, d) in v.y.iter_mut().zip(&v.delta) {
            *y += d;
        }
    }

    fn evaluate(&mut self) -> Result<f64, IntegratorError> {
        self.vars.evaluate(self.model, self.settings)
    }

    fn update_jacobian(&mut self) -> Result<(), IntegratorError> {
        let v = &*self.vars;
        debug!("Jacobian update at t = {} with dt = {:e}", v.t_new, v.dt);
        self.les.setup(self.model, v.t_new, &v.y, &v.ydot, &v.residuals, v.dt)
    }
}

fn try_step(
    vars: &mut EulerVars,
    les: &mut LESSolver,
    model: &mut dyn ModelInterface,
    newton: &mut NewtonState,
    settings: &IntegratorSettings,
) -> Result<NewtonOutcome, IntegratorError> {
    let dt = vars.dt;
    let mut sys = EulerNewton { vars, les, model, settings };
    newton.begin_attempt(&mut sys, dt, settings)?;
    let outcome = newton_iteration(&mut sys, newton, settings, dt)?;
    if outcome == NewtonOutcome::Converged {
        let v = &mut *sys.vars;
        vector_linear_sum(1.0 / dt, &v.y, -1.0 / dt, &v.yn, &mut v.ydot);
    }
    Ok(outcome)
}

pub struct IntegratorImplicitEuler {
    pub settings: IntegratorSettings,
    vars: EulerVars,
    newton: NewtonState,
    les: Option<LESSolver>,
    n_steps: usize,
    n_err_fails: usize,
    err_norm: f64,
    dt_scale_max: f64,
    stats_writer: Option<StatisticsWriter>,
    les_stats_writer: Option<StatisticsWriter>,
}

impl Default for IntegratorImplicitEuler {
    fn default() -> Self {
        Self::new(IntegratorSettings::default())
    }
}

impl IntegratorImplicitEuler {
    const SNAPSHOT_TAG: &'static [u8; 8] = b"SOLFRAIE";
    pub const STATS_FILE: &'static str = "integrator_ImplicitEuler_stats.tsv";

    pub fn new(settings: IntegratorSettings) -> Self {
        IntegratorImplicitEuler {
            settings,
            vars: EulerVars::default(),
            newton: NewtonState::default(),
            les: None,
            n_steps: 0,
            n_err_fails: 0,
            err_norm: 0.0,
            dt_scale_max: 10.0,
            stats_writer: None,
            les_stats_writer: None,
        }
    }

    /// Sets the initial state, evaluates the initial derivatives and initializes the linear solver.
    pub fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        t0: f64,
        y0: &[f64],
        mut les: LESSolver,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        info!("Initializing Implicit Euler integrator");
        let n = model.n();
        if n == 0 {
            return Err(IntegratorError::Config("model has no unknowns".to_string()));
        }
        if y0.len() != n {
            return Err(IntegratorError::Config(format!("y0 has {} entries, the model has {} unknowns", y0.len(), n)));
        }
        self.settings.validate(n)?;
        let dt0 = model.dt0();
        if !(dt0 > 0.0) {
            return Err(IntegratorError::Config(format!("initial step size must be positive, got {}", dt0)));
        }
        let mut vars = EulerVars::new(n);
        vars.t = t0;
        vars.t_new = t0;
        vars.dt = dt0;
        vars.dt_next = dt0;
        vector_copy(y0, &mut vars.y);
        set_model_time(model, t0)?;
        model.set_y(&vars.y).into_result("set_y (initial states)")?;
        model.ydot(&mut vars.ydot).into_result("ydot (initial states)")?;
        vars.n_rhs_evals += 1;
        info!("Setting NonlinConvCoeff to {}", self.settings.non_lin_conv_coeff);
        info!("Setting MaxNonLinIters to {}", self.settings.max_non_lin_iters);
        les.init(model, IntegratorKind::ImplicitEuler, precond, jacobian)?;
        debug!("linear solver: {}", les.name());
        self.vars = vars;
        self.newton = NewtonState::new(dt0);
        self.les = Some(les);
        self.n_steps = 0;
        self.n_err_fails = 0;
        self.err_norm = 0.0;
        Ok(())
    }

    /// Advances the solution by one accepted step.
    pub fn step(&mut self, model: &mut dyn ModelInterface) -> Result<(), IntegratorError> {
        let IntegratorImplicitEuler { settings, vars: v, newton, les, n_err_fails, err_norm, dt_scale_max, .. } = self;
        let les = les
            .as_mut()
            .ok_or_else(|| IntegratorError::Config("integrator used before init()".to_string()))?;
        let settings = &*settings;
        if settings.stop_time != 0.0 && v.t >= settings.stop_time {
            return Err(IntegratorError::Config(format!("stop time {} already reached at t = {}", settings.stop_time, v.t)));
        }
        let tun = &settings.tunables;
        swap(&mut v.y, &mut v.yn);
        swap(&mut v.ydot, &mut v.ydotn);
        *dt_scale_max = tun.max_dt_scale;

        loop {
            v.dt = v.dt_next;
            v.t_new = v.t + v.dt;
            if settings.stop_time != 0.0 && v.t_new > settings.stop_time {
                v.t_new = settings.stop_time;
                v.dt = v.t_new - v.t;
            }
            set_model_time(model, v.t_new)?;

            // explicit Euler predictor
            vector_linear_sum(1.0, &v.yn, v.dt, &v.ydotn, &mut v.y);
            vector_copy(&v.y, &mut v.y_pred);
            match v.evaluate(model, settings) {
                Ok(norm) => newton.residual_norm = norm,
                Err(e) if e.is_recoverable() => {
                    warn!("prediction rejected by the model ({}), reducing time step", e);
                    v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            if newton.residual_norm > tun.residual_norm_limit {
                warn!("reducing time step, residual of extrapolation was {:e}", newton.residual_norm);
                v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                continue;
            }

            let mut outcome = absorb_recoverable(try_step(v, les, model, newton, settings))?;
            while outcome == NewtonOutcome::RetryWithUpdatedJacobian {
                newton.newton_convergence_error = true;
                outcome = match v.evaluate(model, settings) {
                    Ok(norm) => {
                        newton.residual_norm = norm;
                        absorb_recoverable(try_step(v, les, model, newton, settings))?
                    }
                    Err(e) if e.is_recoverable() => NewtonOutcome::Diverged,
                    Err(e) => return Err(e),
                };
            }

            match outcome {
                NewtonOutcome::Converged => {
                    *err_norm = local_error_norm(&v.y, &v.y_pred, &v.weights, &mut v.errors);
                    if *err_norm >= 1.0 {
                        *n_err_fails += 1;
                        warn!("error test failed with |err| = {} at t = {} (dt = {:e})", err_norm, v.t_new, v.dt);
                        v.dt_next = reduce_after_error_failure(v.t, v.dt, *err_norm, ErrorExponent::SquareRoot, tun)?;
                        *dt_scale_max = 1.0;
                        continue;
                    }
                    let allow_small_growth = newton.n_steps_since_jac_update >= tun.steps_since_jac_for_growth;
                    v.dt_next = grow_after_success(
                        v.dt_next,
                        settings.dt_max,
                        *err_norm,
                        *dt_scale_max,
                        allow_small_growth,
                        ErrorExponent::SquareRoot,
                        tun,
                    );
                    break;
                }
                _ => {
                    debug!("Newton failed ({}), halving time step {:e}", outcome, v.dt);
                    v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                }
            }
        }

        v.t = v.t_new;
        self.n_steps += 1;
        Ok(())
    }

    /// Solution at `t_out`, linearly interpolated between the last two accepted states.
    /// Times after the current time are clamped.
    pub fn y_out(&mut self, t_out: f64) -> &[f64] {
        let v = &mut self.vars;
        if t_out == v.t {
            return &v.y;
        }
        let t = t_out.min(v.t);
        let alpha = (v.t - t) / v.dt;
        vector_linear_sum(alpha, &v.yn, 1.0 - alpha, &v.y, &mut v.y_out);
        &v.y_out
    }

    pub fn t(&self) -> f64 {
        self.vars.t
    }

    /// step size of the last accepted step
    pub fn dt(&self) -> f64 {
        self.vars.dt
    }

    pub fn dt_next(&self) -> f64 {
        self.vars.dt_next
    }

    pub fn y(&self) -> &[f64] {
        &self.vars.y
    }

    pub fn ydot(&self) -> &[f64] {
        &self.vars.ydot
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn n_rhs_evals(&self) -> usize {
        self.vars.n_rhs_evals
    }

    pub fn n_jac_evals(&self) -> usize {
        self.newton.n_jac_evals
    }

    pub fn n_iterations(&self) -> usize {
        self.newton.n_iterations
    }

    pub fn n_conv_fails(&self) -> usize {
        self.newton.n_conv_fails
    }

    pub fn n_diverged(&self) -> usize {
        self.newton.n_diverged
    }

    pub fn n_err_fails(&self) -> usize {
        self.n_err_fails
    }

    /// error norm of the last error test
    pub fn err_norm(&self) -> f64 {
        self.err_norm
    }

    pub fn les(&self) -> Option<&LESSolver> {
        self.les.as_ref()
    }

    pub fn write_statistics_header(&mut self, dir: &Path, restart: bool) -> Result<(), IntegratorError> {
        let header = [
            "Time [s]", "Steps", "RhsEvals", "NJacEvals", "NIters", "NDiverged", "NConvFails", "NErrFails",
            "StepSize [s]",
        ];
        self.stats_writer = Some(StatisticsWriter::create(dir, Self::STATS_FILE, &header, restart)?);
        if self.les.as_ref().is_some_and(|l| l.is_iterative()) {
            self.les_stats_writer = Some(StatisticsWriter::create(dir, LES_STATS_FILE, &LES_STATS_HEADER, restart)?);
        }
        Ok(())
    }

    /// Appends one row to the statistics files, if they were opened.
    pub fn write_statistics(&mut self) -> Result<(), IntegratorError> {
        let t = self.vars.t;
        if let Some(w) = self.stats_writer.as_mut() {
            let row = vec![
                format_time(t),
                self.n_steps.to_string(),
                self.vars.n_rhs_evals.to_string(),
                self.newton.n_jac_evals.to_string(),
                self.newton.n_iterations.to_string(),
                self.newton.n_diverged.to_string(),
                self.newton.n_conv_fails.to_string(),
                self.n_err_fails.to_string(),
                format_step_size(self.vars.dt),
            ];
            w.write_row(&row)?;
        }
        if let (Some(w), Some(les)) = (self.les_stats_writer.as_mut(), self.les.as_ref()) {
            w.write_row(&les_stats_row(t, &les.statistics()))?;
        }
        Ok(())
    }

    /// Logs the run statistics and returns them as `key=value` lines.
    pub fn write_metrics(&self, sim_time: f64) -> Vec<String> {
        let les_stats = self.les.as_ref().map(|l| l.statistics()).unwrap_or_default();
        let iterative = self.les.as_ref().is_some_and(|l| l.is_iterative());
        let mut metrics = vec![
            ("SimulationTime", format_time(sim_time)),
            ("IntegratorSteps", self.n_steps.to_string()),
            ("NewtonIterations", self.newton.n_iterations.to_string()),
            ("NewtonConvFails", (self.newton.n_conv_fails + self.newton.n_diverged).to_string()),
            ("ErrorTestFails", self.n_err_fails.to_string()),
            ("FunctionEvals", self.vars.n_rhs_evals.to_string()),
            ("LESSetup", self.newton.n_jac_evals.to_string()),
            ("LESSolve", les_stats.n_solves.to_string()),
        ];
        metrics.extend(les_metrics(&les_stats, iterative));
        log_metrics("IMPLICIT EULER METRICS", &metrics)
    }

    /// Snapshot of the time-stepping state for a restart.
    pub fn serialize(&self) -> Vec<u8> {
        let v = &self.vars;
        write_snapshot(Self::SNAPSHOT_TAG, v.t, v.dt, v.dt_next, &[&v.y, &v.ydot])
    }

    /// Restores a snapshot; the integrator must be initialized for a model of the same size.
    /// The Jacobian is regenerated on the next step.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), IntegratorError> {
        let v = &mut self.vars;
        let (t, dt, dt_next) = read_snapshot(Self::SNAPSHOT_TAG, data, &mut [&mut v.y, &mut v.ydot])?;
        v.t = t;
        v.t_new = t;
        v.dt = dt;
        v.dt_next = dt_next;
        v.yn.copy_from_slice(&v.y);
        self.newton.newton_convergence_error = true;
        Ok(())
    }
}
