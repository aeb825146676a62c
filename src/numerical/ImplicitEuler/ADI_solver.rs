//! ADI variant of the implicit Euler integrator.
//!
//! Every step is split into an X half-step and a Y half-step, each solved by its own modified Newton
//! iteration with the directional fluxes of the model:
//!
//! X: `y - yn - dt/2*(fY(yn) + fX(y)) = 0`, result `yn+1/2`
//!
//! Y: `y - yn+1/2 - dt/2*(fX(yn+1/2) + fY(y)) = 0`
//!
//! The two directions keep separate Jacobian ages and convergence estimates. The step is accepted
//! when the sum of the extrapolated truncation error and the splitting error is below one.
use log::{debug, info, warn};
use std::mem::swap;
use std::path::Path;

use crate::Utils::logger::{StatisticsWriter, format_step_size, format_time, log_metrics};
use crate::numerical::ImplicitEuler::IE_config::IntegratorSettings;
use crate::numerical::ImplicitEuler::IE_error_control::{
    ErrorExponent, grow_after_success, reduce_after_error_failure, reduce_after_nonlinear_failure,
};
use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::JacobianGenerator;
use crate::numerical::ImplicitEuler::IE_les::{LESInterface, LESSolver};
use crate::numerical::ImplicitEuler::IE_newton::{NewtonOutcome, NewtonState, NewtonSystem, newton_iteration};
use crate::numerical::ImplicitEuler::IE_precond::Preconditioner;
use crate::numerical::ImplicitEuler::IE_solver::{
    IntegratorKind, LES_STATS_FILE, LES_STATS_HEADER, absorb_recoverable, compute_weights, les_metrics,
    les_stats_row, read_snapshot, set_model_time, write_snapshot,
};
use crate::numerical::ImplicitEuler::model_interface::{FluxDirection, ModelInterface, adi_view};
use crate::somelinalg::vector_ops::{vector_copy, vector_linear_sum, vector_scale, vector_scale_by, wrms_norm};

#[derive(Debug, Clone, Default)]
struct ADIVars {
    n: usize,
    t: f64,
    t_new: f64,
    dt: f64,
    /// step size of the previous step
    dtn: f64,
    dt_next: f64,
    y: Vec<f64>,
    yn: Vec<f64>,
    yn_half: Vec<f64>,
    ydot: Vec<f64>,
    ydotn: Vec<f64>,
    ydot_x: Vec<f64>,
    ydot_x_n_half: Vec<f64>,
    ydot_y: Vec<f64>,
    ydot_y_n: Vec<f64>,
    y_out: Vec<f64>,
    residuals: Vec<f64>,
    splitting_errors: Vec<f64>,
    residual_errors: Vec<f64>,
    residual_errors_n: Vec<f64>,
    errors: Vec<f64>,
    weights: Vec<f64>,
    delta: Vec<f64>,
    n_rhs_evals: usize,
}

impl ADIVars {
    fn new(n: usize) -> Self {
        let z = || vec![0.0; n];
        ADIVars {
            n,
            y: z(),
            yn: z(),
            yn_half: z(),
            ydot: z(),
            ydotn: z(),
            ydot_x: z(),
            ydot_x_n_half: z(),
            ydot_y: z(),
            ydot_y_n: z(),
            y_out: z(),
            residuals: z(),
            splitting_errors: z(),
            residual_errors: z(),
            residual_errors_n: z(),
            errors: z(),
            weights: z(),
            delta: z(),
            ..Default::default()
        }
    }

    /// Evaluates the fluxes of `direction` at y and the residuals of that half-step.
    /// The model's active direction must already be `direction`.
    fn evaluate(
        &mut self,
        model: &mut dyn ModelInterface,
        settings: &IntegratorSettings,
        direction: FluxDirection,
    ) -> Result<f64, IntegratorError> {
        model.set_y(&self.y).into_result("set_y")?;
        let h = 0.5 * self.dt;
        let (ydot, base, ydot_base) = match direction {
            FluxDirection::X => (&mut self.ydot_x, &self.yn, &self.ydot_y_n),
            FluxDirection::Y => (&mut self.ydot_y, &self.yn_half, &self.ydot_x_n_half),
            FluxDirection::All => (&mut self.ydot, &self.yn, &self.ydotn),
        };
        model.ydot(ydot).into_result("ydot")?;
        self.n_rhs_evals += 1;
        for i in 0..self.n {
            self.residuals[i] = self.y[i] - base[i] - h * (ydot_base[i] + ydot[i]);
        }
        compute_weights(model, settings, &self.y, &mut self.weights)?;
        Ok(wrms_norm(&self.residuals, &self.weights))
    }
}

/// Newton view of one directional half-step.
struct ADINewton<'a> {
    vars: &'a mut ADIVars,
    les: &'a mut LESSolver,
    model: &'a mut dyn ModelInterface,
    settings: &'a IntegratorSettings,
    direction: FluxDirection,
}

impl NewtonSystem for ADINewton<'_> {
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
        self.vars.evaluate(self.model, self.settings, self.direction)
    }

    fn update_jacobian(&mut self) -> Result<(), IntegratorError> {
        let v = &*self.vars;
        let ydot = match self.direction {
            FluxDirection::X => &v.ydot_x,
            FluxDirection::Y => &v.ydot_y,
            FluxDirection::All => &v.ydot,
        };
        debug!("{} Jacobian update at t = {} with dt = {:e}", self.direction, v.t_new, v.dt);
        self.les.setup(self.model, v.t_new, &v.y, ydot, &v.residuals, 0.5 * v.dt)
    }
}

/// One Newton attempt from the current iterate; on convergence the fluxes are re-evaluated at the solution.
fn newton_attempt(
    sys: &mut ADINewton<'_>,
    newton: &mut NewtonState,
    settings: &IntegratorSettings,
) -> Result<NewtonOutcome, IntegratorError> {
    let dt = sys.vars.dt;
    newton.residual_norm = sys.evaluate()?;
    if newton.residual_norm > settings.tunables.residual_norm_limit {
        warn!("{} half-step: residual of the starting values was {:e}", sys.direction, newton.residual_norm);
        return Ok(NewtonOutcome::Diverged);
    }
    newton.begin_attempt(sys, dt, settings)?;
    let outcome = newton_iteration(sys, newton, settings, dt)?;
    if outcome == NewtonOutcome::Converged {
        sys.evaluate()?;
    }
    Ok(outcome)
}

/// Solves the half-step of `direction`, starting from the current y.
fn solve_direction(
    vars: &mut ADIVars,
    les: &mut LESSolver,
    model: &mut dyn ModelInterface,
    newton: &mut NewtonState,
    settings: &IntegratorSettings,
    direction: FluxDirection,
) -> Result<NewtonOutcome, IntegratorError> {
    adi_view(model)?.set_active_flux_direction(direction);
    les.set_flux_direction(direction);
    let mut sys = ADINewton { vars, les, model, settings, direction };
    let mut outcome = absorb_recoverable(newton_attempt(&mut sys, newton, settings))?;
    while outcome == NewtonOutcome::RetryWithUpdatedJacobian {
        newton.newton_convergence_error = true;
        outcome = absorb_recoverable(newton_attempt(&mut sys, newton, settings))?;
    }
    Ok(outcome)
}

pub struct IntegratorADI {
    pub settings: IntegratorSettings,
    vars: ADIVars,
    newton_x: NewtonState,
    newton_y: NewtonState,
    les: Option<LESSolver>,
    n_steps: usize,
    n_err_fails: usize,
    truncation_error: f64,
    residual_error: f64,
    splitting_error: f64,
    dt_scale_max: f64,
    stats_writer: Option<StatisticsWriter>,
    les_stats_writer: Option<StatisticsWriter>,
}

impl Default for IntegratorADI {
    fn default() -> Self {
        Self::new(IntegratorSettings::adi())
    }
}

impl IntegratorADI {
    const SNAPSHOT_TAG: &'static [u8; 8] = b"SOLFRADI";
    pub const STATS_FILE: &'static str = "integrator_ADI_stats.tsv";

    pub fn new(settings: IntegratorSettings) -> Self {
        IntegratorADI {
            settings,
            vars: ADIVars::default(),
            newton_x: NewtonState::default(),
            newton_y: NewtonState::default(),
            les: None,
            n_steps: 0,
            n_err_fails: 0,
            truncation_error: 0.0,
            residual_error: 0.0,
            splitting_error: 0.0,
            dt_scale_max: 10.0,
            stats_writer: None,
            les_stats_writer: None,
        }
    }

    /// The model must provide the ADI view; the linear solver must accept the ADI integrator.
    pub fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        t0: f64,
        y0: &[f64],
        mut les: LESSolver,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        info!("Initializing ADI integrator");
        adi_view(model)?;
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
        let mut v = ADIVars::new(n);
        v.t = t0;
        v.t_new = t0;
        v.dt = dt0;
        v.dtn = dt0;
        v.dt_next = dt0;
        vector_copy(y0, &mut v.y);
        set_model_time(model, t0)?;
        model.set_y(&v.y).into_result("set_y (initial states)")?;
        // Y fluxes of the initial state enter the first X half-step
        adi_view(model)?.set_active_flux_direction(FluxDirection::Y);
        model.ydot(&mut v.ydot_y).into_result("ydot (initial states)")?;
        adi_view(model)?.set_active_flux_direction(FluxDirection::All);
        model.ydot(&mut v.ydot).into_result("ydot (initial states)")?;
        v.n_rhs_evals += 2;
        info!("Setting NonlinConvCoeff to {}", self.settings.non_lin_conv_coeff);
        info!("Setting MaxNonLinIters to {}", self.settings.max_non_lin_iters);
        les.init(model, IntegratorKind::ADI, precond, jacobian)?;
        self.vars = v;
        self.newton_x = NewtonState::new(dt0);
        self.newton_y = NewtonState::new(dt0);
        self.les = Some(les);
        self.n_steps = 0;
        self.n_err_fails = 0;
        Ok(())
    }

    pub fn step(&mut self, model: &mut dyn ModelInterface) -> Result<(), IntegratorError> {
        let IntegratorADI {
            settings,
            vars: v,
            newton_x,
            newton_y,
            les,
            n_err_fails,
            truncation_error,
            residual_error,
            splitting_error,
            dt_scale_max,
            ..
        } = self;
        let les = les
            .as_mut()
            .ok_or_else(|| IntegratorError::Config("integrator used before init()".to_string()))?;
        let settings = &*settings;
        if settings.stop_time != 0.0 && v.t >= settings.stop_time {
            return Err(IntegratorError::Config(format!("stop time {} already reached at t = {}", settings.stop_time, v.t)));
        }
        let tun = &settings.tunables;
        v.dtn = v.dt;
        swap(&mut v.y, &mut v.yn);
        swap(&mut v.ydot, &mut v.ydotn);
        swap(&mut v.ydot_y, &mut v.ydot_y_n);
        swap(&mut v.residual_errors, &mut v.residual_errors_n);
        *dt_scale_max = tun.max_dt_scale;

        loop {
            v.dt = v.dt_next;
            v.t_new = v.t + v.dt;
            if settings.stop_time != 0.0 && v.t_new > settings.stop_time {
                v.t_new = settings.stop_time;
                v.dt = v.t_new - v.t;
            }
            set_model_time(model, v.t_new)?;
            vector_linear_sum(1.0, &v.yn, v.dt, &v.ydotn, &mut v.y);

            let outcome = solve_direction(v, les, model, newton_x, settings, FluxDirection::X)?;
            if outcome != NewtonOutcome::Converged {
                debug!("X half-step failed ({}), halving time step {:e}", outcome, v.dt);
                v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                continue;
            }
            vector_copy(&v.y, &mut v.yn_half);
            swap(&mut v.ydot_x, &mut v.ydot_x_n_half);

            let outcome = solve_direction(v, les, model, newton_y, settings, FluxDirection::Y)?;
            if outcome != NewtonOutcome::Converged {
                debug!("Y half-step failed ({}), halving time step {:e}", outcome, v.dt);
                v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                continue;
            }

            adi_view(model)?.set_active_flux_direction(FluxDirection::All);
            les.set_flux_direction(FluxDirection::All);
            match v.evaluate(model, settings, FluxDirection::All) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("evaluation of the combined fluxes failed ({}), reducing time step", e);
                    v.dt_next = reduce_after_nonlinear_failure(v.t, v.dt)?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let h = 0.5 * v.dt;
            let ratio = v.dt / v.dtn;
            for i in 0..v.n {
                v.splitting_errors[i] = v.y[i] - v.yn[i] - h * (v.ydot[i] + v.ydotn[i]);
                v.residual_errors[i] = -h * (v.ydot[i] - v.ydotn[i]);
                // extrapolated from the previous step
                v.errors[i] = v.residual_errors[i] - ratio * v.residual_errors_n[i];
            }
            *splitting_error = wrms_norm(&v.splitting_errors, &v.weights);
            *residual_error = wrms_norm(&v.residual_errors, &v.weights) / 6.0;
            *truncation_error = wrms_norm(&v.errors, &v.weights) / 6.0 + *splitting_error;

            if *truncation_error >= 1.0 {
                *n_err_fails += 1;
                warn!("error test failed with |err| = {} at t = {} (dt = {:e})", truncation_error, v.t_new, v.dt);
                v.dt_next = reduce_after_error_failure(v.t, v.dt, *truncation_error, ErrorExponent::CubeRoot, tun)?;
                *dt_scale_max = 1.0;
                continue;
            }
            let allow_small_growth = newton_x.n_steps_since_jac_update >= tun.steps_since_jac_for_growth
                || newton_y.n_steps_since_jac_update >= tun.steps_since_jac_for_growth;
            v.dt_next = grow_after_success(
                v.dt_next,
                settings.dt_max,
                *truncation_error,
                *dt_scale_max,
                allow_small_growth,
                ErrorExponent::CubeRoot,
                tun,
            );
            break;
        }

        v.t = v.t_new;
        self.n_steps += 1;
        Ok(())
    }

    /// Solution at `t_out`, linear interpolation without extrapolation.
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

    pub fn n_err_fails(&self) -> usize {
        self.n_err_fails
    }

    /// Newton state and counters of the X half-steps
    pub fn newton_x(&self) -> &NewtonState {
        &self.newton_x
    }

    pub fn newton_y(&self) -> &NewtonState {
        &self.newton_y
    }

    pub fn n_jac_evals(&self) -> usize {
        self.newton_x.n_jac_evals + self.newton_y.n_jac_evals
    }

    pub fn n_iterations(&self) -> usize {
        self.newton_x.n_iterations + self.newton_y.n_iterations
    }

    pub fn n_conv_fails(&self) -> usize {
        self.newton_x.n_conv_fails + self.newton_y.n_conv_fails
    }

    pub fn n_diverged(&self) -> usize {
        self.newton_x.n_diverged + self.newton_y.n_diverged
    }

    pub fn truncation_error(&self) -> f64 {
        self.truncation_error
    }

    pub fn residual_error(&self) -> f64 {
        self.residual_error
    }

    pub fn splitting_error(&self) -> f64 {
        self.splitting_error
    }

    pub fn les(&self) -> Option<&LESSolver> {
        self.les.as_ref()
    }

    pub fn write_statistics_header(&mut self, dir: &Path, restart: bool) -> Result<(), IntegratorError> {
        let header = [
            "Time [s]", "Steps", "RhsEvals", "NJacEvals", "NIters", "NDiverged", "NConvFails", "NErrFails",
            "TruncError", "ResError", "SplitError", "StepSize [s]",
        ];
        self.stats_writer = Some(StatisticsWriter::create(dir, Self::STATS_FILE, &header, restart)?);
        if self.les.as_ref().is_some_and(|l| l.is_iterative()) {
            self.les_stats_writer = Some(StatisticsWriter::create(dir, LES_STATS_FILE, &LES_STATS_HEADER, restart)?);
        }
        Ok(())
    }

    pub fn write_statistics(&mut self) -> Result<(), IntegratorError> {
        let t = self.vars.t;
        if let Some(w) = self.stats_writer.as_mut() {
            let row = vec![
                format_time(t),
                self.n_steps.to_string(),
                self.vars.n_rhs_evals.to_string(),
                (self.newton_x.n_jac_evals + self.newton_y.n_jac_evals).to_string(),
                (self.newton_x.n_iterations + self.newton_y.n_iterations).to_string(),
                (self.newton_x.n_diverged + self.newton_y.n_diverged).to_string(),
                (self.newton_x.n_conv_fails + self.newton_y.n_conv_fails).to_string(),
                self.n_err_fails.to_string(),
                format!("{:.4}", self.truncation_error),
                format!("{:.4}", self.residual_error),
                format!("{:.4}", self.splitting_error),
                format_step_size(self.vars.dt),
            ];
            w.write_row(&row)?;
        }
        if let (Some(w), Some(les)) = (self.les_stats_writer.as_mut(), self.les.as_ref()) {
            w.write_row(&les_stats_row(t, &les.statistics()))?;
        }
        Ok(())
    }

    pub fn write_metrics(&self, sim_time: f64) -> Vec<String> {
        let les_stats = self.les.as_ref().map(|l| l.statistics()).unwrap_or_default();
        let iterative = self.les.as_ref().is_some_and(|l| l.is_iterative());
        let (x, y) = (&self.newton_x, &self.newton_y);
        let mut metrics = vec![
            ("SimulationTime", format_time(sim_time)),
            ("IntegratorSteps", self.n_steps.to_string()),
            ("NewtonIterations", (x.n_iterations + y.n_iterations).to_string()),
            ("NewtonConvFails", (x.n_conv_fails + x.n_diverged + y.n_conv_fails + y.n_diverged).to_string()),
            ("NewtonConvFailsX", (x.n_conv_fails + x.n_diverged).to_string()),
            ("NewtonConvFailsY", (y.n_conv_fails + y.n_diverged).to_string()),
            ("ErrorTestFails", self.n_err_fails.to_string()),
            ("FunctionEvals", self.vars.n_rhs_evals.to_string()),
            ("LESSetup", (x.n_jac_evals + y.n_jac_evals).to_string()),
            ("LESSolve", les_stats.n_solves.to_string()),
        ];
        metrics.extend(les_metrics(&les_stats, iterative));
        log_metrics("ADI METRICS", &metrics)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let v = &self.vars;
        write_snapshot(
            Self::SNAPSHOT_TAG,
            v.t,
            v.dt,
            v.dt_next,
            &[&v.y, &v.ydot, &v.ydot_y, &v.residual_errors],
        )
    }

    /// Restores a snapshot of `serialize`; both directional Jacobians are regenerated on the next step.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), IntegratorError> {
        let v = &mut self.vars;
        let (t, dt, dt_next) = read_snapshot(
            Self::SNAPSHOT_TAG,
            data,
            &mut [&mut v.y, &mut v.ydot, &mut v.ydot_y, &mut v.residual_errors],
        )?;
        v.t = t;
        v.t_new = t;
        v.dt = dt;
        v.dt_next = dt_next;
        v.yn.copy_from_slice(&v.y);
        self.newton_x.newton_convergence_error = true;
        self.newton_y.newton_convergence_error = true;
        Ok(())
    }
}
