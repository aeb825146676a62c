//! Integrator scenarios: convergence order, step acceptance, linear solver variants, ADI splitting,
//! model errors and the solver control framework.
#[cfg(test)]
mod tests {
    use crate::Examples::ie_examples::{BoundedModel, DecayModel, DiffusionGridModel, LinearModel};
    use crate::numerical::ImplicitEuler::ADI_solver::IntegratorADI;
    use crate::numerical::ImplicitEuler::IE_api::{
        FixedIntervalOutputScheduler, OutputScheduler, RESTART_FILE, SolverControlFramework, read_last_restart_record,
    };
    use crate::numerical::ImplicitEuler::IE_config::{
        IntegratorSettings, JacobianType, LESType, PrecondType, RestartMode, SolverConfig,
    };
    use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
    use crate::numerical::ImplicitEuler::IE_jacobian::{JacobianGenerator, JacobianKind};
    use crate::numerical::ImplicitEuler::IE_les::{LESInterface, LESSolver};
    use crate::numerical::ImplicitEuler::IE_precond::Preconditioner;
    use crate::numerical::ImplicitEuler::IE_solver::{IntegratorImplicitEuler, IntegratorKind};
    use crate::numerical::ImplicitEuler::model_interface::{
        CalculationResult, FluxDirection, ModelInterface, ModelInterfaceADI,
    };
    use crate::somelinalg::RustedLINPACK::sparse_csr::ColumnOrder;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::fs::read_to_string;
    use std::rc::Rc;

    fn integrate_ie(
        model: &mut dyn ModelInterface,
        settings: IntegratorSettings,
        les: LESSolver,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> IntegratorImplicitEuler {
        let mut ie = IntegratorImplicitEuler::new(settings);
        let (t0, y0) = (model.t0(), model.y0());
        ie.init(model, t0, &y0, les, precond, jacobian).unwrap();
        while ie.t() < model.t_end() {
            ie.step(model).unwrap();
        }
        ie
    }

    fn with_stop(t_end: f64) -> IntegratorSettings {
        IntegratorSettings { stop_time: t_end, ..Default::default() }
    }

    #[test]
    fn decay_to_five_seconds() {
        let mut model = DecayModel::new(1.0, 1.0, 5.0);
        let ie = integrate_ie(&mut model, with_stop(5.0), LESSolver::dense(), None, None);
        assert_eq!(ie.t(), 5.0);
        assert_relative_eq!(ie.y()[0], (-5.0f64).exp(), max_relative = 1e-2);
        assert!(ie.n_steps() > 10);
    }

    #[test]
    fn first_order_convergence_with_fixed_steps() {
        let errors: Vec<f64> = [0.02, 0.01, 0.005]
            .iter()
            .map(|&h| {
                let mut model = DecayModel::new(1.0, 1.0, 1.0).with_dt0(h);
                let settings = IntegratorSettings {
                    rel_tol: 1.0,
                    abs_tol: 1.0,
                    dt_max: h,
                    stop_time: 1.0,
                    nl_residual_tolerance: 0.0,
                    ..Default::default()
                };
                let ie = integrate_ie(&mut model, settings, LESSolver::dense(), None, None);
                assert_eq!(ie.n_err_fails(), 0);
                (ie.y()[0] - model.exact(1.0)).abs()
            })
            .collect();
        for pair in errors.windows(2) {
            let ratio = pair[0] / pair[1];
            assert!(ratio > 1.8 && ratio < 2.2, "error ratio {}", ratio);
        }
    }

    /// y' = -k*(y - g(t)) with a jump of g at t = 1; records the times the integrator tries.
    struct JumpModel {
        k: f64,
        t: f64,
        y: f64,
        attempts: Vec<f64>,
    }

    impl ModelInterface for JumpModel {
        fn n(&self) -> usize {
            1
        }
        fn y0(&self) -> Vec<f64> {
            vec![0.0]
        }
        fn t0(&self) -> f64 {
            0.0
        }
        fn dt0(&self) -> f64 {
            0.5
        }
        fn t_end(&self) -> f64 {
            3.0
        }
        fn set_time(&mut self, t: f64) -> CalculationResult {
            self.t = t;
            self.attempts.push(t);
            CalculationResult::Success
        }
        fn set_y(&mut self, y: &[f64]) -> CalculationResult {
            self.y = y[0];
            CalculationResult::Success
        }
        fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
            let g = if self.t < 1.0 { 0.2 } else { 1.0 };
            ydot[0] = -self.k * (self.y - g);
            CalculationResult::Success
        }
    }

    #[test]
    fn rejected_attempts_shrink_and_accepted_steps_pass_the_error_test() {
        let mut model = JumpModel { k: 5.0, t: 0.0, y: 0.0, attempts: Vec::new() };
        let mut ie = IntegratorImplicitEuler::new(IntegratorSettings { rel_tol: 1e-6, abs_tol: 1e-8, ..Default::default() });
        ie.init(&mut model, 0.0, &[0.0], LESSolver::dense(), None, None).unwrap();
        let mut rejected = 0;
        while ie.t() < 3.0 {
            let t_before = ie.t();
            model.attempts.clear();
            ie.step(&mut model).unwrap();
            assert!(ie.err_norm() < 1.0);
            let steps: Vec<f64> = model.attempts.iter().map(|t| t - t_before).collect();
            for pair in steps.windows(2) {
                assert!(pair[1] < pair[0], "attempted step sizes {:?}", steps);
            }
            rejected += steps.len() - 1;
        }
        assert!(rejected > 0);
        assert!(ie.n_err_fails() > 0);
    }

    #[test]
    fn linear_solver_variants_agree() {
        let grid = || DiffusionGridModel::new(5, 4, 1.0, 0.5).with_t_end(0.5);
        let settings = || IntegratorSettings { rel_tol: 1e-6, abs_tol: 1e-8, stop_time: 0.5, ..Default::default() };
        let mut model = grid();
        let reference = integrate_ie(&mut model, settings(), LESSolver::dense(), None, None).y().to_vec();
        let n = model.n();

        // neighbours in y are nx elements apart
        let mut model = grid();
        let band = integrate_ie(&mut model, settings(), LESSolver::band(10, 10), None, None);
        let mut model = grid();
        let pattern = model.jacobian_pattern().unwrap();
        let jac = JacobianGenerator::new(n, JacobianKind::SparseCSR { rows: pattern, order: ColumnOrder::Natural }).unwrap();
        let bicgstab = integrate_ie(
            &mut model,
            settings(),
            LESSolver::bicgstab(50, 1e-10),
            Some(Preconditioner::ilu()),
            Some(jac),
        );
        let mut model = grid();
        let adi = integrate_ie(&mut model, settings(), LESSolver::adi(), None, None);

        for other in [&band, &bicgstab, &adi] {
            for i in 0..n {
                assert_relative_eq!(other.y()[i], reference[i], epsilon = 1e-4, max_relative = 1e-3);
            }
        }
        let stats = bicgstab.les().unwrap().statistics();
        assert!(stats.n_lin_iters > 0);
        assert!(stats.n_prec_solves > 0);
    }

    #[test]
    fn block_tridiagonal_solver_on_a_column_of_cells() {
        let column = || DiffusionGridModel::new(1, 8, 0.0, 2.0).with_t_end(0.5);
        let settings = || IntegratorSettings { rel_tol: 1e-6, abs_tol: 1e-8, stop_time: 0.5, ..Default::default() };
        let mut model = column();
        let dense = integrate_ie(&mut model, settings(), LESSolver::dense(), None, None);
        let mut model = column();
        let btridiag = integrate_ie(&mut model, settings(), LESSolver::btridiag(8, 2), None, None);
        for i in 0..16 {
            assert_relative_eq!(btridiag.y()[i], dense.y()[i], epsilon = 1e-4, max_relative = 1e-3);
        }
    }

    #[test]
    fn adi_matches_implicit_euler_for_decoupled_directions() {
        // no transport in Y, no reaction: the directions do not interact
        let grid = || DiffusionGridModel::new(6, 3, 1.0, 0.0).with_reaction(0.0, 0.0).with_t_end(1.0);
        let mut model = grid();
        let ie = integrate_ie(
            &mut model,
            IntegratorSettings { rel_tol: 1e-6, abs_tol: 1e-8, stop_time: 1.0, ..Default::default() },
            LESSolver::dense(),
            None,
            None,
        );
        let mut model = grid();
        let mut adi = IntegratorADI::new(IntegratorSettings { rel_tol: 1e-6, abs_tol: 1e-8, stop_time: 1.0, ..IntegratorSettings::adi() });
        let y0 = model.y0();
        adi.init(&mut model, 0.0, &y0, LESSolver::adi_direct(), None, None).unwrap();
        while adi.t() < 1.0 {
            adi.step(&mut model).unwrap();
        }
        assert_eq!(adi.t(), 1.0);
        for i in 0..model.n() {
            assert_relative_eq!(adi.y()[i], ie.y()[i], epsilon = 1e-4, max_relative = 1e-2);
        }
        assert!(adi.splitting_error() < 1.0);
    }

    #[test]
    fn adi_conserves_mass_of_the_diffusion_grid() {
        // pure diffusion with zero-flux boundaries conserves the sum of u
        let mut model = DiffusionGridModel::new(5, 5, 1.0, 2.0).with_reaction(0.0, 0.0).with_t_end(2.0);
        let y0 = model.y0();
        let mass0: f64 = y0.iter().step_by(2).sum();
        let mut adi = IntegratorADI::default();
        adi.init(&mut model, 0.0, &y0, LESSolver::adi_direct(), None, None).unwrap();
        while adi.t() < 2.0 {
            adi.step(&mut model).unwrap();
        }
        let mass: f64 = adi.y().iter().step_by(2).sum();
        assert_relative_eq!(mass, mass0, max_relative = 1e-3);
        // the interpolated state stays between the last two states
        let t = adi.t();
        let dt = adi.dt();
        let y_mid = adi.y_out(t - 0.5 * dt)[0];
        let y_end = adi.y()[0];
        let y_prev = adi.y_out(t - dt)[0];
        assert!(y_mid >= y_end.min(y_prev) - 1e-12 && y_mid <= y_end.max(y_prev) + 1e-12);
    }

    #[test]
    fn recoverable_model_errors_shrink_the_step() {
        let mut model = BoundedModel::new(10.0, 9.99, 10.0, 9.0, 1.0, 2.0);
        let mut ie = IntegratorImplicitEuler::default();
        ie.init(&mut model, 0.0, &[9.0], LESSolver::dense(), None, None).unwrap();
        let mut first_dt = None;
        while ie.t() < 2.0 {
            ie.step(&mut model).unwrap();
            first_dt.get_or_insert(ie.dt());
            assert!(ie.y()[0] <= 10.0);
        }
        assert!(model.n_refused > 0);
        assert!(first_dt.unwrap() < 1.0);
        assert_relative_eq!(ie.y()[0], 9.99, max_relative = 1e-3);
    }

    /// Model that fails for good once y drops below a threshold.
    struct AbortingModel(DecayModel);

    impl ModelInterface for AbortingModel {
        fn n(&self) -> usize {
            1
        }
        fn y0(&self) -> Vec<f64> {
            vec![1.0]
        }
        fn t0(&self) -> f64 {
            0.0
        }
        fn dt0(&self) -> f64 {
            0.01
        }
        fn t_end(&self) -> f64 {
            10.0
        }
        fn set_time(&mut self, t: f64) -> CalculationResult {
            self.0.set_time(t)
        }
        fn set_y(&mut self, y: &[f64]) -> CalculationResult {
            if y[0] < 0.5 { CalculationResult::Abort } else { self.0.set_y(y) }
        }
        fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
            self.0.ydot(ydot)
        }
    }

    #[test]
    fn model_abort_unwinds_out_of_step() {
        let mut model = AbortingModel(DecayModel::new(1.0, 1.0, 10.0));
        let mut ie = IntegratorImplicitEuler::default();
        ie.init(&mut model, 0.0, &[1.0], LESSolver::dense(), None, None).unwrap();
        let result = (0..10_000).try_for_each(|_| ie.step(&mut model));
        assert!(matches!(result, Err(IntegratorError::ModelAbort(_))));
    }

    /// Records outputs and completed steps of the wrapped model.
    struct Recorder<M> {
        inner: M,
        outputs: Rc<RefCell<Vec<(f64, Vec<f64>)>>>,
        steps: Rc<RefCell<usize>>,
        finished: Rc<RefCell<bool>>,
    }

    impl<M: ModelInterface> ModelInterface for Recorder<M> {
        fn n(&self) -> usize {
            self.inner.n()
        }
        fn y0(&self) -> Vec<f64> {
            self.inner.y0()
        }
        fn t0(&self) -> f64 {
            self.inner.t0()
        }
        fn dt0(&self) -> f64 {
            self.inner.dt0()
        }
        fn t_end(&self) -> f64 {
            self.inner.t_end()
        }
        fn set_time(&mut self, t: f64) -> CalculationResult {
            self.inner.set_time(t)
        }
        fn set_y(&mut self, y: &[f64]) -> CalculationResult {
            self.inner.set_y(y)
        }
        fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
            self.inner.ydot(ydot)
        }
        fn step_completed(&mut self, _t: f64, _y: &[f64]) {
            *self.steps.borrow_mut() += 1;
        }
        fn write_outputs(&mut self, t_out: f64, y_out: &[f64]) {
            self.outputs.borrow_mut().push((t_out, y_out.to_vec()));
        }
        fn write_final_outputs(&mut self) {
            *self.finished.borrow_mut() = true;
        }
    }

    type Log = (Rc<RefCell<Vec<(f64, Vec<f64>)>>>, Rc<RefCell<usize>>, Rc<RefCell<bool>>);

    fn recorded<M: ModelInterface + 'static>(inner: M) -> (Box<dyn ModelInterface>, Log) {
        let log: Log = Default::default();
        let model = Recorder { inner, outputs: log.0.clone(), steps: log.1.clone(), finished: log.2.clone() };
        (Box::new(model), log)
    }

    #[test]
    fn driver_writes_scheduled_outputs_statistics_and_restart_records() {
        let dir = tempfile::tempdir().unwrap();
        let (model, (outputs, steps, finished)) = recorded(DecayModel::new(1.0, 1.0, 3.0));
        let mut cfg = SolverConfig::default();
        cfg.output.interval = 0.5;
        cfg.output.log_dir = Some(dir.path().to_path_buf());
        let mut solver = SolverControlFramework::new(model, cfg);
        solver.run().unwrap();

        let outputs = outputs.borrow();
        let times: Vec<f64> = outputs.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
        for (t, y) in outputs.iter() {
            assert_relative_eq!(y[0], (-t).exp(), max_relative = 2e-2);
        }
        let n_steps = solver.integrator().unwrap().n_steps();
        assert_eq!(*steps.borrow(), n_steps + 1);
        assert!(*finished.borrow());
        assert!(solver.metrics().contains(&format!("IntegratorSteps={}", n_steps)));

        let stats = read_to_string(dir.path().join(IntegratorImplicitEuler::STATS_FILE)).unwrap();
        // header and one row per step with outputs
        let rows = stats.lines().count() - 1;
        assert!((1..=6).contains(&rows));
        let (t, y) = read_last_restart_record(&dir.path().join(RESTART_FILE), 1).unwrap();
        assert_eq!(t, 3.0);
        assert_relative_eq!(y[0], outputs[6].1[0]);
    }

    #[test]
    fn restart_continues_from_the_last_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SolverConfig::default();
        cfg.output.interval = 1.0;
        cfg.output.log_dir = Some(dir.path().to_path_buf());
        cfg.output.restart = RestartMode::EndOnly;
        let mut first = SolverControlFramework::new(Box::new(DecayModel::new(1.0, 1.0, 2.0)), cfg.clone());
        first.run().unwrap();

        let (model, (outputs, _, _)) = recorded(DecayModel::new(1.0, 1.0, 5.0));
        let mut second = SolverControlFramework::new(model, cfg);
        second.restart_from(&dir.path().join(RESTART_FILE)).unwrap();
        let outputs = outputs.borrow();
        // no initial output when restarting
        assert_eq!(outputs.first().map(|o| o.0), Some(3.0));
        let (t_last, y_last) = outputs.last().unwrap();
        assert_eq!(*t_last, 5.0);
        assert_relative_eq!(y_last[0], (-5.0f64).exp(), max_relative = 2e-2);
        // the restarted run appends to the statistics file without a second header
        let stats = read_to_string(dir.path().join(IntegratorImplicitEuler::STATS_FILE)).unwrap();
        assert_eq!(stats.lines().filter(|l| l.starts_with("Time")).count(), 1);
    }

    struct StuckScheduler;

    impl OutputScheduler for StuckScheduler {
        fn next_output_time(&mut self, _t: f64) -> f64 {
            0.1
        }
    }

    #[test]
    fn output_times_must_increase() {
        let mut solver = SolverControlFramework::new(Box::new(DecayModel::new(1.0, 1.0, 1.0)), SolverConfig::default());
        solver.set_output_scheduler(Box::new(StuckScheduler));
        assert!(matches!(solver.run(), Err(IntegratorError::Config(_))));
    }

    #[test]
    fn adi_run_from_toml_configuration() {
        let text = r#"
            [integrator]
            kind = "ADI"
            rel_tol = 1e-5
            stop_time = 1.0
            [output]
            interval = 0.25
        "#;
        let cfg = SolverConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.integrator, IntegratorKind::ADI);
        assert_eq!(cfg.les, LESType::ADIDirect);
        let (model, (outputs, _, _)) = recorded(DiffusionGridModel::new(4, 4, 1.0, 1.0).with_t_end(1.0));
        let mut solver = SolverControlFramework::new(model, cfg);
        solver.set_output_scheduler(Box::new(FixedIntervalOutputScheduler::new(0.25).with_end(1.0)));
        solver.run().unwrap();
        assert_eq!(solver.t(), 1.0);
        assert_eq!(outputs.borrow().len(), 5);
        assert!(solver.metrics().iter().any(|m| m.starts_with("NewtonConvFailsX=")));
    }

    #[test]
    fn iterative_solver_through_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SolverConfig {
            les: LESType::BiCGStab,
            jacobian: Some(JacobianType::SparseCSR),
            precond: Some(PrecondType::ILU),
            ..Default::default()
        };
        cfg.output.log_dir = Some(dir.path().to_path_buf());
        cfg.output.step_statistics = true;
        let model = DiffusionGridModel::new(4, 3, 1.0, 1.0).with_t_end(0.5);
        let mut solver = SolverControlFramework::new(Box::new(model), cfg);
        solver.run().unwrap();
        let les_stats = read_to_string(dir.path().join("LES_iterative_stats.tsv")).unwrap();
        let n_steps = solver.integrator().unwrap().n_steps();
        assert_eq!(les_stats.lines().count(), 1 + n_steps);
        assert!(solver.metrics().iter().any(|m| m.starts_with("LESLinearIters=")));
    }

    #[test]
    fn band_solver_on_linear_model_through_the_driver() {
        let n = 30;
        let y0: Vec<f64> = (0..n).map(|i| if i < n / 2 { 1.0 } else { 0.0 }).collect();
        let mass: f64 = y0.iter().sum();
        let model = LinearModel::new(LinearModel::diffusion_1d(n, 5.0), y0).with_time_frame(0.0, 1e-4, 2.0);
        let cfg = SolverConfig { les: LESType::Band, ml: 1, mu: 1, ..Default::default() };
        let mut solver = SolverControlFramework::new(Box::new(model), cfg);
        solver.run().unwrap();
        let y = solver.y().unwrap();
        assert_relative_eq!(y.iter().sum::<f64>(), mass, max_relative = 1e-4);
        assert!(y[0] > y[n - 1]);
    }

    /// y' = (cx + cy)*y on an nx x ny grid, one unknown per cell, X flux cx*y and Y flux cy*y.
    /// Refuses `refusals` evaluations of non-zero states at times from `refuse_from` on.
    struct ScalarGridModel {
        nx: usize,
        ny: usize,
        cx: f64,
        cy: f64,
        dt0: f64,
        t_end: f64,
        refuse_from: f64,
        refusals: usize,
        attempts: Vec<f64>,
        direction: FluxDirection,
        indices_x: Vec<usize>,
        indices_y: Vec<usize>,
        t: f64,
        y: Vec<f64>,
    }

    impl ScalarGridModel {
        fn new(cx: f64, cy: f64, dt0: f64) -> Self {
            let (nx, ny) = (2, 2);
            ScalarGridModel {
                nx,
                ny,
                cx,
                cy,
                dt0,
                t_end: 4.0,
                refuse_from: f64::INFINITY,
                refusals: 0,
                attempts: Vec::new(),
                direction: FluxDirection::All,
                indices_x: (0..nx * ny).collect(),
                indices_y: (0..nx).flat_map(|i| (0..ny).map(move |j| i + j * nx)).collect(),
                t: 0.0,
                y: vec![0.0; nx * ny],
            }
        }

        fn refusing(mut self, refuse_from: f64, refusals: usize) -> Self {
            self.refuse_from = refuse_from;
            self.refusals = refusals;
            self
        }

        /// the step to `t` was attempted again after a failed attempt to `t_failed`
        fn retried(&self, t_failed: f64, t: f64) -> bool {
            self.attempts.windows(2).any(|w| w[0] == t_failed && w[1] == t)
        }
    }

    impl ModelInterface for ScalarGridModel {
        fn n(&self) -> usize {
            self.nx * self.ny
        }
        fn y0(&self) -> Vec<f64> {
            vec![0.0; self.n()]
        }
        fn t0(&self) -> f64 {
            0.0
        }
        fn dt0(&self) -> f64 {
            self.dt0
        }
        fn t_end(&self) -> f64 {
            self.t_end
        }
        fn set_time(&mut self, t: f64) -> CalculationResult {
            self.t = t;
            self.attempts.push(t);
            CalculationResult::Success
        }
        fn set_y(&mut self, y: &[f64]) -> CalculationResult {
            self.y.copy_from_slice(y);
            CalculationResult::Success
        }
        fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
            if self.t >= self.refuse_from && self.refusals > 0 && self.y.iter().any(|&v| v != 0.0) {
                self.refusals -= 1;
                return CalculationResult::RecoverableError;
            }
            let c = match self.direction {
                FluxDirection::X => self.cx,
                FluxDirection::Y => self.cy,
                FluxDirection::All => self.cx + self.cy,
            };
            for (d, v) in ydot.iter_mut().zip(&self.y) {
                *d = c * v;
            }
            CalculationResult::Success
        }
        fn as_adi(&self) -> Option<&dyn ModelInterfaceADI> {
            Some(self)
        }
        fn as_adi_mut(&mut self) -> Option<&mut dyn ModelInterfaceADI> {
            Some(self)
        }
    }

    impl ModelInterfaceADI for ScalarGridModel {
        fn set_active_flux_direction(&mut self, direction: FluxDirection) {
            self.direction = direction;
        }
        fn active_flux_direction(&self) -> FluxDirection {
            self.direction
        }
        fn indices_x(&self) -> &[usize] {
            &self.indices_x
        }
        fn indices_y(&self) -> &[usize] {
            &self.indices_y
        }
        fn n_elements(&self) -> usize {
            self.nx * self.ny
        }
        fn n_equations(&self) -> usize {
            1
        }
    }

    fn doubling_steps(base: IntegratorSettings) -> IntegratorSettings {
        let mut settings = base;
        settings.tunables.max_dt_scale = 2.0;
        settings
    }

    fn run_ie_to_end(model: &mut ScalarGridModel) -> IntegratorImplicitEuler {
        let mut ie = IntegratorImplicitEuler::new(doubling_steps(IntegratorSettings::default()));
        let y0 = model.y0();
        ie.init(model, 0.0, &y0, LESSolver::dense(), None, None).unwrap();
        while ie.t() < model.t_end() {
            ie.step(model).unwrap();
        }
        ie
    }

    fn run_adi_to_end(model: &mut ScalarGridModel) -> IntegratorADI {
        let mut adi = IntegratorADI::new(doubling_steps(IntegratorSettings::adi()));
        let y0 = model.y0();
        adi.init(model, 0.0, &y0, LESSolver::adi_direct(), None, None).unwrap();
        while adi.t() < model.t_end() {
            adi.step(model).unwrap();
        }
        adi
    }

    #[test]
    fn singular_newton_matrix_is_retried_with_a_new_factorization() {
        // J = I: I - dt*J is singular for the doubled step dt = 1, the halved step equals the last good one
        let mut model = ScalarGridModel::new(1.0, 0.0, 0.5);
        let ie = run_ie_to_end(&mut model);
        assert!(ie.t() >= 4.0);
        assert!(model.retried(1.5, 1.0));
        assert!(ie.y().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn refused_jacobian_evaluation_is_retried_with_a_new_jacobian() {
        let mut model = ScalarGridModel::new(-1.0, 0.0, 0.5).refusing(1.2, 1);
        let ie = run_ie_to_end(&mut model);
        assert_eq!(model.refusals, 0);
        assert!(model.retried(1.5, 1.0));
        assert!(ie.t() >= 4.0);
    }

    #[test]
    fn adi_singular_directional_matrix_is_retried_with_a_new_factorization() {
        // I - 0.5*dt*Jx is singular for the doubled step dt = 2
        let mut model = ScalarGridModel::new(1.0, 0.0, 1.0);
        let adi = run_adi_to_end(&mut model);
        assert!(adi.t() >= 4.0);
        assert!(model.retried(3.0, 2.0));
        assert!(adi.newton_x().jac_valid);
    }

    #[test]
    fn adi_refused_jacobian_evaluation_is_retried_with_a_new_jacobian() {
        let mut model = ScalarGridModel::new(-1.0, -0.5, 0.5).refusing(1.2, 1);
        let adi = run_adi_to_end(&mut model);
        assert_eq!(model.refusals, 0);
        assert!(model.retried(1.5, 1.0));
        assert!(adi.t() >= 4.0);
    }

    #[test]
    fn stepping_past_the_stop_time_is_a_configuration_error() {
        let mut model = ScalarGridModel::new(-1.0, -1.0, 0.1);
        let mut adi = IntegratorADI::new(IntegratorSettings { stop_time: 0.3, ..IntegratorSettings::adi() });
        let y0 = model.y0();
        adi.init(&mut model, 0.0, &y0, LESSolver::adi_direct(), None, None).unwrap();
        while adi.t() < 0.3 {
            adi.step(&mut model).unwrap();
        }
        assert!(matches!(adi.step(&mut model), Err(IntegratorError::Config(_))));
        assert_eq!(adi.t(), 0.3);
    }
}
