//! Linear equation system solvers for the Newton system `(I - gamma * J) delta = rhs`.
//!
//! Direct solvers (`Dense`, `Band`, `BTridiag`) generate the Jacobian with their own finite-difference
//! generator, form `I - gamma * J` in place and factorize it. `ADI` and `ADIDirect` build directional
//! block-tridiagonal systems (see IE_les_adi.rs). `BiCGStab` is iterative and matrix-free: it multiplies
//! with the Jacobian given at init and can use a left preconditioner.
use enum_dispatch::enum_dispatch;
use log::{debug, warn};

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::{JacobianGenerator, JacobianKind};
use crate::numerical::ImplicitEuler::IE_les_adi::{LESADI, LESADIDirect};
use crate::numerical::ImplicitEuler::IE_precond::{PrecondInterface, Preconditioner};
use crate::numerical::ImplicitEuler::IE_solver::IntegratorKind;
use crate::numerical::ImplicitEuler::model_interface::{FluxDirection, ModelInterface};
use crate::somelinalg::BICGSTAB::BiCGSTAB;
use crate::somelinalg::RustedLINPACK::matrix_interface::MatrixInterface;
use crate::somelinalg::vector_ops::vector_copy;

/// Counters of a linear solver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LESStatistics {
    /// Jacobian evaluations (= setups)
    pub n_jac_evals: usize,
    /// model evaluations spent in Jacobian generation
    pub n_rhs_evals: usize,
    pub n_solves: usize,
    pub n_lin_iters: usize,
    pub n_lin_conv_fails: usize,
    pub n_prec_evals: usize,
    pub n_prec_solves: usize,
    pub n_jv_evals: usize,
}

#[enum_dispatch]
pub trait LESInterface {
    /// Checks the integrator/model combination and allocates the solver storage.
    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        integrator: IntegratorKind,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError>;

    /// Generates the Jacobian at (t, y) and prepares the solution of `(I - gamma * J) x = b`.
    fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        t: f64,
        y: &[f64],
        ydot: &[f64],
        residuals: &[f64],
        gamma: f64,
    ) -> Result<(), IntegratorError>;

    /// Solves in place with the data of the last setup.
    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError>;

    fn statistics(&self) -> LESStatistics;

    fn name(&self) -> &'static str;

    fn is_iterative(&self) -> bool {
        false
    }

    /// Selects the direction used by `solve`; only directional solvers care.
    fn set_flux_direction(&mut self, _direction: FluxDirection) {}
}

/// Closed set of linear solvers.
#[enum_dispatch(LESInterface)]
#[derive(Debug, Clone)]
pub enum LESSolver {
    Dense(LESDense),
    Band(LESBand),
    BTridiag(LESBTridiag),
    ADI(LESADI),
    ADIDirect(LESADIDirect),
    BiCGStab(LESBiCGStab),
}

impl LESSolver {
    pub fn dense() -> Self {
        LESSolver::Dense(LESDense(DirectLES::new(JacobianKind::Dense, "Dense")))
    }

    pub fn band(ml: usize, mu: usize) -> Self {
        LESSolver::Band(LESBand(DirectLES::new(JacobianKind::Band { ml, mu }, "Band")))
    }

    pub fn btridiag(n_blocks: usize, block_size: usize) -> Self {
        LESSolver::BTridiag(LESBTridiag(DirectLES::new(
            JacobianKind::BlockTridiag { n_blocks, block_size },
            "BTridiag",
        )))
    }

    pub fn adi() -> Self {
        LESSolver::ADI(LESADI::default())
    }

    pub fn adi_direct() -> Self {
        LESSolver::ADIDirect(LESADIDirect::default())
    }

    pub fn bicgstab(max_krylov_dim: usize, lin_tol: f64) -> Self {
        LESSolver::BiCGStab(LESBiCGStab::new(max_krylov_dim, lin_tol))
    }
}

/// Shared part of the direct solvers: own Jacobian generator, in-place `I - gamma*J`, LU.
#[derive(Debug, Clone)]
pub struct DirectLES {
    kind: JacobianKind,
    label: &'static str,
    jacobian: Option<JacobianGenerator>,
    n_solves: usize,
}

impl DirectLES {
    fn new(kind: JacobianKind, label: &'static str) -> Self {
        DirectLES { kind, label, jacobian: None, n_solves: 0 }
    }

    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        integrator: IntegratorKind,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        if integrator != IntegratorKind::ImplicitEuler {
            return Err(IntegratorError::Config(format!(
                "{} linear solver can only be used with the implicit Euler integrator",
                self.label
            )));
        }
        if let Some(p) = precond {
            warn!("{} linear solver is direct, {} preconditioner is ignored", self.label, p.name());
        }
        if jacobian.is_some() {
            warn!("{} linear solver generates its own Jacobian, the given one is ignored", self.label);
        }
        self.jacobian = Some(JacobianGenerator::new(model.n(), self.kind.clone())?);
        self.n_solves = 0;
        Ok(())
    }

    fn jacobian_mut(&mut self) -> Result<&mut JacobianGenerator, IntegratorError> {
        let label = self.label;
        self.jacobian
            .as_mut()
            .ok_or_else(|| IntegratorError::Config(format!("{} linear solver used before init()", label)))
    }

    fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        t: f64,
        y: &[f64],
        ydot: &[f64],
        gamma: f64,
    ) -> Result<(), IntegratorError> {
        let jac = self.jacobian_mut()?;
        jac.setup(model, t, y, ydot)?;
        let m = jac.matrix_mut();
        m.scale(-gamma);
        m.add_to_diagonal(1.0);
        m.lu()?;
        Ok(())
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
        let jac = self.jacobian_mut()?;
        jac.matrix().backsolve(rhs)?;
        self.n_solves += 1;
        Ok(())
    }

    fn statistics(&self) -> LESStatistics {
        let (n_jac_evals, n_rhs_evals) = self
            .jacobian
            .as_ref()
            .map_or((0, 0), |j| (j.n_jac_evals(), j.n_rhs_evals()));
        LESStatistics { n_jac_evals, n_rhs_evals, n_solves: self.n_solves, ..Default::default() }
    }

    /// Jacobian generator (available after init)
    pub fn jacobian(&self) -> Option<&JacobianGenerator> {
        self.jacobian.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct LESDense(pub DirectLES);
#[derive(Debug, Clone)]
pub struct LESBand(pub DirectLES);
#[derive(Debug, Clone)]
pub struct LESBTridiag(pub DirectLES);

macro_rules! direct_les_impl {
    ($T: ty) => {
        impl LESInterface for $T {
            fn init(
                &mut self,
                model: &mut dyn ModelInterface,
                integrator: IntegratorKind,
                precond: Option<Preconditioner>,
                jacobian: Option<JacobianGenerator>,
            ) -> Result<(), IntegratorError> {
                self.0.init(model, integrator, precond, jacobian)
            }

            fn setup(
                &mut self,
                model: &mut dyn ModelInterface,
                t: f64,
                y: &[f64],
                ydot: &[f64],
                _residuals: &[f64],
                gamma: f64,
            ) -> Result<(), IntegratorError> {
                self.0.setup(model, t, y, ydot, gamma)
            }

            fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
                self.0.solve(rhs)
            }

            fn statistics(&self) -> LESStatistics {
                self.0.statistics()
            }

            fn name(&self) -> &'static str {
                self.0.label
            }
        }
    };
}

direct_les_impl!(LESDense);
direct_les_impl!(LESBand);
direct_les_impl!(LESBTridiag);

/// Matrix-free BiCGStab on `(I - gamma * J)`, left preconditioned.
#[derive(Debug, Clone)]
pub struct LESBiCGStab {
    /// iteration limit of one solve
    pub max_krylov_dim: usize,
    /// relative residual tolerance
    pub lin_tol: f64,
    solver: Option<BiCGSTAB>,
    jacobian: Option<JacobianGenerator>,
    precond: Option<Preconditioner>,
    gamma: f64,
    b: Vec<f64>,
    x: Vec<f64>,
    stats: LESStatistics,
}

impl LESBiCGStab {
    pub fn new(max_krylov_dim: usize, lin_tol: f64) -> Self {
        LESBiCGStab {
            max_krylov_dim,
            lin_tol,
            solver: None,
            jacobian: None,
            precond: None,
            gamma: 0.0,
            b: Vec::new(),
            x: Vec::new(),
            stats: LESStatistics::default(),
        }
    }

    pub fn preconditioner(&self) -> Option<&Preconditioner> {
        self.precond.as_ref()
    }
}

impl LESInterface for LESBiCGStab {
    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        integrator: IntegratorKind,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        if integrator != IntegratorKind::ImplicitEuler {
            return Err(IntegratorError::Config(
                "BiCGStab linear solver can only be used with the implicit Euler integrator".to_string(),
            ));
        }
        let n = model.n();
        let jacobian = jacobian.ok_or_else(|| {
            IntegratorError::Config("BiCGStab linear solver requires a Jacobian generator".to_string())
        })?;
        if jacobian.n() != n {
            return Err(IntegratorError::Config(format!(
                "Jacobian size {} does not match the model size {}",
                jacobian.n(),
                n
            )));
        }
        if self.max_krylov_dim == 0 || !(self.lin_tol > 0.0) {
            return Err(IntegratorError::Config(
                "BiCGStab needs max_krylov_dim > 0 and lin_tol > 0".to_string(),
            ));
        }
        self.precond = match precond {
            Some(mut p) => {
                p.init(&jacobian)?;
                debug!("BiCGStab with {} preconditioner", p.name());
                Some(p)
            }
            None => None,
        };
        self.solver = Some(BiCGSTAB::new(n, self.max_krylov_dim, self.lin_tol));
        self.jacobian = Some(jacobian);
        self.b = vec![0.0; n];
        self.x = vec![0.0; n];
        self.stats = LESStatistics::default();
        Ok(())
    }

    fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        t: f64,
        y: &[f64],
        ydot: &[f64],
        _residuals: &[f64],
        gamma: f64,
    ) -> Result<(), IntegratorError> {
        let jac = self
            .jacobian
            .as_mut()
            .ok_or_else(|| IntegratorError::Config("BiCGStab linear solver used before init()".to_string()))?;
        jac.setup(model, t, y, ydot)?;
        if let Some(p) = self.precond.as_mut() {
            p.setup(jac, gamma)?;
            self.stats.n_prec_evals += 1;
        }
        self.gamma = gamma;
        Ok(())
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
        let LESBiCGStab { solver, jacobian, precond, gamma, b, x, stats, .. } = self;
        let (solver, jacobian) = match (solver.as_mut(), jacobian.as_ref()) {
            (Some(s), Some(j)) => (s, j),
            _ => {
                return Err(IntegratorError::Config(
                    "BiCGStab linear solver used before init()".to_string(),
                ));
            }
        };
        let gamma = *gamma;
        vector_copy(rhs, b);
        if let Some(p) = precond.as_ref() {
            p.solve(b)?;
            stats.n_prec_solves += 1;
        }
        let mut n_jv = 0;
        let mut n_psolve = 0;
        // out = P^-1 (v - gamma * J v)
        let op = |v: &[f64], out: &mut [f64]| -> Result<(), IntegratorError> {
            jacobian.jac_times_vec(v, out);
            n_jv += 1;
            for (o, vi) in out.iter_mut().zip(v) {
                *o = vi - gamma * *o;
            }
            if let Some(p) = precond.as_ref() {
                p.solve(out)?;
                n_psolve += 1;
            }
            Ok(())
        };
        let converged = solver.solve(op, b, x)?;
        stats.n_jv_evals += n_jv;
        stats.n_prec_solves += n_psolve;
        stats.n_lin_iters += solver.iteration_count();
        stats.n_solves += 1;
        if !converged {
            stats.n_lin_conv_fails += 1;
            return Err(IntegratorError::LinearSolverNotConverged {
                iterations: solver.iteration_count(),
                residual: solver.err(),
            });
        }
        vector_copy(x, rhs);
        Ok(())
    }

    fn statistics(&self) -> LESStatistics {
        let mut stats = self.stats;
        if let Some(j) = self.jacobian.as_ref() {
            stats.n_jac_evals = j.n_jac_evals();
            stats.n_rhs_evals = j.n_rhs_evals();
        }
        stats
    }

    fn name(&self) -> &'static str {
        "BiCGStab"
    }

    fn is_iterative(&self) -> bool {
        true
    }
}
