//! Integrator settings and the solver configuration.
//!
//! `IntegratorSettings` carries the numerical parameters of the integrators, `Tunables` the empirical
//! constants of the step-size and Newton heuristics. `SolverConfig` bundles the choice of integrator,
//! linear solver, Jacobian and preconditioner with the settings and the output options; it can be read
//! from a TOML document with the sections `[integrator]`, `[newton]`, `[tunables]`, `[les]`,
//! `[jacobian]`, `[preconditioner]` and `[output]`. Every key is optional.
//!
//! ```toml
//! [integrator]
//! kind = "ImplicitEuler"
//! rel_tol = 1e-6
//! [les]
//! kind = "Band"
//! ml = 1
//! mu = 1
//! [output]
//! interval = 0.5
//! ```
use log::info;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};
use toml::{Table, Value};

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::{JacobianGenerator, JacobianKind};
use crate::numerical::ImplicitEuler::IE_les::LESSolver;
use crate::numerical::ImplicitEuler::IE_newton::ModifiedNewtonStrategy;
use crate::numerical::ImplicitEuler::IE_precond::Preconditioner;
use crate::numerical::ImplicitEuler::IE_solver::IntegratorKind;
use crate::numerical::ImplicitEuler::model_interface::ModelInterface;
use crate::somelinalg::RustedLINPACK::sparse_csr::ColumnOrder;

/// Empirical constants of the step-size control and the Newton heuristics.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// lower bound factor of the convergence-rate estimate between iterations
    pub convergence_rate_reduction: f64,
    pub error_norm_safety: f64,
    /// minimum growth factor that is applied to the step size
    pub dt_scale_threshold: f64,
    /// steps without Jacobian update after which smaller growth factors are applied too
    pub steps_since_jac_for_growth: usize,
    pub max_steps_since_jac_update: usize,
    /// dt / dt_jac_update (or its inverse) that forces a Jacobian update
    pub max_dt_ratio: f64,
    /// residual norm of the prediction from which the step is halved
    pub residual_norm_limit: f64,
    pub divergence_delta_norm: f64,
    pub divergence_check_iter_limit: usize,
    /// largest step reduction factor after a failed error test
    pub min_error_scale: f64,
    /// growth limit per step
    pub max_dt_scale: f64,
    pub newton_threshold_residual: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            convergence_rate_reduction: 0.3,
            error_norm_safety: 6.0,
            dt_scale_threshold: 1.5,
            steps_since_jac_for_growth: 20,
            max_steps_since_jac_update: 200,
            max_dt_ratio: 1.3,
            residual_norm_limit: 3e5,
            divergence_delta_norm: 1e4,
            divergence_check_iter_limit: 3,
            min_error_scale: 0.2,
            max_dt_scale: 10.0,
            newton_threshold_residual: 0.01,
        }
    }
}

/// Parameters of the integrators.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorSettings {
    pub rel_tol: f64,
    pub abs_tol: f64,
    /// per-equation absolute tolerances, replace `abs_tol`
    pub abs_tol_vec: Option<Vec<f64>>,
    pub max_non_lin_iters: usize,
    /// residual norm below which the predicted state is accepted without correction, 0 = off
    pub nl_residual_tolerance: f64,
    pub non_lin_conv_coeff: f64,
    pub modified_newton_strategy: ModifiedNewtonStrategy,
    pub dt_max: f64,
    /// 0 = no stop time
    pub stop_time: f64,
    pub tunables: Tunables,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        IntegratorSettings {
            rel_tol: 1e-5,
            abs_tol: 1e-6,
            abs_tol_vec: None,
            max_non_lin_iters: 3,
            nl_residual_tolerance: 0.0,
            non_lin_conv_coeff: 0.1,
            modified_newton_strategy: ModifiedNewtonStrategy::OnceAtStepStart,
            dt_max: 3600.0,
            stop_time: 0.0,
            tunables: Tunables::default(),
        }
    }
}

impl IntegratorSettings {
    /// defaults of the ADI integrator
    pub fn adi() -> Self {
        IntegratorSettings { max_non_lin_iters: 10, ..Default::default() }
    }

    pub fn for_kind(kind: IntegratorKind) -> Self {
        match kind {
            IntegratorKind::ImplicitEuler => Self::default(),
            IntegratorKind::ADI => Self::adi(),
        }
    }

    /// Checks the settings against the problem size.
    pub fn validate(&self, n: usize) -> Result<(), IntegratorError> {
        if !(self.rel_tol >= 0.0) || !(self.abs_tol >= 0.0) {
            return Err(IntegratorError::Config("tolerances must not be negative".to_string()));
        }
        if let Some(atol) = &self.abs_tol_vec {
            if atol.len() != n {
                return Err(IntegratorError::Config(format!(
                    "abs_tol_vec has {} entries, the model has {} unknowns",
                    atol.len(),
                    n
                )));
            }
            if atol.iter().any(|&a| !(a > 0.0) && self.rel_tol == 0.0) {
                return Err(IntegratorError::Config("zero tolerance in abs_tol_vec with rel_tol = 0".to_string()));
            }
        } else if self.abs_tol == 0.0 && self.rel_tol == 0.0 {
            return Err(IntegratorError::Config("rel_tol and abs_tol are both zero".to_string()));
        }
        if self.max_non_lin_iters == 0 {
            return Err(IntegratorError::Config("max_non_lin_iters must be at least 1".to_string()));
        }
        if !(self.non_lin_conv_coeff > 0.0) || !(self.dt_max > 0.0) {
            return Err(IntegratorError::Config("non_lin_conv_coeff and dt_max must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum LESType {
    Dense,
    Band,
    BTridiag,
    ADI,
    ADIDirect,
    BiCGStab,
}

/// Storage of the Jacobian handed to the iterative linear solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum JacobianType {
    Dense,
    Band,
    BlockTridiag,
    SparseCSR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum PrecondType {
    Band,
    ILU,
}

/// When restart records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum RestartMode {
    #[default]
    EveryOutput,
    EndOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// output interval of the fixed interval scheduler (0 = only at start and end)
    pub interval: f64,
    /// directory of statistics and restart files, `None` disables file output
    pub log_dir: Option<PathBuf>,
    /// write a statistics row after every step, not only at outputs
    pub step_statistics: bool,
    pub restart: RestartMode,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings { interval: 0.0, log_dir: None, step_statistics: false, restart: RestartMode::EveryOutput }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub integrator: IntegratorKind,
    pub les: LESType,
    /// band widths of the Band linear solver, the band Jacobian and the band preconditioner
    pub ml: usize,
    pub mu: usize,
    /// block structure of the BTridiag linear solver, taken from the ADI view of the model when `None`
    pub blocks: Option<(usize, usize)>,
    pub max_krylov_dim: usize,
    pub lin_tol: f64,
    /// Jacobian of the iterative linear solver
    pub jacobian: Option<JacobianType>,
    pub coloring: ColumnOrder,
    pub precond: Option<PrecondType>,
    pub precond_ml: usize,
    pub precond_mu: usize,
    pub settings: IntegratorSettings,
    pub output: OutputSettings,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            integrator: IntegratorKind::ImplicitEuler,
            les: LESType::Dense,
            ml: 1,
            mu: 1,
            blocks: None,
            max_krylov_dim: 50,
            lin_tol: 1e-8,
            jacobian: None,
            coloring: ColumnOrder::Natural,
            precond: None,
            precond_ml: 1,
            precond_mu: 1,
            settings: IntegratorSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

fn config_err(section: &str, key: &str, msg: &str) -> IntegratorError {
    IntegratorError::Config(format!("[{}] {}: {}", section, key, msg))
}

/// Typed access to the keys of one TOML section.
struct Section<'a> {
    name: &'a str,
    table: Option<&'a Table>,
}

impl<'a> Section<'a> {
    fn new(doc: &'a Table, name: &'a str) -> Result<Self, IntegratorError> {
        match doc.get(name) {
            None => Ok(Section { name, table: None }),
            Some(Value::Table(t)) => Ok(Section { name, table: Some(t) }),
            Some(_) => Err(IntegratorError::Config(format!("[{}] must be a table", name))),
        }
    }

    fn value(&self, key: &str) -> Option<&'a Value> {
        self.table.and_then(|t| t.get(key))
    }

    fn f64(&self, key: &str) -> Result<Option<f64>, IntegratorError> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Float(x)) => Ok(Some(*x)),
            Some(Value::Integer(i)) => Ok(Some(*i as f64)),
            Some(_) => Err(config_err(self.name, key, "expected a number")),
        }
    }

    fn usize(&self, key: &str) -> Result<Option<usize>, IntegratorError> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Integer(i)) if *i >= 0 => Ok(Some(*i as usize)),
            Some(_) => Err(config_err(self.name, key, "expected a non-negative integer")),
        }
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, IntegratorError> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Boolean(b)) => Ok(Some(*b)),
            Some(_) => Err(config_err(self.name, key, "expected true or false")),
        }
    }

    fn str(&self, key: &str) -> Result<Option<&'a str>, IntegratorError> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(config_err(self.name, key, "expected a string")),
        }
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, IntegratorError> {
        match self.str(key)? {
            None => Ok(None),
            Some(s) => T::from_str(s)
                .map(Some)
                .map_err(|_| config_err(self.name, key, &format!("unknown value '{}'", s))),
        }
    }

    fn f64_vec(&self, key: &str) -> Result<Option<Vec<f64>>, IntegratorError> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Float(x) => Ok(*x),
                    Value::Integer(i) => Ok(*i as f64),
                    _ => Err(config_err(self.name, key, "expected an array of numbers")),
                })
                .collect::<Result<Vec<f64>, _>>()
                .map(Some),
            Some(_) => Err(config_err(self.name, key, "expected an array of numbers")),
        }
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

impl SolverConfig {
    /// Defaults for the given integrator: ADI integrator with ADIDirect solver, else dense LES.
    pub fn for_integrator(kind: IntegratorKind) -> Self {
        let les = match kind {
            IntegratorKind::ImplicitEuler => LESType::Dense,
            IntegratorKind::ADI => LESType::ADIDirect,
        };
        SolverConfig { integrator: kind, les, settings: IntegratorSettings::for_kind(kind), ..Default::default() }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, IntegratorError> {
        let doc: Table = text
            .parse()
            .map_err(|e: toml::de::Error| IntegratorError::Config(format!("invalid TOML: {}", e)))?;
        let integrator = Section::new(&doc, "integrator")?;
        let kind = integrator.parse::<IntegratorKind>("kind")?.unwrap_or(IntegratorKind::ImplicitEuler);
        let mut cfg = SolverConfig::for_integrator(kind);

        let s = &mut cfg.settings;
        set(&mut s.rel_tol, integrator.f64("rel_tol")?);
        set(&mut s.abs_tol, integrator.f64("abs_tol")?);
        s.abs_tol_vec = integrator.f64_vec("abs_tol_vec")?;
        set(&mut s.dt_max, integrator.f64("dt_max")?);
        set(&mut s.stop_time, integrator.f64("stop_time")?);

        let newton = Section::new(&doc, "newton")?;
        set(&mut s.max_non_lin_iters, newton.usize("max_non_lin_iters")?);
        set(&mut s.nl_residual_tolerance, newton.f64("nl_residual_tolerance")?);
        set(&mut s.non_lin_conv_coeff, newton.f64("non_lin_conv_coeff")?);
        set(&mut s.modified_newton_strategy, newton.parse("strategy")?);

        let tun = Section::new(&doc, "tunables")?;
        let t = &mut s.tunables;
        set(&mut t.convergence_rate_reduction, tun.f64("convergence_rate_reduction")?);
        set(&mut t.error_norm_safety, tun.f64("error_norm_safety")?);
        set(&mut t.dt_scale_threshold, tun.f64("dt_scale_threshold")?);
        set(&mut t.steps_since_jac_for_growth, tun.usize("steps_since_jac_for_growth")?);
        set(&mut t.max_steps_since_jac_update, tun.usize("max_steps_since_jac_update")?);
        set(&mut t.max_dt_ratio, tun.f64("max_dt_ratio")?);
        set(&mut t.residual_norm_limit, tun.f64("residual_norm_limit")?);
        set(&mut t.divergence_delta_norm, tun.f64("divergence_delta_norm")?);
        set(&mut t.divergence_check_iter_limit, tun.usize("divergence_check_iter_limit")?);
        set(&mut t.min_error_scale, tun.f64("min_error_scale")?);
        set(&mut t.max_dt_scale, tun.f64("max_dt_scale")?);
        set(&mut t.newton_threshold_residual, tun.f64("newton_threshold_residual")?);

        let les = Section::new(&doc, "les")?;
        set(&mut cfg.les, les.parse("kind")?);
        set(&mut cfg.ml, les.usize("ml")?);
        set(&mut cfg.mu, les.usize("mu")?);
        match (les.usize("n_blocks")?, les.usize("block_size")?) {
            (Some(nb), Some(bs)) => cfg.blocks = Some((nb, bs)),
            (None, None) => {}
            _ => return Err(config_err("les", "n_blocks", "n_blocks and block_size must be given together")),
        }
        set(&mut cfg.max_krylov_dim, les.usize("max_krylov_dim")?);
        set(&mut cfg.lin_tol, les.f64("lin_tol")?);

        let jac = Section::new(&doc, "jacobian")?;
        cfg.jacobian = jac.parse("kind")?;
        if let Some(seed) = jac.usize("shuffle_seed")? {
            cfg.coloring = ColumnOrder::Shuffled(seed as u64);
        }

        let pre = Section::new(&doc, "preconditioner")?;
        cfg.precond = pre.parse("kind")?;
        set(&mut cfg.precond_ml, pre.usize("ml")?);
        set(&mut cfg.precond_mu, pre.usize("mu")?);

        let out = Section::new(&doc, "output")?;
        set(&mut cfg.output.interval, out.f64("interval")?);
        cfg.output.log_dir = out.str("log_dir")?.map(PathBuf::from);
        set(&mut cfg.output.step_statistics, out.bool("step_statistics")?);
        set(&mut cfg.output.restart, out.parse("restart")?);

        if cfg.les == LESType::BiCGStab && cfg.jacobian.is_none() {
            cfg.jacobian = Some(JacobianType::Dense);
        }
        info!("solver configuration: {} integrator, {} linear solver", cfg.integrator, cfg.les);
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, IntegratorError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Block structure of the BTridiag solver: configured, or taken from the ADI view of the model.
    fn block_structure(&self, model: &dyn ModelInterface) -> Result<(usize, usize), IntegratorError> {
        if let Some(b) = self.blocks {
            return Ok(b);
        }
        model
            .as_adi()
            .map(|adi| (adi.n_elements(), adi.n_equations()))
            .ok_or_else(|| IntegratorError::Config("BTridiag linear solver needs n_blocks and block_size".to_string()))
    }

    pub fn build_les(&self, model: &dyn ModelInterface) -> Result<LESSolver, IntegratorError> {
        Ok(match self.les {
            LESType::Dense => LESSolver::dense(),
            LESType::Band => LESSolver::band(self.ml, self.mu),
            LESType::BTridiag => {
                let (n_blocks, block_size) = self.block_structure(model)?;
                LESSolver::btridiag(n_blocks, block_size)
            }
            LESType::ADI => LESSolver::adi(),
            LESType::ADIDirect => LESSolver::adi_direct(),
            LESType::BiCGStab => LESSolver::bicgstab(self.max_krylov_dim, self.lin_tol),
        })
    }

    /// Jacobian generator handed to the linear solver (only iterative solvers use one).
    pub fn build_jacobian(&self, model: &dyn ModelInterface) -> Result<Option<JacobianGenerator>, IntegratorError> {
        let n = model.n();
        let kind = match self.jacobian {
            None => return Ok(None),
            Some(JacobianType::Dense) => JacobianKind::Dense,
            Some(JacobianType::Band) => JacobianKind::Band { ml: self.ml, mu: self.mu },
            Some(JacobianType::BlockTridiag) => {
                let (n_blocks, block_size) = self.block_structure(model)?;
                JacobianKind::BlockTridiag { n_blocks, block_size }
            }
            Some(JacobianType::SparseCSR) => {
                let rows = model.jacobian_pattern().ok_or_else(|| {
                    IntegratorError::Config("sparse Jacobian requires the model's Jacobian pattern".to_string())
                })?;
                JacobianKind::SparseCSR { rows, order: self.coloring }
            }
        };
        Ok(Some(JacobianGenerator::new(n, kind)?))
    }

    pub fn build_preconditioner(&self) -> Option<Preconditioner> {
        self.precond.map(|p| match p {
            PrecondType::Band => Preconditioner::band(self.precond_ml, self.precond_mu),
            PrecondType::ILU => Preconditioner::ilu(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Examples::ie_examples::DiffusionGridModel;

    #[test]
    fn defaults_follow_the_integrator() {
        let ie = SolverConfig::default();
        assert_eq!(ie.settings.max_non_lin_iters, 3);
        assert_eq!(ie.settings.tunables.error_norm_safety, 6.0);
        let adi = SolverConfig::for_integrator(IntegratorKind::ADI);
        assert_eq!(adi.settings.max_non_lin_iters, 10);
        assert_eq!(adi.les, LESType::ADIDirect);
    }

    #[test]
    fn reads_all_sections() {
        let text = r#"
            [integrator]
            kind = "ImplicitEuler"
            rel_tol = 1e-6
            abs_tol_vec = [1e-8, 1]
            dt_max = 100
            [newton]
            strategy = "EveryIteration"
            max_non_lin_iters = 5
            [tunables]
            max_steps_since_jac_update = 50
            error_norm_safety = 4.0
            [les]
            kind = "BiCGStab"
            max_krylov_dim = 20
            lin_tol = 1e-9
            [jacobian]
            kind = "SparseCSR"
            shuffle_seed = 11
            [preconditioner]
            kind = "ILU"
            [output]
            interval = 0.25
            log_dir = "logs"
            restart = "EndOnly"
        "#;
        let cfg = SolverConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.settings.rel_tol, 1e-6);
        assert_eq!(cfg.settings.abs_tol_vec, Some(vec![1e-8, 1.0]));
        assert_eq!(cfg.settings.dt_max, 100.0);
        assert_eq!(cfg.settings.modified_newton_strategy, ModifiedNewtonStrategy::EveryIteration);
        assert_eq!(cfg.settings.max_non_lin_iters, 5);
        assert_eq!(cfg.settings.tunables.max_steps_since_jac_update, 50);
        assert_eq!(cfg.settings.tunables.error_norm_safety, 4.0);
        assert_eq!(cfg.les, LESType::BiCGStab);
        assert_eq!(cfg.max_krylov_dim, 20);
        assert_eq!(cfg.jacobian, Some(JacobianType::SparseCSR));
        assert_eq!(cfg.coloring, ColumnOrder::Shuffled(11));
        assert_eq!(cfg.precond, Some(PrecondType::ILU));
        assert_eq!(cfg.output.interval, 0.25);
        assert_eq!(cfg.output.log_dir, Some(PathBuf::from("logs")));
        assert_eq!(cfg.output.restart, RestartMode::EndOnly);
    }

    #[test]
    fn rejects_unknown_names_and_wrong_types() {
        assert!(matches!(
            SolverConfig::from_toml_str("[les]\nkind = \"Cholesky\""),
            Err(IntegratorError::Config(_))
        ));
        assert!(matches!(
            SolverConfig::from_toml_str("[integrator]\nrel_tol = \"small\""),
            Err(IntegratorError::Config(_))
        ));
        assert!(matches!(SolverConfig::from_toml_str("integrator = 3"), Err(IntegratorError::Config(_))));
        assert!(matches!(
            SolverConfig::from_toml_str("[les]\nn_blocks = 3"),
            Err(IntegratorError::Config(_))
        ));
    }

    #[test]
    fn builds_block_solver_from_adi_model() {
        let model = DiffusionGridModel::new(3, 2, 1.0, 1.0);
        let cfg = SolverConfig { les: LESType::BTridiag, ..Default::default() };
        let les = cfg.build_les(&model).unwrap();
        assert!(matches!(les, LESSolver::BTridiag(_)));
        let cfg = SolverConfig { jacobian: Some(JacobianType::SparseCSR), ..Default::default() };
        let jac = cfg.build_jacobian(&model).unwrap().unwrap();
        assert_eq!(jac.n(), model.n());
    }

    #[test]
    fn settings_validation() {
        let mut s = IntegratorSettings::default();
        assert!(s.validate(3).is_ok());
        s.abs_tol_vec = Some(vec![1e-6; 2]);
        assert!(matches!(s.validate(3), Err(IntegratorError::Config(_))));
        s.abs_tol_vec = None;
        s.max_non_lin_iters = 0;
        assert!(s.validate(3).is_err());
    }
}
