//! Directional (ADI) linear solvers for models on structured grids.
//!
//! For every direction the Jacobian of the directional fluxes is block-tridiagonal when the elements
//! are taken in the ordering of that direction (`indices_x()` or `indices_y()`), with one block of
//! size `n_equations` per element. Both block systems are generated by finite differences with a
//! stride of three elements per variable.
//!
//! `LESADI` is used by the implicit Euler integrator and approximates `I - gamma*J` by the product
//! `(I - gamma*Jx)(I - gamma*Jy)`. `LESADIDirect` is used by the ADI integrator and solves only the
//! system of the direction that is currently active.
use log::debug;
use std::cmp::min;

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::{
    DEFAULT_ABS_TOL_DQ, DEFAULT_REL_TOL_DQ, JacobianGenerator, fd_increment,
};
use crate::numerical::ImplicitEuler::IE_les::{LESInterface, LESStatistics};
use crate::numerical::ImplicitEuler::IE_precond::{PrecondInterface, Preconditioner};
use crate::numerical::ImplicitEuler::IE_solver::IntegratorKind;
use crate::numerical::ImplicitEuler::model_interface::{
    FluxDirection, ModelInterface, ModelInterfaceADI, adi_view,
};
use crate::somelinalg::RustedLINPACK::block_tridiag::{BlockPosition, BlockTridiagMatrix};
use crate::somelinalg::RustedLINPACK::matrix_interface::MatrixInterface;
use crate::somelinalg::vector_ops::vector_copy;

/// Block-tridiagonal system of one direction together with its element ordering.
#[derive(Debug, Clone)]
struct DirectionalSystem {
    indices: Vec<usize>,
    matrix: BlockTridiagMatrix,
    z: Vec<f64>,
}

impl DirectionalSystem {
    fn new(indices: &[usize], m: usize) -> Result<Self, IntegratorError> {
        let n_elements = indices.len();
        let mut seen = vec![false; n_elements];
        for &e in indices {
            if e >= n_elements || seen[e] {
                return Err(IntegratorError::Config(format!(
                    "element ordering is not a permutation of 0..{} (entry {})",
                    n_elements, e
                )));
            }
            seen[e] = true;
        }
        Ok(DirectionalSystem {
            indices: indices.to_vec(),
            matrix: BlockTridiagMatrix::new(n_elements, m),
            z: vec![0.0; n_elements * m],
        })
    }

    /// Fills the blocks with d(ydot)/dy of the active direction; `base` holds ydot at `y`.
    /// Returns the number of model evaluations.
    fn generate(
        &mut self,
        model: &mut dyn ModelInterfaceADI,
        y: &[f64],
        base: &[f64],
        ydiff: &[f64],
        y_mod: &mut [f64],
        ydot_mod: &mut [f64],
    ) -> Result<usize, IntegratorError> {
        let ne = self.indices.len();
        let m = self.matrix.block_size();
        for k in 0..ne {
            for pos in [BlockPosition::Lower, BlockPosition::Main, BlockPosition::Upper] {
                self.matrix.submatrix_mut(k, pos).fill(0.0);
            }
        }
        vector_copy(y, y_mod);
        let mut n_evals = 0;
        for var in 0..m {
            for first in 0..min(3, ne) {
                for j in (first..ne).step_by(3) {
                    let idx = self.indices[j] * m + var;
                    y_mod[idx] += ydiff[idx];
                }
                model.set_y(y_mod).into_result("set_y (ADI Jacobian)")?;
                model.ydot(ydot_mod).into_result("ydot (ADI Jacobian)")?;
                n_evals += 1;
                for j in (first..ne).step_by(3) {
                    let idx = self.indices[j] * m + var;
                    for k in j.saturating_sub(1)..min(j + 2, ne) {
                        let pos = if k + 1 == j {
                            BlockPosition::Upper
                        } else if k == j {
                            BlockPosition::Main
                        } else {
                            BlockPosition::Lower
                        };
                        let row0 = self.indices[k] * m;
                        let block = self.matrix.submatrix_mut(k, pos);
                        for eqn in 0..m {
                            block[(eqn, var)] = (ydot_mod[row0 + eqn] - base[row0 + eqn]) / ydiff[idx];
                        }
                    }
                    y_mod[idx] = y[idx];
                }
            }
        }
        Ok(n_evals)
    }

    /// I - gamma * J, factorized
    fn factorize(&mut self, gamma: f64) -> Result<(), IntegratorError> {
        self.matrix.scale(-gamma);
        self.matrix.add_to_diagonal(1.0);
        self.matrix.lu()?;
        Ok(())
    }

    /// Solves in place: permutes into the directional ordering, back-substitutes, permutes back.
    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
        let m = self.matrix.block_size();
        for (i, &e) in self.indices.iter().enumerate() {
            self.z[i * m..(i + 1) * m].copy_from_slice(&rhs[e * m..(e + 1) * m]);
        }
        self.matrix.backsolve(&mut self.z)?;
        for (i, &e) in self.indices.iter().enumerate() {
            rhs[e * m..(e + 1) * m].copy_from_slice(&self.z[i * m..(i + 1) * m]);
        }
        Ok(())
    }
}

/// Storage shared by both ADI solvers.
#[derive(Debug, Clone)]
struct ADIWork {
    x: Option<DirectionalSystem>,
    y: Option<DirectionalSystem>,
    /// perturbation of the finite differences, taken from a given Jacobian generator
    rel_tol_dq: f64,
    abs_tol_dq: f64,
    ydiff: Vec<f64>,
    y_mod: Vec<f64>,
    ydot_dir: Vec<f64>,
    ydot_mod: Vec<f64>,
    stats: LESStatistics,
}

impl Default for ADIWork {
    fn default() -> Self {
        ADIWork {
            x: None,
            y: None,
            rel_tol_dq: DEFAULT_REL_TOL_DQ,
            abs_tol_dq: DEFAULT_ABS_TOL_DQ,
            ydiff: Vec::new(),
            y_mod: Vec::new(),
            ydot_dir: Vec::new(),
            ydot_mod: Vec::new(),
            stats: LESStatistics::default(),
        }
    }
}

impl ADIWork {
    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        label: &str,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        if let Some(p) = precond {
            log::warn!("{} linear solver ignores the {} preconditioner", label, p.name());
        }
        if let Some(jac) = jacobian {
            debug!("{} linear solver takes the perturbation of the {} Jacobian generator", label, jac.kind_name());
            self.rel_tol_dq = jac.rel_tol_dq;
            self.abs_tol_dq = jac.abs_tol_dq;
        }
        let n = model.n();
        let adi = adi_view(model)?;
        let (ne, m) = (adi.n_elements(), adi.n_equations());
        if ne * m != n || m == 0 {
            return Err(IntegratorError::Config(format!(
                "{} elements with {} equations do not match the model size {}",
                ne, m, n
            )));
        }
        if adi.indices_x().len() != ne || adi.indices_y().len() != ne {
            return Err(IntegratorError::Config(format!(
                "X/Y orderings must list all {} elements",
                ne
            )));
        }
        self.x = Some(DirectionalSystem::new(adi.indices_x(), m)?);
        self.y = Some(DirectionalSystem::new(adi.indices_y(), m)?);
        self.ydiff = vec![0.0; n];
        self.y_mod = vec![0.0; n];
        self.ydot_dir = vec![0.0; n];
        self.ydot_mod = vec![0.0; n];
        self.stats = LESStatistics::default();
        debug!("{} linear solver: {} elements x {} equations", label, ne, m);
        Ok(())
    }

    fn perturbations(&mut self, y: &[f64]) -> Result<(), IntegratorError> {
        for (j, (d, &yj)) in self.ydiff.iter_mut().zip(y).enumerate() {
            *d = fd_increment(j, yj, self.rel_tol_dq, self.abs_tol_dq)?;
        }
        Ok(())
    }

    fn system_mut(&mut self, direction: FluxDirection) -> Result<&mut DirectionalSystem, IntegratorError> {
        select(&mut self.x, &mut self.y, direction)
    }
}

fn select<'a>(
    x: &'a mut Option<DirectionalSystem>,
    y: &'a mut Option<DirectionalSystem>,
    direction: FluxDirection,
) -> Result<&'a mut DirectionalSystem, IntegratorError> {
    let sys = match direction {
        FluxDirection::X => x.as_mut(),
        FluxDirection::Y => y.as_mut(),
        FluxDirection::All => {
            return Err(IntegratorError::Config(
                "directional linear solver needs flux direction X or Y".to_string(),
            ));
        }
    };
    sys.ok_or_else(|| IntegratorError::Config("ADI linear solver used before init()".to_string()))
}

fn check_integrator(label: &str, integrator: IntegratorKind, expected: IntegratorKind) -> Result<(), IntegratorError> {
    if integrator != expected {
        return Err(IntegratorError::Config(format!(
            "{} linear solver can only be used with the {} integrator",
            label, expected
        )));
    }
    Ok(())
}

/// Approximate factorization `(I - gamma*Jx)(I - gamma*Jy)` for the implicit Euler integrator.
#[derive(Debug, Clone, Default)]
pub struct LESADI {
    work: ADIWork,
}

impl LESInterface for LESADI {
    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        integrator: IntegratorKind,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        check_integrator("ADI", integrator, IntegratorKind::ImplicitEuler)?;
        self.work.init(model, "ADI", precond, jacobian)
    }

    fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        _t: f64,
        y: &[f64],
        _ydot: &[f64],
        _residuals: &[f64],
        gamma: f64,
    ) -> Result<(), IntegratorError> {
        self.work.perturbations(y)?;
        let adi = adi_view(model)?;
        let ADIWork { x, y: sys_y, ydiff, y_mod, ydot_dir, ydot_mod, stats, .. } = &mut self.work;
        let (sys_x, sys_y) = match (x.as_mut(), sys_y.as_mut()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(IntegratorError::Config("ADI linear solver used before init()".to_string())),
        };
        for (direction, sys) in [(FluxDirection::X, sys_x), (FluxDirection::Y, sys_y)] {
            adi.set_y(y).into_result("set_y")?;
            adi.set_active_flux_direction(direction);
            adi.ydot(ydot_dir).into_result("ydot (ADI Jacobian)")?;
            stats.n_rhs_evals += 1;
            stats.n_rhs_evals += sys.generate(adi, y, ydot_dir, ydiff, y_mod, ydot_mod)?;
            stats.n_jac_evals += 1;
            sys.factorize(gamma)?;
        }
        adi.set_active_flux_direction(FluxDirection::All);
        adi.set_y(y).into_result("set_y")?;
        Ok(())
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
        self.work.system_mut(FluxDirection::X)?.solve(rhs)?;
        self.work.system_mut(FluxDirection::Y)?.solve(rhs)?;
        self.work.stats.n_solves += 1;
        Ok(())
    }

    fn statistics(&self) -> LESStatistics {
        self.work.stats
    }

    fn name(&self) -> &'static str {
        "ADI"
    }
}

/// Exact directional solve for the ADI integrator, one direction per Newton phase.
#[derive(Debug, Clone)]
pub struct LESADIDirect {
    work: ADIWork,
    direction: FluxDirection,
}

impl Default for LESADIDirect {
    fn default() -> Self {
        LESADIDirect { work: ADIWork::default(), direction: FluxDirection::X }
    }
}

impl LESADIDirect {
    /// direction of the last setup or selection
    pub fn direction(&self) -> FluxDirection {
        self.direction
    }
}

impl LESInterface for LESADIDirect {
    fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        integrator: IntegratorKind,
        precond: Option<Preconditioner>,
        jacobian: Option<JacobianGenerator>,
    ) -> Result<(), IntegratorError> {
        check_integrator("ADIDirect", integrator, IntegratorKind::ADI)?;
        self.work.init(model, "ADIDirect", precond, jacobian)
    }

    /// `ydot` must hold the directional derivatives of the model's active direction at `y`.
    fn setup(
        &mut self,
        model: &mut dyn ModelInterface,
        _t: f64,
        y: &[f64],
        ydot: &[f64],
        _residuals: &[f64],
        gamma: f64,
    ) -> Result<(), IntegratorError> {
        self.work.perturbations(y)?;
        let adi = adi_view(model)?;
        let direction = adi.active_flux_direction();
        self.direction = direction;
        let ADIWork { x, y: sys_y, ydiff, y_mod, ydot_mod, stats, .. } = &mut self.work;
        let sys = select(x, sys_y, direction)?;
        stats.n_rhs_evals += sys.generate(adi, y, ydot, ydiff, y_mod, ydot_mod)?;
        stats.n_jac_evals += 1;
        sys.factorize(gamma)?;
        adi.set_y(y).into_result("set_y")?;
        Ok(())
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegratorError> {
        let direction = self.direction;
        self.work.system_mut(direction)?.solve(rhs)?;
        self.work.stats.n_solves += 1;
        Ok(())
    }

    fn statistics(&self) -> LESStatistics {
        self.work.stats
    }

    fn name(&self) -> &'static str {
        "ADIDirect"
    }

    fn set_flux_direction(&mut self, direction: FluxDirection) {
        if direction != FluxDirection::All {
            self.direction = direction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Examples::ie_examples::DiffusionGridModel;
    use crate::numerical::ImplicitEuler::IE_les::LESSolver;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn directional_jacobian(model: &mut DiffusionGridModel, direction: FluxDirection, y: &[f64]) -> DMatrix<f64> {
        let n = y.len();
        let mut base = vec![0.0; n];
        let mut pert = vec![0.0; n];
        model.set_active_flux_direction(direction);
        model.set_y(y);
        model.ydot(&mut base);
        let mut j = DMatrix::zeros(n, n);
        for c in 0..n {
            let mut yp = y.to_vec();
            let h = 1e-6;
            yp[c] += h;
            model.set_y(&yp);
            model.ydot(&mut pert);
            for r in 0..n {
                j[(r, c)] = (pert[r] - base[r]) / h;
            }
        }
        model.set_y(y);
        model.set_active_flux_direction(FluxDirection::All);
        j
    }

    #[test]
    fn adi_direct_solves_each_direction_exactly() {
        let mut model = DiffusionGridModel::new(4, 3, 0.7, 1.3);
        let n = model.n();
        let y: Vec<f64> = (0..n).map(|i| 1.0 + 0.1 * (i as f64).sin()).collect();
        let mut les = LESSolver::adi_direct();
        les.init(&mut model, IntegratorKind::ADI, None, None).unwrap();
        let gamma = 0.05;
        for direction in [FluxDirection::X, FluxDirection::Y] {
            let jac = directional_jacobian(&mut model, direction, &y);
            let mut ydot = vec![0.0; n];
            model.set_active_flux_direction(direction);
            model.set_y(&y);
            model.ydot(&mut ydot);
            les.set_flux_direction(direction);
            les.setup(&mut model, 0.0, &y, &ydot, &vec![0.0; n], gamma).unwrap();
            let x: Vec<f64> = (0..n).map(|i| (0.4 * i as f64).cos()).collect();
            let b = (DMatrix::identity(n, n) - &jac * gamma) * nalgebra::DVector::from_vec(x.clone());
            let mut rhs: Vec<f64> = b.iter().copied().collect();
            les.solve(&mut rhs).unwrap();
            for i in 0..n {
                assert_relative_eq!(rhs[i], x[i], epsilon = 1e-5);
            }
        }
        assert_eq!(les.statistics().n_jac_evals, 2);
    }

    #[test]
    fn adi_solves_the_factorized_product() {
        let mut model = DiffusionGridModel::new(3, 4, 1.0, 0.5);
        let n = model.n();
        let y: Vec<f64> = (0..n).map(|i| 0.5 + 0.05 * i as f64).collect();
        let jx = directional_jacobian(&mut model, FluxDirection::X, &y);
        let jy = directional_jacobian(&mut model, FluxDirection::Y, &y);
        let mut les = LESSolver::adi();
        les.init(&mut model, IntegratorKind::ImplicitEuler, None, None).unwrap();
        let gamma = 0.1;
        let ydot = vec![0.0; n];
        les.setup(&mut model, 0.0, &y, &ydot, &ydot, gamma).unwrap();
        assert_eq!(model.active_flux_direction(), FluxDirection::All);
        let id = DMatrix::<f64>::identity(n, n);
        let product = (&id - &jx * gamma) * (&id - &jy * gamma);
        let x: Vec<f64> = (0..n).map(|i| 1.0 - 0.1 * i as f64).collect();
        let b = &product * nalgebra::DVector::from_vec(x.clone());
        let mut rhs: Vec<f64> = b.iter().copied().collect();
        les.solve(&mut rhs).unwrap();
        for i in 0..n {
            assert_relative_eq!(rhs[i], x[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn adi_direct_rejects_the_implicit_euler_integrator() {
        let mut model = DiffusionGridModel::new(2, 2, 1.0, 1.0);
        let mut les = LESSolver::adi_direct();
        assert!(matches!(
            les.init(&mut model, IntegratorKind::ImplicitEuler, None, None),
            Err(IntegratorError::Config(_))
        ));
    }

    #[test]
    fn perturbation_comes_from_the_given_jacobian_generator() {
        let mut model = DiffusionGridModel::new(2, 3, 1.0, 1.0);
        let n = model.n();
        let mut jac = JacobianGenerator::new(n, crate::numerical::ImplicitEuler::IE_jacobian::JacobianKind::Dense).unwrap();
        jac.rel_tol_dq = 1e-6;
        jac.abs_tol_dq = 0.0;
        let mut les = LESSolver::adi_direct();
        les.init(&mut model, IntegratorKind::ADI, None, Some(jac)).unwrap();
        let mut y = vec![0.5; n];
        let mut ydot = vec![0.0; n];
        model.set_active_flux_direction(FluxDirection::X);
        model.set_y(&y);
        model.ydot(&mut ydot);
        les.set_flux_direction(FluxDirection::X);
        les.setup(&mut model, 0.0, &y, &ydot, &vec![0.0; n], 0.1).unwrap();
        // a zero state with a zero absolute increment cannot be differenced
        y[3] = 0.0;
        assert!(matches!(
            les.setup(&mut model, 0.0, &y, &ydot, &vec![0.0; n], 0.1),
            Err(IntegratorError::Config(_))
        ));
    }
}
