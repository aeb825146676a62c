//! Left preconditioners for the iterative linear solver.
//!
//! Both build an approximation of the Newton matrix `I - gamma * J` from the Jacobian held by the
//! iterative solver and factorize it: `Band` keeps only the band of J, `ILU` keeps the sparse pattern
//! of J and uses an incomplete factorization without fill-in.
use enum_dispatch::enum_dispatch;
use log::debug;
use std::cmp::min;

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_jacobian::JacobianGenerator;
use crate::somelinalg::RustedLINPACK::lu_band_nalg::BandMatrix;
use crate::somelinalg::RustedLINPACK::matrix_interface::{MatrixInterface, StructuredMatrix};
use crate::somelinalg::RustedLINPACK::sparse_csr::SparseMatrixCSR;

#[enum_dispatch]
pub trait PrecondInterface {
    /// allocates the preconditioner matrix for the given Jacobian
    fn init(&mut self, jacobian: &JacobianGenerator) -> Result<(), IntegratorError>;
    /// forms and factorizes `I - gamma * J` from the current Jacobian values
    fn setup(&mut self, jacobian: &JacobianGenerator, gamma: f64) -> Result<(), IntegratorError>;
    /// v = P^-1 v
    fn solve(&self, v: &mut [f64]) -> Result<(), IntegratorError>;
    fn name(&self) -> &'static str;
}

#[enum_dispatch(PrecondInterface)]
#[derive(Debug, Clone)]
pub enum Preconditioner {
    Band(PrecondBand),
    ILU(PrecondILU),
}

impl Preconditioner {
    pub fn band(ml: usize, mu: usize) -> Self {
        Preconditioner::Band(PrecondBand::new(ml, mu))
    }

    pub fn ilu() -> Self {
        Preconditioner::ILU(PrecondILU::default())
    }
}

#[derive(Debug, Clone)]
pub struct PrecondBand {
    pub ml: usize,
    pub mu: usize,
    matrix: Option<BandMatrix>,
}

impl PrecondBand {
    pub fn new(ml: usize, mu: usize) -> Self {
        PrecondBand { ml, mu, matrix: None }
    }
}

fn not_initialized(what: &str) -> IntegratorError {
    IntegratorError::Config(format!("{} preconditioner used before init()", what))
}

impl PrecondInterface for PrecondBand {
    fn init(&mut self, jacobian: &JacobianGenerator) -> Result<(), IntegratorError> {
        let n = jacobian.n();
        if self.ml >= n || self.mu >= n {
            return Err(IntegratorError::Config(format!(
                "band preconditioner widths ml = {}, mu = {} exceed the system size {}",
                self.ml, self.mu, n
            )));
        }
        self.matrix = Some(BandMatrix::new(n, self.ml, self.mu));
        debug!("band preconditioner ml = {}, mu = {} for {} Jacobian", self.ml, self.mu, jacobian.kind_name());
        Ok(())
    }

    fn setup(&mut self, jacobian: &JacobianGenerator, gamma: f64) -> Result<(), IntegratorError> {
        let (ml, mu) = (self.ml, self.mu);
        let band = self.matrix.as_mut().ok_or_else(|| not_initialized("band"))?;
        let n = band.dim();
        let jac = jacobian.matrix();
        band.set_zero();
        // transfer values column by column, restricted to the band
        for j in 0..n {
            for k in j.saturating_sub(mu)..=min(j + ml, n - 1) {
                band.set_value(k, j, jac.value(k, j))?;
            }
        }
        band.scale(-gamma);
        band.add_to_diagonal(1.0);
        band.lu()?;
        Ok(())
    }

    fn solve(&self, v: &mut [f64]) -> Result<(), IntegratorError> {
        let band = self.matrix.as_ref().ok_or_else(|| not_initialized("band"))?;
        band.backsolve(v)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Band"
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrecondILU {
    matrix: Option<SparseMatrixCSR>,
}

impl PrecondInterface for PrecondILU {
    fn init(&mut self, jacobian: &JacobianGenerator) -> Result<(), IntegratorError> {
        match jacobian.matrix() {
            StructuredMatrix::SparseCSR(sparse) => {
                self.matrix = Some(SparseMatrixCSR::from_pattern(sparse.pattern().clone())?);
                Ok(())
            }
            other => Err(IntegratorError::Config(format!(
                "ILU preconditioner requires a sparse CSR Jacobian, got {}",
                other.kind_name()
            ))),
        }
    }

    fn setup(&mut self, jacobian: &JacobianGenerator, gamma: f64) -> Result<(), IntegratorError> {
        let ilu = self.matrix.as_mut().ok_or_else(|| not_initialized("ILU"))?;
        match jacobian.matrix() {
            StructuredMatrix::SparseCSR(sparse) => ilu.copy_values_from(sparse)?,
            other => {
                return Err(IntegratorError::Config(format!(
                    "ILU preconditioner requires a sparse CSR Jacobian, got {}",
                    other.kind_name()
                )));
            }
        }
        ilu.scale(-gamma);
        ilu.add_to_diagonal(1.0);
        ilu.lu()?;
        Ok(())
    }

    fn solve(&self, v: &mut [f64]) -> Result<(), IntegratorError> {
        let ilu = self.matrix.as_ref().ok_or_else(|| not_initialized("ILU"))?;
        ilu.backsolve(v)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ILU"
    }
}
