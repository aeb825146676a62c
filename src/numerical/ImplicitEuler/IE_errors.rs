use std::fmt;

use crate::somelinalg::RustedLINPACK::matrix_interface::MatrixError;

/// Errors of the integrator framework.
#[derive(Debug)]
pub enum IntegratorError {
    /// invalid combination of integrator, model, linear solver or settings
    Config(String),
    ModelAbort(String),
    ModelRecoverable(String),
    /// the step size became too small to advance the time point
    StepSizeUnderflow { t: f64, dt: f64 },
    Matrix(MatrixError),
    LinearSolverNotConverged { iterations: usize, residual: f64 },
    Restart(String),
    Io(std::io::Error),
}

impl IntegratorError {
    /// Conditions absorbed by the step-size reduction loop of the integrators.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IntegratorError::ModelRecoverable(_)
                | IntegratorError::Matrix(MatrixError::Singular { .. })
                | IntegratorError::LinearSolverNotConverged { .. }
        )
    }
}

impl fmt::Display for IntegratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegratorError::Config(msg) => write!(f, "configuration error: {}", msg),
            IntegratorError::ModelAbort(msg) => write!(f, "model error: {}", msg),
            IntegratorError::ModelRecoverable(msg) => write!(f, "recoverable model error: {}", msg),
            IntegratorError::StepSizeUnderflow { t, dt } => {
                write!(f, "step size underflow at t = {} s with dt = {:e} s", t, dt)
            }
            IntegratorError::Matrix(err) => write!(f, "linear algebra error: {}", err),
            IntegratorError::LinearSolverNotConverged { iterations, residual } => write!(
                f,
                "iterative linear solver not converged after {} iterations, residual {:e}",
                iterations, residual
            ),
            IntegratorError::Restart(msg) => write!(f, "restart error: {}", msg),
            IntegratorError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for IntegratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IntegratorError::Matrix(err) => Some(err),
            IntegratorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MatrixError> for IntegratorError {
    fn from(err: MatrixError) -> Self {
        IntegratorError::Matrix(err)
    }
}

impl From<std::io::Error> for IntegratorError {
    fn from(err: std::io::Error) -> Self {
        IntegratorError::Io(err)
    }
}

impl From<csv::Error> for IntegratorError {
    fn from(err: csv::Error) -> Self {
        IntegratorError::Io(std::io::Error::other(err))
    }
}
