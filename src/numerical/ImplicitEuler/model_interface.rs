//! Interface between the integrators and the physical model.
//!
//! The model owns its equations and its internal state. The integrators only ever talk to it
//! through `set_time`, `set_y` and `ydot`; everything else has a default implementation.
use strum_macros::{Display, EnumIter, EnumString};

use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;

/// Result of a model evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CalculationResult {
    Success,
    /// the requested time or state is outside of the valid domain, a smaller step may succeed
    RecoverableError,
    /// unrecoverable model state
    Abort,
}

impl CalculationResult {
    /// Maps the model return code onto the integrator error taxonomy, `what` names the call.
    pub fn into_result(self, what: &str) -> Result<(), IntegratorError> {
        match self {
            CalculationResult::Success => Ok(()),
            CalculationResult::RecoverableError => {
                Err(IntegratorError::ModelRecoverable(format!("{} returned a recoverable error", what)))
            }
            CalculationResult::Abort => Err(IntegratorError::ModelAbort(format!("{} aborted", what))),
        }
    }
}

/// Direction of the fluxes evaluated by an ADI model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum FluxDirection {
    X,
    Y,
    All,
}

pub trait ModelInterface {
    /// problem size, fixed for the whole run
    fn n(&self) -> usize;
    fn y0(&self) -> Vec<f64>;
    fn t0(&self) -> f64;
    fn dt0(&self) -> f64;
    fn t_end(&self) -> f64;

    fn set_time(&mut self, t: f64) -> CalculationResult;
    fn set_y(&mut self, y: &[f64]) -> CalculationResult;
    /// time derivatives for the time and state set last
    fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult;

    /// true when `calculate_error_weights` replaces the tolerance based weights
    fn has_error_weights_function(&self) -> bool {
        false
    }

    fn calculate_error_weights(&mut self, _y: &[f64], _weights: &mut [f64]) -> CalculationResult {
        CalculationResult::Abort
    }

    /// called by the driver after every accepted step with the current solution
    fn step_completed(&mut self, _t: f64, _y: &[f64]) {}

    /// called by the driver at every output time with the interpolated solution
    fn write_outputs(&mut self, _t_out: f64, _y_out: &[f64]) {}

    /// called by the driver once the end time has been reached
    fn write_final_outputs(&mut self) {}

    /// column indices of the non-zero elements of every row of df/dy, used by sparse Jacobians
    fn jacobian_pattern(&self) -> Option<Vec<Vec<usize>>> {
        None
    }

    /// ADI view of the model, `None` for models without directional splitting
    fn as_adi(&self) -> Option<&dyn ModelInterfaceADI> {
        None
    }

    fn as_adi_mut(&mut self) -> Option<&mut dyn ModelInterfaceADI> {
        None
    }
}

/// Model on a structured grid whose fluxes can be evaluated per direction.
///
/// Unknowns are stored element-wise: value `eqn` of element `e` is `y[e * n_equations() + eqn]`.
/// `indices_x()` lists the elements in X-line ordering, `indices_y()` in Y-line ordering; consecutive
/// entries of an ordering are neighbours along that direction (the model decides where lines end by
/// returning zero coupling).
pub trait ModelInterfaceADI: ModelInterface {
    fn set_active_flux_direction(&mut self, direction: FluxDirection);
    fn active_flux_direction(&self) -> FluxDirection;
    fn indices_x(&self) -> &[usize];
    fn indices_y(&self) -> &[usize];
    fn n_elements(&self) -> usize;
    fn n_equations(&self) -> usize;
}

/// Helper for the integrators: ADI view or a configuration error.
pub fn adi_view(model: &mut dyn ModelInterface) -> Result<&mut dyn ModelInterfaceADI, IntegratorError> {
    model
        .as_adi_mut()
        .ok_or_else(|| IntegratorError::Config("model does not implement the ADI interface".to_string()))
}
