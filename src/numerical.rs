//! Time integrators
/// Implicit Euler and ADI integrators for stiff ODE systems
pub mod ImplicitEuler;
