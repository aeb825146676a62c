//! Adaptive Implicit Euler and ADI time integrators for stiff ODE systems
//!
//! Both integrators drive a model through [`model_interface::ModelInterface`], solve the implicit stage
//! by modified Newton iteration and control the step size by an estimate of the local error.
//! [`IE_api::SolverControlFramework`] runs a model from its start time to its end time with
//! scheduled outputs, statistics files and restart records.
/// the model seen by the integrators, ADI models also expose flux directions
pub mod model_interface;
/// error type of the framework
pub mod IE_errors;
/// finite-difference Jacobian with column grouping
pub mod IE_jacobian;
/// band and ILU(0) preconditioners
pub mod IE_precond;
/// linear solvers of the Newton system
pub mod IE_les;
/// approximate factorization over the X and Y flux directions
pub mod IE_les_adi;
/// modified Newton iteration
pub mod IE_newton;
/// local error test and step size selection
pub mod IE_error_control;
/// settings and TOML configuration
pub mod IE_config;
/// Implicit Euler integrator
pub mod IE_solver;
/// ADI integrator
pub mod ADI_solver;
/// integrator dispatch and the solver control framework
pub mod IE_api;

mod IE_tests;
