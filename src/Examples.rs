//! examples of usage of RustedSolverFramework
/// Implicit Euler and ADI examples with the models they use
pub mod ie_examples;
