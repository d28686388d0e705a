//! Linear-programming layer: the string-keyed problem container, the
//! deterministic key scheme, the fillers that populate it, and the iterating
//! optimizer that alternates solves with sensitivity refreshes.

pub mod fillers;
pub mod ids;
pub mod optimizer;
pub mod problem;

pub use optimizer::{IteratingLinearOptimizer, LinearOptimizationResult};
pub use problem::{LinearProblem, LinearProblemStatus, LinearSolution};
