//! # rao-algo: Search-Tree Remedial Action Optimization
//!
//! This crate finds the combination of remedial actions (topology switches,
//! phase-shifter taps, HVDC and injection setpoints) that maximizes the worst
//! flow margin over the monitored network elements of a [`rao_core::Crac`]
//! catalog, across the base case and every simulated contingency.
//!
//! ## Pipeline
//!
//! | Stage | Entry point | Role |
//! |-------|-------------|------|
//! | Perimeter building | [`perimeter::PerimeterBuilder`] | Scope CNECs and actions per optimized state |
//! | Discrete search | [`search::SearchTree`] | Explore network-action combinations depth by depth |
//! | Linear optimization | [`linear::IteratingLinearOptimizer`] | Tune range-action setpoints between sensitivity refreshes |
//! | Aggregation | [`result::AggregatedResult`] | Merge per-state decisions, freeze, expose inheritance |
//!
//! The whole chain is driven by [`engine::optimize`].
//!
//! ## External seams
//!
//! Power flows and sensitivities are never computed here: callers implement
//! [`sensitivity::SensitivityEngine`] over their network model and hand the
//! engine working copies through [`sensitivity::NetworkHandle`]. Handles are
//! forked once into a bounded [`pool::NetworkPool`], which is also what caps
//! the search tree's parallelism.
//!
//! ## Example
//!
//! ```ignore
//! use rao_algo::{engine, params::RaoParameters};
//!
//! let input = engine::RaoInput { crac: &crac, network: &handle, engine: &sensi };
//! let result = engine::optimize(&input, &RaoParameters::default(), None)?;
//! println!("worst cost: {:?}", result.overall_cost());
//! ```

pub mod engine;
pub mod linear;
pub mod objective;
pub mod params;
pub mod perimeter;
pub mod pool;
pub mod result;
pub mod search;
pub mod sensitivity;
pub mod test_utils;

pub use engine::{optimize, RaoInput};
pub use linear::{IteratingLinearOptimizer, LinearProblem, LinearProblemStatus};
pub use objective::{ObjectiveFunction, ObjectiveFunctionResult};
pub use params::{ObjectiveMode, RaoParameters, StopCriterion};
pub use perimeter::{OptimizationPerimeter, PerimeterBuilder, PerimeterKind};
pub use pool::NetworkPool;
pub use result::{AggregatedResult, ComputationStatus, PrePerimeterResult, StateOptimizationResult};
pub use search::{SearchTree, SearchTreeResult};
pub use sensitivity::{NetworkHandle, SensitivityEngine, SensitivitySnapshot, SensitivityStatus};
