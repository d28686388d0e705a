//! Problem fillers: each contributes one concern to the linear problem.
//!
//! Fillers run in a fixed order and communicate only through the shared
//! key scheme in [`super::ids`]: the margin fillers read the flow variables
//! declared by [`CoreProblemFiller`], the relative-margin filler re-bounds
//! the min-margin variable declared by [`MaxMinMarginFiller`]. Changing a
//! key therefore breaks downstream fillers, not just the one edited.
//!
//! `fill` is called once per linear optimization; `update_between_sensi_iteration`
//! refreshes coefficients and bounds after each sensitivity recomputation
//! without redeclaring anything.

mod core;
mod group;
mod loop_flow;
mod max_min_margin;
mod max_min_relative_margin;
mod usage_limits;

pub use self::core::CoreProblemFiller;
pub use group::GroupFiller;
pub use loop_flow::LoopFlowFiller;
pub use max_min_margin::MaxMinMarginFiller;
pub use max_min_relative_margin::MaxMinRelativeMarginFiller;
pub use usage_limits::RaUsageLimitsFiller;

use crate::linear::problem::LinearProblem;
use crate::params::RaoParameters;
use crate::perimeter::OptimizationPerimeter;
use crate::sensitivity::SensitivitySnapshot;
use rao_core::{ActionId, Crac, RaoResult, State};
use std::collections::HashMap;

/// Inputs that stay fixed for the lifetime of one linear optimization.
pub struct FillerInputs<'a> {
    pub crac: &'a Crac,
    pub perimeter: &'a OptimizationPerimeter,
    pub params: &'a RaoParameters,
    /// Pre-optimization setpoint of every range action in the perimeter.
    pub initial_setpoints: &'a HashMap<ActionId, f64>,
    /// Discrete actions already applied to the network before this
    /// optimization (they count against usage limits).
    pub applied_network_actions: &'a [ActionId],
}

/// Inputs refreshed on every sensitivity iteration.
pub struct IterationData<'a> {
    pub snapshot: &'a SensitivitySnapshot,
    /// Current operating setpoint of each (range action, state).
    pub setpoints: &'a HashMap<(ActionId, State), f64>,
}

impl IterationData<'_> {
    pub fn setpoint(&self, action: ActionId, state: State, initial: f64) -> f64 {
        self.setpoints.get(&(action, state)).copied().unwrap_or(initial)
    }
}

/// One concern's contribution to the linear problem.
pub trait ProblemFiller: Send + Sync {
    /// Declares variables and constraints. Called exactly once.
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()>;

    /// Refreshes sensitivities, reference flows and reference-dependent
    /// bounds after a sensitivity recomputation.
    fn update_between_sensi_iteration(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()>;
}

/// Builds the filler pipeline for a perimeter, in its required order.
pub fn build_fillers(inputs: &FillerInputs) -> Vec<Box<dyn ProblemFiller>> {
    use crate::params::ObjectiveMode;

    let mut fillers: Vec<Box<dyn ProblemFiller>> = vec![Box::new(CoreProblemFiller)];
    fillers.push(Box::new(MaxMinMarginFiller));
    if inputs.params.objective.mode == ObjectiveMode::MaxMinRelativeMargin {
        fillers.push(Box::new(MaxMinRelativeMarginFiller));
    }
    if inputs
        .crac
        .range_actions()
        .iter()
        .any(|ra| ra.group_id.is_some())
    {
        fillers.push(Box::new(GroupFiller));
    }
    if inputs.params.ra_limits.max_curative_ra.is_some()
        || !inputs.params.ra_limits.max_curative_ra_per_operator.is_empty()
    {
        fillers.push(Box::new(RaUsageLimitsFiller));
    }
    if inputs.params.loop_flow.is_some() && !inputs.perimeter.loop_flow_cnecs.is_empty() {
        fillers.push(Box::new(LoopFlowFiller));
    }
    fillers
}

/// Range-action states whose setpoint influences a CNEC at `cnec_state`:
/// same timeline branch, acting at or before the CNEC's instant.
pub(crate) fn acting_states(perimeter: &OptimizationPerimeter, cnec_state: State) -> Vec<State> {
    perimeter
        .range_actions_per_state
        .keys()
        .filter(|s| {
            s.instant <= cnec_state.instant
                && (s.is_preventive() || s.contingency == cnec_state.contingency)
        })
        .copied()
        .collect()
}
