//! Usage-limits filler: caps how many remedial actions a curative state may
//! activate, globally and per operator.

use super::{FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use crate::perimeter::PerimeterKind;
use rao_core::{ActionId, RaoResult, State};
use std::collections::BTreeMap;

/// Declares a relaxed activation binary per (range action, state) linked to
/// the setpoint by a big-M pair:
///
/// ```text
/// setpoint - initial <=  spread * activation
/// setpoint - initial >= -spread * activation
/// ```
///
/// then bounds activation counts. Discrete actions already applied by the
/// search consume part of the budget before the solve starts.
///
/// The relaxed binaries only cap the count fractionally; the iterating
/// optimizer pins out-of-budget setpoints after each solve to make the cap
/// integral.
pub struct RaUsageLimitsFiller;

impl RaUsageLimitsFiller {
    fn initial(inputs: &FillerInputs, action_id: ActionId) -> f64 {
        inputs
            .initial_setpoints
            .get(&action_id)
            .copied()
            .unwrap_or_else(|| inputs.crac.range_action(action_id).initial_setpoint())
    }

    fn fill_state(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        state: State,
        actions: &[ActionId],
    ) -> RaoResult<()> {
        for &action_id in actions {
            let action = inputs.crac.range_action(action_id);
            let initial = Self::initial(inputs, action_id);
            let (lo, hi) = action.admissible_bounds(initial, initial);
            // Largest possible move away from the initial setpoint.
            let spread = (hi - initial).abs().max((initial - lo).abs()).max(1.0);

            let act_key = ids::activation_variable(action_id, state);
            problem.add_binary_variable(&act_key)?;
            let sp_key = ids::setpoint_variable(action_id, state);

            let up = ids::activation_link_constraint(action_id, state);
            // setpoint - spread * activation <= initial
            problem.add_constraint(&up, -LinearProblem::infinity(), initial)?;
            problem.set_coefficient(&up, &sp_key, 1.0)?;
            problem.set_coefficient(&up, &act_key, -spread)?;

            let down = format!("{up}_neg");
            // setpoint + spread * activation >= initial
            problem.add_constraint(&down, initial, LinearProblem::infinity())?;
            problem.set_coefficient(&down, &sp_key, 1.0)?;
            problem.set_coefficient(&down, &act_key, spread)?;
        }

        let applied = inputs.applied_network_actions.len();
        if let Some(max_ra) = inputs.params.ra_limits.max_curative_ra {
            let budget = max_ra.saturating_sub(applied) as f64;
            let key = ids::ra_count_constraint(state);
            problem.add_constraint(&key, -LinearProblem::infinity(), budget)?;
            for &action_id in actions {
                problem.set_coefficient(&key, &ids::activation_variable(action_id, state), 1.0)?;
            }
        }

        if !inputs.params.ra_limits.max_curative_ra_per_operator.is_empty() {
            let mut by_operator: BTreeMap<&str, Vec<ActionId>> = BTreeMap::new();
            for &action_id in actions {
                if let Some(op) = inputs.crac.range_action(action_id).operator.as_deref() {
                    by_operator.entry(op).or_default().push(action_id);
                }
            }
            for (operator, members) in by_operator {
                let Some(&max) = inputs
                    .params
                    .ra_limits
                    .max_curative_ra_per_operator
                    .get(operator)
                else {
                    continue;
                };
                let applied_by_operator = inputs
                    .applied_network_actions
                    .iter()
                    .filter(|&&id| {
                        inputs.crac.network_action(id).operator.as_deref() == Some(operator)
                    })
                    .count();
                let budget = max.saturating_sub(applied_by_operator) as f64;
                let key = ids::operator_ra_count_constraint(operator, state);
                problem.add_constraint(&key, -LinearProblem::infinity(), budget)?;
                for action_id in members {
                    problem.set_coefficient(
                        &key,
                        &ids::activation_variable(action_id, state),
                        1.0,
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl ProblemFiller for RaUsageLimitsFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        _iteration: &IterationData,
    ) -> RaoResult<()> {
        // Limits only bind curative perimeters.
        if inputs.perimeter.kind != PerimeterKind::Curative {
            return Ok(());
        }
        for (&state, actions) in &inputs.perimeter.range_actions_per_state {
            self.fill_state(problem, inputs, state, actions)?;
        }
        Ok(())
    }

    fn update_between_sensi_iteration(
        &self,
        _problem: &mut LinearProblem,
        _inputs: &FillerInputs,
        _iteration: &IterationData,
    ) -> RaoResult<()> {
        // Anchored to the pre-optimization setpoint, which never moves.
        Ok(())
    }
}
