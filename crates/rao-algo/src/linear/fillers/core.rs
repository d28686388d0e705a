//! Core filler: flow variables, their linearized definition, setpoint
//! variables with admissible bounds, and variation penalties.

use super::{acting_states, FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use rao_core::{RangeActionKind, RaoResult, State};

/// Declares, per monitored CNEC side:
///
/// ```text
/// flow - Σ sens(ra) * setpoint(ra) = ref_flow - Σ sens(ra) * current_setpoint(ra)
/// ```
///
/// and per range action a setpoint variable within its admissible bounds plus
/// an absolute-variation variable carrying a small penalty, so the solver
/// never moves a setpoint without a margin reason.
pub struct CoreProblemFiller;

impl CoreProblemFiller {
    fn fill_setpoints(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()> {
        for (&state, actions) in &inputs.perimeter.range_actions_per_state {
            for &action_id in actions {
                let action = inputs.crac.range_action(action_id);
                let initial = inputs
                    .initial_setpoints
                    .get(&action_id)
                    .copied()
                    .unwrap_or_else(|| action.initial_setpoint());
                let previous = iteration.setpoint(action_id, state, initial);
                let (lo, hi) = action.admissible_bounds(initial, previous);

                let sp_key = ids::setpoint_variable(action_id, state);
                problem.add_variable(&sp_key, lo, hi)?;

                let var_key = ids::absolute_variation_variable(action_id, state);
                problem.add_variable(&var_key, 0.0, LinearProblem::infinity())?;

                // variation >= setpoint - previous ; variation >= previous - setpoint
                let up = ids::absolute_variation_constraint(action_id, state, "up");
                problem.add_constraint(&up, -previous, LinearProblem::infinity())?;
                problem.set_coefficient(&up, &var_key, 1.0)?;
                problem.set_coefficient(&up, &sp_key, -1.0)?;

                let down = ids::absolute_variation_constraint(action_id, state, "down");
                problem.add_constraint(&down, previous, LinearProblem::infinity())?;
                problem.set_coefficient(&down, &var_key, 1.0)?;
                problem.set_coefficient(&down, &sp_key, 1.0)?;

                let penalty = match action.kind {
                    RangeActionKind::PstTap { .. } => inputs.params.linear.pst_penalty_cost,
                    RangeActionKind::Hvdc => inputs.params.linear.hvdc_penalty_cost,
                    RangeActionKind::Injection => inputs.params.linear.injection_penalty_cost,
                };
                problem.set_objective_coefficient(&var_key, penalty)?;
            }
        }
        Ok(())
    }

    fn flow_rhs(
        &self,
        inputs: &FillerInputs,
        iteration: &IterationData,
        cnec_id: rao_core::CnecId,
        side: rao_core::Side,
        cnec_state: State,
    ) -> f64 {
        let mut rhs = iteration.snapshot.flow(cnec_id, side);
        for state in acting_states(inputs.perimeter, cnec_state) {
            for &action_id in &inputs.perimeter.range_actions_per_state[&state] {
                let action = inputs.crac.range_action(action_id);
                let initial = inputs
                    .initial_setpoints
                    .get(&action_id)
                    .copied()
                    .unwrap_or_else(|| action.initial_setpoint());
                let sens = iteration.snapshot.sensitivity(cnec_id, side, action_id);
                rhs -= sens * iteration.setpoint(action_id, state, initial);
            }
        }
        rhs
    }
}

impl ProblemFiller for CoreProblemFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()> {
        self.fill_setpoints(problem, inputs, iteration)?;

        for &cnec_id in &inputs.perimeter.all_cnecs() {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            for side in cnec.monitored_sides() {
                let flow_key = ids::flow_variable(cnec_id, side);
                problem.add_variable(
                    &flow_key,
                    -LinearProblem::infinity(),
                    LinearProblem::infinity(),
                )?;

                let rhs = self.flow_rhs(inputs, iteration, cnec_id, side, cnec.state);
                let cons_key = ids::flow_constraint(cnec_id, side);
                problem.add_constraint(&cons_key, rhs, rhs)?;
                problem.set_coefficient(&cons_key, &flow_key, 1.0)?;
                for state in acting_states(inputs.perimeter, cnec.state) {
                    for &action_id in &inputs.perimeter.range_actions_per_state[&state] {
                        let sens = iteration.snapshot.sensitivity(cnec_id, side, action_id);
                        let sp_key = ids::setpoint_variable(action_id, state);
                        problem.set_coefficient(&cons_key, &sp_key, -sens)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn update_between_sensi_iteration(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()> {
        // Refresh setpoint bounds (previous-iteration-relative ranges move)
        // and the variation anchor point.
        for (&state, actions) in &inputs.perimeter.range_actions_per_state {
            for &action_id in actions {
                let action = inputs.crac.range_action(action_id);
                let initial = inputs
                    .initial_setpoints
                    .get(&action_id)
                    .copied()
                    .unwrap_or_else(|| action.initial_setpoint());
                let previous = iteration.setpoint(action_id, state, initial);
                let (lo, hi) = action.admissible_bounds(initial, previous);
                problem.set_variable_bounds(&ids::setpoint_variable(action_id, state), lo, hi)?;

                let up = ids::absolute_variation_constraint(action_id, state, "up");
                problem.set_constraint_bounds(&up, -previous, LinearProblem::infinity())?;
                let down = ids::absolute_variation_constraint(action_id, state, "down");
                problem.set_constraint_bounds(&down, previous, LinearProblem::infinity())?;
            }
        }

        // Refresh linearization point of every flow definition.
        for &cnec_id in &inputs.perimeter.all_cnecs() {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            for side in cnec.monitored_sides() {
                let rhs = self.flow_rhs(inputs, iteration, cnec_id, side, cnec.state);
                let cons_key = ids::flow_constraint(cnec_id, side);
                problem.set_constraint_bounds(&cons_key, rhs, rhs)?;
                for state in acting_states(inputs.perimeter, cnec.state) {
                    for &action_id in &inputs.perimeter.range_actions_per_state[&state] {
                        let sens = iteration.snapshot.sensitivity(cnec_id, side, action_id);
                        let sp_key = ids::setpoint_variable(action_id, state);
                        problem.set_coefficient(&cons_key, &sp_key, -sens)?;
                    }
                }
            }
        }
        Ok(())
    }
}
