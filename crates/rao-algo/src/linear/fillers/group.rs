//! Aligned-group filler: range actions sharing a group keep one setpoint.

use super::{FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use rao_core::RaoResult;
use std::collections::BTreeMap;

/// Declares one setpoint variable per (group, state) and pins every member to
/// it with an equality (`member - group == 0`), so aligned phase shifters
/// move together.
pub struct GroupFiller;

impl ProblemFiller for GroupFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        _iteration: &IterationData,
    ) -> RaoResult<()> {
        for (&state, actions) in &inputs.perimeter.range_actions_per_state {
            // group name -> members at this state, in a deterministic order
            let mut groups: BTreeMap<&str, Vec<rao_core::ActionId>> = BTreeMap::new();
            for &action_id in actions {
                if let Some(group) = inputs.crac.range_action(action_id).group_id.as_deref() {
                    groups.entry(group).or_default().push(action_id);
                }
            }

            for (group, members) in groups {
                if members.len() < 2 {
                    continue;
                }
                let group_key = ids::group_setpoint_variable(group, state);
                problem.add_variable(
                    &group_key,
                    -LinearProblem::infinity(),
                    LinearProblem::infinity(),
                )?;
                for action_id in members {
                    let link = ids::group_link_constraint(action_id, state);
                    problem.add_constraint(&link, 0.0, 0.0)?;
                    problem.set_coefficient(
                        &link,
                        &ids::setpoint_variable(action_id, state),
                        1.0,
                    )?;
                    problem.set_coefficient(&link, &group_key, -1.0)?;
                }
            }
        }
        Ok(())
    }

    fn update_between_sensi_iteration(
        &self,
        _problem: &mut LinearProblem,
        _inputs: &FillerInputs,
        _iteration: &IterationData,
    ) -> RaoResult<()> {
        Ok(())
    }
}
