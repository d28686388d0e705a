//! Margin-maximization filler: the min-margin variable and its defining
//! constraints against every optimized CNEC side.

use super::{FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use rao_core::RaoResult;

/// Declares `MM` with objective coefficient `-1` (minimizing `-MM`
/// maximizes the worst margin) and, per optimized CNEC side:
///
/// ```text
/// flow + MM <= upper_bound      (when an upper threshold exists)
/// flow - MM >= lower_bound      (when a lower threshold exists)
/// ```
///
/// so `MM` can never exceed any margin.
pub struct MaxMinMarginFiller;

impl ProblemFiller for MaxMinMarginFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        _iteration: &IterationData,
    ) -> RaoResult<()> {
        let mm_key = ids::min_margin_variable();
        problem.add_variable(&mm_key, -LinearProblem::infinity(), LinearProblem::infinity())?;
        problem.set_objective_coefficient(&mm_key, -1.0)?;

        for &cnec_id in &inputs.perimeter.optimized_cnecs {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            for side in cnec.monitored_sides() {
                let flow_key = ids::flow_variable(cnec_id, side);
                if let Some(ub) = cnec.upper_bound(side) {
                    let key = ids::margin_constraint(cnec_id, side, "above");
                    problem.add_constraint(&key, -LinearProblem::infinity(), ub)?;
                    problem.set_coefficient(&key, &flow_key, 1.0)?;
                    problem.set_coefficient(&key, &mm_key, 1.0)?;
                }
                if let Some(lb) = cnec.lower_bound(side) {
                    let key = ids::margin_constraint(cnec_id, side, "below");
                    problem.add_constraint(&key, lb, LinearProblem::infinity())?;
                    problem.set_coefficient(&key, &flow_key, 1.0)?;
                    problem.set_coefficient(&key, &mm_key, -1.0)?;
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
        // Thresholds do not move between iterations.
        Ok(())
    }
}
