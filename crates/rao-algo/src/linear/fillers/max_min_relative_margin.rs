//! Relative-margin filler, layered on top of [`super::MaxMinMarginFiller`].

use super::{FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use rao_core::RaoResult;

/// Switches the objective to the worst *relative* margin once all margins
/// are positive.
///
/// Re-bounds the min-margin variable declared by the absolute filler to
/// `(-inf, 0]` (it keeps driving the objective while some margin is
/// negative) and declares `RM >= 0` with, per optimized CNEC side:
///
/// ```text
/// flow + ptdf * RM <= upper_bound
/// flow - ptdf * RM >= lower_bound
/// ```
///
/// where `ptdf` is the side's absolute PTDF sum, floored by configuration.
/// Must run after the absolute filler; it reads that filler's variable key.
pub struct MaxMinRelativeMarginFiller;

impl MaxMinRelativeMarginFiller {
    fn ptdf(inputs: &FillerInputs, iteration: &IterationData, cnec: rao_core::CnecId, side: rao_core::Side) -> f64 {
        iteration
            .snapshot
            .ptdf_abs_sum(cnec, side)
            .max(inputs.params.objective.ptdf_sum_lower_bound)
    }
}

impl ProblemFiller for MaxMinRelativeMarginFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()> {
        problem.set_variable_bounds(&ids::min_margin_variable(), -LinearProblem::infinity(), 0.0)?;

        let rm_key = ids::min_relative_margin_variable();
        problem.add_variable(&rm_key, 0.0, LinearProblem::infinity())?;
        problem.set_objective_coefficient(&rm_key, -1.0)?;

        for &cnec_id in &inputs.perimeter.optimized_cnecs {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            for side in cnec.monitored_sides() {
                let flow_key = ids::flow_variable(cnec_id, side);
                let ptdf = Self::ptdf(inputs, iteration, cnec_id, side);
                if let Some(ub) = cnec.upper_bound(side) {
                    let key = ids::relative_margin_constraint(cnec_id, side, "above");
                    problem.add_constraint(&key, -LinearProblem::infinity(), ub)?;
                    problem.set_coefficient(&key, &flow_key, 1.0)?;
                    problem.set_coefficient(&key, &rm_key, ptdf)?;
                }
                if let Some(lb) = cnec.lower_bound(side) {
                    let key = ids::relative_margin_constraint(cnec_id, side, "below");
                    problem.add_constraint(&key, lb, LinearProblem::infinity())?;
                    problem.set_coefficient(&key, &flow_key, 1.0)?;
                    problem.set_coefficient(&key, &rm_key, -ptdf)?;
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
        // PTDF sums are recomputed with each snapshot.
        let rm_key = ids::min_relative_margin_variable();
        for &cnec_id in &inputs.perimeter.optimized_cnecs {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            for side in cnec.monitored_sides() {
                let ptdf = Self::ptdf(inputs, iteration, cnec_id, side);
                if cnec.upper_bound(side).is_some() {
                    let key = ids::relative_margin_constraint(cnec_id, side, "above");
                    problem.set_coefficient(&key, &rm_key, ptdf)?;
                }
                if cnec.lower_bound(side).is_some() {
                    let key = ids::relative_margin_constraint(cnec_id, side, "below");
                    problem.set_coefficient(&key, &rm_key, -ptdf)?;
                }
            }
        }
        Ok(())
    }
}
