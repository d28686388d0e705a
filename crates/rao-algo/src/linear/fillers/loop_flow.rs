//! Loop-flow filler: soft bounds on the non-commercial flow component.

use super::{FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::LinearProblem;
use rao_core::RaoResult;

/// Per loop-flow CNEC side, with `cf` the commercial flow from the snapshot
/// and `T` the loop-flow threshold plus the acceptable augmentation:
///
/// ```text
/// flow - violation <= cf + T
/// flow + violation >= cf - T
/// violation >= 0, weighted in the objective by the violation cost
/// ```
///
/// The bound is soft: a violation is paid for, not forbidden, so the problem
/// stays feasible when loop flows cannot be contained.
pub struct LoopFlowFiller;

impl LoopFlowFiller {
    fn bounds(
        inputs: &FillerInputs,
        iteration: &IterationData,
        cnec_id: rao_core::CnecId,
        side: rao_core::Side,
        threshold: f64,
    ) -> (f64, f64) {
        let acceptable = inputs
            .params
            .loop_flow
            .as_ref()
            .map(|p| p.acceptable_augmentation)
            .unwrap_or(0.0);
        let cf = iteration.snapshot.commercial_flow(cnec_id, side);
        (cf - threshold - acceptable, cf + threshold + acceptable)
    }
}

impl ProblemFiller for LoopFlowFiller {
    fn fill(
        &self,
        problem: &mut LinearProblem,
        inputs: &FillerInputs,
        iteration: &IterationData,
    ) -> RaoResult<()> {
        let Some(loop_flow) = inputs.params.loop_flow.as_ref() else {
            return Ok(());
        };
        for &cnec_id in &inputs.perimeter.loop_flow_cnecs {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            let Some(threshold) = cnec.loop_flow_threshold_mw else {
                continue;
            };
            for side in cnec.monitored_sides() {
                let flow_key = ids::flow_variable(cnec_id, side);
                let violation_key = ids::loop_flow_violation_variable(cnec_id, side);
                problem.add_variable(&violation_key, 0.0, LinearProblem::infinity())?;
                problem.set_objective_coefficient(&violation_key, loop_flow.violation_cost)?;

                let (lo, hi) = Self::bounds(inputs, iteration, cnec_id, side, threshold);

                let above = ids::loop_flow_constraint(cnec_id, side, "above");
                problem.add_constraint(&above, -LinearProblem::infinity(), hi)?;
                problem.set_coefficient(&above, &flow_key, 1.0)?;
                problem.set_coefficient(&above, &violation_key, -1.0)?;

                let below = ids::loop_flow_constraint(cnec_id, side, "below");
                problem.add_constraint(&below, lo, LinearProblem::infinity())?;
                problem.set_coefficient(&below, &flow_key, 1.0)?;
                problem.set_coefficient(&below, &violation_key, 1.0)?;
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
        // Commercial flows move with each snapshot.
        for &cnec_id in &inputs.perimeter.loop_flow_cnecs {
            let cnec = inputs.crac.flow_cnec(cnec_id);
            let Some(threshold) = cnec.loop_flow_threshold_mw else {
                continue;
            };
            for side in cnec.monitored_sides() {
                let (lo, hi) = Self::bounds(inputs, iteration, cnec_id, side, threshold);
                problem.set_constraint_bounds(
                    &ids::loop_flow_constraint(cnec_id, side, "above"),
                    -LinearProblem::infinity(),
                    hi,
                )?;
                problem.set_constraint_bounds(
                    &ids::loop_flow_constraint(cnec_id, side, "below"),
                    lo,
                    LinearProblem::infinity(),
                )?;
            }
        }
        Ok(())
    }
}
