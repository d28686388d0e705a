//! Objective function: functional cost from margins, plus named virtual
//! costs layered on top (loop-flow violations, degraded-sensitivity penalty).
//!
//! The functional cost is the negated worst margin over the optimized CNECs,
//! so minimizing the cost maximizes the most constrained margin. In relative
//! mode a positive margin is scaled down by the CNEC's zone-to-zone PTDF sum,
//! which favors elements that actually limit cross-border exchanges.

use crate::params::{LoopFlowParameters, ObjectiveFunctionParameters, ObjectiveMode};
use crate::perimeter::OptimizationPerimeter;
use crate::sensitivity::{SensitivitySnapshot, SensitivityStatus};
use rao_core::{CnecId, Crac};
use std::collections::BTreeMap;

pub const LOOP_FLOW_VIRTUAL_COST: &str = "loop-flow-violation";
pub const SENSITIVITY_FALLBACK_VIRTUAL_COST: &str = "sensitivity-fallback";

/// How many elements the most-limiting list retains.
const MOST_LIMITING_ELEMENTS: usize = 10;

/// One evaluation of the objective on a snapshot.
#[derive(Debug, Clone)]
pub struct ObjectiveFunctionResult {
    functional_cost: f64,
    virtual_costs: BTreeMap<String, f64>,
    /// Optimized CNECs sorted by ascending margin (most limiting first).
    most_limiting: Vec<CnecId>,
}

impl ObjectiveFunctionResult {
    pub fn functional_cost(&self) -> f64 {
        self.functional_cost
    }

    pub fn virtual_cost(&self, name: &str) -> f64 {
        self.virtual_costs.get(name).copied().unwrap_or(0.0)
    }

    pub fn virtual_cost_sum(&self) -> f64 {
        self.virtual_costs.values().sum()
    }

    pub fn virtual_costs(&self) -> &BTreeMap<String, f64> {
        &self.virtual_costs
    }

    /// Total cost: functional plus all virtual costs.
    pub fn cost(&self) -> f64 {
        self.functional_cost + self.virtual_cost_sum()
    }

    pub fn most_limiting_elements(&self) -> &[CnecId] {
        &self.most_limiting
    }
}

/// Margin evaluator bound to one perimeter.
pub struct ObjectiveFunction<'a> {
    crac: &'a Crac,
    params: &'a ObjectiveFunctionParameters,
    loop_flow: Option<&'a LoopFlowParameters>,
    optimized_cnecs: Vec<CnecId>,
    loop_flow_cnecs: Vec<CnecId>,
}

impl<'a> ObjectiveFunction<'a> {
    pub fn new(
        crac: &'a Crac,
        perimeter: &OptimizationPerimeter,
        params: &'a ObjectiveFunctionParameters,
        loop_flow: Option<&'a LoopFlowParameters>,
    ) -> Self {
        ObjectiveFunction {
            crac,
            params,
            loop_flow,
            optimized_cnecs: perimeter.optimized_cnecs.clone(),
            loop_flow_cnecs: perimeter.loop_flow_cnecs.clone(),
        }
    }

    /// Margin of one CNEC under the snapshot's flows, in the configured mode.
    pub fn margin(&self, cnec_id: CnecId, snapshot: &SensitivitySnapshot) -> f64 {
        let cnec = self.crac.flow_cnec(cnec_id);
        cnec.monitored_sides()
            .into_iter()
            .map(|side| {
                let margin = cnec.margin(snapshot.flow(cnec_id, side), side);
                match self.params.mode {
                    ObjectiveMode::MaxMinMargin => margin,
                    ObjectiveMode::MaxMinRelativeMargin if margin > 0.0 => {
                        let ptdf = snapshot
                            .ptdf_abs_sum(cnec_id, side)
                            .max(self.params.ptdf_sum_lower_bound);
                        margin / ptdf
                    }
                    ObjectiveMode::MaxMinRelativeMargin => margin,
                }
            })
            .fold(f64::INFINITY, f64::min)
    }

    fn loop_flow_excess(&self, cnec_id: CnecId, snapshot: &SensitivitySnapshot) -> f64 {
        let cnec = self.crac.flow_cnec(cnec_id);
        let Some(threshold) = cnec.loop_flow_threshold_mw else {
            return 0.0;
        };
        let acceptable = self
            .loop_flow
            .map(|p| p.acceptable_augmentation)
            .unwrap_or(0.0);
        cnec.monitored_sides()
            .into_iter()
            .map(|side| (snapshot.loop_flow(cnec_id, side).abs() - (threshold + acceptable)).max(0.0))
            .fold(0.0, f64::max)
    }

    /// Evaluates functional and virtual costs on a snapshot.
    pub fn evaluate(&self, snapshot: &SensitivitySnapshot) -> ObjectiveFunctionResult {
        let mut margins: Vec<(CnecId, f64)> = self
            .optimized_cnecs
            .iter()
            .map(|&id| (id, self.margin(id, snapshot)))
            .collect();
        margins.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let functional_cost = margins
            .first()
            .map(|&(_, margin)| -margin)
            .unwrap_or(0.0);
        let most_limiting = margins
            .iter()
            .take(MOST_LIMITING_ELEMENTS)
            .map(|&(id, _)| id)
            .collect();

        let mut virtual_costs = BTreeMap::new();
        if let Some(loop_flow) = self.loop_flow {
            let excess: f64 = self
                .loop_flow_cnecs
                .iter()
                .map(|&id| self.loop_flow_excess(id, snapshot))
                .sum();
            if excess > 0.0 {
                virtual_costs.insert(
                    LOOP_FLOW_VIRTUAL_COST.to_string(),
                    excess * loop_flow.violation_cost,
                );
            }
        }
        if snapshot.status() == SensitivityStatus::Fallback
            && self.params.sensitivity_fallback_cost > 0.0
        {
            virtual_costs.insert(
                SENSITIVITY_FALLBACK_VIRTUAL_COST.to_string(),
                self.params.sensitivity_fallback_cost,
            );
        }

        ObjectiveFunctionResult {
            functional_cost,
            virtual_costs,
            most_limiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perimeter::PerimeterBuilder;
    use rao_core::{FlowCnec, InstantKind, Side, State, Threshold, Unit};

    fn single_state_crac() -> (Crac, State) {
        let mut crac = Crac::new();
        let prev = crac.add_instant("preventive", InstantKind::Preventive);
        let basecase = State::preventive(prev);
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(0), "line-1", basecase)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
                .optimized(),
        );
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(1), "line-2", basecase)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 400.0))
                .optimized(),
        );
        (crac, basecase)
    }

    #[test]
    fn test_functional_cost_is_negated_worst_margin() {
        let (crac, _) = single_state_crac();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = ObjectiveFunctionParameters::default();
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, None);

        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, 450.0); // margin +50
        snapshot.set_flow(CnecId::new(1), Side::Left, 480.0); // margin -80

        let result = objective.evaluate(&snapshot);
        assert_eq!(result.functional_cost(), 80.0);
        assert_eq!(result.cost(), 80.0);
        assert_eq!(result.most_limiting_elements()[0], CnecId::new(1));
    }

    #[test]
    fn test_relative_margin_scales_positive_margins_only() {
        let (crac, _) = single_state_crac();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = ObjectiveFunctionParameters {
            mode: ObjectiveMode::MaxMinRelativeMargin,
            ..Default::default()
        };
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, None);

        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, 400.0); // margin +100
        snapshot.set_ptdf_abs_sum(CnecId::new(0), Side::Left, 0.5);
        snapshot.set_flow(CnecId::new(1), Side::Left, 450.0); // margin -50
        snapshot.set_ptdf_abs_sum(CnecId::new(1), Side::Left, 0.5);

        // Positive margin scaled to 200, negative one untouched.
        assert_eq!(objective.margin(CnecId::new(0), &snapshot), 200.0);
        assert_eq!(objective.margin(CnecId::new(1), &snapshot), -50.0);
    }

    #[test]
    fn test_ptdf_sum_floor_prevents_blowup() {
        let (crac, _) = single_state_crac();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = ObjectiveFunctionParameters {
            mode: ObjectiveMode::MaxMinRelativeMargin,
            ptdf_sum_lower_bound: 0.01,
            ..Default::default()
        };
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, None);

        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, 400.0); // margin +100
        snapshot.set_ptdf_abs_sum(CnecId::new(0), Side::Left, 1e-9);
        assert_eq!(objective.margin(CnecId::new(0), &snapshot), 100.0 / 0.01);
    }

    #[test]
    fn test_loop_flow_violation_is_a_virtual_cost() {
        let (mut crac, basecase) = single_state_crac();
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(2), "xborder", basecase)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 1000.0))
                .optimized()
                .with_operator("FR")
                .with_loop_flow_threshold(100.0),
        );
        let lf = LoopFlowParameters {
            violation_cost: 10.0,
            ..Default::default()
        };
        let perimeter = PerimeterBuilder::new(&crac)
            .with_loop_flow_filter(&lf)
            .preventive()
            .unwrap();
        let params = ObjectiveFunctionParameters::default();
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, Some(&lf));

        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, 0.0);
        snapshot.set_flow(CnecId::new(1), Side::Left, 0.0);
        snapshot.set_flow(CnecId::new(2), Side::Left, 200.0);
        snapshot.set_commercial_flow(CnecId::new(2), Side::Left, 50.0); // loop flow 150

        let result = objective.evaluate(&snapshot);
        assert_eq!(result.virtual_cost(LOOP_FLOW_VIRTUAL_COST), 500.0);
        assert_eq!(result.cost(), result.functional_cost() + 500.0);
    }

    #[test]
    fn test_fallback_penalty() {
        let (crac, _) = single_state_crac();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = ObjectiveFunctionParameters {
            sensitivity_fallback_cost: 42.0,
            ..Default::default()
        };
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, None);

        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, 0.0);
        snapshot.set_flow(CnecId::new(1), Side::Left, 0.0);
        snapshot.mark_fallback();

        let result = objective.evaluate(&snapshot);
        assert_eq!(result.virtual_cost(SENSITIVITY_FALLBACK_VIRTUAL_COST), 42.0);
    }
}
