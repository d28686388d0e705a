//! Result aggregation across perimeters.
//!
//! Each optimized state records what was activated and at what cost; states
//! that never got a dedicated perimeter inherit from the latest optimized
//! state upstream on their timeline branch (same contingency, earlier
//! instant, with the preventive state as the common root). Once frozen the
//! aggregate rejects further writes, so a published result can never drift.

use crate::objective::ObjectiveFunctionResult;
use crate::sensitivity::SensitivitySnapshot;
use rao_core::{ActionId, RaoError, RaoResult, State};
use std::collections::{BTreeMap, HashMap};

/// Quality of the computation behind one state's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationStatus {
    /// Nominal.
    Default,
    /// The sensitivity computation behind this state failed.
    Failure,
    /// Never optimized in a dedicated perimeter; inherits upstream decisions.
    Skipped,
}

/// Reference point before any perimeter ran: the unmodified network.
#[derive(Debug, Clone)]
pub struct PrePerimeterResult {
    pub snapshot: SensitivitySnapshot,
    /// Setpoint of every range action on the unmodified network.
    pub setpoints: HashMap<ActionId, f64>,
}

/// Outcome of one perimeter, keyed by its main state.
#[derive(Debug, Clone)]
pub struct StateOptimizationResult {
    pub status: ComputationStatus,
    pub activated_network_actions: Vec<ActionId>,
    pub setpoints: HashMap<ActionId, f64>,
    pub objective: ObjectiveFunctionResult,
}

impl StateOptimizationResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}

/// The full optimization outcome, written once per perimeter then frozen.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    initial: PrePerimeterResult,
    per_state: BTreeMap<State, StateOptimizationResult>,
    /// True once the search hit its time budget somewhere; the result is
    /// still valid, just possibly not fully explored.
    time_budget_exhausted: bool,
    frozen: bool,
}

impl AggregatedResult {
    pub fn new(initial: PrePerimeterResult) -> Self {
        AggregatedResult {
            initial,
            per_state: BTreeMap::new(),
            time_budget_exhausted: false,
            frozen: false,
        }
    }

    pub fn initial(&self) -> &PrePerimeterResult {
        &self.initial
    }

    fn check_mutable(&self) -> RaoResult<()> {
        if self.frozen {
            return Err(RaoError::ImmutableResult(
                "result is frozen, no further state may be recorded".into(),
            ));
        }
        Ok(())
    }

    pub fn record_state_result(
        &mut self,
        state: State,
        result: StateOptimizationResult,
    ) -> RaoResult<()> {
        self.check_mutable()?;
        self.per_state.insert(state, result);
        Ok(())
    }

    pub fn mark_time_budget_exhausted(&mut self) -> RaoResult<()> {
        self.check_mutable()?;
        self.time_budget_exhausted = true;
        Ok(())
    }

    /// Seals the result. Idempotent; all `record_*` calls fail afterwards.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn time_budget_exhausted(&self) -> bool {
        self.time_budget_exhausted
    }

    pub fn optimized_states(&self) -> impl Iterator<Item = State> + '_ {
        self.per_state.keys().copied()
    }

    pub fn state_result(&self, state: State) -> Option<&StateOptimizationResult> {
        self.per_state.get(&state)
    }

    /// The recorded state `state` inherits from when it has no result of its
    /// own: the latest optimized state at or before it on the same timeline
    /// branch, preferring the same contingency over the preventive root.
    fn inherited_from(&self, state: State) -> Option<State> {
        let mut fallback: Option<State> = None;
        let mut same_branch: Option<State> = None;
        for &recorded in self.per_state.keys() {
            if recorded.instant > state.instant {
                break;
            }
            if recorded.is_preventive() {
                fallback = Some(recorded);
            } else if recorded.contingency == state.contingency {
                same_branch = Some(recorded);
            }
        }
        same_branch.or(fallback)
    }

    pub fn status_of(&self, state: State) -> ComputationStatus {
        match self.per_state.get(&state) {
            Some(result) => result.status,
            None => ComputationStatus::Skipped,
        }
    }

    /// Network actions effective at `state`, inherited when not optimized.
    pub fn activated_network_actions(&self, state: State) -> Vec<ActionId> {
        let source = if self.per_state.contains_key(&state) {
            Some(state)
        } else {
            self.inherited_from(state)
        };
        source
            .and_then(|s| self.per_state.get(&s))
            .map(|r| r.activated_network_actions.clone())
            .unwrap_or_default()
    }

    /// Setpoint of a range action as seen from `state`: the state's own
    /// decision, else the inherited one, else the pre-optimization value.
    pub fn setpoint(&self, state: State, action: ActionId) -> f64 {
        let source = if self.per_state.contains_key(&state) {
            Some(state)
        } else {
            self.inherited_from(state)
        };
        if let Some(result) = source.and_then(|s| self.per_state.get(&s)) {
            if let Some(&setpoint) = result.setpoints.get(&action) {
                return setpoint;
            }
        }
        self.initial.setpoints.get(&action).copied().unwrap_or(0.0)
    }

    pub fn functional_cost(&self, state: State) -> Option<f64> {
        self.per_state
            .get(&state)
            .map(|r| r.objective.functional_cost())
    }

    pub fn total_cost(&self, state: State) -> Option<f64> {
        self.per_state.get(&state).map(|r| r.cost())
    }

    /// Worst total cost over all optimized states, the figure a dispatcher
    /// compares runs by.
    pub fn overall_cost(&self) -> Option<f64> {
        self.per_state
            .values()
            .map(|r| r.cost())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    pub fn has_failures(&self) -> bool {
        self.per_state
            .values()
            .any(|r| r.status == ComputationStatus::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ObjectiveFunction;
    use crate::params::ObjectiveFunctionParameters;
    use crate::perimeter::PerimeterBuilder;
    use rao_core::{
        CnecId, ContingencyId, Crac, FlowCnec, InstantId, InstantKind, Side, Threshold, Unit,
    };

    fn objective_result(crac: &Crac, cost_flow: f64) -> ObjectiveFunctionResult {
        let perimeter = PerimeterBuilder::new(crac).preventive().unwrap();
        let params = ObjectiveFunctionParameters::default();
        let objective = ObjectiveFunction::new(crac, &perimeter, &params, None);
        let mut snapshot = SensitivitySnapshot::new();
        snapshot.set_flow(CnecId::new(0), Side::Left, cost_flow);
        objective.evaluate(&snapshot)
    }

    fn simple_crac() -> Crac {
        let mut crac = Crac::new();
        let prev = crac.add_instant("preventive", InstantKind::Preventive);
        crac.add_instant("curative", InstantKind::Curative);
        crac.add_contingency("co1");
        crac.add_contingency("co2");
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(0), "line", State::preventive(prev))
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 100.0))
                .optimized(),
        );
        crac
    }

    fn state_result(
        crac: &Crac,
        actions: Vec<ActionId>,
        setpoints: HashMap<ActionId, f64>,
    ) -> StateOptimizationResult {
        StateOptimizationResult {
            status: ComputationStatus::Default,
            activated_network_actions: actions,
            setpoints,
            objective: objective_result(crac, 50.0),
        }
    }

    #[test]
    fn test_frozen_result_rejects_writes() {
        let crac = simple_crac();
        let mut result = AggregatedResult::new(PrePerimeterResult {
            snapshot: SensitivitySnapshot::new(),
            setpoints: HashMap::new(),
        });
        let preventive = State::preventive(InstantId::new(0));
        result
            .record_state_result(preventive, state_result(&crac, vec![], HashMap::new()))
            .unwrap();
        result.freeze();

        let err = result
            .record_state_result(preventive, state_result(&crac, vec![], HashMap::new()))
            .unwrap_err();
        assert!(matches!(err, RaoError::ImmutableResult(_)));
        assert!(result.mark_time_budget_exhausted().is_err());
    }

    #[test]
    fn test_skipped_state_inherits_from_preventive() {
        let crac = simple_crac();
        let mut result = AggregatedResult::new(PrePerimeterResult {
            snapshot: SensitivitySnapshot::new(),
            setpoints: HashMap::from([(ActionId::new(7), 5.0)]),
        });
        let preventive = State::preventive(InstantId::new(0));
        result
            .record_state_result(
                preventive,
                state_result(
                    &crac,
                    vec![ActionId::new(0)],
                    HashMap::from([(ActionId::new(7), 12.0)]),
                ),
            )
            .unwrap();
        result.freeze();

        let skipped = State::post_contingency(InstantId::new(1), ContingencyId::new(1));
        assert_eq!(result.status_of(skipped), ComputationStatus::Skipped);
        assert_eq!(
            result.activated_network_actions(skipped),
            vec![ActionId::new(0)]
        );
        assert_eq!(result.setpoint(skipped, ActionId::new(7)), 12.0);
    }

    #[test]
    fn test_inheritance_prefers_same_contingency() {
        let crac = simple_crac();
        let mut result = AggregatedResult::new(PrePerimeterResult {
            snapshot: SensitivitySnapshot::new(),
            setpoints: HashMap::new(),
        });
        let preventive = State::preventive(InstantId::new(0));
        let curative_co1 = State::post_contingency(InstantId::new(1), ContingencyId::new(0));
        result
            .record_state_result(
                preventive,
                state_result(&crac, vec![ActionId::new(0)], HashMap::new()),
            )
            .unwrap();
        result
            .record_state_result(
                curative_co1,
                state_result(&crac, vec![ActionId::new(1)], HashMap::new()),
            )
            .unwrap();
        result.freeze();

        // A later state on co1 inherits the curative decision, not the
        // preventive one; a state on co2 falls back to preventive.
        let later_co1 = State::post_contingency(InstantId::new(1), ContingencyId::new(0));
        assert_eq!(
            result.activated_network_actions(later_co1),
            vec![ActionId::new(1)]
        );
        let co2 = State::post_contingency(InstantId::new(1), ContingencyId::new(1));
        assert_eq!(
            result.activated_network_actions(co2),
            vec![ActionId::new(0)]
        );
    }

    #[test]
    fn test_unknown_action_setpoint_falls_back_to_initial() {
        let mut result = AggregatedResult::new(PrePerimeterResult {
            snapshot: SensitivitySnapshot::new(),
            setpoints: HashMap::from([(ActionId::new(3), -2.5)]),
        });
        result.freeze();
        let state = State::preventive(InstantId::new(0));
        assert_eq!(result.setpoint(state, ActionId::new(3)), -2.5);
        assert_eq!(result.setpoint(state, ActionId::new(9)), 0.0);
    }
}
