//! Perimeter construction: which CNECs and remedial actions are in scope
//! when optimizing one state.
//!
//! Three perimeter shapes exist:
//! - **preventive**: the base case, plus every monitored state that has no
//!   dedicated downstream perimeter (those CNECs are folded in);
//! - **curative**: one post-contingency state, its own CNECs, and only the
//!   actions usable at exactly that state;
//! - **auto**: like curative but restricted to forced actions (nothing is
//!   searched or optimized there).
//!
//! A perimeter is read-only once built.

use crate::params::LoopFlowParameters;
use crate::sensitivity::SensitivitySnapshot;
use rao_core::{
    ActionId, CnecId, Crac, FlowCnec, InstantKind, RaoError, RaoResult, State, UsageMethod,
    UsageRule,
};
use std::collections::BTreeMap;

/// Shape of an optimization perimeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerimeterKind {
    Preventive,
    Curative,
    Auto,
}

/// The scoped subset of CNECs and remedial actions relevant to optimizing
/// one main state. Built fresh per state; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct OptimizationPerimeter {
    pub kind: PerimeterKind,
    pub main_state: State,
    /// All monitored states whose CNECs contribute to objective/constraints.
    pub monitored_states: Vec<State>,
    /// CNECs whose margin enters the objective.
    pub optimized_cnecs: Vec<CnecId>,
    /// CNECs constrained but not optimized (monitored-only).
    pub monitored_cnecs: Vec<CnecId>,
    /// Subset of optimized CNECs that are loop-flow constrained.
    pub loop_flow_cnecs: Vec<CnecId>,
    /// Discrete actions available for the combinatorial search.
    pub network_actions: Vec<ActionId>,
    /// Discrete actions applied unconditionally before any search.
    pub forced_network_actions: Vec<ActionId>,
    /// Continuous actions, keyed by the state at which their setpoint varies.
    pub range_actions_per_state: BTreeMap<State, Vec<ActionId>>,
}

impl OptimizationPerimeter {
    /// All CNECs in scope (optimized first, then monitored-only).
    pub fn all_cnecs(&self) -> Vec<CnecId> {
        let mut cnecs = self.optimized_cnecs.clone();
        cnecs.extend(self.monitored_cnecs.iter().copied());
        cnecs
    }

    /// All range actions over all optimized states, deduplicated.
    pub fn range_actions(&self) -> Vec<ActionId> {
        let mut actions: Vec<ActionId> = self
            .range_actions_per_state
            .values()
            .flatten()
            .copied()
            .collect();
        actions.sort();
        actions.dedup();
        actions
    }

    pub fn has_range_actions(&self) -> bool {
        self.range_actions_per_state.values().any(|v| !v.is_empty())
    }
}

/// Resolves a usage-rule set at a state, honoring flow-constraint triggers:
/// an `OnFlowConstraint` rule only fires if its CNEC is actually constrained
/// in the reference snapshot (when one is provided).
fn resolve_usage(
    rules: &[UsageRule],
    state: State,
    crac: &Crac,
    snapshot: Option<&SensitivitySnapshot>,
) -> UsageMethod {
    rules
        .iter()
        .map(|rule| {
            let method = rule.method_at(state);
            if method == UsageMethod::Undefined {
                return method;
            }
            match (rule.triggering_cnec(), snapshot) {
                (Some(cnec_id), Some(snapshot)) => {
                    let cnec = crac.flow_cnec(cnec_id);
                    if cnec.worst_margin(|side| snapshot.flow(cnec_id, side)) < 0.0 {
                        method
                    } else {
                        UsageMethod::Undefined
                    }
                }
                _ => method,
            }
        })
        .max()
        .unwrap_or(UsageMethod::Undefined)
}

/// True when any remedial action is usable (available or forced) at `state`.
pub fn state_has_remedial_actions(
    crac: &Crac,
    state: State,
    snapshot: Option<&SensitivitySnapshot>,
) -> bool {
    let usable = |rules: &[UsageRule]| {
        matches!(
            resolve_usage(rules, state, crac, snapshot),
            UsageMethod::Available | UsageMethod::Forced
        )
    };
    crac.network_actions().iter().any(|na| usable(&na.usage_rules))
        || crac.range_actions().iter().any(|ra| usable(&ra.usage_rules))
}

/// Builds [`OptimizationPerimeter`]s from the catalog.
pub struct PerimeterBuilder<'a> {
    crac: &'a Crac,
    loop_flow: Option<&'a LoopFlowParameters>,
    snapshot: Option<&'a SensitivitySnapshot>,
}

impl<'a> PerimeterBuilder<'a> {
    pub fn new(crac: &'a Crac) -> Self {
        PerimeterBuilder {
            crac,
            loop_flow: None,
            snapshot: None,
        }
    }

    /// Enables loop-flow constraining, scoped to the configured countries.
    pub fn with_loop_flow_filter(mut self, params: &'a LoopFlowParameters) -> Self {
        self.loop_flow = Some(params);
        self
    }

    /// Provides the reference flows used to resolve flow-constraint-triggered
    /// usage rules.
    pub fn with_reference(mut self, snapshot: &'a SensitivitySnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    fn is_loop_flow_in_scope(&self, cnec: &FlowCnec) -> bool {
        if !cnec.is_loop_flow_constrained() {
            return false;
        }
        match self.loop_flow {
            None => false,
            Some(params) => {
                params.countries.is_empty()
                    || cnec
                        .operator
                        .as_ref()
                        .is_some_and(|op| params.countries.iter().any(|c| c == op))
            }
        }
    }

    fn split_actions(&self, state: State) -> (Vec<ActionId>, Vec<ActionId>) {
        let mut available = Vec::new();
        let mut forced = Vec::new();
        for na in self.crac.network_actions() {
            match resolve_usage(&na.usage_rules, state, self.crac, self.snapshot) {
                UsageMethod::Available => available.push(na.id),
                UsageMethod::Forced => forced.push(na.id),
                _ => {}
            }
        }
        (available, forced)
    }

    fn range_actions_at(&self, state: State) -> Vec<ActionId> {
        self.crac
            .range_actions()
            .iter()
            .filter(|ra| {
                matches!(
                    resolve_usage(&ra.usage_rules, state, self.crac, self.snapshot),
                    UsageMethod::Available | UsageMethod::Forced
                )
            })
            .map(|ra| ra.id)
            .collect()
    }

    fn classify_cnecs(&self, states: &[State]) -> (Vec<CnecId>, Vec<CnecId>, Vec<CnecId>) {
        let mut optimized = Vec::new();
        let mut monitored = Vec::new();
        let mut loop_flow = Vec::new();
        for cnec in self.crac.flow_cnecs() {
            if !states.contains(&cnec.state) {
                continue;
            }
            if cnec.is_optimized {
                optimized.push(cnec.id);
                if self.is_loop_flow_in_scope(cnec) {
                    loop_flow.push(cnec.id);
                }
            } else if cnec.is_monitored {
                monitored.push(cnec.id);
            }
        }
        (optimized, monitored, loop_flow)
    }

    /// Builds the preventive (base-case) perimeter.
    ///
    /// Every monitored state is in scope except those with a dedicated
    /// downstream perimeter (a state where some remedial action is usable);
    /// the CNECs of action-less curative states are folded in here.
    pub fn preventive(&self) -> RaoResult<OptimizationPerimeter> {
        let preventive_instant = self.crac.preventive_instant()?;
        let main_state = State::preventive(preventive_instant.id);

        let monitored_states: Vec<State> = self
            .crac
            .states()
            .into_iter()
            .filter(|s| {
                let kind = self.crac.instant(s.instant).kind;
                match kind {
                    InstantKind::Preventive | InstantKind::Outage => true,
                    // Carved out only if a dedicated perimeter will exist.
                    InstantKind::Auto | InstantKind::Curative => {
                        !state_has_remedial_actions(self.crac, *s, self.snapshot)
                    }
                }
            })
            .collect();

        let (optimized, monitored, loop_flow) = self.classify_cnecs(&monitored_states);
        let (available, forced) = self.split_actions(main_state);
        let mut range_actions_per_state = BTreeMap::new();
        let preventive_ranges = self.range_actions_at(main_state);
        if !preventive_ranges.is_empty() {
            range_actions_per_state.insert(main_state, preventive_ranges);
        }

        Ok(OptimizationPerimeter {
            kind: PerimeterKind::Preventive,
            main_state,
            monitored_states,
            optimized_cnecs: optimized,
            monitored_cnecs: monitored,
            loop_flow_cnecs: loop_flow,
            network_actions: available,
            forced_network_actions: forced,
            range_actions_per_state,
        })
    }

    /// Builds a curative perimeter for one post-contingency state.
    ///
    /// Only actions usable at exactly that state are optimizable and only the
    /// state's own CNECs are monitored. Building a curative perimeter on a
    /// preventive state is an [`RaoError::InvalidPerimeter`].
    pub fn curative(&self, state: State) -> RaoResult<OptimizationPerimeter> {
        if state.is_preventive() {
            return Err(RaoError::InvalidPerimeter(
                "cannot build a curative perimeter on the preventive state".into(),
            ));
        }
        let kind = self.crac.instant(state.instant).kind;
        if !matches!(kind, InstantKind::Curative) {
            return Err(RaoError::InvalidPerimeter(format!(
                "cannot build a curative perimeter on a {kind:?} instant"
            )));
        }

        let monitored_states = vec![state];
        let (optimized, monitored, loop_flow) = self.classify_cnecs(&monitored_states);
        let (available, forced) = self.split_actions(state);
        let mut range_actions_per_state = BTreeMap::new();
        let ranges = self.range_actions_at(state);
        if !ranges.is_empty() {
            range_actions_per_state.insert(state, ranges);
        }

        Ok(OptimizationPerimeter {
            kind: PerimeterKind::Curative,
            main_state: state,
            monitored_states,
            optimized_cnecs: optimized,
            monitored_cnecs: monitored,
            loop_flow_cnecs: loop_flow,
            network_actions: available,
            forced_network_actions: forced,
            range_actions_per_state,
        })
    }

    /// Builds an auto perimeter: only forced actions, nothing searched.
    pub fn auto(&self, state: State) -> RaoResult<OptimizationPerimeter> {
        let kind = self.crac.instant(state.instant).kind;
        if kind != InstantKind::Auto {
            return Err(RaoError::InvalidPerimeter(format!(
                "cannot build an auto perimeter on a {kind:?} instant"
            )));
        }

        let monitored_states = vec![state];
        let (optimized, monitored, loop_flow) = self.classify_cnecs(&monitored_states);
        let (_, forced) = self.split_actions(state);

        Ok(OptimizationPerimeter {
            kind: PerimeterKind::Auto,
            main_state: state,
            monitored_states,
            optimized_cnecs: optimized,
            monitored_cnecs: monitored,
            loop_flow_cnecs: loop_flow,
            network_actions: Vec::new(),
            forced_network_actions: forced,
            range_actions_per_state: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{
        CnecId, FlowCnec, InstantKind, NetworkAction, Side, Threshold, Unit, UsageMethod, UsageRule,
    };

    fn catalog() -> (Crac, State, State) {
        let mut crac = Crac::new();
        let prev = crac.add_instant("preventive", InstantKind::Preventive);
        let outage = crac.add_instant("outage", InstantKind::Outage);
        let cur = crac.add_instant("curative", InstantKind::Curative);
        let co1 = crac.add_contingency("co1");
        let co2 = crac.add_contingency("co2");

        let basecase = State::preventive(prev);
        let cur1 = State::post_contingency(cur, co1);
        let cur2 = State::post_contingency(cur, co2);

        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(0), "line-base", basecase)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
                .optimized(),
        );
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(1), "line-outage", State::post_contingency(outage, co1))
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 550.0))
                .optimized(),
        );
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(2), "line-cur1", cur1)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 600.0))
                .optimized(),
        );
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(3), "line-cur2", cur2)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 600.0))
                .optimized(),
        );

        // One topology action usable in preventive, one at curative state 1.
        crac.add_network_action(
            NetworkAction::new(rao_core::ActionId::new(0), "open-base").with_usage_rule(
                UsageRule::free_to_use(UsageMethod::Available, prev),
            ),
        );
        crac.add_network_action(
            NetworkAction::new(rao_core::ActionId::new(1), "open-cur1")
                .with_usage_rule(UsageRule::on_state(UsageMethod::Available, cur1)),
        );

        (crac, basecase, cur1)
    }

    #[test]
    fn test_preventive_perimeter_folds_actionless_states() {
        let (crac, basecase, _) = catalog();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();

        assert_eq!(perimeter.kind, PerimeterKind::Preventive);
        assert_eq!(perimeter.main_state, basecase);
        // cur2 has no action: folded into the preventive perimeter.
        // cur1 has a dedicated action: carved out.
        assert_eq!(
            perimeter.optimized_cnecs,
            vec![CnecId::new(0), CnecId::new(1), CnecId::new(3)]
        );
        assert_eq!(perimeter.network_actions, vec![rao_core::ActionId::new(0)]);
    }

    #[test]
    fn test_curative_perimeter_scopes_to_state() {
        let (crac, _, cur1) = catalog();
        let perimeter = PerimeterBuilder::new(&crac).curative(cur1).unwrap();

        assert_eq!(perimeter.kind, PerimeterKind::Curative);
        assert_eq!(perimeter.optimized_cnecs, vec![CnecId::new(2)]);
        assert_eq!(perimeter.network_actions, vec![rao_core::ActionId::new(1)]);
    }

    #[test]
    fn test_curative_on_preventive_state_is_error() {
        let (crac, basecase, _) = catalog();
        let err = PerimeterBuilder::new(&crac).curative(basecase).unwrap_err();
        assert!(matches!(err, RaoError::InvalidPerimeter(_)));
    }

    #[test]
    fn test_auto_on_non_auto_state_is_error() {
        let (crac, _, cur1) = catalog();
        let err = PerimeterBuilder::new(&crac).auto(cur1).unwrap_err();
        assert!(matches!(err, RaoError::InvalidPerimeter(_)));
    }

    #[test]
    fn test_loop_flow_country_filter() {
        let (mut crac, _, _) = catalog();
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(4), "xborder", State::preventive(rao_core::InstantId::new(0)))
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 400.0))
                .optimized()
                .with_operator("FR")
                .with_loop_flow_threshold(100.0),
        );

        // No loop-flow parameters: nothing constrained.
        let p = PerimeterBuilder::new(&crac).preventive().unwrap();
        assert!(p.loop_flow_cnecs.is_empty());

        // Country in filter: constrained.
        let mut lf = LoopFlowParameters::default();
        lf.countries = vec!["FR".into()];
        let p = PerimeterBuilder::new(&crac)
            .with_loop_flow_filter(&lf)
            .preventive()
            .unwrap();
        assert_eq!(p.loop_flow_cnecs, vec![CnecId::new(4)]);

        // Country not in filter: excluded.
        lf.countries = vec!["DE".into()];
        let p = PerimeterBuilder::new(&crac)
            .with_loop_flow_filter(&lf)
            .preventive()
            .unwrap();
        assert!(p.loop_flow_cnecs.is_empty());
    }

    #[test]
    fn test_flow_constraint_trigger_requires_violation() {
        let (mut crac, basecase, _) = catalog();
        // Action triggered only while CNEC 0 is constrained.
        crac.add_network_action(
            NetworkAction::new(rao_core::ActionId::new(2), "triggered").with_usage_rule(
                UsageRule::on_flow_constraint(
                    UsageMethod::Available,
                    basecase.instant,
                    CnecId::new(0),
                ),
            ),
        );

        let mut relaxed = SensitivitySnapshot::new();
        relaxed.set_flow(CnecId::new(0), Side::Left, 400.0); // margin +100
        let p = PerimeterBuilder::new(&crac)
            .with_reference(&relaxed)
            .preventive()
            .unwrap();
        assert!(!p.network_actions.contains(&rao_core::ActionId::new(2)));

        let mut violated = SensitivitySnapshot::new();
        violated.set_flow(CnecId::new(0), Side::Left, 550.0); // margin -50
        let p = PerimeterBuilder::new(&crac)
            .with_reference(&violated)
            .preventive()
            .unwrap();
        assert!(p.network_actions.contains(&rao_core::ActionId::new(2)));
    }
}
