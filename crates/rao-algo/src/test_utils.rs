//! Mock grid for tests: a linear flow model behind the [`NetworkHandle`] and
//! [`SensitivityEngine`] seams.
//!
//! Flows respond exactly linearly to actions, so tests can predict every
//! margin in closed form:
//!
//! ```text
//! flow(cnec, side) = base
//!                  + Σ impact(action)            for applied network actions
//!                  + Σ sens(ra) * (sp - sp0)     for range-action setpoints
//! ```

use crate::sensitivity::{NetworkHandle, SensitivityEngine, SensitivitySnapshot};
use rao_core::{
    ActionId, CnecId, ContingencyId, Crac, NetworkAction, RangeAction, RaoError, RaoResult, Side,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Configurable linear grid model. Configure, then take handles and engines
/// from it; they snapshot the configuration at creation.
#[derive(Debug, Clone, Default)]
pub struct MockGrid {
    base_flows: HashMap<(CnecId, Side), f64>,
    action_impacts: HashMap<ActionId, Vec<(CnecId, Side, f64)>>,
    sensitivities: HashMap<(CnecId, Side, ActionId), f64>,
    initial_setpoints: HashMap<ActionId, f64>,
    commercial_flows: HashMap<(CnecId, Side), f64>,
    ptdf_abs_sums: HashMap<(CnecId, Side), f64>,
    failed_contingencies: HashSet<ContingencyId>,
    fallback: bool,
}

impl MockGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_base_flow(&mut self, cnec: CnecId, side: Side, flow_mw: f64) {
        self.base_flows.insert((cnec, side), flow_mw);
    }

    /// Additive flow change when the network action is applied.
    pub fn set_action_impact(&mut self, action: ActionId, cnec: CnecId, side: Side, delta_mw: f64) {
        self.action_impacts
            .entry(action)
            .or_default()
            .push((cnec, side, delta_mw));
    }

    /// Flow sensitivity to a range action's setpoint (MW per unit).
    pub fn set_sensitivity(&mut self, cnec: CnecId, side: Side, action: ActionId, value: f64) {
        self.sensitivities.insert((cnec, side, action), value);
    }

    pub fn set_initial_setpoint(&mut self, action: ActionId, setpoint: f64) {
        self.initial_setpoints.insert(action, setpoint);
    }

    pub fn set_commercial_flow(&mut self, cnec: CnecId, side: Side, flow_mw: f64) {
        self.commercial_flows.insert((cnec, side), flow_mw);
    }

    pub fn set_ptdf_abs_sum(&mut self, cnec: CnecId, side: Side, value: f64) {
        self.ptdf_abs_sums.insert((cnec, side), value);
    }

    /// Every computation will report this contingency as failed.
    pub fn fail_contingency(&mut self, contingency: ContingencyId) {
        self.failed_contingencies.insert(contingency);
    }

    pub fn mark_fallback(&mut self) {
        self.fallback = true;
    }

    /// A pristine working copy of this grid.
    pub fn handle(&self) -> MockNetworkHandle {
        MockNetworkHandle {
            grid: Arc::new(self.clone()),
            applied: Vec::new(),
            setpoints: HashMap::new(),
        }
    }

    pub fn engine(&self) -> MockEngine {
        MockEngine {
            grid: Arc::new(self.clone()),
            calls: AtomicUsize::new(0),
            fail_from_call: None,
        }
    }

    /// An engine whose computations start failing at the given 1-based call
    /// number, for exercising degraded paths.
    pub fn failing_engine(&self, fail_from_call: usize) -> MockEngine {
        MockEngine {
            grid: Arc::new(self.clone()),
            calls: AtomicUsize::new(0),
            fail_from_call: Some(fail_from_call),
        }
    }

    /// Snapshot of the unmodified grid over the whole catalog.
    pub fn snapshot(&self, crac: &Crac) -> SensitivitySnapshot {
        let cnecs: Vec<CnecId> = crac.flow_cnecs().iter().map(|c| c.id).collect();
        let range_actions: Vec<ActionId> = crac.range_actions().iter().map(|ra| ra.id).collect();
        self.engine()
            .compute(&self.handle(), crac, &cnecs, &range_actions)
            .expect("mock computation on pristine grid cannot fail")
    }
}

/// Working copy: tracks applied actions and setpoints, nothing else.
#[derive(Debug, Clone)]
pub struct MockNetworkHandle {
    grid: Arc<MockGrid>,
    applied: Vec<ActionId>,
    setpoints: HashMap<ActionId, f64>,
}

impl NetworkHandle for MockNetworkHandle {
    fn apply_network_action(&mut self, action: &NetworkAction) -> RaoResult<()> {
        if !self.applied.contains(&action.id) {
            self.applied.push(action.id);
        }
        Ok(())
    }

    fn apply_setpoint(&mut self, action: &RangeAction, setpoint: f64) -> RaoResult<()> {
        self.setpoints.insert(action.id, setpoint);
        Ok(())
    }

    fn fork(&self) -> Box<dyn NetworkHandle> {
        Box::new(self.clone())
    }

    fn reset(&mut self) {
        self.applied.clear();
        self.setpoints.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Computes snapshots from the linear model.
pub struct MockEngine {
    grid: Arc<MockGrid>,
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
}

impl MockEngine {
    fn flow(&self, handle: &MockNetworkHandle, cnec: CnecId, side: Side) -> f64 {
        let mut flow = self
            .grid
            .base_flows
            .get(&(cnec, side))
            .copied()
            .unwrap_or(0.0);
        for action in &handle.applied {
            if let Some(impacts) = self.grid.action_impacts.get(action) {
                for &(c, s, delta) in impacts {
                    if c == cnec && s == side {
                        flow += delta;
                    }
                }
            }
        }
        for (&(c, s, action), &sens) in &self.grid.sensitivities {
            if c == cnec && s == side {
                let initial = self
                    .grid
                    .initial_setpoints
                    .get(&action)
                    .copied()
                    .unwrap_or(0.0);
                let setpoint = handle.setpoints.get(&action).copied().unwrap_or(initial);
                flow += sens * (setpoint - initial);
            }
        }
        flow
    }
}

impl SensitivityEngine for MockEngine {
    fn compute(
        &self,
        handle: &dyn NetworkHandle,
        _crac: &Crac,
        cnecs: &[CnecId],
        range_actions: &[ActionId],
    ) -> RaoResult<SensitivitySnapshot> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fail_from) = self.fail_from_call {
            if call >= fail_from {
                return Err(RaoError::SensitivityComputation(format!(
                    "mock failure on call {call}"
                )));
            }
        }
        let handle = handle
            .as_any()
            .downcast_ref::<MockNetworkHandle>()
            .ok_or_else(|| RaoError::SensitivityComputation("foreign handle type".into()))?;

        let mut snapshot = SensitivitySnapshot::new();
        for &cnec in cnecs {
            for side in Side::BOTH {
                snapshot.set_flow(cnec, side, self.flow(handle, cnec, side));
                for &action in range_actions {
                    if let Some(&sens) = self.grid.sensitivities.get(&(cnec, side, action)) {
                        snapshot.set_sensitivity(cnec, side, action, sens);
                    }
                }
                if let Some(&cf) = self.grid.commercial_flows.get(&(cnec, side)) {
                    snapshot.set_commercial_flow(cnec, side, cf);
                }
                if let Some(&ptdf) = self.grid.ptdf_abs_sums.get(&(cnec, side)) {
                    snapshot.set_ptdf_abs_sum(cnec, side, ptdf);
                }
            }
        }
        for &contingency in &self.grid.failed_contingencies {
            snapshot.mark_contingency_failed(contingency);
        }
        if self.grid.fallback {
            snapshot.mark_fallback();
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_responds_to_actions_and_setpoints() {
        let mut grid = MockGrid::new();
        grid.set_base_flow(CnecId::new(0), Side::Left, 100.0);
        grid.set_action_impact(ActionId::new(0), CnecId::new(0), Side::Left, -30.0);
        grid.set_sensitivity(CnecId::new(0), Side::Left, ActionId::new(1), 5.0);
        grid.set_initial_setpoint(ActionId::new(1), 2.0);

        let engine = grid.engine();
        let mut handle = grid.handle();
        handle
            .apply_network_action(&NetworkAction::new(ActionId::new(0), "na"))
            .unwrap();
        handle
            .apply_setpoint(
                &RangeAction::new(ActionId::new(1), "ra", rao_core::RangeActionKind::Hvdc),
                4.0,
            )
            .unwrap();

        let crac = Crac::new();
        let snapshot = engine
            .compute(&handle, &crac, &[CnecId::new(0)], &[ActionId::new(1)])
            .unwrap();
        // 100 - 30 + 5 * (4 - 2)
        assert_eq!(snapshot.flow(CnecId::new(0), Side::Left), 80.0);
        assert_eq!(
            snapshot.sensitivity(CnecId::new(0), Side::Left, ActionId::new(1)),
            5.0
        );
    }

    #[test]
    fn test_reset_restores_pristine_state() {
        let mut grid = MockGrid::new();
        grid.set_base_flow(CnecId::new(0), Side::Left, 100.0);
        grid.set_action_impact(ActionId::new(0), CnecId::new(0), Side::Left, -30.0);

        let engine = grid.engine();
        let mut handle = grid.handle();
        handle
            .apply_network_action(&NetworkAction::new(ActionId::new(0), "na"))
            .unwrap();
        handle.reset();

        let crac = Crac::new();
        let snapshot = engine
            .compute(&handle, &crac, &[CnecId::new(0)], &[])
            .unwrap();
        assert_eq!(snapshot.flow(CnecId::new(0), Side::Left), 100.0);
    }

    #[test]
    fn test_failing_engine_fails_from_configured_call() {
        let grid = MockGrid::new();
        let engine = grid.failing_engine(2);
        let handle = grid.handle();
        let crac = Crac::new();
        assert!(engine.compute(&handle, &crac, &[], &[]).is_ok());
        assert!(engine.compute(&handle, &crac, &[], &[]).is_err());
        assert!(engine.compute(&handle, &crac, &[], &[]).is_err());
    }
}
