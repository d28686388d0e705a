//! Seams to the external network model and sensitivity/flow engine.
//!
//! The engine never computes power flows itself: it talks to a
//! [`SensitivityEngine`] through a [`NetworkHandle`], a working copy of the
//! network whose mutations stay confined to that copy. Handles are forked
//! once into a bounded pool (see [`crate::pool`]) and reset between leaf
//! evaluations.
//!
//! A [`SensitivitySnapshot`] is the linearization point of one evaluation:
//! reference flows and flow-per-setpoint sensitivities for every monitored
//! element, plus a per-contingency computation status so that one failing
//! contingency never poisons the others.

use rao_core::{ActionId, CnecId, ContingencyId, Crac, NetworkAction, RangeAction, RaoResult, Side, State};
use std::any::Any;
use std::collections::{HashMap, HashSet};

/// Outcome quality of one systematic sensitivity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensitivityStatus {
    /// Nominal computation.
    Default,
    /// Degraded (e.g. fallback parameters); usable but penalized.
    Fallback,
    /// Computation failed; dependent results must be marked FAILURE.
    Failure,
}

/// A working copy of the network model.
///
/// Side effects of `apply_*` are confined to this handle. `fork` produces an
/// independent copy (expensive; done once per pool slot), `reset` restores
/// the pristine pre-optimization variant (cheap; done per evaluation).
pub trait NetworkHandle: Send + Sync {
    fn apply_network_action(&mut self, action: &NetworkAction) -> RaoResult<()>;

    fn apply_setpoint(&mut self, action: &RangeAction, setpoint: f64) -> RaoResult<()>;

    fn fork(&self) -> Box<dyn NetworkHandle>;

    fn reset(&mut self);

    /// Escape hatch for engines that need their concrete handle type back.
    fn as_any(&self) -> &dyn Any;
}

/// External sensitivity/flow computation.
///
/// Implementations receive a handle they (transitively) forked, so
/// downcasting through [`NetworkHandle::as_any`] is legitimate.
pub trait SensitivityEngine: Send + Sync {
    /// Compute reference flows and sensitivities for the given CNECs with
    /// respect to the given range actions, on the network as currently
    /// represented by `handle`.
    ///
    /// A per-contingency failure is reported inside the snapshot; an `Err` is
    /// reserved for computations that produced nothing usable at all.
    fn compute(
        &self,
        handle: &dyn NetworkHandle,
        crac: &Crac,
        cnecs: &[CnecId],
        range_actions: &[ActionId],
    ) -> RaoResult<SensitivitySnapshot>;
}

/// Immutable result of one systematic sensitivity computation.
#[derive(Debug, Clone, Default)]
pub struct SensitivitySnapshot {
    flows: HashMap<(CnecId, Side), f64>,
    sensitivities: HashMap<(CnecId, Side, ActionId), f64>,
    /// Commercial (exchange-driven) flow component for loop-flow CNECs.
    commercial_flows: HashMap<(CnecId, Side), f64>,
    /// Sum of absolute zone-to-zone PTDFs, for relative margins.
    ptdf_abs_sums: HashMap<(CnecId, Side), f64>,
    failed_contingencies: HashSet<ContingencyId>,
    fallback: bool,
}

impl SensitivitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_flow(&mut self, cnec: CnecId, side: Side, flow_mw: f64) {
        self.flows.insert((cnec, side), flow_mw);
    }

    pub fn set_sensitivity(&mut self, cnec: CnecId, side: Side, action: ActionId, value: f64) {
        self.sensitivities.insert((cnec, side, action), value);
    }

    pub fn set_commercial_flow(&mut self, cnec: CnecId, side: Side, flow_mw: f64) {
        self.commercial_flows.insert((cnec, side), flow_mw);
    }

    pub fn set_ptdf_abs_sum(&mut self, cnec: CnecId, side: Side, value: f64) {
        self.ptdf_abs_sums.insert((cnec, side), value);
    }

    pub fn mark_contingency_failed(&mut self, contingency: ContingencyId) {
        self.failed_contingencies.insert(contingency);
    }

    pub fn mark_fallback(&mut self) {
        self.fallback = true;
    }

    pub fn flow(&self, cnec: CnecId, side: Side) -> f64 {
        self.flows.get(&(cnec, side)).copied().unwrap_or(0.0)
    }

    pub fn sensitivity(&self, cnec: CnecId, side: Side, action: ActionId) -> f64 {
        self.sensitivities
            .get(&(cnec, side, action))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn commercial_flow(&self, cnec: CnecId, side: Side) -> f64 {
        self.commercial_flows
            .get(&(cnec, side))
            .copied()
            .unwrap_or(0.0)
    }

    /// Loop flow = total flow minus commercial flow.
    pub fn loop_flow(&self, cnec: CnecId, side: Side) -> f64 {
        self.flow(cnec, side) - self.commercial_flow(cnec, side)
    }

    pub fn ptdf_abs_sum(&self, cnec: CnecId, side: Side) -> f64 {
        self.ptdf_abs_sums.get(&(cnec, side)).copied().unwrap_or(0.0)
    }

    pub fn status(&self) -> SensitivityStatus {
        if self.fallback {
            SensitivityStatus::Fallback
        } else {
            SensitivityStatus::Default
        }
    }

    /// Status of the computation as seen from one state.
    pub fn status_of_state(&self, state: State) -> SensitivityStatus {
        match state.contingency {
            Some(co) if self.failed_contingencies.contains(&co) => SensitivityStatus::Failure,
            _ => self.status(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_contingencies.is_empty()
    }
}
