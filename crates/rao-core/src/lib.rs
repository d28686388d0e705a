//! # rao-core: Remedial Action Optimization Core Model
//!
//! Provides the fundamental data structures for remedial-action optimization:
//! the decision timeline (instants), simulated outage scenarios
//! (contingencies), optimization contexts (states), monitored network
//! elements ([`FlowCnec`]) and corrective controls ([`NetworkAction`],
//! [`RangeAction`]), all collected in a [`Crac`] catalog.
//!
//! ## Design Philosophy
//!
//! The model is a flat, index-based catalog:
//! - Every element carries a unique newtype ID (`InstantId`, `ContingencyId`,
//!   `CnecId`, `ActionId`) wrapping its index in the catalog.
//! - A [`State`] is a cheap `Copy` key (instant × optional contingency) usable
//!   directly in hash maps, so per-state results are deterministic lookups.
//! - Instants form a strict total order (preventive < outage < auto <
//!   curative…); ordering a `State` orders it on the timeline.
//! - Remedial-action kinds are closed enums, exhaustively handled by the
//!   optimization engine; there is no open subclassing.
//!
//! ## Quick Start
//!
//! ```rust
//! use rao_core::*;
//!
//! let mut crac = Crac::new();
//! let preventive = crac.add_instant("preventive", InstantKind::Preventive);
//! let curative = crac.add_instant("curative", InstantKind::Curative);
//! let co = crac.add_contingency("loss-of-line-1");
//!
//! let basecase = State::preventive(preventive);
//! let after_co = State::post_contingency(curative, co);
//!
//! crac.add_flow_cnec(
//!     FlowCnec::new(CnecId::new(0), "line-2", basecase)
//!         .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
//!         .optimized(),
//! );
//! assert!(after_co > basecase);
//! ```
//!
//! ## Modules
//!
//! - [`cnec`] - Monitored elements, thresholds, margins
//! - [`action`] - Remedial actions and usage rules
//! - [`error`] - Unified [`RaoError`] type

use serde::{Deserialize, Serialize};

pub mod action;
pub mod cnec;
pub mod error;

pub use action::{
    NetworkAction, RangeAction, RangeActionKind, RangeReference, SetpointRange, UsageContext,
    UsageMethod, UsageRule,
};
pub use cnec::{FlowCnec, Side, Threshold, Unit};
pub use error::{RaoError, RaoResult};

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstantId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContingencyId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CnecId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(usize);

impl InstantId {
    #[inline]
    pub fn new(value: usize) -> Self {
        InstantId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl ContingencyId {
    #[inline]
    pub fn new(value: usize) -> Self {
        ContingencyId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl CnecId {
    #[inline]
    pub fn new(value: usize) -> Self {
        CnecId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl ActionId {
    #[inline]
    pub fn new(value: usize) -> Self {
        ActionId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

/// Kind of a decision-timeline instant.
///
/// Instants of the same kind are further ordered by their position in the
/// catalog (e.g. curative-1 < curative-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstantKind {
    /// Base case, before any contingency.
    Preventive,
    /// Immediately after a contingency, before any action can react.
    Outage,
    /// Automatic (non-optimized, forced) actions window.
    Auto,
    /// Operator-curative actions window.
    Curative,
}

/// A named stage in the decision timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instant {
    pub id: InstantId,
    pub name: String,
    pub kind: InstantKind,
}

impl Instant {
    pub fn is_preventive(&self) -> bool {
        self.kind == InstantKind::Preventive
    }

    pub fn is_auto(&self) -> bool {
        self.kind == InstantKind::Auto
    }

    pub fn is_curative(&self) -> bool {
        self.kind == InstantKind::Curative
    }
}

/// A simulated equipment outage scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub id: ContingencyId,
    pub name: String,
}

/// One optimization context: an instant plus the contingency it follows.
///
/// A state is *preventive* iff it has no contingency. States order first by
/// instant (timeline position), then by contingency for determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct State {
    pub instant: InstantId,
    pub contingency: Option<ContingencyId>,
}

impl State {
    pub fn preventive(instant: InstantId) -> Self {
        State {
            instant,
            contingency: None,
        }
    }

    pub fn post_contingency(instant: InstantId, contingency: ContingencyId) -> Self {
        State {
            instant,
            contingency: Some(contingency),
        }
    }

    pub fn is_preventive(&self) -> bool {
        self.contingency.is_none()
    }
}

/// The catalog of everything the optimizer may act on: instants,
/// contingencies, monitored elements and remedial actions.
///
/// The name comes from the domain's "Contingency list, Remedial Actions and
/// additional Constraints" document, which this catalog is loaded from by an
/// external reader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Crac {
    instants: Vec<Instant>,
    contingencies: Vec<Contingency>,
    flow_cnecs: Vec<FlowCnec>,
    network_actions: Vec<NetworkAction>,
    range_actions: Vec<RangeAction>,
}

impl Crac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next instant on the timeline. Instants must be added in
    /// chronological order; the returned ID encodes that order.
    pub fn add_instant(&mut self, name: &str, kind: InstantKind) -> InstantId {
        let id = InstantId(self.instants.len());
        self.instants.push(Instant {
            id,
            name: name.to_string(),
            kind,
        });
        id
    }

    pub fn add_contingency(&mut self, name: &str) -> ContingencyId {
        let id = ContingencyId(self.contingencies.len());
        self.contingencies.push(Contingency {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Register a monitored element. The caller chooses the ID; re-using an
    /// existing one is a validation error.
    pub fn add_flow_cnec(&mut self, cnec: FlowCnec) -> CnecId {
        debug_assert_eq!(cnec.id.value(), self.flow_cnecs.len(), "CNEC IDs are dense");
        let id = cnec.id;
        self.flow_cnecs.push(cnec);
        id
    }

    pub fn add_network_action(&mut self, action: NetworkAction) -> ActionId {
        let id = action.id;
        self.network_actions.push(action);
        id
    }

    pub fn add_range_action(&mut self, action: RangeAction) -> ActionId {
        let id = action.id;
        self.range_actions.push(action);
        id
    }

    pub fn instants(&self) -> &[Instant] {
        &self.instants
    }

    pub fn instant(&self, id: InstantId) -> &Instant {
        &self.instants[id.0]
    }

    /// First instant of the given kind, if any.
    pub fn instant_of_kind(&self, kind: InstantKind) -> Option<&Instant> {
        self.instants.iter().find(|i| i.kind == kind)
    }

    pub fn preventive_instant(&self) -> RaoResult<&Instant> {
        self.instant_of_kind(InstantKind::Preventive)
            .ok_or_else(|| RaoError::Validation("catalog has no preventive instant".into()))
    }

    pub fn contingencies(&self) -> &[Contingency] {
        &self.contingencies
    }

    pub fn contingency(&self, id: ContingencyId) -> &Contingency {
        &self.contingencies[id.0]
    }

    pub fn flow_cnecs(&self) -> &[FlowCnec] {
        &self.flow_cnecs
    }

    pub fn flow_cnec(&self, id: CnecId) -> &FlowCnec {
        &self.flow_cnecs[id.0]
    }

    pub fn network_actions(&self) -> &[NetworkAction] {
        &self.network_actions
    }

    pub fn network_action(&self, id: ActionId) -> &NetworkAction {
        &self.network_actions[id.0]
    }

    pub fn range_actions(&self) -> &[RangeAction] {
        &self.range_actions
    }

    pub fn range_action(&self, id: ActionId) -> &RangeAction {
        &self.range_actions[id.0]
    }

    /// All distinct states carried by the registered CNECs, in timeline order.
    pub fn states(&self) -> Vec<State> {
        let mut states: Vec<State> = self.flow_cnecs.iter().map(|c| c.state).collect();
        states.sort();
        states.dedup();
        states
    }

    /// CNECs monitored at exactly the given state.
    pub fn cnecs_of_state(&self, state: State) -> impl Iterator<Item = &FlowCnec> {
        self.flow_cnecs.iter().filter(move |c| c.state == state)
    }

    /// Checks catalog invariants: every non-preventive state references a
    /// registered contingency, preventive states sit on a preventive instant,
    /// thresholds are non-empty on optimized CNECs, and PST tap ladders are
    /// well-formed.
    pub fn validate(&self) -> RaoResult<()> {
        for cnec in &self.flow_cnecs {
            let instant = self
                .instants
                .get(cnec.state.instant.value())
                .ok_or_else(|| {
                    RaoError::Validation(format!("CNEC {} references unknown instant", cnec.name))
                })?;
            match cnec.state.contingency {
                None => {
                    if !instant.is_preventive() {
                        return Err(RaoError::Validation(format!(
                            "CNEC {} has no contingency but a non-preventive instant",
                            cnec.name
                        )));
                    }
                }
                Some(co) => {
                    if instant.is_preventive() {
                        return Err(RaoError::Validation(format!(
                            "CNEC {} has a contingency on the preventive instant",
                            cnec.name
                        )));
                    }
                    if co.value() >= self.contingencies.len() {
                        return Err(RaoError::Validation(format!(
                            "CNEC {} references unknown contingency",
                            cnec.name
                        )));
                    }
                }
            }
            if cnec.is_optimized && cnec.thresholds.is_empty() {
                return Err(RaoError::Validation(format!(
                    "optimized CNEC {} has no threshold",
                    cnec.name
                )));
            }
        }
        for action in &self.range_actions {
            if let RangeActionKind::PstTap { taps, initial_tap } = &action.kind {
                if taps.is_empty() {
                    return Err(RaoError::Validation(format!(
                        "PST {} has an empty tap ladder",
                        action.name
                    )));
                }
                if *initial_tap >= taps.len() {
                    return Err(RaoError::Validation(format!(
                        "PST {} initial tap {} is outside its {}-tap ladder",
                        action.name,
                        initial_tap,
                        taps.len()
                    )));
                }
            }
        }
        Ok(())
    }
}
