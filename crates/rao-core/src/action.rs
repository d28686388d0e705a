//! Remedial actions: discrete topology changes and continuous range actions.
//!
//! The kind set is closed (topology, phase-shifter tap, injection, HVDC) and
//! is handled exhaustively by the linear-problem fillers. Actions never touch
//! the network themselves; the engine applies them through the network-handle
//! seam, which keeps side effects confined to one working copy.
//!
//! Usage rules resolve, per state, to AVAILABLE (candidate for the search),
//! FORCED (applied unconditionally) or UNAVAILABLE.

use crate::{ActionId, CnecId, ContingencyId, InstantId, State};
use serde::{Deserialize, Serialize};

/// Resolution of a usage rule at a given state.
///
/// Ordered by strength: when several rules match, the strongest wins
/// (Unavailable > Forced > Available > Undefined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UsageMethod {
    Undefined,
    Available,
    Forced,
    Unavailable,
}

/// Where a usage rule applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UsageContext {
    /// Usable at every state of the given instant.
    FreeToUse { instant: InstantId },
    /// Usable at exactly one state.
    OnState { state: State },
    /// Usable at every state of the instant, but only while the given CNEC
    /// is constrained (negative margin). The perimeter builder checks the
    /// margin; here it resolves like `FreeToUse`.
    OnFlowConstraint { instant: InstantId, cnec: CnecId },
}

/// A predicate attaching a [`UsageMethod`] to a scope of states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRule {
    pub method: UsageMethod,
    pub context: UsageContext,
}

impl UsageRule {
    pub fn free_to_use(method: UsageMethod, instant: InstantId) -> Self {
        UsageRule {
            method,
            context: UsageContext::FreeToUse { instant },
        }
    }

    pub fn on_state(method: UsageMethod, state: State) -> Self {
        UsageRule {
            method,
            context: UsageContext::OnState { state },
        }
    }

    pub fn on_flow_constraint(method: UsageMethod, instant: InstantId, cnec: CnecId) -> Self {
        UsageRule {
            method,
            context: UsageContext::OnFlowConstraint { instant, cnec },
        }
    }

    /// Method contributed by this rule at `state`, `Undefined` if out of scope.
    pub fn method_at(&self, state: State) -> UsageMethod {
        let in_scope = match &self.context {
            UsageContext::FreeToUse { instant } => *instant == state.instant,
            UsageContext::OnState { state: s } => *s == state,
            UsageContext::OnFlowConstraint { instant, .. } => *instant == state.instant,
        };
        if in_scope {
            self.method
        } else {
            UsageMethod::Undefined
        }
    }

    /// CNEC whose constraint triggers this rule, if it is flow-conditioned.
    pub fn triggering_cnec(&self) -> Option<CnecId> {
        match &self.context {
            UsageContext::OnFlowConstraint { cnec, .. } => Some(*cnec),
            _ => None,
        }
    }
}

fn resolve_usage(rules: &[UsageRule], state: State) -> UsageMethod {
    rules
        .iter()
        .map(|r| r.method_at(state))
        .max()
        .unwrap_or(UsageMethod::Undefined)
}

/// A discrete (binary) topology change: applied or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: ActionId,
    pub name: String,
    pub operator: Option<String>,
    /// Cost of activating this action, used for tie-breaking and reporting.
    pub activation_cost: f64,
    pub usage_rules: Vec<UsageRule>,
    /// Actions this one must never be combined with.
    pub incompatible_with: Vec<ActionId>,
}

impl NetworkAction {
    pub fn new(id: ActionId, name: &str) -> Self {
        NetworkAction {
            id,
            name: name.to_string(),
            operator: None,
            activation_cost: 0.0,
            usage_rules: Vec::new(),
            incompatible_with: Vec::new(),
        }
    }

    pub fn with_operator(mut self, operator: &str) -> Self {
        self.operator = Some(operator.to_string());
        self
    }

    pub fn with_activation_cost(mut self, cost: f64) -> Self {
        self.activation_cost = cost;
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn incompatible_with(mut self, other: ActionId) -> Self {
        self.incompatible_with.push(other);
        self
    }

    pub fn usage_method(&self, state: State) -> UsageMethod {
        resolve_usage(&self.usage_rules, state)
    }

    pub fn is_compatible_with(&self, applied: &[ActionId]) -> bool {
        !applied.iter().any(|a| self.incompatible_with.contains(a))
    }
}

/// Which value a setpoint range is expressed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeReference {
    /// Fixed physical bounds.
    Absolute,
    /// Bounds relative to the pre-optimization setpoint.
    InitialSetpoint,
    /// Bounds relative to the previous refresh-loop iteration's setpoint.
    PreviousIteration,
}

/// One admissible setpoint interval; the effective domain of a range action
/// is the intersection of all its ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
    pub reference: RangeReference,
}

impl SetpointRange {
    pub fn absolute(min: f64, max: f64) -> Self {
        SetpointRange {
            min,
            max,
            reference: RangeReference::Absolute,
        }
    }

    pub fn relative_to_initial(min: f64, max: f64) -> Self {
        SetpointRange {
            min,
            max,
            reference: RangeReference::InitialSetpoint,
        }
    }

    pub fn relative_to_previous_iteration(min: f64, max: f64) -> Self {
        SetpointRange {
            min,
            max,
            reference: RangeReference::PreviousIteration,
        }
    }
}

/// Continuous range-action sub-kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeActionKind {
    /// Phase-shifting transformer: the setpoint is an angle, realized by
    /// integer tap positions. `taps[i]` is the angle of tap `i`.
    PstTap { taps: Vec<f64>, initial_tap: usize },
    /// Generator/load injection setpoint in MW.
    Injection,
    /// HVDC converter active-power setpoint in MW.
    Hvdc,
}

/// A continuous corrective control with a bounded setpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: ActionId,
    pub name: String,
    pub operator: Option<String>,
    pub kind: RangeActionKind,
    pub ranges: Vec<SetpointRange>,
    pub usage_rules: Vec<UsageRule>,
    /// Range actions sharing a group ID are kept at an aligned setpoint.
    pub group_id: Option<String>,
}

impl RangeAction {
    pub fn new(id: ActionId, name: &str, kind: RangeActionKind) -> Self {
        RangeAction {
            id,
            name: name.to_string(),
            operator: None,
            kind,
            ranges: Vec::new(),
            usage_rules: Vec::new(),
            group_id: None,
        }
    }

    pub fn with_operator(mut self, operator: &str) -> Self {
        self.operator = Some(operator.to_string());
        self
    }

    pub fn with_range(mut self, range: SetpointRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn usage_method(&self, state: State) -> UsageMethod {
        resolve_usage(&self.usage_rules, state)
    }

    pub fn is_pst(&self) -> bool {
        matches!(self.kind, RangeActionKind::PstTap { .. })
    }

    /// Pre-optimization setpoint implied by the kind (tap angle for PSTs,
    /// zero injection otherwise, unless ranges say better).
    pub fn initial_setpoint(&self) -> f64 {
        match &self.kind {
            RangeActionKind::PstTap { taps, initial_tap } => taps[*initial_tap],
            _ => 0.0,
        }
    }

    /// Admissible `[min, max]` setpoint interval given the pre-optimization
    /// setpoint and the previous iteration's value. Intersection of all
    /// declared ranges; unbounded when no range is declared.
    pub fn admissible_bounds(&self, initial: f64, previous_iteration: f64) -> (f64, f64) {
        let mut lo = f64::NEG_INFINITY;
        let mut hi = f64::INFINITY;
        for range in &self.ranges {
            let (min, max) = match range.reference {
                RangeReference::Absolute => (range.min, range.max),
                RangeReference::InitialSetpoint => (initial + range.min, initial + range.max),
                RangeReference::PreviousIteration => (
                    previous_iteration + range.min,
                    previous_iteration + range.max,
                ),
            };
            lo = lo.max(min);
            hi = hi.min(max);
        }
        // PST setpoints can never leave the physical tap ladder.
        if let RangeActionKind::PstTap { taps, .. } = &self.kind {
            let (first, last) = (taps[0], taps[taps.len() - 1]);
            lo = lo.max(first.min(last));
            hi = hi.min(first.max(last));
        }
        (lo, hi)
    }

    /// Closest tap position for an angle setpoint. Identity for non-PSTs.
    pub fn round_setpoint(&self, setpoint: f64) -> f64 {
        match &self.kind {
            RangeActionKind::PstTap { taps, .. } => taps
                .iter()
                .copied()
                .min_by(|a, b| {
                    (a - setpoint)
                        .abs()
                        .partial_cmp(&(b - setpoint).abs())
                        .expect("tap angles are finite")
                })
                .unwrap_or(setpoint),
            _ => setpoint,
        }
    }
}
