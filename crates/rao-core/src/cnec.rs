//! Monitored network elements (CNECs) and their operating thresholds.
//!
//! A CNEC pins a network element to one [`State`](crate::State) and carries
//! one or more directional thresholds. Thresholds are immutable once the CNEC
//! is built; realized flows are computed externally and attached per
//! evaluation. The margin of a CNEC is the distance between the realized
//! value and the nearest violated threshold (negative when violated).

use crate::{CnecId, State};
use serde::{Deserialize, Serialize};

/// Monitored side of a branch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

/// Physical unit of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Megawatt,
    Ampere,
    Degree,
    Kilovolt,
}

/// A directional bound on one side of a monitored element.
///
/// `min`/`max` are expressed in `unit`; either may be absent for a one-sided
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub side: Side,
    pub unit: Unit,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Threshold {
    pub fn max(side: Side, unit: Unit, max: f64) -> Self {
        Threshold {
            side,
            unit,
            min: None,
            max: Some(max),
        }
    }

    pub fn min(side: Side, unit: Unit, min: f64) -> Self {
        Threshold {
            side,
            unit,
            min: Some(min),
            max: None,
        }
    }

    pub fn range(side: Side, unit: Unit, min: f64, max: f64) -> Self {
        Threshold {
            side,
            unit,
            min: Some(min),
            max: Some(max),
        }
    }

    /// Margin of a realized value against this threshold alone.
    pub fn margin(&self, value: f64) -> f64 {
        let above = self.max.map(|m| m - value).unwrap_or(f64::INFINITY);
        let below = self.min.map(|m| value - m).unwrap_or(f64::INFINITY);
        above.min(below)
    }
}

/// Critical Network Element + Contingency: a flow constraint point.
///
/// An element may be *optimized* (its margin enters the objective), merely
/// *monitored* (its margin is constrained but not optimized), or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCnec {
    pub id: CnecId,
    pub name: String,
    /// External identifier of the monitored network element.
    pub network_element: String,
    pub state: State,
    pub thresholds: Vec<Threshold>,
    pub is_optimized: bool,
    pub is_monitored: bool,
    /// Operator (country code) governing this element, for loop-flow scoping.
    pub operator: Option<String>,
    /// Loop-flow bound in MW, when the element is loop-flow constrained.
    pub loop_flow_threshold_mw: Option<f64>,
}

impl FlowCnec {
    pub fn new(id: CnecId, name: &str, state: State) -> Self {
        FlowCnec {
            id,
            name: name.to_string(),
            network_element: name.to_string(),
            state,
            thresholds: Vec::new(),
            is_optimized: false,
            is_monitored: false,
            operator: None,
            loop_flow_threshold_mw: None,
        }
    }

    pub fn with_network_element(mut self, element: &str) -> Self {
        self.network_element = element.to_string();
        self
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn optimized(mut self) -> Self {
        self.is_optimized = true;
        self
    }

    pub fn monitored(mut self) -> Self {
        self.is_monitored = true;
        self
    }

    pub fn with_operator(mut self, operator: &str) -> Self {
        self.operator = Some(operator.to_string());
        self
    }

    pub fn with_loop_flow_threshold(mut self, mw: f64) -> Self {
        self.loop_flow_threshold_mw = Some(mw);
        self
    }

    pub fn is_loop_flow_constrained(&self) -> bool {
        self.loop_flow_threshold_mw.is_some()
    }

    /// Monitored sides (the sides that carry at least one threshold).
    pub fn monitored_sides(&self) -> Vec<Side> {
        let mut sides: Vec<Side> = self.thresholds.iter().map(|t| t.side).collect();
        sides.sort();
        sides.dedup();
        sides
    }

    /// Upper flow bound on a side, if any threshold defines one.
    pub fn upper_bound(&self, side: Side) -> Option<f64> {
        self.thresholds
            .iter()
            .filter(|t| t.side == side)
            .filter_map(|t| t.max)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    /// Lower flow bound on a side, if any threshold defines one.
    pub fn lower_bound(&self, side: Side) -> Option<f64> {
        self.thresholds
            .iter()
            .filter(|t| t.side == side)
            .filter_map(|t| t.min)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Margin of a realized flow on one side: distance to the closest bound,
    /// negative if the flow violates a bound.
    pub fn margin(&self, flow: f64, side: Side) -> f64 {
        self.thresholds
            .iter()
            .filter(|t| t.side == side)
            .map(|t| t.margin(flow))
            .fold(f64::INFINITY, f64::min)
    }

    /// Worst margin over all monitored sides given per-side flows.
    pub fn worst_margin(&self, flow_of: impl Fn(Side) -> f64) -> f64 {
        self.monitored_sides()
            .into_iter()
            .map(|side| self.margin(flow_of(side), side))
            .fold(f64::INFINITY, f64::min)
    }
}
