//! Configuration for the remedial-action optimization engine.
//!
//! All parameter structs carry serde derives and sensible `Default` impls so
//! they can be loaded from a document or built inline in tests.

use rao_core::ActionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the objective function values margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ObjectiveMode {
    /// Maximize the worst absolute margin (MW).
    #[default]
    MaxMinMargin,
    /// Maximize the worst margin relative to the zone-to-zone PTDF sum.
    MaxMinRelativeMargin,
}

/// Objective-function tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveFunctionParameters {
    pub mode: ObjectiveMode,
    /// Floor applied to absolute PTDF sums in relative-margin mode, to avoid
    /// dividing by a vanishing denominator.
    pub ptdf_sum_lower_bound: f64,
    /// Virtual cost applied when the sensitivity engine fell back to a
    /// degraded computation.
    pub sensitivity_fallback_cost: f64,
}

impl Default for ObjectiveFunctionParameters {
    fn default() -> Self {
        Self {
            mode: ObjectiveMode::MaxMinMargin,
            ptdf_sum_lower_bound: 0.01,
            sensitivity_fallback_cost: 0.0,
        }
    }
}

/// When the search tree may stop before exhausting its depth budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum StopCriterion {
    /// Keep searching for the minimum objective until depth/time budget ends.
    #[default]
    MinObjective,
    /// Stop as soon as the cost drops below the given target.
    AtTargetObjectiveValue(f64),
}

/// Search-tree exploration limits and pruning thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParameters {
    pub maximum_search_depth: usize,
    /// Concurrently evaluated leaves; also sizes the network-handle pool.
    pub leaves_in_parallel: usize,
    pub stop_criterion: StopCriterion,
    /// A deeper leaf is kept only if it improves the previous depth's best
    /// cost by at least this absolute amount...
    pub absolute_minimum_impact_threshold: f64,
    /// ...and by at least this fraction of it.
    pub relative_minimum_impact_threshold: f64,
    /// Action combinations to try as a whole before single-action children.
    pub predefined_combinations: Vec<Vec<ActionId>>,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            maximum_search_depth: 5,
            leaves_in_parallel: 2,
            stop_criterion: StopCriterion::MinObjective,
            absolute_minimum_impact_threshold: 0.0,
            relative_minimum_impact_threshold: 0.0,
            predefined_combinations: Vec::new(),
        }
    }
}

/// Iterating linear optimizer (sensitivity refresh loop) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearOptimizerParameters {
    /// Cap on solve → apply → re-sensitivity iterations.
    pub max_iterations: usize,
    /// Setpoint change below which two iterations count as identical.
    pub setpoint_tolerance: f64,
    /// Penalty (per MW or per degree of variation) discouraging gratuitous
    /// range-action moves.
    pub pst_penalty_cost: f64,
    pub hvdc_penalty_cost: f64,
    pub injection_penalty_cost: f64,
}

impl Default for LinearOptimizerParameters {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            setpoint_tolerance: 1e-6,
            pst_penalty_cost: 0.01,
            hvdc_penalty_cost: 0.001,
            injection_penalty_cost: 0.001,
        }
    }
}

/// Limits on how many remedial actions a curative perimeter may activate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaLimitationParameters {
    /// Global cap on activated remedial actions per curative state.
    pub max_curative_ra: Option<usize>,
    /// Per-operator caps, keyed by operator (TSO) name.
    pub max_curative_ra_per_operator: HashMap<String, usize>,
}

/// Loop-flow constraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopFlowParameters {
    /// Loop flows may exceed their threshold by this much (MW) for free.
    pub acceptable_augmentation: f64,
    /// Virtual cost per MW of loop-flow violation.
    pub violation_cost: f64,
    /// Only CNECs whose operator country is listed are loop-flow constrained.
    pub countries: Vec<String>,
}

impl Default for LoopFlowParameters {
    fn default() -> Self {
        Self {
            acceptable_augmentation: 0.0,
            violation_cost: 10.0,
            countries: Vec::new(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaoParameters {
    pub objective: ObjectiveFunctionParameters,
    pub tree: TreeParameters,
    pub linear: LinearOptimizerParameters,
    pub ra_limits: RaLimitationParameters,
    pub loop_flow: Option<LoopFlowParameters>,
}
