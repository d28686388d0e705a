//! One node of the search tree: a set of applied network actions and its
//! evaluation/optimization results.

use crate::linear::optimizer::{IteratingLinearOptimizer, LinearOptimizationResult};
use crate::objective::{ObjectiveFunction, ObjectiveFunctionResult};
use crate::params::RaoParameters;
use crate::perimeter::OptimizationPerimeter;
use crate::sensitivity::{NetworkHandle, SensitivityEngine, SensitivitySnapshot};
use rao_core::{ActionId, Crac, RaoResult};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafStatus {
    Created,
    /// Evaluation failed; the leaf is excluded from best-leaf selection.
    Error,
    Evaluated,
    Optimized,
}

/// A candidate decision: all network actions applied from the root down.
#[derive(Debug)]
pub struct Leaf {
    actions: Vec<ActionId>,
    status: LeafStatus,
    evaluation: Option<(SensitivitySnapshot, ObjectiveFunctionResult)>,
    optimization: Option<LinearOptimizationResult>,
}

impl Leaf {
    pub fn root(forced_actions: &[ActionId]) -> Self {
        Leaf {
            actions: forced_actions.to_vec(),
            status: LeafStatus::Created,
            evaluation: None,
            optimization: None,
        }
    }

    pub fn child(parent_actions: &[ActionId], combination: &[ActionId]) -> Self {
        let mut actions = parent_actions.to_vec();
        actions.extend_from_slice(combination);
        Leaf {
            actions,
            status: LeafStatus::Created,
            evaluation: None,
            optimization: None,
        }
    }

    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    pub fn status(&self) -> LeafStatus {
        self.status
    }

    pub fn mark_error(&mut self) {
        self.status = LeafStatus::Error;
    }

    /// Total activation cost of the applied actions, for tie-breaking.
    pub fn activation_cost(&self, crac: &Crac) -> f64 {
        self.actions
            .iter()
            .map(|&id| crac.network_action(id).activation_cost)
            .sum()
    }

    /// Cost after optimization if it ran, after evaluation otherwise.
    /// Unevaluated and failed leaves cost infinity.
    pub fn cost(&self) -> f64 {
        if self.status == LeafStatus::Error {
            return f64::INFINITY;
        }
        if let Some(optimization) = &self.optimization {
            return optimization.cost();
        }
        self.evaluation
            .as_ref()
            .map(|(_, objective)| objective.cost())
            .unwrap_or(f64::INFINITY)
    }

    pub fn snapshot(&self) -> Option<&SensitivitySnapshot> {
        if let Some(optimization) = &self.optimization {
            return Some(&optimization.snapshot);
        }
        self.evaluation.as_ref().map(|(snapshot, _)| snapshot)
    }

    pub fn objective(&self) -> Option<&ObjectiveFunctionResult> {
        if let Some(optimization) = &self.optimization {
            return Some(&optimization.objective);
        }
        self.evaluation.as_ref().map(|(_, objective)| objective)
    }

    pub fn optimization(&self) -> Option<&LinearOptimizationResult> {
        self.optimization.as_ref()
    }

    /// Applies the leaf's actions to `handle` and computes its snapshot.
    /// The handle must be pristine when this is called.
    pub fn evaluate(
        &mut self,
        handle: &mut dyn NetworkHandle,
        engine: &dyn SensitivityEngine,
        crac: &Crac,
        perimeter: &OptimizationPerimeter,
        objective: &ObjectiveFunction,
    ) -> RaoResult<()> {
        for &id in &self.actions {
            handle.apply_network_action(crac.network_action(id))?;
        }
        let snapshot = engine.compute(
            handle,
            crac,
            &perimeter.all_cnecs(),
            &perimeter.range_actions(),
        )?;
        let result = objective.evaluate(&snapshot);
        self.evaluation = Some((snapshot, result));
        self.status = LeafStatus::Evaluated;
        Ok(())
    }

    /// Runs the iterating linear optimizer on the already-evaluated leaf.
    /// No-op when the perimeter carries no range action.
    pub fn optimize(
        &mut self,
        handle: &mut dyn NetworkHandle,
        engine: &dyn SensitivityEngine,
        crac: &Crac,
        perimeter: &OptimizationPerimeter,
        params: &RaoParameters,
        initial_setpoints: &HashMap<ActionId, f64>,
    ) -> RaoResult<()> {
        if !perimeter.has_range_actions() {
            return Ok(());
        }
        let Some((snapshot, _)) = &self.evaluation else {
            return Ok(());
        };
        let optimizer = IteratingLinearOptimizer::new(crac, perimeter, params, engine);
        let result = optimizer.optimize(handle, snapshot, initial_setpoints, &self.actions)?;
        self.optimization = Some(result);
        self.status = LeafStatus::Optimized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unevaluated_leaf_costs_infinity() {
        let leaf = Leaf::root(&[]);
        assert_eq!(leaf.status(), LeafStatus::Created);
        assert_eq!(leaf.cost(), f64::INFINITY);
    }

    #[test]
    fn test_child_accumulates_actions() {
        let leaf = Leaf::child(&[ActionId::new(0)], &[ActionId::new(2), ActionId::new(4)]);
        assert_eq!(
            leaf.actions(),
            &[ActionId::new(0), ActionId::new(2), ActionId::new(4)]
        );
    }

    #[test]
    fn test_error_leaf_costs_infinity() {
        let mut leaf = Leaf::root(&[]);
        leaf.mark_error();
        assert_eq!(leaf.cost(), f64::INFINITY);
    }
}
