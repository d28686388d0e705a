//! Depth-by-depth search over network-action combinations.

use crate::objective::{ObjectiveFunction, ObjectiveFunctionResult};
use crate::params::{RaoParameters, StopCriterion};
use crate::perimeter::OptimizationPerimeter;
use crate::pool::NetworkPool;
use crate::search::bloomer::Bloomer;
use crate::search::leaf::{Leaf, LeafStatus};
use crate::search::stable_hash;
use crate::sensitivity::{SensitivityEngine, SensitivitySnapshot};
use rao_core::{ActionId, Crac, RaoResult, State};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Best decision found for one perimeter.
#[derive(Debug, Clone)]
pub struct SearchTreeResult {
    /// Activated network actions, forced ones included.
    pub activated_network_actions: Vec<ActionId>,
    /// Validated range-action setpoints per (action, state).
    pub setpoints: HashMap<(ActionId, State), f64>,
    pub snapshot: SensitivitySnapshot,
    pub objective: ObjectiveFunctionResult,
    /// True when the time budget expired before the search was exhausted.
    /// The result is still the best decision validated so far.
    pub hit_time_budget: bool,
}

impl SearchTreeResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}

pub struct SearchTree<'a> {
    crac: &'a Crac,
    perimeter: &'a OptimizationPerimeter,
    params: &'a RaoParameters,
    engine: &'a dyn SensitivityEngine,
}

impl<'a> SearchTree<'a> {
    pub fn new(
        crac: &'a Crac,
        perimeter: &'a OptimizationPerimeter,
        params: &'a RaoParameters,
        engine: &'a dyn SensitivityEngine,
    ) -> Self {
        SearchTree {
            crac,
            perimeter,
            params,
            engine,
        }
    }

    fn expired(deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Deterministic leaf ordering: lower cost, then fewer actions, then
    /// lower activation cost, then stable hash of the action set.
    fn compare(&self, a: &Leaf, b: &Leaf) -> Ordering {
        a.cost()
            .partial_cmp(&b.cost())
            .unwrap_or(Ordering::Equal)
            .then(a.actions().len().cmp(&b.actions().len()))
            .then(
                self.activation_cost(a)
                    .partial_cmp(&self.activation_cost(b))
                    .unwrap_or(Ordering::Equal),
            )
            .then(stable_hash(a.actions()).cmp(&stable_hash(b.actions())))
    }

    fn activation_cost(&self, leaf: &Leaf) -> f64 {
        leaf.activation_cost(self.crac)
    }

    /// A deeper leaf replaces the incumbent only when it improves the cost by
    /// at least the configured absolute amount and relative fraction.
    fn improved_enough(&self, best_cost: f64, candidate_cost: f64) -> bool {
        let tree = &self.params.tree;
        let threshold = tree
            .absolute_minimum_impact_threshold
            .max(tree.relative_minimum_impact_threshold * best_cost.abs());
        best_cost - candidate_cost > threshold
    }

    fn target_reached(&self, cost: f64) -> bool {
        match self.params.tree.stop_criterion {
            StopCriterion::MinObjective => false,
            StopCriterion::AtTargetObjectiveValue(target) => cost <= target,
        }
    }

    fn evaluate_leaf(
        &self,
        leaf: &mut Leaf,
        pool: &NetworkPool,
        objective: &ObjectiveFunction,
        initial_setpoints: &HashMap<ActionId, f64>,
    ) -> RaoResult<()> {
        let mut handle = pool.lease();
        leaf.evaluate(&mut *handle, self.engine, self.crac, self.perimeter, objective)?;
        leaf.optimize(
            &mut *handle,
            self.engine,
            self.crac,
            self.perimeter,
            self.params,
            initial_setpoints,
        )?;
        Ok(())
    }

    fn result_from(
        &self,
        leaf: &Leaf,
        initial_snapshot: &SensitivitySnapshot,
        initial_setpoints: &HashMap<ActionId, f64>,
        hit_time_budget: bool,
    ) -> SearchTreeResult {
        let setpoints = match leaf.optimization() {
            Some(optimization) => optimization.setpoints.clone(),
            None => {
                let mut setpoints = HashMap::new();
                for (&state, actions) in &self.perimeter.range_actions_per_state {
                    for &id in actions {
                        let initial = initial_setpoints
                            .get(&id)
                            .copied()
                            .unwrap_or_else(|| self.crac.range_action(id).initial_setpoint());
                        setpoints.insert((id, state), initial);
                    }
                }
                setpoints
            }
        };
        SearchTreeResult {
            activated_network_actions: leaf.actions().to_vec(),
            setpoints,
            snapshot: leaf.snapshot().cloned().unwrap_or_else(|| initial_snapshot.clone()),
            objective: leaf
                .objective()
                .cloned()
                .unwrap_or_else(|| {
                    ObjectiveFunction::new(
                        self.crac,
                        self.perimeter,
                        &self.params.objective,
                        self.params.loop_flow.as_ref(),
                    )
                    .evaluate(initial_snapshot)
                }),
            hit_time_budget,
        }
    }

    /// Explores the tree. `initial_snapshot` describes the network before any
    /// of this perimeter's actions; the root applies the forced ones. The
    /// deadline is a soft budget: it is checked before each expansion and
    /// before each leaf starts, in-flight leaves run to completion.
    pub fn run(
        &self,
        pool: &NetworkPool,
        initial_snapshot: &SensitivitySnapshot,
        initial_setpoints: &HashMap<ActionId, f64>,
        deadline: Option<Instant>,
    ) -> RaoResult<SearchTreeResult> {
        let objective = ObjectiveFunction::new(
            self.crac,
            self.perimeter,
            &self.params.objective,
            self.params.loop_flow.as_ref(),
        );

        let mut best = Leaf::root(&self.perimeter.forced_network_actions);
        // A root that cannot be evaluated leaves nothing to optimize over.
        self.evaluate_leaf(&mut best, pool, &objective, initial_setpoints)?;
        info!(
            cost = best.cost(),
            forced = best.actions().len(),
            "root leaf evaluated"
        );

        if self.target_reached(best.cost()) {
            return Ok(self.result_from(&best, initial_snapshot, initial_setpoints, false));
        }

        let bloomer = Bloomer::new(self.crac, self.perimeter, self.params);
        let mut hit_time_budget = false;

        for depth in 1..=self.params.tree.maximum_search_depth {
            if Self::expired(deadline) {
                hit_time_budget = true;
                break;
            }
            let combinations = bloomer.bloom(best.actions());
            if combinations.is_empty() {
                debug!(depth, "no further combination to try");
                break;
            }
            debug!(depth, leaves = combinations.len(), "expanding");

            let leaves: Vec<Leaf> = combinations
                .par_iter()
                .filter_map(|combination| {
                    // Leaves not yet started are dropped once the budget is
                    // spent; running ones finish normally.
                    if Self::expired(deadline) {
                        return None;
                    }
                    let mut leaf = Leaf::child(best.actions(), combination);
                    if let Err(e) =
                        self.evaluate_leaf(&mut leaf, pool, &objective, initial_setpoints)
                    {
                        warn!(error = %e, actions = ?leaf.actions(), "leaf evaluation failed");
                        leaf.mark_error();
                    }
                    Some(leaf)
                })
                .collect();

            if leaves.len() < combinations.len() {
                hit_time_budget = true;
            }

            let best_child = leaves
                .into_iter()
                .filter(|leaf| leaf.status() != LeafStatus::Error)
                .min_by(|a, b| self.compare(a, b));

            match best_child {
                Some(child) if self.improved_enough(best.cost(), child.cost()) => {
                    info!(depth, cost = child.cost(), actions = ?child.actions(), "new best leaf");
                    best = child;
                }
                _ => {
                    debug!(depth, "no leaf improved enough, stopping");
                    break;
                }
            }

            if self.target_reached(best.cost()) {
                debug!(depth, "stop criterion reached");
                break;
            }
            if hit_time_budget {
                break;
            }
        }

        Ok(self.result_from(&best, initial_snapshot, initial_setpoints, hit_time_budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perimeter::PerimeterBuilder;
    use crate::test_utils::MockGrid;
    use rao_core::{
        CnecId, FlowCnec, InstantKind, NetworkAction, Side, Threshold, Unit, UsageMethod,
        UsageRule,
    };

    /// One overloaded line, two candidate topology actions of different worth.
    fn overloaded_case() -> (Crac, MockGrid) {
        let mut crac = Crac::new();
        let prev = crac.add_instant("preventive", InstantKind::Preventive);
        let basecase = rao_core::State::preventive(prev);
        crac.add_flow_cnec(
            FlowCnec::new(CnecId::new(0), "line", basecase)
                .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 100.0))
                .optimized(),
        );
        crac.add_network_action(
            NetworkAction::new(ActionId::new(0), "weak")
                .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, prev)),
        );
        crac.add_network_action(
            NetworkAction::new(ActionId::new(1), "strong")
                .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, prev)),
        );

        let mut grid = MockGrid::new();
        grid.set_base_flow(CnecId::new(0), Side::Left, 150.0); // margin -50
        grid.set_action_impact(ActionId::new(0), CnecId::new(0), Side::Left, -20.0);
        grid.set_action_impact(ActionId::new(1), CnecId::new(0), Side::Left, -80.0);
        (crac, grid)
    }

    #[test]
    fn test_tree_picks_strongest_action() {
        let (crac, grid) = overloaded_case();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = RaoParameters::default();
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);

        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);
        let result = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();

        // strong (-80) fixes the overload alone; weak then adds -20 more.
        assert!(result
            .activated_network_actions
            .contains(&ActionId::new(1)));
        assert!(result.cost() < -45.0);
        assert!(!result.hit_time_budget);
    }

    #[test]
    fn test_tree_is_deterministic() {
        let (crac, grid) = overloaded_case();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = RaoParameters::default();
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);
        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);

        let first = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();
        let second = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();
        assert_eq!(
            first.activated_network_actions,
            second.activated_network_actions
        );
        assert_eq!(first.cost(), second.cost());
    }

    #[test]
    fn test_min_impact_threshold_prunes_marginal_gains() {
        let (crac, grid) = overloaded_case();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let mut params = RaoParameters::default();
        // Second depth would only improve by 20 MW; require 30.
        params.tree.absolute_minimum_impact_threshold = 30.0;
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);

        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);
        let result = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();
        assert_eq!(result.activated_network_actions, vec![ActionId::new(1)]);
    }

    #[test]
    fn test_stop_criterion_halts_at_target() {
        let (crac, grid) = overloaded_case();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let mut params = RaoParameters::default();
        // Any secure point (cost <= 0) is good enough.
        params.tree.stop_criterion = StopCriterion::AtTargetObjectiveValue(0.0);
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);

        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);
        let result = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();
        // Stops after the first securing depth instead of stacking both.
        assert_eq!(result.activated_network_actions.len(), 1);
        assert!(result.cost() <= 0.0);
    }

    #[test]
    fn test_expired_budget_returns_root_result() {
        let (crac, grid) = overloaded_case();
        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = RaoParameters::default();
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);

        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);
        let deadline = Instant::now() - std::time::Duration::from_secs(1);
        let result = tree
            .run(&pool, &snapshot, &HashMap::new(), Some(deadline))
            .unwrap();
        // Budget spent before any expansion: still a valid (root) result.
        assert!(result.hit_time_budget);
        assert!(result.activated_network_actions.is_empty());
        assert_eq!(result.cost(), 50.0);
    }

    #[test]
    fn test_forced_actions_applied_even_when_degrading() {
        let (mut crac, mut grid) = overloaded_case();
        let prev = crac.instants()[0].id;
        // A forced action that makes things worse.
        crac.add_network_action(
            NetworkAction::new(ActionId::new(2), "forced-bad")
                .with_usage_rule(UsageRule::free_to_use(UsageMethod::Forced, prev)),
        );
        grid.set_action_impact(ActionId::new(2), CnecId::new(0), Side::Left, 30.0);

        let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
        let params = RaoParameters::default();
        let engine = grid.engine();
        let pool = NetworkPool::new(&grid.handle(), 2);
        let snapshot = grid.snapshot(&crac);

        let tree = SearchTree::new(&crac, &perimeter, &params, &engine);
        let result = tree.run(&pool, &snapshot, &HashMap::new(), None).unwrap();
        assert!(result
            .activated_network_actions
            .contains(&ActionId::new(2)));
    }
}
