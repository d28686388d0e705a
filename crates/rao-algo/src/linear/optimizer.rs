//! Iterating linear optimizer: alternates LP solves with sensitivity
//! recomputations until setpoints stabilize.
//!
//! The LP is only a linearization around the current operating point, so a
//! solved setpoint vector must be re-validated by a real sensitivity
//! computation. The loop keeps the best validated point seen and reverts to
//! it when an iteration degrades the objective, which bounds how far the
//! linearization can drift.

use crate::linear::fillers::{build_fillers, FillerInputs, IterationData, ProblemFiller};
use crate::linear::ids;
use crate::linear::problem::{LinearProblem, LinearProblemStatus, LinearSolution};
use crate::objective::{ObjectiveFunction, ObjectiveFunctionResult};
use crate::perimeter::{OptimizationPerimeter, PerimeterKind};
use crate::params::RaoParameters;
use crate::sensitivity::{NetworkHandle, SensitivityEngine, SensitivitySnapshot};
use rao_core::{ActionId, Crac, RaoResult, State};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of one linear optimization over a perimeter.
#[derive(Debug, Clone)]
pub struct LinearOptimizationResult {
    pub status: LinearProblemStatus,
    /// Validated setpoints per (range action, state).
    pub setpoints: HashMap<(ActionId, State), f64>,
    /// Snapshot the setpoints were validated against.
    pub snapshot: SensitivitySnapshot,
    pub objective: ObjectiveFunctionResult,
}

impl LinearOptimizationResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}

pub struct IteratingLinearOptimizer<'a> {
    crac: &'a Crac,
    perimeter: &'a OptimizationPerimeter,
    params: &'a RaoParameters,
    engine: &'a dyn SensitivityEngine,
}

impl<'a> IteratingLinearOptimizer<'a> {
    pub fn new(
        crac: &'a Crac,
        perimeter: &'a OptimizationPerimeter,
        params: &'a RaoParameters,
        engine: &'a dyn SensitivityEngine,
    ) -> Self {
        IteratingLinearOptimizer {
            crac,
            perimeter,
            params,
            engine,
        }
    }

    fn initial_setpoint(&self, initial_setpoints: &HashMap<ActionId, f64>, id: ActionId) -> f64 {
        initial_setpoints
            .get(&id)
            .copied()
            .unwrap_or_else(|| self.crac.range_action(id).initial_setpoint())
    }

    fn extract_setpoints(
        &self,
        solution: &crate::linear::problem::LinearSolution,
    ) -> HashMap<(ActionId, State), f64> {
        let mut setpoints = HashMap::new();
        for (&state, actions) in &self.perimeter.range_actions_per_state {
            for &action_id in actions {
                let raw = solution.value(&ids::setpoint_variable(action_id, state));
                // PST angles must land on a physical tap.
                let rounded = self.crac.range_action(action_id).round_setpoint(raw);
                setpoints.insert((action_id, state), rounded);
            }
        }
        setpoints
    }

    fn setpoints_unchanged(
        &self,
        a: &HashMap<(ActionId, State), f64>,
        b: &HashMap<(ActionId, State), f64>,
    ) -> bool {
        a.iter().all(|(key, &value)| {
            (b.get(key).copied().unwrap_or(value) - value).abs()
                <= self.params.linear.setpoint_tolerance
        })
    }

    fn apply_setpoints(
        &self,
        handle: &mut dyn NetworkHandle,
        setpoints: &HashMap<(ActionId, State), f64>,
    ) -> RaoResult<()> {
        for (&(action_id, _), &setpoint) in setpoints {
            handle.apply_setpoint(self.crac.range_action(action_id), setpoint)?;
        }
        Ok(())
    }

    /// Makes the curative activation caps integral.
    ///
    /// The usage-limits filler models activation with relaxed binaries (the
    /// conic backend has no integer variables), so a fractional solve can
    /// spread one activation budget over several actions. Keep the largest
    /// moves within the global and per-operator budgets, pin every other
    /// setpoint to its pre-optimization value and solve again. The pins are
    /// per-solve: the core filler restores the real bounds on the next
    /// sensitivity iteration.
    fn enforce_usage_limits(
        &self,
        problem: &mut LinearProblem,
        solution: LinearSolution,
        initial_setpoints: &HashMap<ActionId, f64>,
        applied_network_actions: &[ActionId],
    ) -> RaoResult<LinearSolution> {
        let limits = &self.params.ra_limits;
        if self.perimeter.kind != PerimeterKind::Curative
            || (limits.max_curative_ra.is_none()
                && limits.max_curative_ra_per_operator.is_empty())
        {
            return Ok(solution);
        }

        let mut global_budget = limits
            .max_curative_ra
            .map(|max| max.saturating_sub(applied_network_actions.len()));
        let mut operator_used: HashMap<&str, usize> = HashMap::new();
        for &id in applied_network_actions {
            if let Some(operator) = self.crac.network_action(id).operator.as_deref() {
                *operator_used.entry(operator).or_default() += 1;
            }
        }

        let mut pinned_any = false;
        for (&state, actions) in &self.perimeter.range_actions_per_state {
            let mut moves: Vec<(ActionId, f64)> = actions
                .iter()
                .map(|&id| {
                    let initial = self.initial_setpoint(initial_setpoints, id);
                    let value = solution.value(&ids::setpoint_variable(id, state));
                    (id, (value - initial).abs())
                })
                .collect();
            moves.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });

            for (id, _) in moves {
                let operator = self.crac.range_action(id).operator.as_deref();
                let operator_cap = operator
                    .and_then(|op| limits.max_curative_ra_per_operator.get(op).copied());
                let operator_open = match (operator, operator_cap) {
                    (Some(op), Some(cap)) => operator_used.get(op).copied().unwrap_or(0) < cap,
                    _ => true,
                };
                if global_budget.map_or(true, |budget| budget > 0) && operator_open {
                    if let Some(budget) = global_budget.as_mut() {
                        *budget -= 1;
                    }
                    if let (Some(op), Some(_)) = (operator, operator_cap) {
                        *operator_used.entry(op).or_default() += 1;
                    }
                } else {
                    let initial = self.initial_setpoint(initial_setpoints, id);
                    problem.set_variable_bounds(
                        &ids::setpoint_variable(id, state),
                        initial,
                        initial,
                    )?;
                    pinned_any = true;
                }
            }
        }

        if pinned_any {
            debug!("activation budget exceeded fractionally, re-solving with pinned setpoints");
            problem.solve()
        } else {
            Ok(solution)
        }
    }

    /// Runs the solve / apply / re-compute loop on `handle`.
    ///
    /// `initial_snapshot` must describe the network as `handle` currently is;
    /// `applied_network_actions` are the discrete actions the caller already
    /// applied (they consume usage-limit budget).
    pub fn optimize(
        &self,
        handle: &mut dyn NetworkHandle,
        initial_snapshot: &SensitivitySnapshot,
        initial_setpoints: &HashMap<ActionId, f64>,
        applied_network_actions: &[ActionId],
    ) -> RaoResult<LinearOptimizationResult> {
        let objective = ObjectiveFunction::new(
            self.crac,
            self.perimeter,
            &self.params.objective,
            self.params.loop_flow.as_ref(),
        );
        let inputs = FillerInputs {
            crac: self.crac,
            perimeter: self.perimeter,
            params: self.params,
            initial_setpoints,
            applied_network_actions,
        };

        let mut best_setpoints: HashMap<(ActionId, State), f64> = HashMap::new();
        for (&state, actions) in &self.perimeter.range_actions_per_state {
            for &id in actions {
                best_setpoints.insert((id, state), self.initial_setpoint(initial_setpoints, id));
            }
        }
        let mut best_snapshot = initial_snapshot.clone();
        let mut best_objective = objective.evaluate(initial_snapshot);

        let fillers: Vec<Box<dyn ProblemFiller>> = build_fillers(&inputs);
        let mut problem = LinearProblem::new();
        {
            let iteration = IterationData {
                snapshot: &best_snapshot,
                setpoints: &best_setpoints,
            };
            for filler in &fillers {
                filler.fill(&mut problem, &inputs, &iteration)?;
            }
        }

        for iteration_count in 1..=self.params.linear.max_iterations {
            let mut solution = problem.solve()?;
            if matches!(solution.status, LinearProblemStatus::Optimal) {
                solution = self.enforce_usage_limits(
                    &mut problem,
                    solution,
                    initial_setpoints,
                    applied_network_actions,
                )?;
            }
            if !matches!(solution.status, LinearProblemStatus::Optimal) {
                if iteration_count == 1 {
                    // Nothing validated yet: surface the solver verdict.
                    return Ok(LinearOptimizationResult {
                        status: solution.status,
                        setpoints: best_setpoints,
                        snapshot: best_snapshot,
                        objective: best_objective,
                    });
                }
                debug!(iteration = iteration_count, status = ?solution.status,
                       "linear solve degraded, keeping best validated point");
                return Ok(LinearOptimizationResult {
                    status: LinearProblemStatus::Feasible,
                    setpoints: best_setpoints,
                    snapshot: best_snapshot,
                    objective: best_objective,
                });
            }

            let setpoints = self.extract_setpoints(&solution);
            if self.setpoints_unchanged(&setpoints, &best_setpoints) {
                debug!(iteration = iteration_count, "setpoints stable, stopping");
                return Ok(LinearOptimizationResult {
                    status: LinearProblemStatus::Optimal,
                    setpoints: best_setpoints,
                    snapshot: best_snapshot,
                    objective: best_objective,
                });
            }

            self.apply_setpoints(handle, &setpoints)?;
            let snapshot = match self.engine.compute(
                handle,
                self.crac,
                &self.perimeter.all_cnecs(),
                &self.perimeter.range_actions(),
            ) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(iteration = iteration_count, error = %e,
                           "sensitivity recomputation failed, keeping best validated point");
                    self.apply_setpoints(handle, &best_setpoints)?;
                    return Ok(LinearOptimizationResult {
                        status: LinearProblemStatus::SensitivityComputationFailed,
                        setpoints: best_setpoints,
                        snapshot: best_snapshot,
                        objective: best_objective,
                    });
                }
            };

            let evaluated = objective.evaluate(&snapshot);
            if evaluated.cost() >= best_objective.cost() {
                debug!(
                    iteration = iteration_count,
                    cost = evaluated.cost(),
                    best = best_objective.cost(),
                    "iteration degraded the objective, reverting"
                );
                self.apply_setpoints(handle, &best_setpoints)?;
                return Ok(LinearOptimizationResult {
                    status: LinearProblemStatus::Optimal,
                    setpoints: best_setpoints,
                    snapshot: best_snapshot,
                    objective: best_objective,
                });
            }

            best_setpoints = setpoints;
            best_snapshot = snapshot;
            best_objective = evaluated;

            let iteration = IterationData {
                snapshot: &best_snapshot,
                setpoints: &best_setpoints,
            };
            for filler in &fillers {
                filler.update_between_sensi_iteration(&mut problem, &inputs, &iteration)?;
            }
        }

        debug!("iteration cap reached with a validated point");
        Ok(LinearOptimizationResult {
            status: LinearProblemStatus::MaxIterationReached,
            setpoints: best_setpoints,
            snapshot: best_snapshot,
            objective: best_objective,
        })
    }
}
