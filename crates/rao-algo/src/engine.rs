//! Top-level remedial-action optimization: preventive perimeter first, then
//! every curative perimeter independently, then aggregation.

use crate::objective::ObjectiveFunction;
use crate::params::RaoParameters;
use crate::perimeter::{state_has_remedial_actions, OptimizationPerimeter, PerimeterBuilder};
use crate::pool::NetworkPool;
use crate::result::{
    AggregatedResult, ComputationStatus, PrePerimeterResult, StateOptimizationResult,
};
use crate::search::tree::{SearchTree, SearchTreeResult};
use crate::sensitivity::{NetworkHandle, SensitivityEngine, SensitivityStatus};
use rao_core::{ActionId, CnecId, Crac, InstantKind, RaoError, RaoResult, State};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything the engine needs: the catalog, a pristine network handle, and
/// the external sensitivity computer.
pub struct RaoInput<'a> {
    pub crac: &'a Crac,
    pub network: &'a dyn NetworkHandle,
    pub engine: &'a dyn SensitivityEngine,
}

fn all_cnecs(crac: &Crac) -> Vec<CnecId> {
    crac.flow_cnecs().iter().map(|c| c.id).collect()
}

fn all_range_actions(crac: &Crac) -> Vec<ActionId> {
    crac.range_actions().iter().map(|ra| ra.id).collect()
}

fn initial_setpoints(crac: &Crac) -> HashMap<ActionId, f64> {
    crac.range_actions()
        .iter()
        .map(|ra| (ra.id, ra.initial_setpoint()))
        .collect()
}

fn state_status(snapshot: &crate::sensitivity::SensitivitySnapshot, state: State) -> ComputationStatus {
    match snapshot.status_of_state(state) {
        SensitivityStatus::Failure => ComputationStatus::Failure,
        _ => ComputationStatus::Default,
    }
}

/// Converts a tree result into the per-state record shape.
fn state_result(
    state: State,
    tree_result: &SearchTreeResult,
) -> StateOptimizationResult {
    let setpoints = tree_result
        .setpoints
        .iter()
        .map(|(&(action, _), &value)| (action, value))
        .collect();
    StateOptimizationResult {
        status: state_status(&tree_result.snapshot, state),
        activated_network_actions: tree_result.activated_network_actions.clone(),
        setpoints,
        objective: tree_result.objective.clone(),
    }
}

fn run_perimeter(
    input: &RaoInput,
    params: &RaoParameters,
    perimeter: &OptimizationPerimeter,
    pool: &NetworkPool,
    reference: &crate::sensitivity::SensitivitySnapshot,
    setpoints: &HashMap<ActionId, f64>,
    deadline: Option<Instant>,
) -> RaoResult<SearchTreeResult> {
    let tree = SearchTree::new(input.crac, perimeter, params, input.engine);
    tree.run(pool, reference, setpoints, deadline)
}

/// Runs the whole optimization.
///
/// The only fatal sensitivity error is the initial one on the unmodified
/// network: without a reference point nothing can be compared. Later
/// failures degrade the affected state to FAILURE and leave the rest of the
/// result intact. An exhausted time budget is reported on the result, never
/// as an error.
pub fn optimize(
    input: &RaoInput,
    params: &RaoParameters,
    time_budget: Option<Duration>,
) -> RaoResult<AggregatedResult> {
    input.crac.validate()?;
    let deadline = time_budget.map(|budget| Instant::now() + budget);
    let started = Instant::now();

    let initial_snapshot = input
        .engine
        .compute(
            input.network,
            input.crac,
            &all_cnecs(input.crac),
            &all_range_actions(input.crac),
        )
        .map_err(|e| {
            RaoError::SensitivityComputation(format!(
                "initial sensitivity computation failed: {e}"
            ))
        })?;
    let setpoints = initial_setpoints(input.crac);
    info!(
        cnecs = input.crac.flow_cnecs().len(),
        status = ?initial_snapshot.status(),
        "initial sensitivity computed"
    );

    let mut aggregated = AggregatedResult::new(PrePerimeterResult {
        snapshot: initial_snapshot.clone(),
        setpoints: setpoints.clone(),
    });

    // Preventive perimeter, with action-less downstream states folded in.
    let builder = PerimeterBuilder::new(input.crac).with_reference(&initial_snapshot);
    let builder = match params.loop_flow.as_ref() {
        Some(lf) => builder.with_loop_flow_filter(lf),
        None => builder,
    };
    let preventive_perimeter = builder.preventive()?;
    let preventive_state = preventive_perimeter.main_state;

    let pool = NetworkPool::new(input.network, params.tree.leaves_in_parallel);
    let mut time_budget_hit = false;
    let (preventive_actions, preventive_setpoints) = match run_perimeter(
        input,
        params,
        &preventive_perimeter,
        &pool,
        &initial_snapshot,
        &setpoints,
        deadline,
    ) {
        Ok(tree_result) => {
            info!(
                cost = tree_result.cost(),
                actions = ?tree_result.activated_network_actions,
                "preventive perimeter optimized"
            );
            time_budget_hit = tree_result.hit_time_budget;
            aggregated
                .record_state_result(preventive_state, state_result(preventive_state, &tree_result))?;
            (tree_result.activated_network_actions, tree_result.setpoints)
        }
        Err(e) => {
            // The initial snapshot remains a valid preventive operating
            // point: degrade the state instead of discarding the run.
            warn!(error = %e, "preventive perimeter optimization failed");
            let objective = ObjectiveFunction::new(
                input.crac,
                &preventive_perimeter,
                &params.objective,
                params.loop_flow.as_ref(),
            );
            aggregated.record_state_result(
                preventive_state,
                StateOptimizationResult {
                    status: ComputationStatus::Failure,
                    activated_network_actions: Vec::new(),
                    setpoints: HashMap::new(),
                    objective: objective.evaluate(&initial_snapshot),
                },
            )?;
            (Vec::new(), HashMap::new())
        }
    };

    // Carry the preventive decision into a new base network for the
    // downstream perimeters.
    let mut post_preventive = input.network.fork();
    for &id in &preventive_actions {
        post_preventive.apply_network_action(input.crac.network_action(id))?;
    }
    for (&(action, _), &value) in &preventive_setpoints {
        post_preventive.apply_setpoint(input.crac.range_action(action), value)?;
    }
    let post_setpoints: HashMap<ActionId, f64> = {
        let mut merged = setpoints.clone();
        for (&(action, _), &value) in &preventive_setpoints {
            merged.insert(action, value);
        }
        merged
    };

    let downstream_states: Vec<State> = input
        .crac
        .states()
        .into_iter()
        .filter(|s| {
            matches!(
                input.crac.instant(s.instant).kind,
                InstantKind::Auto | InstantKind::Curative
            )
        })
        .filter(|&s| state_has_remedial_actions(input.crac, s, Some(&initial_snapshot)))
        .collect();

    if downstream_states.is_empty() {
        if time_budget_hit {
            aggregated.mark_time_budget_exhausted()?;
        }
        aggregated.freeze();
        return Ok(aggregated);
    }

    let post_snapshot = match input.engine.compute(
        &*post_preventive,
        input.crac,
        &all_cnecs(input.crac),
        &all_range_actions(input.crac),
    ) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // No usable reference for the downstream perimeters: degrade
            // them all instead of discarding the preventive result.
            warn!(error = %e, "post-preventive sensitivity failed, downstream states degraded");
            for state in downstream_states {
                let perimeter = PerimeterBuilder::new(input.crac).curative(state).or_else(
                    |_| PerimeterBuilder::new(input.crac).auto(state),
                )?;
                let objective = ObjectiveFunction::new(
                    input.crac,
                    &perimeter,
                    &params.objective,
                    params.loop_flow.as_ref(),
                );
                aggregated.record_state_result(
                    state,
                    StateOptimizationResult {
                        status: ComputationStatus::Failure,
                        activated_network_actions: Vec::new(),
                        setpoints: HashMap::new(),
                        objective: objective.evaluate(&initial_snapshot),
                    },
                )?;
            }
            aggregated.freeze();
            return Ok(aggregated);
        }
    };

    // Downstream perimeters are independent: one contingency's curative
    // decision never constrains another's.
    let pool = NetworkPool::new(&*post_preventive, params.tree.leaves_in_parallel);
    let downstream: Vec<(State, RaoResult<SearchTreeResult>)> = downstream_states
        .par_iter()
        .map(|&state| {
            let builder = PerimeterBuilder::new(input.crac).with_reference(&post_snapshot);
            let builder = match params.loop_flow.as_ref() {
                Some(lf) => builder.with_loop_flow_filter(lf),
                None => builder,
            };
            let perimeter = match input.crac.instant(state.instant).kind {
                InstantKind::Auto => builder.auto(state),
                _ => builder.curative(state),
            };
            let result = perimeter.and_then(|perimeter| {
                run_perimeter(
                    input,
                    params,
                    &perimeter,
                    &pool,
                    &post_snapshot,
                    &post_setpoints,
                    deadline,
                )
            });
            (state, result)
        })
        .collect();

    for (state, outcome) in downstream {
        match outcome {
            Ok(tree_result) => {
                time_budget_hit |= tree_result.hit_time_budget;
                aggregated.record_state_result(state, state_result(state, &tree_result))?;
            }
            Err(e) => {
                warn!(error = %e, ?state, "perimeter optimization failed");
                let perimeter = match input.crac.instant(state.instant).kind {
                    InstantKind::Auto => PerimeterBuilder::new(input.crac).auto(state)?,
                    _ => PerimeterBuilder::new(input.crac).curative(state)?,
                };
                let objective = ObjectiveFunction::new(
                    input.crac,
                    &perimeter,
                    &params.objective,
                    params.loop_flow.as_ref(),
                );
                aggregated.record_state_result(
                    state,
                    StateOptimizationResult {
                        status: ComputationStatus::Failure,
                        activated_network_actions: Vec::new(),
                        setpoints: HashMap::new(),
                        objective: objective.evaluate(&post_snapshot),
                    },
                )?;
            }
        }
    }

    if time_budget_hit {
        aggregated.mark_time_budget_exhausted()?;
    }
    aggregated.freeze();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        states = aggregated.optimized_states().count(),
        "optimization finished"
    );
    Ok(aggregated)
}
