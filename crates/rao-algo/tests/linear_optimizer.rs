//! Iterating linear optimizer behavior against the linear mock grid.

use rao_algo::linear::{IteratingLinearOptimizer, LinearProblemStatus};
use rao_algo::params::RaoParameters;
use rao_algo::perimeter::PerimeterBuilder;
use rao_algo::test_utils::MockGrid;
use rao_core::{
    ActionId, CnecId, Crac, FlowCnec, InstantKind, RangeAction, RangeActionKind, SetpointRange,
    Side, State, Threshold, Unit, UsageMethod, UsageRule,
};
use std::collections::HashMap;

fn pst(id: usize, name: &str, crac: &mut Crac, instant: rao_core::InstantId) -> ActionId {
    crac.add_range_action(
        RangeAction::new(
            ActionId::new(id),
            name,
            RangeActionKind::PstTap {
                taps: (-10..=10).map(f64::from).collect(),
                initial_tap: 10,
            },
        )
        .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, instant)),
    )
}

fn overloaded_crac() -> (Crac, State) {
    let mut crac = Crac::new();
    let prev = crac.add_instant("preventive", InstantKind::Preventive);
    let basecase = State::preventive(prev);
    crac.add_flow_cnec(
        FlowCnec::new(CnecId::new(0), "line", basecase)
            .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
            .optimized(),
    );
    (crac, basecase)
}

#[test]
fn test_pst_moved_to_secure_the_line() {
    let (mut crac, basecase) = overloaded_crac();
    let pst_id = pst(0, "pst", &mut crac, basecase.instant);

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 550.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, pst_id, -13.0);

    let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
    let params = RaoParameters::default();
    let engine = grid.engine();
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    assert_eq!(result.status, LinearProblemStatus::Optimal);
    let setpoint = result.setpoints[&(pst_id, basecase)];
    assert!((setpoint - 10.0).abs() < 1e-6, "setpoint was {setpoint}");
    assert!((result.cost() - (-80.0)).abs() < 1.0);
}

#[test]
fn test_setpoints_land_on_tap_positions() {
    let (mut crac, basecase) = overloaded_crac();
    // Range cap at 2.5 degrees, between taps 2 and 3: the raw LP optimum
    // sits off-ladder and must be rounded.
    let pst_id = crac.add_range_action(
        RangeAction::new(
            ActionId::new(0),
            "pst",
            RangeActionKind::PstTap {
                taps: (-10..=10).map(f64::from).collect(),
                initial_tap: 10,
            },
        )
        .with_range(SetpointRange::absolute(-2.5, 2.5))
        .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, basecase.instant)),
    );

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 530.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, pst_id, -13.0);

    let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
    let params = RaoParameters::default();
    let engine = grid.engine();
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    let setpoint = result.setpoints[&(pst_id, basecase)];
    assert_eq!(setpoint, setpoint.round(), "setpoint {setpoint} is off-tap");
}

#[test]
fn test_sensitivity_failure_keeps_best_validated_point() {
    let (mut crac, basecase) = overloaded_crac();
    let pst_id = pst(0, "pst", &mut crac, basecase.instant);

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 550.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, pst_id, -13.0);

    let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
    let params = RaoParameters::default();
    // Every recomputation fails; only the caller-provided snapshot is valid.
    let engine = grid.failing_engine(1);
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    assert_eq!(
        result.status,
        LinearProblemStatus::SensitivityComputationFailed
    );
    // Nothing validated beyond the starting point.
    assert_eq!(result.setpoints[&(pst_id, basecase)], 0.0);
    assert!((result.cost() - 50.0).abs() < 1e-6);
}

#[test]
fn test_grouped_actions_stay_aligned() {
    let mut crac = Crac::new();
    let prev = crac.add_instant("preventive", InstantKind::Preventive);
    let basecase = State::preventive(prev);
    crac.add_flow_cnec(
        FlowCnec::new(CnecId::new(0), "line", basecase)
            .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
            .optimized(),
    );
    for (i, name) in [(0, "pst-a"), (1, "pst-b")] {
        crac.add_range_action(
            RangeAction::new(
                ActionId::new(i),
                name,
                RangeActionKind::PstTap {
                    taps: (-10..=10).map(f64::from).collect(),
                    initial_tap: 10,
                },
            )
            .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, prev))
            .with_group("bank-1"),
        );
    }

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 550.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, ActionId::new(0), -8.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, ActionId::new(1), -5.0);

    let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
    let params = RaoParameters::default();
    let engine = grid.engine();
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    let a = result.setpoints[&(ActionId::new(0), basecase)];
    let b = result.setpoints[&(ActionId::new(1), basecase)];
    assert!((a - b).abs() < 1e-6, "group drifted: {a} vs {b}");
}

#[test]
fn test_relative_range_restricts_moves() {
    let mut crac = Crac::new();
    let prev = crac.add_instant("preventive", InstantKind::Preventive);
    let basecase = State::preventive(prev);
    crac.add_flow_cnec(
        FlowCnec::new(CnecId::new(0), "line", basecase)
            .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 500.0))
            .optimized(),
    );
    let hvdc = crac.add_range_action(
        RangeAction::new(ActionId::new(0), "hvdc", RangeActionKind::Hvdc)
            .with_range(SetpointRange::absolute(-1000.0, 1000.0))
            .with_range(SetpointRange::relative_to_initial(-100.0, 100.0))
            .with_usage_rule(UsageRule::free_to_use(UsageMethod::Available, prev)),
    );

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 800.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, hvdc, -1.0);

    let perimeter = PerimeterBuilder::new(&crac).preventive().unwrap();
    let params = RaoParameters::default();
    let engine = grid.engine();
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    // The overload needs a 300 MW shift but the initial-setpoint range caps
    // the move at 100 MW per optimization.
    let setpoint = result.setpoints[&(hvdc, basecase)];
    assert!((setpoint - 100.0).abs() < 1e-3, "setpoint was {setpoint}");
}

#[test]
fn test_curative_ra_cap_moves_a_single_action() {
    let mut crac = Crac::new();
    let _prev = crac.add_instant("preventive", InstantKind::Preventive);
    let cur = crac.add_instant("curative", InstantKind::Curative);
    let co = crac.add_contingency("co");
    let cur_state = State::post_contingency(cur, co);
    crac.add_flow_cnec(
        FlowCnec::new(CnecId::new(0), "line", cur_state)
            .with_threshold(Threshold::max(Side::Left, Unit::Megawatt, 600.0))
            .optimized(),
    );
    for (i, name) in [(0, "hvdc-a"), (1, "hvdc-b")] {
        crac.add_range_action(
            RangeAction::new(ActionId::new(i), name, RangeActionKind::Hvdc)
                .with_range(SetpointRange::absolute(-100.0, 100.0))
                .with_usage_rule(UsageRule::on_state(UsageMethod::Available, cur_state)),
        );
    }

    let mut grid = MockGrid::new();
    grid.set_base_flow(CnecId::new(0), Side::Left, 700.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, ActionId::new(0), -1.0);
    grid.set_sensitivity(CnecId::new(0), Side::Left, ActionId::new(1), -1.0);

    let perimeter = PerimeterBuilder::new(&crac).curative(cur_state).unwrap();
    // One activation allowed: the relaxed count constraint alone would let
    // both converters take half of it.
    let mut params = RaoParameters::default();
    params.ra_limits.max_curative_ra = Some(1);
    let engine = grid.engine();
    let mut handle = grid.handle();
    let snapshot = grid.snapshot(&crac);

    let optimizer = IteratingLinearOptimizer::new(&crac, &perimeter, &params, &engine);
    let result = optimizer
        .optimize(&mut handle, &snapshot, &HashMap::new(), &[])
        .unwrap();

    assert_eq!(result.status, LinearProblemStatus::Optimal);
    let moved: Vec<f64> = result
        .setpoints
        .values()
        .copied()
        .filter(|v| v.abs() > 1e-6)
        .collect();
    assert_eq!(moved.len(), 1, "setpoints were {:?}", result.setpoints);
    // The single kept converter absorbs the full 100 MW shift.
    assert!((moved[0] - 100.0).abs() < 1e-3, "moved {}", moved[0]);
}
