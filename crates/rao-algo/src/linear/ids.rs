//! Deterministic key scheme for linear-problem variables and constraints.
//!
//! Every filler addresses the problem through these functions, so a filler
//! can read another filler's variables (the margin fillers read the flow
//! variables created by the core filler) without sharing state. Keys are
//! stable across runs for a given catalog, which keeps solves reproducible.

use rao_core::{ActionId, CnecId, Side, State};

fn side_tag(side: Side) -> &'static str {
    match side {
        Side::Left => "left",
        Side::Right => "right",
    }
}

fn state_tag(state: State) -> String {
    match state.contingency {
        None => format!("i{}", state.instant.value()),
        Some(co) => format!("i{}c{}", state.instant.value(), co.value()),
    }
}

pub fn flow_variable(cnec: CnecId, side: Side) -> String {
    format!("cnec{}_{}_flow", cnec.value(), side_tag(side))
}

pub fn flow_constraint(cnec: CnecId, side: Side) -> String {
    format!("cnec{}_{}_flow_def", cnec.value(), side_tag(side))
}

pub fn setpoint_variable(action: ActionId, state: State) -> String {
    format!("ra{}_{}_setpoint", action.value(), state_tag(state))
}

pub fn absolute_variation_variable(action: ActionId, state: State) -> String {
    format!("ra{}_{}_abs_variation", action.value(), state_tag(state))
}

pub fn absolute_variation_constraint(action: ActionId, state: State, direction: &str) -> String {
    format!(
        "ra{}_{}_abs_variation_{}",
        action.value(),
        state_tag(state),
        direction
    )
}

pub fn activation_variable(action: ActionId, state: State) -> String {
    format!("ra{}_{}_activation", action.value(), state_tag(state))
}

pub fn activation_link_constraint(action: ActionId, state: State) -> String {
    format!("ra{}_{}_activation_link", action.value(), state_tag(state))
}

pub fn ra_count_constraint(state: State) -> String {
    format!("{}_ra_count", state_tag(state))
}

pub fn operator_ra_count_constraint(operator: &str, state: State) -> String {
    format!("{}_{}_ra_count", state_tag(state), operator)
}

pub fn group_setpoint_variable(group: &str, state: State) -> String {
    format!("group_{}_{}_setpoint", group, state_tag(state))
}

pub fn group_link_constraint(action: ActionId, state: State) -> String {
    format!("ra{}_{}_group_link", action.value(), state_tag(state))
}

pub fn min_margin_variable() -> String {
    "min_margin".to_string()
}

pub fn min_relative_margin_variable() -> String {
    "min_relative_margin".to_string()
}

pub fn margin_constraint(cnec: CnecId, side: Side, direction: &str) -> String {
    format!("cnec{}_{}_margin_{}", cnec.value(), side_tag(side), direction)
}

pub fn relative_margin_constraint(cnec: CnecId, side: Side, direction: &str) -> String {
    format!(
        "cnec{}_{}_rel_margin_{}",
        cnec.value(),
        side_tag(side),
        direction
    )
}

pub fn loop_flow_violation_variable(cnec: CnecId, side: Side) -> String {
    format!("cnec{}_{}_lf_violation", cnec.value(), side_tag(side))
}

pub fn loop_flow_constraint(cnec: CnecId, side: Side, direction: &str) -> String {
    format!("cnec{}_{}_lf_{}", cnec.value(), side_tag(side), direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{ContingencyId, InstantId};

    #[test]
    fn test_keys_distinguish_states() {
        let prev = State::preventive(InstantId::new(0));
        let cur = State::post_contingency(InstantId::new(2), ContingencyId::new(1));
        assert_ne!(
            setpoint_variable(ActionId::new(3), prev),
            setpoint_variable(ActionId::new(3), cur)
        );
    }

    #[test]
    fn test_keys_distinguish_sides() {
        assert_ne!(
            flow_variable(CnecId::new(0), Side::Left),
            flow_variable(CnecId::new(0), Side::Right)
        );
    }
}
