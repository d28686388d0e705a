//! String-keyed linear problem container.
//!
//! Fillers declare variables and constraints against stable keys (see
//! [`super::ids`]); the container rebuilds a fresh `good_lp` model on every
//! [`LinearProblem::solve`], so bounds and coefficients can be updated
//! between sensitivity iterations without holding solver state.
//!
//! Binary decisions are relaxed to continuous `[0, 1]` and rounded by the
//! caller; the conic backend handles the resulting pure LP.

use good_lp::solvers::clarabel::clarabel;
use good_lp::{
    constraint, variable, variables, Expression, ResolutionError, Solution, SolverModel, Variable,
};
use rao_core::{RaoError, RaoResult};
use std::collections::HashMap;

/// Outcome of a linear solve, in decreasing order of quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinearProblemStatus {
    /// Proven optimal.
    Optimal,
    /// Feasible but not proven optimal (e.g. iteration cap hit with a valid
    /// incumbent).
    Feasible,
    Infeasible,
    Unbounded,
    /// Solver gave up for a non-structural reason.
    Abnormal,
    MaxIterationReached,
    SensitivityComputationFailed,
    NotSolved,
}

impl LinearProblemStatus {
    /// Whether a usable solution exists under this status.
    pub fn has_solution(&self) -> bool {
        matches!(
            self,
            LinearProblemStatus::Optimal
                | LinearProblemStatus::Feasible
                | LinearProblemStatus::MaxIterationReached
        )
    }
}

#[derive(Debug, Clone)]
struct VariableDef {
    lower: f64,
    upper: f64,
    objective: f64,
}

#[derive(Debug, Clone, Default)]
struct ConstraintDef {
    lower: f64,
    upper: f64,
    /// Variable index → coefficient.
    coefficients: HashMap<usize, f64>,
}

/// Values of all variables after a successful solve.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    pub status: LinearProblemStatus,
    values: HashMap<String, f64>,
    pub objective_value: f64,
}

impl LinearSolution {
    /// Value of a variable, 0.0 if the key was never declared.
    pub fn value(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }
}

/// A mutable LP definition, rebuilt into a solver model on each solve.
#[derive(Debug, Clone, Default)]
pub struct LinearProblem {
    variable_index: HashMap<String, usize>,
    variable_keys: Vec<String>,
    variable_defs: Vec<VariableDef>,
    constraint_index: HashMap<String, usize>,
    constraint_defs: Vec<ConstraintDef>,
}

impl LinearProblem {
    /// Large finite stand-in for an unbounded value; conic solvers dislike
    /// actual infinities.
    pub fn infinity() -> f64 {
        1e9
    }

    fn clamp(value: f64) -> f64 {
        value.clamp(-Self::infinity(), Self::infinity())
    }

    /// Rounds a bound to 30 fractional bits so that bounds derived from the
    /// same quantity through different float paths compare equal.
    pub fn round_bound(value: f64) -> f64 {
        let scale = (1u64 << 30) as f64;
        (value * scale).round() / scale
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, key: &str, lower: f64, upper: f64) -> RaoResult<()> {
        if self.variable_index.contains_key(key) {
            return Err(RaoError::Validation(format!(
                "duplicate variable key: {key}"
            )));
        }
        self.variable_index
            .insert(key.to_string(), self.variable_defs.len());
        self.variable_keys.push(key.to_string());
        self.variable_defs.push(VariableDef {
            lower: Self::clamp(Self::round_bound(lower)),
            upper: Self::clamp(Self::round_bound(upper)),
            objective: 0.0,
        });
        Ok(())
    }

    /// A binary decision, relaxed to continuous `[0, 1]`.
    pub fn add_binary_variable(&mut self, key: &str) -> RaoResult<()> {
        self.add_variable(key, 0.0, 1.0)
    }

    pub fn has_variable(&self, key: &str) -> bool {
        self.variable_index.contains_key(key)
    }

    fn variable(&mut self, key: &str) -> RaoResult<usize> {
        self.variable_index
            .get(key)
            .copied()
            .ok_or_else(|| RaoError::Validation(format!("unknown variable key: {key}")))
    }

    pub fn set_variable_bounds(&mut self, key: &str, lower: f64, upper: f64) -> RaoResult<()> {
        let idx = self.variable(key)?;
        self.variable_defs[idx].lower = Self::clamp(Self::round_bound(lower));
        self.variable_defs[idx].upper = Self::clamp(Self::round_bound(upper));
        Ok(())
    }

    /// Sets the variable's coefficient in the (minimized) objective.
    pub fn set_objective_coefficient(&mut self, key: &str, coefficient: f64) -> RaoResult<()> {
        let idx = self.variable(key)?;
        self.variable_defs[idx].objective = coefficient;
        Ok(())
    }

    pub fn add_constraint(&mut self, key: &str, lower: f64, upper: f64) -> RaoResult<()> {
        if self.constraint_index.contains_key(key) {
            return Err(RaoError::Validation(format!(
                "duplicate constraint key: {key}"
            )));
        }
        self.constraint_index
            .insert(key.to_string(), self.constraint_defs.len());
        self.constraint_defs.push(ConstraintDef {
            lower: Self::clamp(Self::round_bound(lower)),
            upper: Self::clamp(Self::round_bound(upper)),
            coefficients: HashMap::new(),
        });
        Ok(())
    }

    pub fn set_constraint_bounds(&mut self, key: &str, lower: f64, upper: f64) -> RaoResult<()> {
        let idx = self
            .constraint_index
            .get(key)
            .copied()
            .ok_or_else(|| RaoError::Validation(format!("unknown constraint key: {key}")))?;
        self.constraint_defs[idx].lower = Self::clamp(Self::round_bound(lower));
        self.constraint_defs[idx].upper = Self::clamp(Self::round_bound(upper));
        Ok(())
    }

    pub fn set_coefficient(
        &mut self,
        constraint_key: &str,
        variable_key: &str,
        coefficient: f64,
    ) -> RaoResult<()> {
        let var_idx = self.variable(variable_key)?;
        let cons_idx = self
            .constraint_index
            .get(constraint_key)
            .copied()
            .ok_or_else(|| {
                RaoError::Validation(format!("unknown constraint key: {constraint_key}"))
            })?;
        self.constraint_defs[cons_idx]
            .coefficients
            .insert(var_idx, coefficient);
        Ok(())
    }

    /// Builds and solves a fresh model from the current definitions.
    pub fn solve(&self) -> RaoResult<LinearSolution> {
        let mut vars = variables!();
        let solver_vars: Vec<Variable> = self
            .variable_defs
            .iter()
            .map(|def| vars.add(variable().min(def.lower).max(def.upper)))
            .collect();

        let mut objective = Expression::from(0.0);
        for (def, var) in self.variable_defs.iter().zip(&solver_vars) {
            if def.objective != 0.0 {
                objective += def.objective * *var;
            }
        }

        let mut model = vars.minimise(objective).using(clarabel);
        for def in &self.constraint_defs {
            let mut expr = Expression::from(0.0);
            for (&var_idx, &coefficient) in &def.coefficients {
                expr += coefficient * solver_vars[var_idx];
            }
            if def.lower == def.upper {
                model = model.with(constraint!(expr == def.lower));
            } else {
                if def.lower > -Self::infinity() {
                    model = model.with(constraint!(expr.clone() >= def.lower));
                }
                if def.upper < Self::infinity() {
                    model = model.with(constraint!(expr <= def.upper));
                }
            }
        }

        let solution = match model.solve() {
            Ok(solution) => solution,
            Err(ResolutionError::Infeasible) => {
                return Ok(LinearSolution {
                    status: LinearProblemStatus::Infeasible,
                    values: HashMap::new(),
                    objective_value: f64::NAN,
                })
            }
            Err(ResolutionError::Unbounded) => {
                return Ok(LinearSolution {
                    status: LinearProblemStatus::Unbounded,
                    values: HashMap::new(),
                    objective_value: f64::NAN,
                })
            }
            Err(e) => {
                tracing::warn!(error = ?e, "linear solve aborted");
                return Ok(LinearSolution {
                    status: LinearProblemStatus::Abnormal,
                    values: HashMap::new(),
                    objective_value: f64::NAN,
                });
            }
        };

        let values: HashMap<String, f64> = self
            .variable_keys
            .iter()
            .zip(&solver_vars)
            .map(|(key, var)| (key.clone(), solution.value(*var)))
            .collect();
        let objective_value = self
            .variable_keys
            .iter()
            .zip(&self.variable_defs)
            .map(|(key, def)| def.objective * values[key])
            .sum();

        Ok(LinearSolution {
            status: LinearProblemStatus::Optimal,
            values,
            objective_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_lp_solves_to_bound() {
        let mut problem = LinearProblem::new();
        problem.add_variable("x", 0.0, 10.0).unwrap();
        problem.set_objective_coefficient("x", 1.0).unwrap();
        // x >= 3
        problem.add_constraint("floor", 3.0, LinearProblem::infinity()).unwrap();
        problem.set_coefficient("floor", "x", 1.0).unwrap();

        let solution = problem.solve().unwrap();
        assert_eq!(solution.status, LinearProblemStatus::Optimal);
        assert!((solution.value("x") - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_reported_not_error() {
        let mut problem = LinearProblem::new();
        problem.add_variable("x", 0.0, 1.0).unwrap();
        problem.add_constraint("impossible", 5.0, LinearProblem::infinity()).unwrap();
        problem.set_coefficient("impossible", "x", 1.0).unwrap();

        let solution = problem.solve().unwrap();
        assert_eq!(solution.status, LinearProblemStatus::Infeasible);
    }

    #[test]
    fn test_duplicate_variable_key_rejected() {
        let mut problem = LinearProblem::new();
        problem.add_variable("x", 0.0, 1.0).unwrap();
        assert!(problem.add_variable("x", 0.0, 2.0).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut problem = LinearProblem::new();
        assert!(problem.set_objective_coefficient("ghost", 1.0).is_err());
        assert!(problem.set_coefficient("ghost", "ghost", 1.0).is_err());
    }

    #[test]
    fn test_bounds_update_between_solves() {
        let mut problem = LinearProblem::new();
        problem.add_variable("x", 0.0, 10.0).unwrap();
        problem.set_objective_coefficient("x", -1.0).unwrap(); // maximize x
        let first = problem.solve().unwrap();
        assert!((first.value("x") - 10.0).abs() < 1e-6);

        problem.set_variable_bounds("x", 0.0, 4.0).unwrap();
        let second = problem.solve().unwrap();
        assert!((second.value("x") - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_infinite_bounds_are_clamped() {
        let mut problem = LinearProblem::new();
        problem
            .add_variable("x", f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        problem.set_objective_coefficient("x", 1.0).unwrap();
        let solution = problem.solve().unwrap();
        assert_eq!(solution.status, LinearProblemStatus::Optimal);
        assert!((solution.value("x") + LinearProblem::infinity()).abs() < 1.0);
    }

    #[test]
    fn test_equality_constraint() {
        let mut problem = LinearProblem::new();
        problem.add_variable("x", 0.0, 10.0).unwrap();
        problem.add_variable("y", 0.0, 10.0).unwrap();
        problem.set_objective_coefficient("y", 1.0).unwrap();
        // y - x == 2, minimize y with x free: y = 2 at x = 0.
        problem.add_constraint("link", 2.0, 2.0).unwrap();
        problem.set_coefficient("link", "y", 1.0).unwrap();
        problem.set_coefficient("link", "x", -1.0).unwrap();

        let solution = problem.solve().unwrap();
        assert!((solution.value("y") - solution.value("x") - 2.0).abs() < 1e-6);
    }
}
