use std::collections::BTreeMap;
use std::fmt;

use refinery_solver::{ConstraintViolation, LpProblem, Solution, SolutionStatus, Solver};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::index::VariableKey;
use crate::instance::ModelInstance;

/// Anything that can solve a lowered model synchronously
pub trait ExternalSolver {
    fn solve(&self, problem: &LpProblem) -> Solution;
}

impl ExternalSolver for Solver {
    fn solve(&self, problem: &LpProblem) -> Solution {
        Solver::solve(self, problem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveStatus {
    Solved,
    Failed,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Solved => write!(f, "solved"),
            SolveStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How the solver finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCondition {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    Error,
}

impl From<SolutionStatus> for TerminationCondition {
    fn from(status: SolutionStatus) -> Self {
        match status {
            SolutionStatus::Optimal => TerminationCondition::Optimal,
            SolutionStatus::Infeasible => TerminationCondition::Infeasible,
            SolutionStatus::Unbounded => TerminationCondition::Unbounded,
            SolutionStatus::IterationLimit => TerminationCondition::IterationLimit,
            SolutionStatus::Error => TerminationCondition::Error,
        }
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationCondition::Optimal => "optimal",
            TerminationCondition::Infeasible => "infeasible",
            TerminationCondition::Unbounded => "unbounded",
            TerminationCondition::IterationLimit => "iteration_limit",
            TerminationCondition::Error => "error",
        };
        f.write_str(text)
    }
}

/// Result of one solve, keyed by model variables rather than solver columns
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub termination: TerminationCondition,
    /// Set only when optimal
    pub objective: Option<f64>,
    /// Empty unless optimal
    pub values: BTreeMap<VariableKey, f64>,
    pub violations: Vec<ConstraintViolation>,
}

impl SolveOutcome {
    pub fn is_optimal(&self) -> bool {
        self.termination == TerminationCondition::Optimal
    }

    pub fn failed(termination: TerminationCondition) -> Self {
        Self {
            status: SolveStatus::Failed,
            termination,
            objective: None,
            values: BTreeMap::new(),
            violations: Vec::new(),
        }
    }
}

/// Lower `instance` with its current parameters and hand it to `solver`
pub fn solve<S: ExternalSolver + ?Sized>(instance: &ModelInstance, solver: &S) -> SolveOutcome {
    let problem = instance.to_lp_problem();
    debug!(
        variables = problem.num_variables(),
        constraints = problem.num_constraints(),
        "solving lowered model"
    );
    let solution = solver.solve(&problem);

    if !solution.is_optimal() {
        for violation in &solution.violations {
            warn!(
                constraint = %violation.constraint,
                required = violation.required,
                actual = violation.actual,
                "{}",
                violation.description
            );
        }
        return SolveOutcome {
            violations: solution.violations,
            ..SolveOutcome::failed(solution.status.into())
        };
    }

    if solution.values.len() != instance.variables().len() {
        warn!(
            expected = instance.variables().len(),
            found = solution.values.len(),
            "solver returned a solution of the wrong size"
        );
        return SolveOutcome::failed(TerminationCondition::Error);
    }

    let values = instance
        .variables()
        .iter()
        .cloned()
        .zip(solution.values)
        .collect();
    SolveOutcome {
        status: SolveStatus::Solved,
        termination: TerminationCondition::Optimal,
        objective: Some(solution.objective_value),
        values,
        violations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_names() {
        assert_eq!(TerminationCondition::IterationLimit.to_string(), "iteration_limit");
        assert_eq!(TerminationCondition::from(SolutionStatus::Infeasible).to_string(), "infeasible");
        assert_eq!(SolveStatus::Failed.to_string(), "failed");
        assert_eq!(
            serde_json::to_string(&TerminationCondition::IterationLimit).unwrap(),
            "\"iteration_limit\""
        );
    }

    #[test]
    fn test_failed_outcome_is_empty() {
        let outcome = SolveOutcome::failed(TerminationCondition::Unbounded);
        assert!(!outcome.is_optimal());
        assert_eq!(outcome.status, SolveStatus::Failed);
        assert!(outcome.objective.is_none());
        assert!(outcome.values.is_empty());
    }
}
