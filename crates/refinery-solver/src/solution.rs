/// The result of solving an LP problem
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Solution {
    /// Solution status
    pub status: SolutionStatus,
    /// Optimal values for each variable (empty unless optimal)
    pub values: Vec<f64>,
    /// Optimal objective value
    pub objective_value: f64,
    /// Constraint violations (populated when infeasible)
    pub violations: Vec<ConstraintViolation>,
    /// Number of pivots performed across both phases
    pub iterations: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionStatus {
    /// An optimal solution was found
    Optimal,
    /// The problem is infeasible (no solution exists)
    Infeasible,
    /// The problem is unbounded
    Unbounded,
    /// The pivot budget ran out before optimality was proven
    IterationLimit,
    /// Solver encountered an error (malformed problem)
    Error,
}

/// Information about a violated constraint
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ConstraintViolation {
    /// Constraint name
    pub constraint: String,
    /// Required value (from constraint RHS)
    pub required: f64,
    /// Actual value achieved
    pub actual: f64,
    /// How much the constraint is violated by
    pub violation_amount: f64,
    /// Human-readable description of what's wrong
    pub description: String,
}

impl Solution {
    pub fn with_status(status: SolutionStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective_value: f64::NAN,
            violations: Vec::new(),
            iterations: 0,
        }
    }

    pub fn infeasible() -> Self {
        Self::with_status(SolutionStatus::Infeasible)
    }

    pub fn infeasible_with_violations(violations: Vec<ConstraintViolation>) -> Self {
        Self {
            violations,
            ..Self::infeasible()
        }
    }

    pub fn unbounded() -> Self {
        Self::with_status(SolutionStatus::Unbounded)
    }

    pub fn error() -> Self {
        Self::with_status(SolutionStatus::Error)
    }

    pub fn is_optimal(&self) -> bool {
        self.status == SolutionStatus::Optimal
    }
}
