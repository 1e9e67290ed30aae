use std::collections::HashMap;

use tracing::{debug, warn};

use crate::problem::{Constraint, ConstraintOp, LpProblem};
use crate::solution::{ConstraintViolation, Solution, SolutionStatus};

/// Simplex solver for linear programming problems
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
#[derive(Debug, Clone)]
pub struct Solver {
    /// Maximum pivots (both phases together) before giving up
    max_iterations: usize,
    /// Tolerance for pivot and reduced cost comparisons
    tolerance: f64,
    /// Phase 1 residual allowed per unit of the largest right-hand side
    feasibility_tolerance: f64,
    /// Consecutive degenerate pivots before switching to Bland's rule
    degenerate_limit: usize,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
            degenerate_limit: 50,
        }
    }
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_feasibility_tolerance(mut self, tol: f64) -> Self {
        self.feasibility_tolerance = tol;
        self
    }

    pub fn with_degenerate_limit(mut self, limit: usize) -> Self {
        self.degenerate_limit = limit;
        self
    }

    /// Solve the LP problem using the two-phase simplex method
    pub fn solve(&self, problem: &LpProblem) -> Solution {
        if let Err(err) = problem.validate() {
            warn!("rejecting malformed LP: {err}");
            return Solution::error();
        }

        let solution = self.run(problem);
        debug!(
            status = ?solution.status,
            iterations = solution.iterations,
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            "simplex finished"
        );

        if solution.status == SolutionStatus::Infeasible {
            return self.solve_with_relaxation(problem);
        }
        solution
    }

    /// Both simplex phases without any infeasibility diagnostics
    fn run(&self, problem: &LpProblem) -> Solution {
        let mut tableau = self.build_tableau(problem);

        // Phase 1: Find initial basic feasible solution
        if tableau.n_artificial > 0 {
            if let Err(status) = self.phase1(&mut tableau, problem) {
                let mut failed = Solution::with_status(status);
                failed.iterations = tableau.iterations;
                return failed;
            }
        }

        // Phase 2: Optimize, never letting an artificial column re-enter
        let entering_limit = tableau.n_vars + tableau.n_slack;
        let status = match self.iterate(&mut tableau, entering_limit) {
            SimplexResult::Optimal => SolutionStatus::Optimal,
            SimplexResult::Unbounded => SolutionStatus::Unbounded,
            SimplexResult::IterationLimit => SolutionStatus::IterationLimit,
        };
        if status != SolutionStatus::Optimal {
            let mut failed = Solution::with_status(status);
            failed.iterations = tableau.iterations;
            return failed;
        }

        self.extract_solution(&tableau, problem)
    }

    /// When the original problem is infeasible, look for the constraints responsible
    /// by relaxing the lower bounds and reporting which ones the relaxed optimum breaks
    fn solve_with_relaxation(&self, problem: &LpProblem) -> Solution {
        let mut relaxed = LpProblem::new(problem.variables.clone());
        relaxed.set_objective(problem.objective.coefficients.clone(), problem.objective.minimize);

        // Keep upper limits and balances, drop >= requirements
        for c in &problem.constraints {
            if c.op != ConstraintOp::Ge {
                relaxed.add_constraint(c.name.clone(), c.coefficients.clone(), c.op, c.rhs);
            }
        }

        let relaxed_solution = self.run(&relaxed);
        if relaxed_solution.status != SolutionStatus::Optimal {
            // Even relaxed problem fails - analyze direct conflicts
            return self.analyze_conflicts(problem);
        }

        let violations = self.find_violations(problem, &relaxed_solution.values);
        if violations.is_empty() {
            // The relaxed optimum satisfies every constraint, so it is optimal for the original
            return relaxed_solution;
        }

        Solution::infeasible_with_violations(violations)
    }

    /// Find which constraints are violated by a given solution
    fn find_violations(&self, problem: &LpProblem, values: &[f64]) -> Vec<ConstraintViolation> {
        let tol = self.feasibility_threshold(problem);
        let mut violations: Vec<ConstraintViolation> = problem
            .constraints
            .iter()
            .filter_map(|c| violation(c, problem.activity(c, values), tol))
            .collect();

        // Worst first
        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        violations
    }

    /// Analyze direct constraint conflicts when even relaxed solve fails
    fn analyze_conflicts(&self, problem: &LpProblem) -> Solution {
        // Group constraints by their coefficient sign pattern
        let mut constraint_groups: HashMap<Vec<i8>, Vec<&Constraint>> = HashMap::new();
        for c in &problem.constraints {
            let key: Vec<i8> = c
                .coefficients
                .iter()
                .map(|&x| {
                    if x.abs() < self.tolerance {
                        0
                    } else if x > 0.0 {
                        1
                    } else {
                        -1
                    }
                })
                .collect();
            constraint_groups.entry(key).or_default().push(c);
        }

        let mut violations = Vec::new();
        for constraints in constraint_groups.values() {
            let mut min_bound: Option<(f64, &str)> = None;
            let mut max_bound: Option<(f64, &str)> = None;

            for c in constraints {
                match c.op {
                    ConstraintOp::Ge => {
                        if min_bound.is_none_or(|(rhs, _)| c.rhs > rhs) {
                            min_bound = Some((c.rhs, c.name.as_str()));
                        }
                    }
                    ConstraintOp::Le => {
                        if max_bound.is_none_or(|(rhs, _)| c.rhs < rhs) {
                            max_bound = Some((c.rhs, c.name.as_str()));
                        }
                    }
                    ConstraintOp::Eq => {
                        min_bound = Some((c.rhs, c.name.as_str()));
                        max_bound = Some((c.rhs, c.name.as_str()));
                    }
                }
            }

            if let (Some((min_val, min_name)), Some((max_val, max_name))) = (min_bound, max_bound) {
                if min_val > max_val + self.tolerance {
                    violations.push(ConstraintViolation {
                        constraint: format!("{} vs {}", min_name, max_name),
                        required: min_val,
                        actual: max_val,
                        violation_amount: min_val - max_val,
                        description: format!(
                            "Conflict: {} requires >= {:.2} but {} requires <= {:.2}",
                            min_name, min_val, max_name, max_val
                        ),
                    });
                }
            }
        }

        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        Solution::infeasible_with_violations(violations)
    }

    fn feasibility_threshold(&self, problem: &LpProblem) -> f64 {
        let scale = problem
            .constraints
            .iter()
            .map(|c| c.rhs.abs())
            .fold(1.0, f64::max);
        self.feasibility_tolerance * scale
    }

    fn build_tableau(&self, problem: &LpProblem) -> Tableau {
        let n_vars = problem.num_variables();
        let n_constraints = problem.num_constraints();

        // A negative right-hand side is multiplied through by -1, flipping the relation
        let normalized: Vec<(f64, ConstraintOp)> = problem
            .constraints
            .iter()
            .map(|c| if c.rhs < 0.0 { (-1.0, c.op.flipped()) } else { (1.0, c.op) })
            .collect();

        // Count slack and artificial variables needed
        let mut n_slack = 0;
        let mut n_artificial = 0;
        for (_, op) in &normalized {
            match op {
                ConstraintOp::Le => n_slack += 1,
                ConstraintOp::Ge => {
                    n_slack += 1; // surplus
                    n_artificial += 1;
                }
                ConstraintOp::Eq => n_artificial += 1,
            }
        }

        let total_cols = n_vars + n_slack + n_artificial + 1; // +1 for RHS
        let total_rows = n_constraints + 1; // +1 for objective

        let mut tableau = Tableau {
            data: vec![vec![0.0; total_cols]; total_rows],
            basic_vars: vec![0; n_constraints],
            n_vars,
            n_slack,
            n_artificial,
            iterations: 0,
        };

        let mut slack_idx = n_vars;
        let mut artificial_idx = n_vars + n_slack;

        for (i, (c, &(sign, op))) in problem.constraints.iter().zip(&normalized).enumerate() {
            for (j, &coef) in c.coefficients.iter().enumerate() {
                tableau.data[i][j] = sign * coef;
            }
            tableau.data[i][total_cols - 1] = sign * c.rhs;

            match op {
                ConstraintOp::Le => {
                    tableau.data[i][slack_idx] = 1.0;
                    tableau.basic_vars[i] = slack_idx;
                    slack_idx += 1;
                }
                ConstraintOp::Ge => {
                    tableau.data[i][slack_idx] = -1.0; // surplus
                    slack_idx += 1;
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
                ConstraintOp::Eq => {
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
            }
        }

        // Objective row (last row). The tableau always maximizes, so a
        // positive entry marks a column that improves the objective
        let obj_row = n_constraints;
        for (j, &coef) in problem.objective.coefficients.iter().enumerate() {
            tableau.data[obj_row][j] = if problem.objective.minimize { -coef } else { coef };
        }

        tableau
    }

    fn phase1(&self, tableau: &mut Tableau, problem: &LpProblem) -> Result<(), SolutionStatus> {
        let n_constraints = tableau.data.len() - 1;
        let n_cols = tableau.data[0].len();
        let rhs_col = n_cols - 1;
        let art_start = tableau.n_vars + tableau.n_slack;

        let orig_obj = tableau.data[n_constraints].clone();

        // Maximize -sum(artificials)
        for j in 0..n_cols {
            tableau.data[n_constraints][j] = 0.0;
        }
        for j in art_start..(art_start + tableau.n_artificial) {
            tableau.data[n_constraints][j] = -1.0;
        }
        // Price out the basic artificials
        for i in 0..n_constraints {
            if tableau.basic_vars[i] >= art_start {
                for j in 0..n_cols {
                    tableau.data[n_constraints][j] += tableau.data[i][j];
                }
            }
        }

        match self.iterate(tableau, rhs_col) {
            SimplexResult::Optimal => {}
            // Phase 1 is bounded below by zero, so this only happens numerically
            SimplexResult::Unbounded => return Err(SolutionStatus::Infeasible),
            SimplexResult::IterationLimit => return Err(SolutionStatus::IterationLimit),
        }

        let threshold = self.feasibility_threshold(problem);
        for i in 0..n_constraints {
            if tableau.basic_vars[i] >= art_start && tableau.data[i][rhs_col] > threshold {
                return Err(SolutionStatus::Infeasible);
            }
        }

        // Drive zero-level artificials out of the basis. A row with no usable
        // pivot is redundant and its artificial stays basic at zero
        for i in 0..n_constraints {
            if tableau.basic_vars[i] < art_start {
                continue;
            }
            let best = (0..art_start)
                .map(|j| (j, tableau.data[i][j].abs()))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((col, magnitude)) = best {
                if magnitude > PIVOT_FLOOR {
                    tableau.data[i][rhs_col] = 0.0;
                    self.pivot(tableau, i, col);
                }
            }
        }

        // Restore original objective and adjust for basic variables
        tableau.data[n_constraints] = orig_obj;
        for i in 0..n_constraints {
            let basic = tableau.basic_vars[i];
            let ratio = tableau.data[n_constraints][basic];
            if ratio != 0.0 {
                for j in 0..n_cols {
                    tableau.data[n_constraints][j] -= ratio * tableau.data[i][j];
                }
            }
        }

        Ok(())
    }

    /// Pivot until no column below `entering_limit` improves the objective
    fn iterate(&self, tableau: &mut Tableau, entering_limit: usize) -> SimplexResult {
        let rhs_col = tableau.data[0].len() - 1;
        let mut degenerate_run = 0;
        let mut bland = false;

        loop {
            let entering = if bland {
                self.entering_bland(tableau, entering_limit)
            } else {
                self.entering_dantzig(tableau, entering_limit)
            };
            let Some(pivot_col) = entering else {
                return SimplexResult::Optimal;
            };
            if tableau.iterations >= self.max_iterations {
                return SimplexResult::IterationLimit;
            }
            let Some(pivot_row) = self.find_pivot_row(tableau, pivot_col) else {
                return SimplexResult::Unbounded;
            };

            if tableau.data[pivot_row][rhs_col] <= self.tolerance {
                degenerate_run += 1;
                if degenerate_run >= self.degenerate_limit && !bland {
                    debug!(iterations = tableau.iterations, "switching to Bland's rule");
                    bland = true;
                }
            } else {
                degenerate_run = 0;
            }

            self.pivot(tableau, pivot_row, pivot_col);
            tableau.iterations += 1;
        }
    }

    /// Most positive reduced cost
    fn entering_dantzig(&self, tableau: &Tableau, limit: usize) -> Option<usize> {
        let obj_row = tableau.data.len() - 1;
        let mut max_val = self.tolerance;
        let mut max_col = None;

        for j in 0..limit {
            if tableau.data[obj_row][j] > max_val {
                max_val = tableau.data[obj_row][j];
                max_col = Some(j);
            }
        }

        max_col
    }

    /// Lowest-index improving column
    fn entering_bland(&self, tableau: &Tableau, limit: usize) -> Option<usize> {
        let obj_row = tableau.data.len() - 1;
        (0..limit).find(|&j| tableau.data[obj_row][j] > self.tolerance)
    }

    /// Minimum ratio test, ties broken by the lowest basic variable index
    fn find_pivot_row(&self, tableau: &Tableau, col: usize) -> Option<usize> {
        let n_constraints = tableau.data.len() - 1;
        let rhs_col = tableau.data[0].len() - 1;

        let mut best: Option<(usize, f64)> = None;

        for i in 0..n_constraints {
            let val = tableau.data[i][col];
            if val <= self.tolerance {
                continue;
            }
            let ratio = tableau.data[i][rhs_col].max(0.0) / val;
            best = match best {
                None => Some((i, ratio)),
                Some((row, min_ratio)) => {
                    if ratio < min_ratio - self.tolerance
                        || (ratio <= min_ratio + self.tolerance && tableau.basic_vars[i] < tableau.basic_vars[row])
                    {
                        Some((i, ratio))
                    } else {
                        Some((row, min_ratio))
                    }
                }
            };
        }

        best.map(|(row, _)| row)
    }

    fn pivot(&self, tableau: &mut Tableau, row: usize, col: usize) {
        let n_rows = tableau.data.len();
        let n_cols = tableau.data[0].len();

        tableau.basic_vars[row] = col;

        // Scale pivot row
        let pivot_val = tableau.data[row][col];
        for j in 0..n_cols {
            tableau.data[row][j] /= pivot_val;
        }

        // Eliminate column in other rows
        let pivot_row = tableau.data[row].clone();
        for i in 0..n_rows {
            if i == row {
                continue;
            }
            let factor = tableau.data[i][col];
            if factor == 0.0 {
                continue;
            }
            for (cell, &p) in tableau.data[i].iter_mut().zip(&pivot_row) {
                *cell -= factor * p;
            }
        }
    }

    fn extract_solution(&self, tableau: &Tableau, problem: &LpProblem) -> Solution {
        let n_vars = problem.num_variables();
        let rhs_col = tableau.data[0].len() - 1;

        let mut values = vec![0.0; n_vars];
        for (i, &basic) in tableau.basic_vars.iter().enumerate() {
            if basic < n_vars {
                values[basic] = tableau.data[i][rhs_col].max(0.0);
            }
        }

        let objective_value = problem
            .objective
            .coefficients
            .iter()
            .zip(&values)
            .map(|(c, v)| c * v)
            .sum();

        Solution {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            violations: Vec::new(),
            iterations: tableau.iterations,
        }
    }
}

/// Smallest pivot magnitude accepted when removing artificials after phase 1
const PIVOT_FLOOR: f64 = 1e-7;

fn violation(c: &Constraint, lhs: f64, tol: f64) -> Option<ConstraintViolation> {
    let (amount, description) = match c.op {
        ConstraintOp::Le if lhs > c.rhs + tol => {
            let amt = lhs - c.rhs;
            (amt, format!("{} exceeds maximum of {:.2} by {:.2}", c.name, c.rhs, amt))
        }
        ConstraintOp::Ge if lhs < c.rhs - tol => {
            let amt = c.rhs - lhs;
            (amt, format!("{} is below minimum of {:.2} by {:.2}", c.name, c.rhs, amt))
        }
        ConstraintOp::Eq if (lhs - c.rhs).abs() > tol => (
            (lhs - c.rhs).abs(),
            format!("{} requires exactly {:.2} but got {:.2}", c.name, c.rhs, lhs),
        ),
        _ => return None,
    };

    Some(ConstraintViolation {
        constraint: c.name.clone(),
        required: c.rhs,
        actual: lhs,
        violation_amount: amount,
        description,
    })
}

struct Tableau {
    data: Vec<Vec<f64>>,
    basic_vars: Vec<usize>,
    n_vars: usize,
    n_slack: usize,
    n_artificial: usize,
    iterations: usize,
}

enum SimplexResult {
    Optimal,
    Unbounded,
    IterationLimit,
}
