use std::collections::{BTreeMap, BTreeSet};

use refinery_solver::{ConstraintOp, LpProblem};

use crate::error::ModelError;
use crate::expr::{ConstraintFamily, ConstraintId, LinearExpr, ModelConstraint, Rhs};
use crate::index::{Horizon, Period, ShutdownKey, Stream, VariableKey};

/// A built refinery model with its current parameter values.
///
/// The structure (variables, objective, constraints) is fixed at build time.
/// Shutdown flags and fixed flows are parameters: they change between solves
/// and are read every time the instance is lowered to an [`LpProblem`].
#[derive(Debug, Clone)]
pub struct ModelInstance {
    horizon: Horizon,
    variables: Vec<VariableKey>,
    positions: BTreeMap<VariableKey, usize>,
    objective: LinearExpr,
    constraints: Vec<ModelConstraint>,
    shutdown: BTreeMap<ShutdownKey, bool>,
    fixed: BTreeMap<VariableKey, f64>,
    tank_streams: BTreeSet<Stream>,
}

impl ModelInstance {
    pub(crate) fn new(
        horizon: Horizon,
        mut variables: Vec<VariableKey>,
        objective: LinearExpr,
        constraints: Vec<ModelConstraint>,
        shutdown_keys: impl IntoIterator<Item = ShutdownKey>,
        tank_streams: impl IntoIterator<Item = Stream>,
    ) -> Self {
        variables.sort();
        variables.dedup();
        let positions = variables
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), i))
            .collect();
        Self {
            horizon,
            variables,
            positions,
            objective,
            constraints,
            shutdown: shutdown_keys.into_iter().map(|key| (key, false)).collect(),
            fixed: BTreeMap::new(),
            tank_streams: tank_streams.into_iter().collect(),
        }
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// Decision variables in their canonical order
    pub fn variables(&self) -> &[VariableKey] {
        &self.variables
    }

    pub fn has_variable(&self, key: &VariableKey) -> bool {
        self.positions.contains_key(key)
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn constraints(&self) -> &[ModelConstraint] {
        &self.constraints
    }

    pub fn constraint(&self, id: &ConstraintId) -> Option<&ModelConstraint> {
        self.constraints.iter().find(|c| &c.id == id)
    }

    pub fn constraints_of(&self, family: ConstraintFamily) -> impl Iterator<Item = &ModelConstraint> {
        self.constraints.iter().filter(move |c| c.id.family == family)
    }

    /// True when `stream` fills or drains a buffer tank
    pub fn is_tank_stream(&self, stream: &Stream) -> bool {
        self.tank_streams.contains(stream)
    }

    pub fn shutdown_flags(&self) -> impl Iterator<Item = (&ShutdownKey, bool)> {
        self.shutdown.iter().map(|(key, flag)| (key, *flag))
    }

    pub fn shutdown_flag(&self, key: &ShutdownKey) -> Option<bool> {
        self.shutdown.get(key).copied()
    }

    /// True when no shutdown flag is set
    pub fn is_running(&self) -> bool {
        self.shutdown.values().all(|flag| !flag)
    }

    /// Check that `key` names a unit and period of this model
    pub fn check_shutdown_key(&self, key: &ShutdownKey) -> Result<(), ModelError> {
        if self.shutdown.contains_key(key) {
            return Ok(());
        }
        if self.shutdown.keys().any(|k| k.unit == key.unit) {
            Err(ModelError::PeriodOutOfRange {
                period: key.period,
                last: self.horizon.last(),
            })
        } else {
            Err(ModelError::UnknownUnit(key.unit.clone()))
        }
    }

    pub fn set_shutdown(&mut self, key: &ShutdownKey, shut: bool) -> Result<(), ModelError> {
        self.check_shutdown_key(key)?;
        if let Some(flag) = self.shutdown.get_mut(key) {
            *flag = shut;
        }
        Ok(())
    }

    pub(crate) fn release_shutdown(&mut self, key: &ShutdownKey) {
        if let Some(flag) = self.shutdown.get_mut(key) {
            *flag = false;
        }
    }

    pub fn reset_shutdowns(&mut self) {
        for flag in self.shutdown.values_mut() {
            *flag = false;
        }
    }

    /// Pin the flow on `stream` during `period` to `value`
    pub fn fix_flow(&mut self, stream: &Stream, period: Period, value: f64) -> Result<(), ModelError> {
        self.horizon.check(period)?;
        let key = VariableKey::flow(stream.clone(), period);
        if !self.has_variable(&key) {
            return Err(ModelError::UnknownStream {
                table: "fixed flows".to_string(),
                stream: stream.clone(),
            });
        }
        self.fixed.insert(key, value);
        Ok(())
    }

    pub fn unfix_flow(&mut self, stream: &Stream, period: Period) -> Option<f64> {
        self.fixed.remove(&VariableKey::flow(stream.clone(), period))
    }

    pub fn fixed_flows(&self) -> impl Iterator<Item = (&VariableKey, f64)> {
        self.fixed.iter().map(|(key, value)| (key, *value))
    }

    /// Right-hand side under the current shutdown flags
    pub fn rhs_value(&self, rhs: &Rhs) -> f64 {
        match rhs {
            Rhs::Constant(value) => *value,
            Rhs::ScaledCapacity { capacity, flag } => {
                let alpha = if self.shutdown_flag(flag).unwrap_or(false) {
                    1.0
                } else {
                    0.0
                };
                capacity * (1.0 - alpha)
            }
        }
    }

    fn dense(&self, expr: &LinearExpr) -> Vec<f64> {
        let mut coefficients = vec![0.0; self.variables.len()];
        for (key, coef) in expr.terms() {
            if let Some(&i) = self.positions.get(key) {
                coefficients[i] += coef;
            }
        }
        coefficients
    }

    /// Lower the instance, with its current parameters, to a maximisation LP
    pub fn to_lp_problem(&self) -> LpProblem {
        let mut problem = LpProblem::new(self.variables.iter().map(|v| v.to_string()).collect());
        problem.set_objective(self.dense(&self.objective), false);

        for constraint in &self.constraints {
            problem.add_constraint(
                constraint.id.to_string(),
                self.dense(&constraint.expr),
                constraint.op,
                self.rhs_value(&constraint.rhs),
            );
        }
        for (key, value) in &self.fixed {
            let mut coefficients = vec![0.0; self.variables.len()];
            if let Some(&i) = self.positions.get(key) {
                coefficients[i] = 1.0;
            }
            let id = ConstraintId::new(ConstraintFamily::FixedFlow, fixed_label(key), key.period());
            problem.add_constraint(id.to_string(), coefficients, ConstraintOp::Eq, *value);
        }
        problem
    }

    pub fn objective_value(&self, values: &BTreeMap<VariableKey, f64>) -> f64 {
        self.objective.evaluate(values)
    }

    /// Constraints (fixed flows included) that `values` violates by more than
    /// `tolerance`, relative to the size of the right-hand side
    pub fn violated_constraints(&self, values: &BTreeMap<VariableKey, f64>, tolerance: f64) -> Vec<ConstraintId> {
        let violated = |lhs: f64, op: ConstraintOp, rhs: f64| {
            let slack = tolerance * rhs.abs().max(1.0);
            match op {
                ConstraintOp::Le => lhs > rhs + slack,
                ConstraintOp::Ge => lhs < rhs - slack,
                ConstraintOp::Eq => (lhs - rhs).abs() > slack,
            }
        };

        let mut result: Vec<ConstraintId> = self
            .constraints
            .iter()
            .filter(|c| violated(c.expr.evaluate(values), c.op, self.rhs_value(&c.rhs)))
            .map(|c| c.id.clone())
            .collect();
        for (key, value) in &self.fixed {
            let actual = values.get(key).copied().unwrap_or(0.0);
            if violated(actual, ConstraintOp::Eq, *value) {
                result.push(ConstraintId::new(ConstraintFamily::FixedFlow, fixed_label(key), key.period()));
            }
        }
        result
    }
}

fn fixed_label(key: &VariableKey) -> String {
    match key {
        VariableKey::Flow { stream, .. } => stream.to_string(),
        VariableKey::Inventory { tank, .. } => tank.clone(),
    }
}
