use std::collections::BTreeMap;
use std::fmt;

use refinery_solver::ConstraintOp;

use crate::index::{Period, ShutdownKey, VariableKey};

/// Sparse linear combination of model variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<VariableKey, f64>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `coefficient * key`, merging with an existing term for the same key
    pub fn add_term(&mut self, key: VariableKey, coefficient: f64) {
        *self.terms.entry(key).or_insert(0.0) += coefficient;
    }

    pub fn with_term(mut self, key: VariableKey, coefficient: f64) -> Self {
        self.add_term(key, coefficient);
        self
    }

    /// Add every term of `other`
    pub fn merged(mut self, other: LinearExpr) -> Self {
        for (key, coefficient) in other.terms {
            self.add_term(key, coefficient);
        }
        self
    }

    pub fn terms(&self) -> impl Iterator<Item = (&VariableKey, f64)> {
        self.terms.iter().map(|(k, c)| (k, *c))
    }

    pub fn coefficient(&self, key: &VariableKey) -> f64 {
        self.terms.get(key).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value of the expression, treating variables missing from `values` as zero
    pub fn evaluate(&self, values: &BTreeMap<VariableKey, f64>) -> f64 {
        self.terms
            .iter()
            .map(|(key, coef)| coef * values.get(key).copied().unwrap_or(0.0))
            .sum()
    }
}

impl FromIterator<(VariableKey, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (VariableKey, f64)>>(iter: I) -> Self {
        let mut expr = LinearExpr::new();
        for (key, coef) in iter {
            expr.add_term(key, coef);
        }
        expr
    }
}

/// Right-hand side of a model constraint, resolved against the current
/// parameter values each time the model is lowered
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Constant(f64),
    /// `capacity * (1 - alpha[unit, t])`
    ScaledCapacity { capacity: f64, flag: ShutdownKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintFamily {
    IntakeLimit,
    UnitCapacity,
    Yield,
    SplitBalance,
    BlendBalance,
    ProductDemand,
    Quality,
    TankBalance,
    TankCapacity,
    FixedFlow,
}

impl ConstraintFamily {
    pub fn name(self) -> &'static str {
        match self {
            ConstraintFamily::IntakeLimit => "intake_limit",
            ConstraintFamily::UnitCapacity => "unit_capacity",
            ConstraintFamily::Yield => "yield",
            ConstraintFamily::SplitBalance => "split_balance",
            ConstraintFamily::BlendBalance => "blend_balance",
            ConstraintFamily::ProductDemand => "product_demand",
            ConstraintFamily::Quality => "quality",
            ConstraintFamily::TankBalance => "tank_balance",
            ConstraintFamily::TankCapacity => "tank_capacity",
            ConstraintFamily::FixedFlow => "fixed_flow",
        }
    }
}

/// Identity of one constraint: its family, the index tuple it was emitted for, and the period
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId {
    pub family: ConstraintFamily,
    pub label: String,
    pub period: Period,
}

impl ConstraintId {
    pub fn new(family: ConstraintFamily, label: impl Into<String>, period: Period) -> Self {
        Self {
            family,
            label: label.into(),
            period,
        }
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.family.name(), self.label, self.period)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConstraint {
    pub id: ConstraintId,
    pub expr: LinearExpr,
    pub op: ConstraintOp,
    pub rhs: Rhs,
}
