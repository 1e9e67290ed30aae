use std::collections::BTreeSet;

use refinery_solver::ConstraintOp;
use tracing::debug;

use crate::error::ModelError;
use crate::expr::{ConstraintFamily, ConstraintId, LinearExpr, ModelConstraint, Rhs};
use crate::index::{Horizon, Period, ShutdownKey, Stream, VariableKey};
use crate::instance::ModelInstance;
use crate::network::{NetworkDescriptor, QualityBound};

/// Translates a [`NetworkDescriptor`] over a [`Horizon`] into a [`ModelInstance`]
pub struct ModelBuilder<'a> {
    network: &'a NetworkDescriptor,
    horizon: Horizon,
    constraints: Vec<ModelConstraint>,
}

fn x(stream: &Stream, period: Period) -> VariableKey {
    VariableKey::flow(stream.clone(), period)
}

/// Sum of the flows on `streams` during `period`, each scaled by `scale`
fn flows<'s>(streams: impl IntoIterator<Item = &'s Stream>, period: Period, scale: f64) -> LinearExpr {
    streams.into_iter().map(|s| (x(s, period), scale)).collect()
}

impl<'a> ModelBuilder<'a> {
    pub fn new(network: &'a NetworkDescriptor, horizon: Horizon) -> Self {
        Self {
            network,
            horizon,
            constraints: Vec::new(),
        }
    }

    /// Build the model. Fails on any topology error before a single constraint is emitted.
    pub fn build(mut self) -> Result<ModelInstance, ModelError> {
        self.network.validate()?;
        let split_groups = self.network.split_groups()?;

        // Flow variables for every stream in every period, then tank inventories
        let mut variables = Vec::new();
        for t in self.horizon.periods() {
            variables.extend(self.network.streams.iter().map(|s| x(s, t)));
            variables.extend(
                self.network
                    .tanks
                    .iter()
                    .map(|tank| VariableKey::inventory(tank.name.clone(), t)),
            );
        }

        let mut objective = LinearExpr::new();
        for t in self.horizon.periods() {
            for (stream, cost) in &self.network.costs {
                objective.add_term(x(stream, t), *cost);
            }
            for tank in &self.network.tanks {
                objective.add_term(VariableKey::inventory(tank.name.clone(), t), -tank.holding_cost);
            }
        }

        let mut shutdown_keys = Vec::new();
        for t in self.horizon.periods() {
            self.capacity(t, &mut shutdown_keys);
            self.yields(t);
            for group in &split_groups {
                let expr = flows(&group.inbound, t, 1.0).merged(flows(&group.outbound, t, -1.0));
                self.push(
                    ConstraintFamily::SplitBalance,
                    format!("{}:{}", group.node, group.material),
                    t,
                    expr,
                    ConstraintOp::Eq,
                    Rhs::Constant(0.0),
                );
            }
            self.blending(t);
            self.tanks(t);
        }

        debug!(
            periods = self.horizon.num_periods(),
            variables = variables.len(),
            constraints = self.constraints.len(),
            split_groups = split_groups.len(),
            "refinery model built"
        );

        Ok(ModelInstance::new(
            self.horizon,
            variables,
            objective,
            self.constraints,
            shutdown_keys,
            self.network
                .tanks
                .iter()
                .flat_map(|tank| tank.inbound.iter().chain(&tank.outbound))
                .cloned(),
        ))
    }

    fn push(&mut self, family: ConstraintFamily, label: String, period: Period, expr: LinearExpr, op: ConstraintOp, rhs: Rhs) {
        self.constraints.push(ModelConstraint {
            id: ConstraintId::new(family, label, period),
            expr,
            op,
            rhs,
        });
    }

    fn capacity(&mut self, t: Period, shutdown_keys: &mut Vec<ShutdownKey>) {
        let network = self.network;
        for (stream, limit) in &network.intake_limits {
            self.push(
                ConstraintFamily::IntakeLimit,
                stream.to_string(),
                t,
                flows([stream], t, 1.0),
                ConstraintOp::Le,
                Rhs::Constant(*limit),
            );
        }

        for unit in &network.units {
            let feed_streams: BTreeSet<&Stream> = unit.feeds.iter().flat_map(|f| &f.streams).collect();
            let flag = ShutdownKey::new(unit.name.clone(), t);
            shutdown_keys.push(flag.clone());
            self.push(
                ConstraintFamily::UnitCapacity,
                unit.name.clone(),
                t,
                flows(feed_streams, t, 1.0),
                ConstraintOp::Le,
                Rhs::ScaledCapacity {
                    capacity: unit.capacity,
                    flag,
                },
            );
        }
    }

    /// One equation per unit and outlet material. The left side collects every
    /// stream leaving the unit with that material, so a tank diversion on the
    /// outlet shares the yield with the direct path.
    fn yields(&mut self, t: Period) {
        let network = self.network;
        for unit in &network.units {
            let materials: BTreeSet<&str> = unit
                .feeds
                .iter()
                .flat_map(|f| f.yields.keys().map(|s| s.material.as_str()))
                .collect();

            for material in materials {
                let mut expr = flows(network.outlet_streams(&unit.name, material), t, 1.0);
                for feed in &unit.feeds {
                    let coefficient = feed
                        .yields
                        .iter()
                        .find(|(s, _)| s.material == material)
                        .map(|(_, c)| *c);
                    if let Some(coefficient) = coefficient {
                        for stream in &feed.streams {
                            expr.add_term(x(stream, t), -coefficient);
                        }
                    }
                }
                self.push(
                    ConstraintFamily::Yield,
                    format!("{}:{}", unit.name, material),
                    t,
                    expr,
                    ConstraintOp::Eq,
                    Rhs::Constant(0.0),
                );
            }
        }
    }

    fn blending(&mut self, t: Period) {
        let network = self.network;
        for product in &network.products {
            let output = x(&product.output, t);

            let balance = flows(&product.components, t, -1.0).with_term(output.clone(), 1.0);
            self.push(
                ConstraintFamily::BlendBalance,
                product.name.clone(),
                t,
                balance,
                ConstraintOp::Eq,
                Rhs::Constant(0.0),
            );

            if let Some(demand) = product.demand {
                self.push(
                    ConstraintFamily::ProductDemand,
                    product.name.clone(),
                    t,
                    LinearExpr::new().with_term(output.clone(), 1.0),
                    ConstraintOp::Ge,
                    Rhs::Constant(demand),
                );
            }

            for spec in &product.specs {
                let mut expr: LinearExpr = spec
                    .coefficients
                    .iter()
                    .map(|(stream, value)| (x(stream, t), *value))
                    .collect();
                expr.add_term(output.clone(), -spec.threshold);
                let op = match spec.bound {
                    QualityBound::Min => ConstraintOp::Ge,
                    QualityBound::Max => ConstraintOp::Le,
                };
                self.push(
                    ConstraintFamily::Quality,
                    format!("{}:{}", product.name, spec.property),
                    t,
                    expr,
                    op,
                    Rhs::Constant(0.0),
                );
            }
        }
    }

    /// `m[t] - m[t-1] - L * (in[t] - out[t]) = 0` with an empty tank before the
    /// first period, and `m[t] * conversion / area <= height`
    fn tanks(&mut self, t: Period) {
        let network = self.network;
        let length = self.horizon.period_length();
        for tank in &network.tanks {
            let inventory = VariableKey::inventory(tank.name.clone(), t);

            let mut balance = flows(&tank.inbound, t, -length)
                .merged(flows(&tank.outbound, t, length))
                .with_term(inventory.clone(), 1.0);
            if let Some(previous) = self.horizon.previous(t) {
                balance.add_term(VariableKey::inventory(tank.name.clone(), previous), -1.0);
            }
            self.push(
                ConstraintFamily::TankBalance,
                tank.name.clone(),
                t,
                balance,
                ConstraintOp::Eq,
                Rhs::Constant(0.0),
            );

            self.push(
                ConstraintFamily::TankCapacity,
                tank.name.clone(),
                t,
                LinearExpr::new().with_term(inventory, network.volume_conversion / tank.area()),
                ConstraintOp::Le,
                Rhs::Constant(tank.height),
            );
        }
    }
}
