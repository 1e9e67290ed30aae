//! Static description of the process network: topology, coefficient tables
//! and tank geometry. Pure data; [`crate::ModelBuilder`] turns it into a model.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::index::Stream;

/// Barrels to cubic metres
pub const BARRELS_TO_CUBIC_METRES: f64 = 0.158987;

fn default_volume_conversion() -> f64 {
    BARRELS_TO_CUBIC_METRES
}

/// The complete network handed to the model builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Every arc of flow in the network
    pub streams: Vec<Stream>,
    /// Economic coefficient per stream (positive = revenue or credit, negative = cost)
    #[serde(default)]
    pub costs: BTreeMap<Stream, f64>,
    /// Maximum rate of intake streams, independent of unit shutdowns
    #[serde(default)]
    pub intake_limits: BTreeMap<Stream, f64>,
    /// Primary conversion units (the ones that can be shut down)
    #[serde(default)]
    pub units: Vec<ConversionUnit>,
    /// Inbound stream -> the outbound streams it is split into
    #[serde(default)]
    pub split_points: BTreeMap<Stream, BTreeSet<Stream>>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub tanks: Vec<Tank>,
    /// Multiplier from flow volume units to the tank geometry volume unit
    #[serde(default = "default_volume_conversion")]
    pub volume_conversion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionUnit {
    pub name: String,
    /// Throughput limit over all feeds, scaled by the unit's shutdown flag
    pub capacity: f64,
    pub feeds: Vec<Feed>,
}

/// One feed of a conversion unit. The streams are summed into a single feed
/// rate; each yield coefficient maps that rate onto the unit's outlet of one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub streams: Vec<Stream>,
    pub yields: BTreeMap<Stream, f64>,
}

/// A finished product leaving its blend tank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub output: Stream,
    pub components: Vec<Stream>,
    /// Minimum output rate per period
    #[serde(default)]
    pub demand: Option<f64>,
    #[serde(default)]
    pub specs: Vec<QualitySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySpec {
    pub property: String,
    pub bound: QualityBound,
    pub threshold: f64,
    /// Property value of each blended component
    pub coefficients: BTreeMap<Stream, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBound {
    Min,
    Max,
}

/// Cylindrical buffer tank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    pub name: String,
    pub radius: f64,
    pub height: f64,
    /// Cost per unit of inventory per period
    pub holding_cost: f64,
    pub inbound: Vec<Stream>,
    pub outbound: Vec<Stream>,
}

impl Tank {
    pub fn area(&self) -> f64 {
        PI * self.radius * self.radius
    }
}

/// Inbound streams balanced jointly against one shared outbound set.
///
/// A tank bypass and the tank outlet that reconverge at the same split node
/// end up in the same group, so their combined flow is balanced once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitGroup {
    pub node: String,
    pub material: String,
    pub inbound: Vec<Stream>,
    pub outbound: Vec<Stream>,
}

impl NetworkDescriptor {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let network: NetworkDescriptor = serde_json::from_str(json)?;
        Ok(network)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn unit(&self, name: &str) -> Option<&ConversionUnit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Every stream leaving `unit` with `material`, the direct outlet and any tank diversion
    pub fn outlet_streams<'a>(&'a self, unit: &'a str, material: &'a str) -> impl Iterator<Item = &'a Stream> {
        self.streams
            .iter()
            .filter(move |s| s.origin == unit && s.material == material)
    }

    /// Check that every table only references streams of the topology and
    /// that tanks and split points are well formed
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut topology = BTreeSet::new();
        for stream in &self.streams {
            if !topology.insert(stream) {
                return Err(ModelError::DuplicateStream(stream.clone()));
            }
        }
        let known = |table: &str, stream: &Stream| -> Result<(), ModelError> {
            if topology.contains(stream) {
                Ok(())
            } else {
                Err(ModelError::UnknownStream {
                    table: table.to_string(),
                    stream: stream.clone(),
                })
            }
        };

        for stream in self.costs.keys() {
            known("costs", stream)?;
        }
        for stream in self.intake_limits.keys() {
            known("intake_limits", stream)?;
        }

        for unit in &self.units {
            let table = format!("yields of unit {}", unit.name);
            for feed in &unit.feeds {
                if feed.streams.is_empty() {
                    return Err(ModelError::EmptyFeed {
                        unit: unit.name.clone(),
                    });
                }
                for stream in &feed.streams {
                    known(&table, stream)?;
                }
                let mut materials = BTreeSet::new();
                for stream in feed.yields.keys() {
                    known(&table, stream)?;
                    if stream.origin != unit.name {
                        return Err(ModelError::ForeignYield {
                            unit: unit.name.clone(),
                            stream: stream.clone(),
                        });
                    }
                    if !materials.insert(stream.material.as_str()) {
                        return Err(ModelError::DuplicateYield {
                            unit: unit.name.clone(),
                            material: stream.material.clone(),
                        });
                    }
                }
            }
        }

        for (inbound, outbound) in &self.split_points {
            known("split_points", inbound)?;
            for stream in outbound {
                known("split_points", stream)?;
            }
        }
        self.split_groups()?;

        for product in &self.products {
            let table = format!("blend of {}", product.name);
            known(&table, &product.output)?;
            for stream in &product.components {
                known(&table, stream)?;
            }
            for spec in &product.specs {
                let table = format!("quality {} of {}", spec.property, product.name);
                for stream in spec.coefficients.keys() {
                    known(&table, stream)?;
                    if !product.components.contains(stream) {
                        return Err(ModelError::UnblendedQualityStream {
                            product: product.name.clone(),
                            property: spec.property.clone(),
                            stream: stream.clone(),
                        });
                    }
                }
                if let Some(stream) = product.components.iter().find(|s| !spec.coefficients.contains_key(*s)) {
                    return Err(ModelError::MissingQualityCoefficient {
                        product: product.name.clone(),
                        property: spec.property.clone(),
                        stream: stream.clone(),
                    });
                }
            }
        }

        for tank in &self.tanks {
            let geometry = [tank.radius, tank.height];
            if geometry.iter().any(|v| !v.is_finite() || *v <= 0.0)
                || !tank.holding_cost.is_finite()
                || tank.holding_cost < 0.0
            {
                return Err(ModelError::InvalidTankGeometry(tank.name.clone()));
            }
            if tank.inbound.is_empty() {
                return Err(ModelError::MissingTankMapping {
                    tank: tank.name.clone(),
                    direction: "inbound",
                });
            }
            if tank.outbound.is_empty() {
                return Err(ModelError::MissingTankMapping {
                    tank: tank.name.clone(),
                    direction: "outbound",
                });
            }
            let table = format!("tank {}", tank.name);
            for stream in tank.inbound.iter().chain(&tank.outbound) {
                known(&table, stream)?;
            }
        }

        if !self.volume_conversion.is_finite() || self.volume_conversion <= 0.0 {
            return Err(ModelError::InvalidVolumeConversion(self.volume_conversion));
        }
        Ok(())
    }

    /// Group split-point inbound streams by equality of their outbound sets.
    ///
    /// Fails when two inbound streams of the same node and material disagree
    /// on the outbound set, or when an outbound stream does not leave the
    /// split node with the inbound material.
    pub fn split_groups(&self) -> Result<Vec<SplitGroup>, ModelError> {
        let inconsistent = |inbound: &Stream, reason: String| ModelError::InconsistentSplit {
            node: inbound.destination.clone(),
            material: inbound.material.clone(),
            reason,
        };

        let mut by_outbound: BTreeMap<&BTreeSet<Stream>, Vec<&Stream>> = BTreeMap::new();
        let mut by_node: BTreeMap<(&str, &str), &BTreeSet<Stream>> = BTreeMap::new();
        for (inbound, outbound) in &self.split_points {
            if outbound.is_empty() {
                return Err(inconsistent(inbound, format!("{} has no outbound streams", inbound)));
            }
            if let Some(stray) = outbound
                .iter()
                .find(|s| s.origin != inbound.destination || s.material != inbound.material)
            {
                return Err(inconsistent(
                    inbound,
                    format!("{} does not leave the split node with the inbound material", stray),
                ));
            }
            let node = (inbound.destination.as_str(), inbound.material.as_str());
            match by_node.get(&node) {
                Some(existing) if *existing != outbound => {
                    return Err(inconsistent(
                        inbound,
                        format!("{} claims a different outbound set than another inbound stream", inbound),
                    ));
                }
                Some(_) => {}
                None => {
                    by_node.insert(node, outbound);
                }
            }
            by_outbound.entry(outbound).or_default().push(inbound);
        }

        Ok(by_outbound
            .into_iter()
            .filter_map(|(outbound, inbound)| {
                let first = inbound.first()?;
                Some(SplitGroup {
                    node: first.destination.clone(),
                    material: first.material.clone(),
                    inbound: inbound.into_iter().cloned().collect(),
                    outbound: outbound.iter().cloned().collect(),
                })
            })
            .collect())
    }
}
