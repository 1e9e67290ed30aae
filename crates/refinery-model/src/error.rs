use thiserror::Error;

use crate::index::{Period, Stream};
use crate::scenario::ScenarioId;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Stream {stream} referenced by {table} is not part of the network")]
    UnknownStream { table: String, stream: Stream },
    #[error("Duplicate stream in network: {0}")]
    DuplicateStream(Stream),
    #[error("Invalid stream identifier '{0}', expected material,origin,destination")]
    InvalidStream(String),
    #[error("Tank {tank} has no {direction} streams")]
    MissingTankMapping { tank: String, direction: &'static str },
    #[error("Tank {0} needs a positive radius and height and a non-negative holding cost")]
    InvalidTankGeometry(String),
    #[error("Volume conversion must be positive, got {0}")]
    InvalidVolumeConversion(f64),
    #[error("Unit {unit} has a feed without streams")]
    EmptyFeed { unit: String },
    #[error("Unit {unit} declares a yield for {stream}, which does not leave the unit")]
    ForeignYield { unit: String, stream: Stream },
    #[error("Unit {unit} declares more than one yield stream for material {material}")]
    DuplicateYield { unit: String, material: String },
    #[error("Quality spec {property} of {product} references {stream}, which is not blended into it")]
    UnblendedQualityStream {
        product: String,
        property: String,
        stream: Stream,
    },
    #[error("Quality spec {property} of {product} has no coefficient for component {stream}")]
    MissingQualityCoefficient {
        product: String,
        property: String,
        stream: Stream,
    },
    #[error("Inconsistent split grouping at {node} for {material}: {reason}")]
    InconsistentSplit {
        node: String,
        material: String,
        reason: String,
    },
    #[error("Unknown conversion unit: {0}")]
    UnknownUnit(String),
    #[error("Period {period} is outside the horizon 1..={last}")]
    PeriodOutOfRange { period: Period, last: Period },
    #[error("Invalid horizon: {periods} periods of length {period_length}")]
    InvalidHorizon { periods: Period, period_length: f64 },
    #[error("Duplicate scenario id: {0}")]
    DuplicateScenario(ScenarioId),
    #[error("Result record of scenario {0} does not line up with the comparison table")]
    MisalignedRecord(ScenarioId),
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
