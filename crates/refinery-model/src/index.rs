//! Identifiers shared by the descriptor, the model and the result records.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;

/// One-based period number within a [`Horizon`]
pub type Period = u32;

/// A directed arc of flow: one material moving from an origin unit to a destination unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stream {
    pub material: String,
    pub origin: String,
    pub destination: String,
}

impl Stream {
    pub fn new(material: impl Into<String>, origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            material: material.into(),
            origin: origin.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.material, self.origin, self.destination)
    }
}

impl FromStr for Stream {
    type Err = ModelError;

    /// Parses the `material,origin,destination` form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [material, origin, destination] if parts.iter().all(|p| !p.is_empty()) => {
                Ok(Stream::new(*material, *origin, *destination))
            }
            _ => Err(ModelError::InvalidStream(s.to_string())),
        }
    }
}

// Streams travel as strings so they can key JSON maps
impl Serialize for Stream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Stream {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The planning horizon: `periods` consecutive periods of `period_length` each
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHorizon")]
pub struct Horizon {
    periods: Period,
    period_length: f64,
}

#[derive(Deserialize)]
struct RawHorizon {
    periods: Period,
    period_length: f64,
}

impl TryFrom<RawHorizon> for Horizon {
    type Error = ModelError;

    fn try_from(raw: RawHorizon) -> Result<Self, Self::Error> {
        Horizon::new(raw.periods, raw.period_length)
    }
}

impl Horizon {
    pub fn new(periods: Period, period_length: f64) -> Result<Self, ModelError> {
        if periods == 0 || !period_length.is_finite() || period_length <= 0.0 {
            return Err(ModelError::InvalidHorizon {
                periods,
                period_length,
            });
        }
        Ok(Self {
            periods,
            period_length,
        })
    }

    /// `periods` periods of unit length for horizons known to be non-empty
    pub(crate) fn unit_periods(periods: Period) -> Self {
        debug_assert!(periods > 0);
        Self {
            periods,
            period_length: 1.0,
        }
    }

    /// A single period of unit length
    pub fn single() -> Self {
        Self::unit_periods(1)
    }

    pub fn num_periods(&self) -> Period {
        self.periods
    }

    pub fn period_length(&self) -> f64 {
        self.period_length
    }

    pub fn last(&self) -> Period {
        self.periods
    }

    pub fn periods(&self) -> RangeInclusive<Period> {
        1..=self.periods
    }

    pub fn contains(&self, period: Period) -> bool {
        (1..=self.periods).contains(&period)
    }

    /// The period before `period`, or `None` at the start of the horizon
    pub fn previous(&self, period: Period) -> Option<Period> {
        (period > 1 && self.contains(period)).then(|| period - 1)
    }

    pub fn check(&self, period: Period) -> Result<(), ModelError> {
        if self.contains(period) {
            Ok(())
        } else {
            Err(ModelError::PeriodOutOfRange {
                period,
                last: self.periods,
            })
        }
    }
}

/// Identifies one decision variable of the model.
///
/// The variant order fixes the order of rows in result records: inventories
/// sort ahead of flows, and within a variant the fields compare in order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableKey {
    /// Volume held in a buffer tank at the end of a period
    Inventory { tank: String, period: Period },
    /// Flow rate on a stream during a period
    Flow { stream: Stream, period: Period },
}

impl VariableKey {
    pub fn flow(stream: Stream, period: Period) -> Self {
        VariableKey::Flow { stream, period }
    }

    pub fn inventory(tank: impl Into<String>, period: Period) -> Self {
        VariableKey::Inventory {
            tank: tank.into(),
            period,
        }
    }

    pub fn period(&self) -> Period {
        match self {
            VariableKey::Inventory { period, .. } | VariableKey::Flow { period, .. } => *period,
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKey::Flow { stream, period } => write!(f, "x[{},{}]", stream, period),
            VariableKey::Inventory { tank, period } => write!(f, "m[{},{}]", tank, period),
        }
    }
}

/// Shutdown flag of one conversion unit during one period
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(String, Period)", into = "(String, Period)")]
pub struct ShutdownKey {
    pub unit: String,
    pub period: Period,
}

impl ShutdownKey {
    pub fn new(unit: impl Into<String>, period: Period) -> Self {
        Self {
            unit: unit.into(),
            period,
        }
    }
}

impl From<(String, Period)> for ShutdownKey {
    fn from((unit, period): (String, Period)) -> Self {
        Self { unit, period }
    }
}

impl From<ShutdownKey> for (String, Period) {
    fn from(key: ShutdownKey) -> Self {
        (key.unit, key.period)
    }
}

impl fmt::Display for ShutdownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alpha[{},{}]", self.unit, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_text_form() {
        let stream = Stream::new("srg", "ad", "srg_sp");
        assert_eq!(stream.to_string(), "srg,ad,srg_sp");
        assert_eq!("srg, ad, srg_sp".parse::<Stream>().unwrap(), stream);
        assert!("srg,ad".parse::<Stream>().is_err());
        assert!("srg,,srg_sp".parse::<Stream>().is_err());
    }

    #[test]
    fn test_horizon() {
        let horizon = Horizon::new(4, 1.0).unwrap();
        assert_eq!(horizon.periods().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(horizon.previous(1), None);
        assert_eq!(horizon.previous(3), Some(2));
        assert_eq!(horizon.previous(5), None);
        assert!(horizon.check(5).is_err());
        assert!(Horizon::new(0, 1.0).is_err());
        assert!(Horizon::new(2, 0.0).is_err());
        assert!(Horizon::new(2, f64::NAN).is_err());
    }

    #[test]
    fn test_unit_horizons_match_validated_ones() {
        assert_eq!(Horizon::single(), Horizon::new(1, 1.0).unwrap());
        assert_eq!(Horizon::unit_periods(4), Horizon::new(4, 1.0).unwrap());
    }

    #[test]
    fn test_horizon_from_json_is_validated() {
        let horizon: Horizon = serde_json::from_str(r#"{"periods": 3, "period_length": 0.5}"#).unwrap();
        assert_eq!(horizon.num_periods(), 3);
        assert!(serde_json::from_str::<Horizon>(r#"{"periods": 0, "period_length": 1.0}"#).is_err());
    }

    #[test]
    fn test_variable_key_order_and_names() {
        let flow_2 = VariableKey::flow(Stream::new("srg", "ad", "srg_sp"), 2);
        let flow_10 = VariableKey::flow(Stream::new("srg", "ad", "srg_sp"), 10);
        let inventory = VariableKey::inventory("rfg_tk", 7);

        // Periods compare numerically, not as text
        assert!(flow_2 < flow_10);
        assert!(inventory < flow_2);
        assert_eq!(flow_10.to_string(), "x[srg,ad,srg_sp,10]");
        assert_eq!(inventory.to_string(), "m[rfg_tk,7]");
        assert_eq!(ShutdownKey::new("cc", 3).to_string(), "alpha[cc,3]");
    }

    #[test]
    fn test_shutdown_key_json_pair() {
        let key: ShutdownKey = serde_json::from_str(r#"["rf", 2]"#).unwrap();
        assert_eq!(key, ShutdownKey::new("rf", 2));
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"["rf",2]"#);
    }
}
