use crate::prelude::FusionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Satellite instruments contributing XCH4 soundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sensor {
    #[serde(rename = "GOSAT")]
    Gosat,
    #[serde(rename = "GOSAT-2")]
    Gosat2,
    #[serde(rename = "TROPOMI")]
    Tropomi,
}

impl Sensor {
    pub const ALL: [Sensor; 3] = [Sensor::Gosat, Sensor::Gosat2, Sensor::Tropomi];

    pub fn name(self) -> &'static str {
        match self {
            Sensor::Gosat => "GOSAT",
            Sensor::Gosat2 => "GOSAT-2",
            Sensor::Tropomi => "TROPOMI",
        }
    }

    /// Dense index in `0..Sensor::ALL.len()`.
    pub fn index(self) -> usize {
        match self {
            Sensor::Gosat => 0,
            Sensor::Gosat2 => 1,
            Sensor::Tropomi => 2,
        }
    }

    /// Provenance code used by persisted products; `0` is reserved for "no data".
    pub fn code(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_code(code: u8) -> Option<Sensor> {
        Sensor::ALL.get(usize::from(code).checked_sub(1)?).copied()
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Sensor {
    type Err = FusionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GOSAT" => Ok(Sensor::Gosat),
            "GOSAT-2" | "GOSAT2" => Ok(Sensor::Gosat2),
            "TROPOMI" | "S5P" => Ok(Sensor::Tropomi),
            other => Err(FusionError::MalformedRecord(format!(
                "unknown sensor '{}'",
                other
            ))),
        }
    }
}

/// Ordered list of sensors consulted by the fusion engine, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorPriority(Vec<Sensor>);

impl SensorPriority {
    pub fn new(order: Vec<Sensor>) -> Result<Self, FusionError> {
        if order.is_empty() {
            return Err(FusionError::InvalidInput(
                "sensor priority must name at least one sensor".into(),
            ));
        }
        for (idx, sensor) in order.iter().enumerate() {
            if order[..idx].contains(sensor) {
                return Err(FusionError::InvalidInput(format!(
                    "sensor {} listed twice in priority",
                    sensor
                )));
            }
        }
        Ok(Self(order))
    }

    pub fn iter(&self) -> impl Iterator<Item = Sensor> + '_ {
        self.0.iter().copied()
    }

    /// Position in the priority order; `None` for sensors that are never fused.
    pub fn rank(&self, sensor: Sensor) -> Option<usize> {
        self.0.iter().position(|&s| s == sensor)
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        Self::new(self.0.clone()).map(|_| ())
    }
}

impl Default for SensorPriority {
    fn default() -> Self {
        Self(vec![Sensor::Gosat2, Sensor::Tropomi, Sensor::Gosat])
    }
}
