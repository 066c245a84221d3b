pub mod sensor;
pub mod sounding;
pub mod station;

pub use sensor::{Sensor, SensorPriority};
pub use sounding::{Ancillary, CorrectedSounding, HarmonizedSounding, ModelVersion, QualityFlag, Sounding};
pub use station::StationObservation;

use chrono::NaiveDate;

/// Anything observed at a point on a given UTC date.
pub trait Located {
    fn lat(&self) -> f64;
    fn lon(&self) -> f64;
    fn date(&self) -> NaiveDate;
}
