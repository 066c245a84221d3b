//! Multi-sensor XCH4 fusion core.
//!
//! Raw GOSAT, GOSAT-2 and TROPOMI soundings are bias corrected against
//! reference stations, harmonized onto a reference sensor's scale and fused
//! by sensor priority onto a fixed 0.1° grid spanning 70°S to 70°N.

pub mod grid;
pub mod ingest;
pub mod math;
pub mod observation;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use prelude::{CollocationTolerance, FusionConfig, FusionError, FusionResult, SoundingTransform};
