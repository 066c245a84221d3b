use crate::math::boosting::BoostingParams;
use crate::observation::{Sensor, SensorPriority};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Window within which two observations count as collocated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollocationTolerance {
    /// Maximum latitude and longitude separation, in degrees.
    pub spatial_deg: f64,
    /// Maximum separation in whole UTC days; `0` means same day.
    pub max_day_offset: u32,
}

impl Default for CollocationTolerance {
    fn default() -> Self {
        Self {
            spatial_deg: 0.1,
            max_day_offset: 0,
        }
    }
}

/// Shared configuration for the training and fusion stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub tolerance: CollocationTolerance,
    pub min_collocations: usize,
    pub boosting: BoostingParams,
    pub reference_sensor: Sensor,
    pub baseline_sensor: Option<Sensor>,
    pub priority: SensorPriority,
    pub reject_suspect: bool,
    pub land_only: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            tolerance: CollocationTolerance::default(),
            min_collocations: 30,
            boosting: BoostingParams::default(),
            reference_sensor: Sensor::Tropomi,
            baseline_sensor: Some(Sensor::Tropomi),
            priority: SensorPriority::default(),
            reject_suspect: false,
            land_only: false,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> FusionResult<()> {
        let spatial = self.tolerance.spatial_deg;
        if !spatial.is_finite() || spatial < 0.0 {
            return Err(FusionError::InvalidInput(format!(
                "spatial tolerance must be a non-negative number of degrees, got {}",
                spatial
            )));
        }
        if self.min_collocations == 0 {
            return Err(FusionError::InvalidInput(
                "min_collocations must be at least 1".into(),
            ));
        }
        self.boosting.validate()?;
        self.priority.validate()
    }
}

/// Common error type for every stage of the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum FusionError {
    #[error("coordinate ({lat}, {lon}) lies outside the grid domain")]
    OutOfDomain { lat: f64, lon: f64 },
    #[error("{stage} for {sensor}: {found} collocations, {required} required")]
    InsufficientData {
        stage: &'static str,
        sensor: Sensor,
        found: usize,
        required: usize,
    },
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("implausible XCH4 value {0} ppb")]
    ImplausibleValue(f64),
    #[error("malformed batch for {date}: {reason}")]
    MalformedBatch { date: NaiveDate, reason: String },
    #[error("no trained model available for {sensor}")]
    ModelUnavailable { sensor: Sensor },
    #[error("model mismatch: expected {expected}, found {found}")]
    ModelMismatch { expected: String, found: String },
    #[error("station {0} appears in both training and evaluation sets")]
    LeakedStation(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("json decoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FusionResult<T> = Result<T, FusionError>;

/// A trained, read-only transform from one stage's records to the next.
pub trait SoundingTransform {
    type Input;
    type Output;

    fn apply(&self, input: &Self::Input) -> FusionResult<Self::Output>;

    fn apply_all(&self, inputs: &[Self::Input]) -> FusionResult<Vec<Self::Output>> {
        inputs.iter().map(|input| self.apply(input)).collect()
    }
}
