use super::{Located, Sensor};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval quality as reported by the sensor's level-2 product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Good,
    Suspect,
    Bad,
}

/// Optional covariates carried alongside a retrieval and used as regression features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ancillary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub albedo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airmass: Option<f64>,
}

/// One raw satellite XCH4 retrieval (ppb).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sounding {
    pub sensor: Sensor,
    pub lat: f64,
    pub lon: f64,
    pub date: NaiveDate,
    pub xch4: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityFlag>,
    #[serde(default)]
    pub ancillary: Ancillary,
}

impl Sounding {
    pub fn new(sensor: Sensor, lat: f64, lon: f64, date: NaiveDate, xch4: f64) -> Self {
        Self {
            sensor,
            lat,
            lon,
            date,
            xch4,
            quality: None,
            ancillary: Ancillary::default(),
        }
    }

    pub fn with_quality(mut self, quality: QualityFlag) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_ancillary(mut self, ancillary: Ancillary) -> Self {
        self.ancillary = ancillary;
        self
    }

    /// Whether this retrieval may contribute to training or fusion.
    pub fn is_valid(&self, reject_suspect: bool) -> bool {
        quality_accepted(self.quality, reject_suspect) && finite_position(self) && self.xch4.is_finite()
    }
}

impl Located for Sounding {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lon(&self) -> f64 {
        self.lon
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

fn quality_accepted(quality: Option<QualityFlag>, reject_suspect: bool) -> bool {
    match quality {
        Some(QualityFlag::Bad) => false,
        Some(QualityFlag::Suspect) => !reject_suspect,
        Some(QualityFlag::Good) | None => true,
    }
}

fn finite_position<L: Located>(record: &L) -> bool {
    record.lat().is_finite() && record.lon().is_finite()
}

/// Digest identifying the training snapshot a model was fitted on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    pub(crate) fn from_digest(hasher: &blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        Self(digest.to_hex().as_str()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sounding after per-sensor bias correction.
///
/// Only a trained [`CorrectionModel`](crate::processing::CorrectionModel) can
/// produce one, which keeps harmonization downstream of bias correction.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSounding {
    source: Sounding,
    xch4: f64,
    version: ModelVersion,
}

impl CorrectedSounding {
    pub(crate) fn new(source: Sounding, xch4: f64, version: ModelVersion) -> Self {
        Self {
            source,
            xch4,
            version,
        }
    }

    /// Wraps a raw sounding as if it had been corrected. Test-only: this is
    /// exactly the reversed ordering the pipeline must never perform.
    #[cfg(test)]
    pub(crate) fn assume_corrected(source: Sounding, version: ModelVersion) -> Self {
        let xch4 = source.xch4;
        Self::new(source, xch4, version)
    }

    pub fn sensor(&self) -> Sensor {
        self.source.sensor
    }

    pub fn xch4(&self) -> f64 {
        self.xch4
    }

    pub fn raw_xch4(&self) -> f64 {
        self.source.xch4
    }

    pub fn sounding(&self) -> &Sounding {
        &self.source
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    pub fn is_valid(&self, reject_suspect: bool) -> bool {
        quality_accepted(self.source.quality, reject_suspect) && finite_position(self) && self.xch4.is_finite()
    }
}

impl Located for CorrectedSounding {
    fn lat(&self) -> f64 {
        self.source.lat
    }

    fn lon(&self) -> f64 {
        self.source.lon
    }

    fn date(&self) -> NaiveDate {
        self.source.date
    }
}

/// A bias-corrected sounding expressed on the reference sensor's scale.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedSounding {
    corrected: CorrectedSounding,
    xch4: f64,
}

impl HarmonizedSounding {
    pub(crate) fn new(corrected: CorrectedSounding, xch4: f64) -> Self {
        Self { corrected, xch4 }
    }

    pub fn sensor(&self) -> Sensor {
        self.corrected.sensor()
    }

    pub fn xch4(&self) -> f64 {
        self.xch4
    }

    pub fn corrected(&self) -> &CorrectedSounding {
        &self.corrected
    }

    pub fn is_valid(&self, reject_suspect: bool) -> bool {
        quality_accepted(self.corrected.sounding().quality, reject_suspect)
            && finite_position(self)
            && self.xch4.is_finite()
    }
}

impl Located for HarmonizedSounding {
    fn lat(&self) -> f64 {
        self.corrected.lat()
    }

    fn lon(&self) -> f64 {
        self.corrected.lon()
    }

    fn date(&self) -> NaiveDate {
        self.corrected.date()
    }
}
