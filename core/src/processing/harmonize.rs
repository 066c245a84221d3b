use crate::math::boosting::{BoostingParams, GradientBoostedTrees};
use crate::observation::{CorrectedSounding, HarmonizedSounding, ModelVersion, Sensor};
use crate::prelude::{FusionConfig, FusionError, FusionResult, SoundingTransform};
use crate::processing::collocation::{Collocation, Collocator};
use crate::processing::features::{hash_training_params, FeatureEncoder, FeatureRow};
use crate::telemetry::log::LogManager;
use ndarray::aview1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maps one sensor's bias-corrected values onto the reference sensor's scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizationModel {
    source: Sensor,
    reference: Sensor,
    source_version: ModelVersion,
    reference_version: ModelVersion,
    encoder: FeatureEncoder,
    ensemble: GradientBoostedTrees,
    collocations: usize,
    version: ModelVersion,
}

impl HarmonizationModel {
    pub fn source(&self) -> Sensor {
        self.source
    }

    pub fn reference(&self) -> Sensor {
        self.reference
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    /// Correction model version the source soundings must carry.
    pub fn source_version(&self) -> &ModelVersion {
        &self.source_version
    }

    pub fn collocations(&self) -> usize {
        self.collocations
    }

    fn harmonized_value(&self, corrected: &CorrectedSounding) -> f64 {
        let row = self.encoder.encode(corrected.xch4(), corrected.sounding());
        corrected.xch4() + self.ensemble.predict(aview1(&row[..]))
    }
}

impl SoundingTransform for HarmonizationModel {
    type Input = CorrectedSounding;
    type Output = HarmonizedSounding;

    fn apply(&self, corrected: &CorrectedSounding) -> FusionResult<HarmonizedSounding> {
        let sensor = corrected.sensor();
        if sensor == self.reference {
            expect_version(&self.reference_version, corrected)?;
            return Ok(HarmonizedSounding::new(corrected.clone(), corrected.xch4()));
        }
        if sensor != self.source {
            return Err(FusionError::ModelMismatch {
                expected: self.source.to_string(),
                found: sensor.to_string(),
            });
        }
        expect_version(&self.source_version, corrected)?;
        let xch4 = self.harmonized_value(corrected);
        Ok(HarmonizedSounding::new(corrected.clone(), xch4))
    }
}

fn expect_version(expected: &ModelVersion, corrected: &CorrectedSounding) -> FusionResult<()> {
    if corrected.version() != expected {
        return Err(FusionError::ModelMismatch {
            expected: format!("{} correction {}", corrected.sensor(), expected),
            found: corrected.version().to_string(),
        });
    }
    Ok(())
}

/// Trains [`HarmonizationModel`]s from sensor-to-sensor collocations of
/// bias-corrected soundings.
pub struct Harmonizer {
    collocator: Collocator,
    min_collocations: usize,
    boosting: BoostingParams,
    reject_suspect: bool,
    logger: LogManager,
}

impl Harmonizer {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            collocator: Collocator::new(config.tolerance),
            min_collocations: config.min_collocations,
            boosting: config.boosting,
            reject_suspect: config.reject_suspect,
            logger: LogManager::new("harmonize"),
        }
    }

    pub fn train(
        &self,
        reference: &[CorrectedSounding],
        other: &[CorrectedSounding],
    ) -> FusionResult<HarmonizationModel> {
        let (reference_sensor, reference_version) = uniform_stage(reference, "reference")?;
        let (source, source_version) = uniform_stage(other, "source")?;
        if source == reference_sensor {
            return Err(FusionError::InvalidInput(format!(
                "{} cannot be harmonized onto itself",
                source
            )));
        }

        let targets: Vec<&CorrectedSounding> =
            other.iter().filter(|c| c.is_valid(self.reject_suspect)).collect();
        let references: Vec<&CorrectedSounding> = reference
            .iter()
            .filter(|c| c.is_valid(self.reject_suspect))
            .collect();
        let pairs = self.collocator.pairs(&targets, &references);
        if pairs.len() < self.min_collocations {
            return Err(FusionError::InsufficientData {
                stage: "harmonization",
                sensor: source,
                found: pairs.len(),
                required: self.min_collocations,
            });
        }

        let encoder = FeatureEncoder::fit(pairs.iter().map(|p| p.target.sounding()));
        let rows: Vec<FeatureRow> = pairs
            .iter()
            .map(|p| encoder.encode(p.target.xch4(), p.target.sounding()))
            .collect();
        let offsets: Vec<f64> = pairs
            .iter()
            .map(|p| p.reference.xch4() - p.target.xch4())
            .collect();
        let ensemble =
            GradientBoostedTrees::fit(FeatureEncoder::matrix(&rows).view(), &offsets, &self.boosting)?;

        let version = self.snapshot_version(&pairs, &source_version, &reference_version);
        self.logger.scoped(source.name()).record(&format!(
            "trained harmonization {} onto {} from {} collocations (tolerance {} deg, {} day(s))",
            version,
            reference_sensor,
            pairs.len(),
            self.collocator.tolerance().spatial_deg,
            self.collocator.tolerance().max_day_offset
        ));

        Ok(HarmonizationModel {
            source,
            reference: reference_sensor,
            source_version,
            reference_version,
            encoder,
            ensemble,
            collocations: pairs.len(),
            version,
        })
    }

    fn snapshot_version(
        &self,
        pairs: &[Collocation<'_, CorrectedSounding, CorrectedSounding>],
        source_version: &ModelVersion,
        reference_version: &ModelVersion,
    ) -> ModelVersion {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"harmonization:");
        hasher.update(source_version.as_str().as_bytes());
        hasher.update(reference_version.as_str().as_bytes());
        hash_training_params(&mut hasher, &self.collocator.tolerance(), &self.boosting);
        for pair in pairs {
            for value in [pair.target.xch4(), pair.reference.xch4(), pair.separation_deg] {
                hasher.update(&value.to_le_bytes());
            }
        }
        ModelVersion::from_digest(&hasher)
    }
}

/// All soundings in a training set must share one sensor and one correction version.
fn uniform_stage(set: &[CorrectedSounding], role: &str) -> FusionResult<(Sensor, ModelVersion)> {
    let first = set.first().ok_or_else(|| {
        FusionError::InvalidInput(format!("no {} soundings to harmonize", role))
    })?;
    if let Some(stray) = set
        .iter()
        .find(|c| c.sensor() != first.sensor() || c.version() != first.version())
    {
        return Err(FusionError::InvalidInput(format!(
            "{} set mixes {} ({}) with {} ({})",
            role,
            first.sensor(),
            first.version(),
            stray.sensor(),
            stray.version()
        )));
    }
    Ok((first.sensor(), first.version().clone()))
}

/// Harmonization models for every non-reference sensor of a period; the
/// reference sensor passes through unchanged.
#[derive(Debug, Clone)]
pub struct HarmonizerSet {
    reference: Sensor,
    reference_version: ModelVersion,
    models: BTreeMap<Sensor, HarmonizationModel>,
}

impl HarmonizerSet {
    pub fn new(reference: Sensor, reference_version: ModelVersion) -> Self {
        Self {
            reference,
            reference_version,
            models: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, model: HarmonizationModel) -> FusionResult<()> {
        if model.reference != self.reference || model.reference_version != self.reference_version {
            return Err(FusionError::ModelMismatch {
                expected: format!("{} correction {}", self.reference, self.reference_version),
                found: format!("{} correction {}", model.reference, model.reference_version),
            });
        }
        self.models.insert(model.source, model);
        Ok(())
    }

    pub fn reference(&self) -> Sensor {
        self.reference
    }

    pub fn get(&self, sensor: Sensor) -> Option<&HarmonizationModel> {
        self.models.get(&sensor)
    }

    pub fn covers(&self, sensor: Sensor) -> bool {
        sensor == self.reference || self.models.contains_key(&sensor)
    }
}

impl SoundingTransform for HarmonizerSet {
    type Input = CorrectedSounding;
    type Output = HarmonizedSounding;

    fn apply(&self, corrected: &CorrectedSounding) -> FusionResult<HarmonizedSounding> {
        let sensor = corrected.sensor();
        if sensor == self.reference {
            expect_version(&self.reference_version, corrected)?;
            return Ok(HarmonizedSounding::new(corrected.clone(), corrected.xch4()));
        }
        self.models
            .get(&sensor)
            .ok_or(FusionError::ModelUnavailable { sensor })?
            .apply(corrected)
    }
}
