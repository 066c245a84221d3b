use crate::math::boosting::{BoostingParams, GradientBoostedTrees};
use crate::math::stats::StatsHelper;
use crate::observation::{CorrectedSounding, ModelVersion, Sensor, Sounding, StationObservation};
use crate::prelude::{CollocationTolerance, FusionConfig, FusionError, FusionResult, SoundingTransform};
use crate::processing::collocation::{Collocation, Collocator};
use crate::processing::features::{hash_training_params, FeatureEncoder, FeatureRow};
use crate::telemetry::log::LogManager;
use ndarray::aview1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-sensor regression of the station-minus-sounding residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionModel {
    sensor: Sensor,
    version: ModelVersion,
    encoder: FeatureEncoder,
    ensemble: GradientBoostedTrees,
    training_stations: BTreeSet<String>,
    collocations: usize,
    tolerance: CollocationTolerance,
}

impl CorrectionModel {
    pub fn sensor(&self) -> Sensor {
        self.sensor
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    /// Station ids whose observations were used for training.
    pub fn training_stations(&self) -> &BTreeSet<String> {
        &self.training_stations
    }

    pub fn collocations(&self) -> usize {
        self.collocations
    }

    pub fn tolerance(&self) -> CollocationTolerance {
        self.tolerance
    }

    fn corrected_value(&self, sounding: &Sounding) -> f64 {
        let row = self.encoder.encode(sounding.xch4, sounding);
        sounding.xch4 + self.ensemble.predict(aview1(&row[..]))
    }
}

impl SoundingTransform for CorrectionModel {
    type Input = Sounding;
    type Output = CorrectedSounding;

    fn apply(&self, sounding: &Sounding) -> FusionResult<CorrectedSounding> {
        if sounding.sensor != self.sensor {
            return Err(FusionError::ModelMismatch {
                expected: self.sensor.to_string(),
                found: sounding.sensor.to_string(),
            });
        }
        let xch4 = self.corrected_value(sounding);
        Ok(CorrectedSounding::new(sounding.clone(), xch4, self.version.clone()))
    }
}

/// Skill of a correction model on held-out stations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Skill {
    pub samples: usize,
    pub r2: f64,
    pub rmse: f64,
    /// RMSE of the uncorrected soundings against the same stations.
    pub raw_rmse: f64,
}

/// Disjoint partition of station ids into training and held-out sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSplit {
    training: BTreeSet<String>,
    held_out: BTreeSet<String>,
}

impl StationSplit {
    /// Holds out every `stride`-th station (in id order).
    pub fn holdout_every(stations: &[StationObservation], stride: usize) -> FusionResult<Self> {
        if stride < 2 {
            return Err(FusionError::InvalidInput(format!(
                "holdout stride must be at least 2, got {}",
                stride
            )));
        }
        let ids: BTreeSet<&str> = stations.iter().map(|o| o.station_id.as_str()).collect();
        let (mut training, mut held_out) = (BTreeSet::new(), BTreeSet::new());
        for (idx, id) in ids.into_iter().enumerate() {
            if (idx + 1) % stride == 0 {
                held_out.insert(id.to_string());
            } else {
                training.insert(id.to_string());
            }
        }
        Ok(Self { training, held_out })
    }

    pub fn explicit<I, S>(stations: &[StationObservation], held_out: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let held_out: BTreeSet<String> = held_out.into_iter().map(Into::into).collect();
        let training = stations
            .iter()
            .map(|o| o.station_id.clone())
            .filter(|id| !held_out.contains(id))
            .collect();
        Self { training, held_out }
    }

    pub fn training_ids(&self) -> &BTreeSet<String> {
        &self.training
    }

    pub fn held_out_ids(&self) -> &BTreeSet<String> {
        &self.held_out
    }

    pub fn training(&self, stations: &[StationObservation]) -> Vec<StationObservation> {
        select(stations, &self.training)
    }

    pub fn held_out(&self, stations: &[StationObservation]) -> Vec<StationObservation> {
        select(stations, &self.held_out)
    }
}

fn select(stations: &[StationObservation], ids: &BTreeSet<String>) -> Vec<StationObservation> {
    stations
        .iter()
        .filter(|o| ids.contains(&o.station_id))
        .cloned()
        .collect()
}

/// Trains and evaluates per-sensor [`CorrectionModel`]s against station data.
pub struct BiasCorrector {
    collocator: Collocator,
    min_collocations: usize,
    boosting: BoostingParams,
    reject_suspect: bool,
    logger: LogManager,
}

impl BiasCorrector {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            collocator: Collocator::new(config.tolerance),
            min_collocations: config.min_collocations,
            boosting: config.boosting,
            reject_suspect: config.reject_suspect,
            logger: LogManager::new("bias"),
        }
    }

    pub fn train(
        &self,
        soundings: &[Sounding],
        stations: &[StationObservation],
        sensor: Sensor,
    ) -> FusionResult<CorrectionModel> {
        let pairs = self.collocate(soundings, stations, sensor);
        if pairs.len() < self.min_collocations {
            return Err(FusionError::InsufficientData {
                stage: "bias correction",
                sensor,
                found: pairs.len(),
                required: self.min_collocations,
            });
        }

        let encoder = FeatureEncoder::fit(pairs.iter().map(|p| p.target));
        let rows: Vec<FeatureRow> = pairs
            .iter()
            .map(|p| encoder.encode(p.target.xch4, p.target))
            .collect();
        let residuals: Vec<f64> = pairs
            .iter()
            .map(|p| p.reference.xch4 - p.target.xch4)
            .collect();
        let ensemble =
            GradientBoostedTrees::fit(FeatureEncoder::matrix(&rows).view(), &residuals, &self.boosting)?;

        let tolerance = self.collocator.tolerance();
        let version = snapshot_version(sensor, &pairs, &tolerance, &self.boosting);
        let training_stations = pairs
            .iter()
            .map(|p| p.reference.station_id.clone())
            .collect();

        self.logger.scoped(sensor.name()).record(&format!(
            "trained correction {} on {} collocations (tolerance {} deg, {} day(s); {} trees, depth {}, rate {})",
            version,
            pairs.len(),
            tolerance.spatial_deg,
            tolerance.max_day_offset,
            self.boosting.trees,
            self.boosting.max_depth,
            self.boosting.learning_rate
        ));

        Ok(CorrectionModel {
            sensor,
            version,
            encoder,
            ensemble,
            training_stations,
            collocations: pairs.len(),
            tolerance,
        })
    }

    /// Scores `model` on stations it never saw during training.
    pub fn evaluate(
        &self,
        model: &CorrectionModel,
        soundings: &[Sounding],
        held_out: &[StationObservation],
    ) -> FusionResult<Skill> {
        if let Some(leaked) = held_out
            .iter()
            .find(|o| model.training_stations.contains(&o.station_id))
        {
            return Err(FusionError::LeakedStation(leaked.station_id.clone()));
        }

        let pairs = self.collocate(soundings, held_out, model.sensor);
        if pairs.is_empty() {
            return Err(FusionError::InsufficientData {
                stage: "evaluation",
                sensor: model.sensor,
                found: 0,
                required: 1,
            });
        }

        let observed: Vec<f64> = pairs.iter().map(|p| p.reference.xch4).collect();
        let corrected: Vec<f64> = pairs.iter().map(|p| model.corrected_value(p.target)).collect();
        let raw: Vec<f64> = pairs.iter().map(|p| p.target.xch4).collect();

        let skill = Skill {
            samples: pairs.len(),
            r2: StatsHelper::r_squared(&corrected, &observed).unwrap_or(f64::NAN),
            rmse: StatsHelper::rmse(&corrected, &observed).unwrap_or(f64::NAN),
            raw_rmse: StatsHelper::rmse(&raw, &observed).unwrap_or(f64::NAN),
        };
        self.logger.scoped(model.sensor.name()).record(&format!(
            "held-out skill on {} collocations: R2 {:.3}, RMSE {:.2} ppb (raw {:.2} ppb)",
            skill.samples, skill.r2, skill.rmse, skill.raw_rmse
        ));
        Ok(skill)
    }

    fn collocate<'a>(
        &self,
        soundings: &'a [Sounding],
        stations: &'a [StationObservation],
        sensor: Sensor,
    ) -> Vec<Collocation<'a, Sounding, StationObservation>> {
        let targets: Vec<&Sounding> = soundings
            .iter()
            .filter(|s| s.sensor == sensor && s.is_valid(self.reject_suspect))
            .collect();
        let references: Vec<&StationObservation> =
            stations.iter().filter(|o| o.xch4.is_finite()).collect();
        self.collocator.pairs(&targets, &references)
    }
}

fn snapshot_version(
    sensor: Sensor,
    pairs: &[Collocation<'_, Sounding, StationObservation>],
    tolerance: &CollocationTolerance,
    boosting: &BoostingParams,
) -> ModelVersion {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"bias-correction:");
    hasher.update(sensor.name().as_bytes());
    hash_training_params(&mut hasher, tolerance, boosting);
    for pair in pairs {
        hasher.update(pair.reference.station_id.as_bytes());
        hasher.update(pair.target.date.to_string().as_bytes());
        for value in [pair.target.lat, pair.target.lon, pair.target.xch4, pair.reference.xch4] {
            hasher.update(&value.to_le_bytes());
        }
    }
    ModelVersion::from_digest(&hasher)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    pub(crate) fn truth(lat: f64, day: u32) -> f64 {
        1850.0 + 8.0 * (lat.to_radians()).sin() + 0.2 * day as f64
    }

    pub(crate) fn station_sites() -> Vec<(String, f64, f64)> {
        (0..8)
            .map(|i| (format!("st{:02}", i), -50.0 + 13.0 * i as f64, -150.0 + 37.0 * i as f64))
            .collect()
    }

    /// Stations plus soundings of `sensor` next to each station every day,
    /// with raw = truth + `offset` + noise.
    pub(crate) fn synthetic(
        sensor: Sensor,
        offset: f64,
        days: u32,
        seed: u64,
    ) -> (Vec<Sounding>, Vec<StationObservation>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut soundings = Vec::new();
        let mut stations = Vec::new();
        for day in 1..=days {
            let date = NaiveDate::from_ymd_opt(2021, 1, day).unwrap();
            for (id, lat, lon) in station_sites() {
                let value = truth(lat, day);
                stations.push(StationObservation::new(id, lat, lon, date, value + rng.gen_range(-0.3..0.3)));
                for _ in 0..2 {
                    let slat = lat + rng.gen_range(-0.04..0.04);
                    let slon = lon + rng.gen_range(-0.04..0.04);
                    let raw = truth(slat, day) + offset + rng.gen_range(-0.5..0.5);
                    soundings.push(Sounding::new(sensor, slat, slon, date, raw));
                }
            }
        }
        (soundings, stations)
    }

    fn corrector() -> BiasCorrector {
        BiasCorrector::new(&FusionConfig::default())
    }

    #[test]
    fn correction_removes_known_offset() {
        let (soundings, stations) = synthetic(Sensor::Gosat, -6.0, 10, 7);
        let model = corrector().train(&soundings, &stations, Sensor::Gosat).unwrap();
        let sounding = Sounding::new(Sensor::Gosat, 4.0, 2.0, NaiveDate::from_ymd_opt(2021, 1, 5).unwrap(), 1847.0);
        let corrected = model.apply(&sounding).unwrap();
        assert!((corrected.xch4() - 1853.0).abs() < 1.5, "corrected {}", corrected.xch4());
        assert_eq!(corrected.raw_xch4(), 1847.0);
        assert_eq!(corrected.version(), model.version());
    }

    #[test]
    fn too_few_collocations_is_fatal_for_the_sensor() {
        let (soundings, stations) = synthetic(Sensor::Tropomi, 10.0, 1, 3);
        let result = corrector().train(&soundings, &stations, Sensor::Tropomi);
        assert!(matches!(
            result,
            Err(FusionError::InsufficientData { found: 16, required: 30, .. })
        ));
        let result = corrector().train(&soundings, &stations, Sensor::Gosat2);
        assert!(matches!(result, Err(FusionError::InsufficientData { found: 0, .. })));
    }

    #[test]
    fn model_rejects_other_sensors() {
        let (soundings, stations) = synthetic(Sensor::Gosat2, 3.0, 5, 11);
        let model = corrector().train(&soundings, &stations, Sensor::Gosat2).unwrap();
        let foreign = Sounding::new(Sensor::Gosat, 0.0, 0.0, NaiveDate::from_ymd_opt(2021, 1, 2).unwrap(), 1850.0);
        assert!(matches!(model.apply(&foreign), Err(FusionError::ModelMismatch { .. })));
    }

    #[test]
    fn held_out_stations_are_disjoint_from_training() {
        let (soundings, stations) = synthetic(Sensor::Tropomi, 12.0, 10, 5);
        let split = StationSplit::holdout_every(&stations, 4).unwrap();
        assert_eq!(split.held_out_ids().len(), 2);

        let bias = corrector();
        let model = bias.train(&soundings, &split.training(&stations), Sensor::Tropomi).unwrap();
        assert!(model.training_stations().is_disjoint(split.held_out_ids()));

        let skill = bias.evaluate(&model, &soundings, &split.held_out(&stations)).unwrap();
        assert!(skill.samples > 0);
        assert!(skill.rmse < skill.raw_rmse);

        let leaked = bias.evaluate(&model, &soundings, &split.training(&stations));
        assert!(matches!(leaked, Err(FusionError::LeakedStation(_))));
    }

    #[test]
    fn retraining_on_identical_data_reproduces_the_model() {
        let (soundings, stations) = synthetic(Sensor::Gosat, 4.0, 5, 21);
        let first = corrector().train(&soundings, &stations, Sensor::Gosat).unwrap();
        let second = corrector().train(&soundings, &stations, Sensor::Gosat).unwrap();
        assert_eq!(first, second);

        let (other, _) = synthetic(Sensor::Gosat, 4.0, 5, 22);
        let third = corrector().train(&other, &stations, Sensor::Gosat).unwrap();
        assert_ne!(first.version(), third.version());
    }
}
