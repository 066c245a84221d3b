use crate::math::boosting::BoostingParams;
use crate::observation::Sounding;
use crate::prelude::CollocationTolerance;
use chrono::{Datelike, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Value, lat, lon, seasonal sin/cos, albedo, airmass.
pub const FEATURE_COUNT: usize = 7;

pub type FeatureRow = [f64; FEATURE_COUNT];

/// Turns a sounding (plus the value being modelled) into a regression row.
/// Missing covariates are imputed with their training mean so inference is
/// defined for every sounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    albedo_fill: f64,
    airmass_fill: f64,
}

impl FeatureEncoder {
    pub fn fit<'a, I>(soundings: I) -> Self
    where
        I: IntoIterator<Item = &'a Sounding>,
    {
        let (mut albedo, mut airmass) = (Vec::new(), Vec::new());
        for sounding in soundings {
            albedo.extend(sounding.ancillary.albedo.filter(|v| v.is_finite()));
            airmass.extend(sounding.ancillary.airmass.filter(|v| v.is_finite()));
        }
        Self {
            albedo_fill: mean_or_zero(&albedo),
            airmass_fill: mean_or_zero(&airmass),
        }
    }

    pub fn encode(&self, value: f64, sounding: &Sounding) -> FeatureRow {
        let phase = seasonal_phase(sounding.date);
        let fill = |v: Option<f64>, default: f64| v.filter(|x| x.is_finite()).unwrap_or(default);
        [
            value,
            sounding.lat,
            sounding.lon,
            phase.sin(),
            phase.cos(),
            fill(sounding.ancillary.albedo, self.albedo_fill),
            fill(sounding.ancillary.airmass, self.airmass_fill),
        ]
    }

    pub fn matrix(rows: &[FeatureRow]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), FEATURE_COUNT), |(i, j)| rows[i][j])
    }
}

fn seasonal_phase(date: NaiveDate) -> f64 {
    date.ordinal0() as f64 / 365.25 * TAU
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Feeds the training configuration into a snapshot digest.
pub(crate) fn hash_training_params(
    hasher: &mut blake3::Hasher,
    tolerance: &CollocationTolerance,
    boosting: &BoostingParams,
) {
    hasher.update(&tolerance.spatial_deg.to_le_bytes());
    hasher.update(&tolerance.max_day_offset.to_le_bytes());
    hasher.update(&(boosting.trees as u64).to_le_bytes());
    hasher.update(&(boosting.max_depth as u64).to_le_bytes());
    hasher.update(&boosting.learning_rate.to_le_bytes());
    hasher.update(&(boosting.min_samples_leaf as u64).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Ancillary, Sensor};

    #[test]
    fn missing_covariates_take_training_mean() {
        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        let with = |albedo| {
            Sounding::new(Sensor::Gosat, 10.0, 20.0, date, 1850.0).with_ancillary(Ancillary {
                albedo: Some(albedo),
                airmass: None,
            })
        };
        let training = [with(0.2), with(0.4)];
        let encoder = FeatureEncoder::fit(training.iter());

        let bare = Sounding::new(Sensor::Gosat, 10.0, 20.0, date, 1850.0);
        let row = encoder.encode(1851.0, &bare);
        assert_eq!(row[0], 1851.0);
        assert!((row[5] - 0.3).abs() < 1e-12);
        assert_eq!(row[6], 0.0);
    }

    #[test]
    fn matrix_preserves_row_order() {
        let rows = [[1.0; FEATURE_COUNT], [2.0; FEATURE_COUNT]];
        let matrix = FeatureEncoder::matrix(&rows);
        assert_eq!(matrix.dim(), (2, FEATURE_COUNT));
        assert_eq!(matrix[[1, 3]], 2.0);
    }
}
