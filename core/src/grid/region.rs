use super::model::GridModel;
use crate::math::stats::StatsHelper;
use crate::prelude::{FusionError, FusionResult};
use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Rectangular lat/lon window used for regional summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

/// Valid-pixel count and mean of a field over a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSummary {
    pub valid_pixels: usize,
    pub mean: Option<f64>,
}

impl Region {
    pub fn new(name: impl Into<String>, lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            name: name.into(),
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    pub fn global() -> Self {
        Self::new("global", -180.0, 180.0, -90.0, 90.0)
    }

    /// Row and column ranges whose cell centres fall inside the region, or
    /// `None` when no cell does.
    pub fn window(&self) -> FusionResult<Option<(Range<usize>, Range<usize>)>> {
        if !(self.lat_min <= self.lat_max && self.lon_min <= self.lon_max) {
            return Err(FusionError::InvalidInput(format!(
                "region {} has inverted or undefined bounds",
                self.name
            )));
        }
        let rows = axis_range(GridModel::latitudes().as_slice(), self.lat_min, self.lat_max);
        let cols = axis_range(GridModel::longitudes().as_slice(), self.lon_min, self.lon_max);
        Ok(rows.zip(cols))
    }

    pub fn summarize(&self, field: ArrayView2<'_, f32>) -> FusionResult<FieldSummary> {
        let window = match self.window()? {
            Some((rows, cols)) => field.slice_move(s![rows, cols]),
            None => {
                return Ok(FieldSummary {
                    valid_pixels: 0,
                    mean: None,
                })
            }
        };
        let valid: Vec<f64> = window
            .iter()
            .filter(|value| value.is_finite())
            .map(|&value| f64::from(value))
            .collect();
        Ok(FieldSummary {
            valid_pixels: valid.len(),
            mean: StatsHelper::mean(&valid),
        })
    }
}

fn axis_range(centers: Option<&[f64]>, min: f64, max: f64) -> Option<Range<usize>> {
    let centers = centers?;
    let start = centers.iter().position(|&c| c >= min)?;
    let end = centers.iter().rposition(|&c| c <= max)?;
    (start <= end).then(|| start..end + 1)
}
