use crate::grid::{GridCell, GridModel, LandMask, COLS, ROWS};
use crate::observation::{CorrectedSounding, HarmonizedSounding, Located, Sensor, SensorPriority};
use crate::prelude::{FusionConfig, FusionError, FusionResult};
use crate::telemetry::log::LogManager;
use chrono::NaiveDate;
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fused XCH4 for one UTC day, with per-cell provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyGrid {
    date: NaiveDate,
    values: Array2<f32>,
    provenance: Array2<Option<Sensor>>,
    baseline: Option<Array2<f32>>,
    rejected: usize,
}

impl DailyGrid {
    fn empty(date: NaiveDate, with_baseline: bool) -> Self {
        Self {
            date,
            values: Array2::from_elem((ROWS, COLS), f32::NAN),
            provenance: Array2::from_elem((ROWS, COLS), None),
            baseline: with_baseline.then(|| Array2::from_elem((ROWS, COLS), f32::NAN)),
            rejected: 0,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// `YYYYMMDD` key used to address the day in persisted monthly files.
    pub fn day_key(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Fused values in ppb; NaN marks cells with no accepted retrieval.
    pub fn values(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    pub fn provenance(&self) -> ArrayView2<'_, Option<Sensor>> {
        self.provenance.view()
    }

    /// Unfused single-sensor comparison field, when a baseline sensor is configured.
    pub fn baseline(&self) -> Option<ArrayView2<'_, f32>> {
        self.baseline.as_ref().map(|b| b.view())
    }

    /// Soundings dropped because their coordinates fell outside the grid.
    pub fn rejected_records(&self) -> usize {
        self.rejected
    }

    pub fn value_at(&self, cell: GridCell) -> Option<f32> {
        Some(self.values[cell.index()]).filter(|v| v.is_finite())
    }

    pub fn baseline_at(&self, cell: GridCell) -> Option<f32> {
        self.baseline
            .as_ref()
            .map(|b| b[cell.index()])
            .filter(|v| v.is_finite())
    }

    /// Fused value of the cell nearest to `(lat, lon)`.
    pub fn value_near(&self, lat: f64, lon: f64) -> FusionResult<Option<f32>> {
        Ok(self.value_at(GridModel::cell_of(lat, lon)?))
    }

    pub fn valid_pixels(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Provenance as [`Sensor::code`]s with `0` for missing cells.
    pub fn provenance_codes(&self) -> Array2<u8> {
        self.provenance.map(|source| source.map_or(0, Sensor::code))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CellAccumulator {
    sums: [f64; 3],
    counts: [u32; 3],
}

impl CellAccumulator {
    fn add(&mut self, sensor: Sensor, value: f64) {
        self.sums[sensor.index()] += value;
        self.counts[sensor.index()] += 1;
    }

    fn mean(&self, sensor: Sensor) -> Option<f64> {
        let n = self.counts[sensor.index()];
        (n > 0).then(|| self.sums[sensor.index()] / f64::from(n))
    }
}

struct Binned {
    cells: BTreeMap<GridCell, CellAccumulator>,
    rejected: usize,
}

/// Priority fusion of harmonized soundings onto the daily grid.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    priority: SensorPriority,
    baseline_sensor: Option<Sensor>,
    reject_suspect: bool,
    land_only: bool,
    land: Arc<LandMask>,
    logger: LogManager,
}

impl FusionEngine {
    pub fn new(config: &FusionConfig, land: Arc<LandMask>) -> Self {
        Self {
            priority: config.priority.clone(),
            baseline_sensor: config.baseline_sensor,
            reject_suspect: config.reject_suspect,
            land_only: config.land_only,
            land,
            logger: LogManager::new("fusion"),
        }
    }

    pub fn priority(&self) -> &SensorPriority {
        &self.priority
    }

    pub fn baseline_sensor(&self) -> Option<Sensor> {
        self.baseline_sensor
    }

    pub fn land(&self) -> &LandMask {
        &self.land
    }

    /// Fuses one day. Each cell takes the mean of the highest-priority sensor
    /// that has at least one valid sounding there; sensors are never blended
    /// and empty cells stay missing.
    ///
    /// `baseline`, when given, holds the baseline sensor's bias-corrected
    /// soundings for the same day.
    pub fn fuse_day(
        &self,
        date: NaiveDate,
        soundings: &[HarmonizedSounding],
        baseline: Option<&[CorrectedSounding]>,
    ) -> FusionResult<DailyGrid> {
        let fused = self.bin(date, soundings, |s| {
            s.is_valid(self.reject_suspect).then(|| (s.sensor(), s.xch4()))
        })?;
        let baseline_bins = match (baseline, self.baseline_sensor) {
            (Some(records), Some(sensor)) => Some(self.bin(date, records, |c| {
                (c.sensor() == sensor && c.is_valid(self.reject_suspect)).then(|| (sensor, c.xch4()))
            })?),
            _ => None,
        };

        let mut grid = DailyGrid::empty(date, baseline_bins.is_some());
        for (cell, acc) in &fused.cells {
            let Some(sensor) = self.priority.iter().find(|&s| acc.counts[s.index()] > 0) else {
                continue;
            };
            if let Some(mean) = acc.mean(sensor) {
                grid.values[cell.index()] = mean as f32;
                grid.provenance[cell.index()] = Some(sensor);
            }
        }
        if let (Some(bins), Some(field), Some(sensor)) =
            (&baseline_bins, grid.baseline.as_mut(), self.baseline_sensor)
        {
            for (cell, acc) in &bins.cells {
                if let Some(mean) = acc.mean(sensor) {
                    field[cell.index()] = mean as f32;
                }
            }
        }
        grid.rejected = fused.rejected;

        self.logger.detail(&format!(
            "{}: {} cells fused, {} soundings outside the grid",
            grid.day_key(),
            grid.valid_pixels(),
            grid.rejected
        ));
        Ok(grid)
    }

    fn bin<T, F>(&self, date: NaiveDate, records: &[T], accept: F) -> FusionResult<Binned>
    where
        T: Located,
        F: Fn(&T) -> Option<(Sensor, f64)>,
    {
        let mut binned = Binned {
            cells: BTreeMap::new(),
            rejected: 0,
        };
        for record in records {
            if record.date() != date {
                return Err(FusionError::MalformedBatch {
                    date,
                    reason: format!("contains a sounding dated {}", record.date()),
                });
            }
            let Some((sensor, value)) = accept(record) else {
                continue;
            };
            let cell = match GridModel::cell_of(record.lat(), record.lon()) {
                Ok(cell) => cell,
                Err(err) => {
                    self.logger.detail(&format!("rejected sounding: {}", err));
                    binned.rejected += 1;
                    continue;
                }
            };
            if self.land_only && !self.land.is_land(cell) {
                continue;
            }
            binned.cells.entry(cell).or_default().add(sensor, value);
        }
        Ok(binned)
    }
}
