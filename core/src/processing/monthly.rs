use crate::grid::{GridCell, GridModel, COLS, ROWS};
use crate::observation::{Sensor, SensorPriority};
use crate::prelude::{FusionError, FusionResult};
use crate::processing::fusion::DailyGrid;
use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, ArrayView2, Zip};

/// Calendar-month reduction of [`DailyGrid`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyGrid {
    year: i32,
    month: u32,
    fused_mean: Array2<f32>,
    baseline_mean: Array2<f32>,
    n_days_fused: Array2<u16>,
    n_days_baseline: Array2<u16>,
    dominant_source: Array2<Option<Sensor>>,
    days: Vec<NaiveDate>,
}

impl MonthlyGrid {
    /// Recomputes the month from scratch; `days` may arrive in any order.
    pub fn aggregate(
        year: i32,
        month: u32,
        days: &[DailyGrid],
        priority: &SensorPriority,
    ) -> FusionResult<Self> {
        let mut ordered: Vec<&DailyGrid> = days.iter().collect();
        ordered.sort_by_key(|d| d.date());
        let mut accumulator = MonthlyAccumulator::new(year, month, priority.clone())?;
        for day in ordered {
            accumulator.add(day)?;
        }
        Ok(accumulator.finish())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Mean of the non-missing daily fused values; NaN where no day contributed.
    pub fn fused_mean(&self) -> ArrayView2<'_, f32> {
        self.fused_mean.view()
    }

    pub fn baseline_mean(&self) -> ArrayView2<'_, f32> {
        self.baseline_mean.view()
    }

    pub fn n_days_fused(&self) -> ArrayView2<'_, u16> {
        self.n_days_fused.view()
    }

    pub fn n_days_baseline(&self) -> ArrayView2<'_, u16> {
        self.n_days_baseline.view()
    }

    /// Sensor that supplied the most fused days per cell, ties going to priority.
    pub fn dominant_source(&self) -> ArrayView2<'_, Option<Sensor>> {
        self.dominant_source.view()
    }

    /// Dates that fed this month, ascending.
    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn day_keys(&self) -> Vec<String> {
        self.days.iter().map(|d| d.format("%Y%m%d").to_string()).collect()
    }

    pub fn value_at(&self, cell: GridCell) -> Option<f32> {
        Some(self.fused_mean[cell.index()]).filter(|v| v.is_finite())
    }

    pub fn value_near(&self, lat: f64, lon: f64) -> FusionResult<Option<f32>> {
        Ok(self.value_at(GridModel::cell_of(lat, lon)?))
    }

    pub fn max_days_fused(&self) -> u16 {
        self.n_days_fused.iter().copied().max().unwrap_or(0)
    }
}

/// Streaming form of [`MonthlyGrid::aggregate`]: days are added in strictly
/// ascending date order so the sums are reproducible bit for bit.
pub struct MonthlyAccumulator {
    year: i32,
    month: u32,
    priority: SensorPriority,
    fused_sum: Array2<f64>,
    fused_days: Array2<u16>,
    baseline_sum: Array2<f64>,
    baseline_days: Array2<u16>,
    sensor_days: Vec<Array2<u16>>,
    days: Vec<NaiveDate>,
}

impl MonthlyAccumulator {
    pub fn new(year: i32, month: u32, priority: SensorPriority) -> FusionResult<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(FusionError::InvalidInput(format!(
                "{}-{:02} is not a calendar month",
                year, month
            )));
        }
        Ok(Self {
            year,
            month,
            priority,
            fused_sum: Array2::zeros((ROWS, COLS)),
            fused_days: Array2::zeros((ROWS, COLS)),
            baseline_sum: Array2::zeros((ROWS, COLS)),
            baseline_days: Array2::zeros((ROWS, COLS)),
            sensor_days: Sensor::ALL.iter().map(|_| Array2::zeros((ROWS, COLS))).collect(),
            days: Vec::new(),
        })
    }

    pub fn add(&mut self, day: &DailyGrid) -> FusionResult<()> {
        let date = day.date();
        if date.year() != self.year || date.month() != self.month {
            return Err(FusionError::InvalidInput(format!(
                "{} does not belong to {}-{:02}",
                date, self.year, self.month
            )));
        }
        if let Some(last) = self.days.last() {
            if date <= *last {
                return Err(FusionError::InvalidInput(format!(
                    "{} added after {}; days must be unique and ascending",
                    date, last
                )));
            }
        }

        accumulate(&mut self.fused_sum, &mut self.fused_days, day.values());
        if let Some(baseline) = day.baseline() {
            accumulate(&mut self.baseline_sum, &mut self.baseline_days, baseline);
        }
        let sensor_days = &mut self.sensor_days;
        Zip::indexed(day.provenance()).for_each(|(row, col), source| {
            if let Some(sensor) = source {
                sensor_days[sensor.index()][[row, col]] += 1;
            }
        });
        self.days.push(date);
        Ok(())
    }

    pub fn finish(self) -> MonthlyGrid {
        let sensor_days = &self.sensor_days;
        let priority = &self.priority;
        let dominant_source = Array2::from_shape_fn((ROWS, COLS), |(row, col)| {
            let mut best: Option<(Sensor, u16)> = None;
            for sensor in priority.iter() {
                let n = sensor_days[sensor.index()][[row, col]];
                if n > 0 && best.map_or(true, |(_, most)| n > most) {
                    best = Some((sensor, n));
                }
            }
            best.map(|(sensor, _)| sensor)
        });

        MonthlyGrid {
            year: self.year,
            month: self.month,
            fused_mean: mean_field(&self.fused_sum, &self.fused_days),
            baseline_mean: mean_field(&self.baseline_sum, &self.baseline_days),
            n_days_fused: self.fused_days,
            n_days_baseline: self.baseline_days,
            dominant_source,
            days: self.days,
        }
    }
}

fn accumulate(sum: &mut Array2<f64>, days: &mut Array2<u16>, field: ArrayView2<'_, f32>) {
    Zip::from(sum).and(days).and(field).for_each(|sum, n, &value| {
        if value.is_finite() {
            *sum += f64::from(value);
            *n += 1;
        }
    });
}

fn mean_field(sum: &Array2<f64>, days: &Array2<u16>) -> Array2<f32> {
    Zip::from(sum).and(days).map_collect(|&sum, &n| {
        if n > 0 {
            (sum / f64::from(n)) as f32
        } else {
            f32::NAN
        }
    })
}
