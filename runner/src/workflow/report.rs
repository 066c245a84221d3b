use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use xch4core::grid::FieldSummary;
use xch4core::observation::Sensor;
use xch4core::processing::{SensorModelReport, TrainingPeriod};
use xch4core::telemetry::RejectionSummary;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub ingestion: RejectionSummary,
    pub periods: Vec<PeriodReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn fused_days(&self) -> usize {
        self.days().filter(|d| matches!(d.status, DayStatus::Ok { .. })).count()
    }

    pub fn failed_days(&self) -> usize {
        self.days().filter(|d| matches!(d.status, DayStatus::Failed { .. })).count()
    }

    fn days(&self) -> impl Iterator<Item = &DayReport> {
        self.periods.iter().flat_map(|p| p.days.iter())
    }
}

#[derive(Debug, Serialize)]
pub struct PeriodReport {
    pub period: TrainingPeriod,
    pub sensors: Vec<SensorModelReport>,
    pub days: Vec<DayReport>,
    pub months: Vec<MonthReport>,
}

#[derive(Debug, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub status: DayStatus,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayStatus {
    Ok {
        valid_pixels: usize,
        rejected_records: usize,
        unmodelled_soundings: usize,
        filled_fraction: f64,
        /// Fraction of land cells filled by each sensor.
        coverage: BTreeMap<Sensor, f64>,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct MonthReport {
    pub year: i32,
    pub month: u32,
    pub days: Vec<String>,
    pub filled_fraction: f64,
    pub coverage: BTreeMap<Sensor, f64>,
    pub regions: Vec<RegionReport>,
}

#[derive(Debug, Serialize)]
pub struct RegionReport {
    pub name: String,
    pub fused: FieldSummary,
    pub baseline: FieldSummary,
}
