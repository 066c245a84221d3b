use crate::workflow::config::WorkflowConfig;
use crate::workflow::report::{DayReport, DayStatus, MonthReport, PeriodReport, RegionReport, RunReport};
use anyhow::Context;
use chrono::Datelike;
use log::{info, warn};
use std::sync::Arc;
use xch4core::grid::LandMask;
use xch4core::observation::{Sounding, StationObservation};
use xch4core::processing::{
    CancellationFlag, DayBatches, DayOutcome, MonthlyAccumulator, MonthlyGrid, PeriodModels, ProvenanceTracker,
    StationSplit,
};
use xch4core::telemetry::{MetricsRecorder, RejectReason};

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> anyhow::Result<Self> {
        config.validate().context("validating workflow config")?;
        Ok(Self { config })
    }

    /// Trains and fuses every period in turn. Each finished month is handed
    /// to `on_month` before the next one starts, so at most one month of
    /// accumulators and `chunk_days` daily grids are alive at a time.
    pub fn execute<F>(
        &self,
        soundings: &[Sounding],
        stations: &[StationObservation],
        land: Arc<LandMask>,
        cancel: &CancellationFlag,
        metrics: &MetricsRecorder,
        mut on_month: F,
    ) -> anyhow::Result<RunReport>
    where
        F: FnMut(&MonthlyGrid),
    {
        let fusion = self.config.to_fusion_config();
        let split = StationSplit::holdout_every(stations, self.config.holdout_every)
            .context("splitting stations into training and held-out sets")?;
        let batches = DayBatches::group(soundings);
        let mut periods = Vec::new();

        for period in self.config.periods()? {
            if cancel.is_cancelled() {
                warn!("run cancelled before period {}", period);
                break;
            }
            info!("training period {}", period);
            let models = PeriodModels::train(period, soundings, stations, &split, &fusion, Arc::clone(&land))
                .with_context(|| format!("training models for {}", period))?;

            let mut days = Vec::new();
            let mut months = Vec::new();
            for (year, month) in period.months() {
                let dates: Vec<_> = period
                    .dates()
                    .into_iter()
                    .filter(|d| d.year() == year && d.month() == month)
                    .collect();
                let mut accumulator = MonthlyAccumulator::new(year, month, fusion.priority.clone())
                    .with_context(|| format!("opening monthly accumulator {}-{:02}", year, month))?;

                for chunk in dates.chunks(self.config.chunk_days) {
                    for outcome in models.fuse_days(&batches, chunk, cancel) {
                        days.push(self.absorb(outcome, &mut accumulator, &land, metrics)?);
                    }
                }

                let monthly = accumulator.finish();
                months.push(self.month_report(&monthly, &land)?);
                on_month(&monthly);
            }

            periods.push(PeriodReport {
                period,
                sensors: models.reports().to_vec(),
                days,
                months,
            });
        }

        Ok(RunReport {
            ingestion: metrics.snapshot(),
            periods,
            cancelled: cancel.is_cancelled(),
        })
    }

    fn absorb(
        &self,
        outcome: DayOutcome,
        accumulator: &mut MonthlyAccumulator,
        land: &LandMask,
        metrics: &MetricsRecorder,
    ) -> anyhow::Result<DayReport> {
        let date = outcome.date();
        let status = match outcome {
            DayOutcome::Fused { grid, unmodelled } => {
                accumulator
                    .add(&grid)
                    .with_context(|| format!("adding {} to the monthly mean", grid.day_key()))?;
                metrics.record_rejected_n(RejectReason::OutOfDomain, grid.rejected_records());
                metrics.record_rejected_n(RejectReason::NoUsableModel, unmodelled);
                let coverage = ProvenanceTracker::coverage(&grid, land);
                DayStatus::Ok {
                    valid_pixels: grid.valid_pixels(),
                    rejected_records: grid.rejected_records(),
                    unmodelled_soundings: unmodelled,
                    filled_fraction: coverage.filled_fraction(),
                    coverage: coverage.fractions(),
                }
            }
            DayOutcome::Failed { reason, .. } => DayStatus::Failed { reason },
            DayOutcome::Cancelled { .. } => DayStatus::Cancelled,
        };
        Ok(DayReport { date, status })
    }

    fn month_report(&self, monthly: &MonthlyGrid, land: &LandMask) -> anyhow::Result<MonthReport> {
        let coverage = ProvenanceTracker::coverage(monthly, land);
        let mut regions = Vec::with_capacity(self.config.regions.len());
        for region in &self.config.regions {
            let fused = region
                .summarize(monthly.fused_mean())
                .with_context(|| format!("summarizing region {}", region.name))?;
            let baseline = region
                .summarize(monthly.baseline_mean())
                .with_context(|| format!("summarizing region {}", region.name))?;
            regions.push(RegionReport {
                name: region.name.clone(),
                fused,
                baseline,
            });
        }
        info!(
            "{}-{:02}: {} days, {:.2}% of land cells filled",
            monthly.year(),
            monthly.month(),
            monthly.days().len(),
            100.0 * coverage.filled_fraction()
        );
        Ok(MonthReport {
            year: monthly.year(),
            month: monthly.month(),
            days: monthly.day_keys(),
            filled_fraction: coverage.filled_fraction(),
            coverage: coverage.fractions(),
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::synthetic::{generate, GeneratorConfig};
    use chrono::NaiveDate;
    use xch4core::observation::Sensor;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
    }

    fn config() -> WorkflowConfig {
        WorkflowConfig::from_args(date(1), date(6), 4)
    }

    fn world() -> crate::generator::synthetic::SyntheticWorld {
        generate(&GeneratorConfig {
            start: date(1),
            end: date(6),
            ..GeneratorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn runner_fuses_every_day_and_reports_models() {
        let world = world();
        let runner = Runner::new(config()).unwrap();
        let metrics = MetricsRecorder::new();
        let mut seen = Vec::new();
        let report = runner
            .execute(
                &world.soundings,
                &world.stations,
                Arc::new(LandMask::all_land()),
                &CancellationFlag::new(),
                &metrics,
                |monthly| seen.push((monthly.year(), monthly.month(), monthly.max_days_fused())),
            )
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.fused_days(), 6);
        assert_eq!(report.failed_days(), 0);
        assert_eq!(seen, vec![(2021, 1, 6)]);

        let period = &report.periods[0];
        assert!(period.sensors.iter().all(|s| s.usable));
        let month = &period.months[0];
        assert_eq!(month.days.first().map(String::as_str), Some("20210101"));
        assert!(month.filled_fraction > 0.0);
        assert!(month.coverage[&Sensor::Gosat2] > 0.0);
        assert!(month.regions[0].fused.valid_pixels > 0);

        for day in &period.days {
            match &day.status {
                DayStatus::Ok {
                    valid_pixels,
                    filled_fraction,
                    coverage,
                    ..
                } => {
                    assert!(*valid_pixels > 0);
                    assert!(coverage[&Sensor::Gosat2] > 0.0);
                    let summed: f64 = coverage.values().sum();
                    assert!((summed - filled_fraction).abs() < 1e-12);
                }
                other => panic!("{} not fused: {:?}", day.date, other),
            }
        }
    }

    #[test]
    fn cancelled_run_stops_before_training() {
        let world = world();
        let runner = Runner::new(config()).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = runner
            .execute(
                &world.soundings,
                &world.stations,
                Arc::new(LandMask::all_land()),
                &cancel,
                &MetricsRecorder::new(),
                |_| {},
            )
            .unwrap();
        assert!(report.cancelled);
        assert!(report.periods.is_empty());
    }
}
