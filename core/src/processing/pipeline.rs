use crate::grid::LandMask;
use crate::observation::{CorrectedSounding, ModelVersion, Sensor, Sounding, StationObservation};
use crate::prelude::{FusionConfig, FusionError, FusionResult, SoundingTransform};
use crate::processing::bias::{BiasCorrector, CorrectionModel, Skill, StationSplit};
use crate::processing::fusion::{DailyGrid, FusionEngine};
use crate::processing::harmonize::{Harmonizer, HarmonizerSet};
use crate::telemetry::LogManager;
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Inclusive date range over which one set of models is trained and used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrainingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrainingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> FusionResult<Self> {
        if end < start {
            return Err(FusionError::InvalidInput(format!(
                "period ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn month(year: i32, month: u32) -> FusionResult<Self> {
        let invalid = || FusionError::InvalidInput(format!("{}-{:02} is not a calendar month", year, month));
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let end = next.and_then(|d| d.pred_opt()).ok_or_else(invalid)?;
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take_while(|d| *d <= self.end).collect()
    }

    /// Calendar months touched by the period, in order.
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut months: Vec<(i32, u32)> = Vec::new();
        for date in self.dates() {
            let key = (date.year(), date.month());
            if months.last() != Some(&key) {
                months.push(key);
            }
        }
        months
    }
}

impl fmt::Display for TrainingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Outcome of one model-training attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Ready {
        version: ModelVersion,
        collocations: usize,
    },
    /// Reference sensor: harmonization is the identity.
    Identity,
    Failed {
        reason: String,
    },
    NotAttempted {
        reason: String,
    },
}

impl ModelStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, ModelStatus::Ready { .. } | ModelStatus::Identity)
    }
}

/// Which models a sensor ended up with for a period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorModelReport {
    pub sensor: Sensor,
    pub correction: ModelStatus,
    pub skill: Option<Skill>,
    pub harmonization: ModelStatus,
    pub usable: bool,
}

/// Cooperative stop signal checked before each day starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Soundings grouped by UTC date.
pub struct DayBatches<'a> {
    by_date: BTreeMap<NaiveDate, Vec<&'a Sounding>>,
}

impl<'a> DayBatches<'a> {
    pub fn group(soundings: &'a [Sounding]) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<&'a Sounding>> = BTreeMap::new();
        for sounding in soundings {
            by_date.entry(sounding.date).or_default().push(sounding);
        }
        Self { by_date }
    }

    pub fn get(&self, date: NaiveDate) -> &[&'a Sounding] {
        self.by_date.get(&date).map_or(&[], Vec::as_slice)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.by_date.keys().copied()
    }
}

/// Result of fusing one day.
#[derive(Debug)]
pub enum DayOutcome {
    Fused {
        grid: DailyGrid,
        /// Soundings from sensors without usable models for the period.
        unmodelled: usize,
    },
    Failed {
        date: NaiveDate,
        reason: String,
    },
    Cancelled {
        date: NaiveDate,
    },
}

impl DayOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            DayOutcome::Fused { grid, .. } => grid.date(),
            DayOutcome::Failed { date, .. } | DayOutcome::Cancelled { date } => *date,
        }
    }
}

/// Frozen models for one training period plus the engine that fuses with them.
pub struct PeriodModels {
    period: TrainingPeriod,
    corrections: BTreeMap<Sensor, CorrectionModel>,
    harmonizers: Option<HarmonizerSet>,
    usable: BTreeSet<Sensor>,
    reports: Vec<SensorModelReport>,
    engine: FusionEngine,
    logger: LogManager,
}

impl PeriodModels {
    /// Training phase: correction models on training stations, skill on
    /// held-out stations, then harmonization of every non-reference sensor.
    /// A sensor missing either model is excluded from fusion for the period.
    pub fn train(
        period: TrainingPeriod,
        soundings: &[Sounding],
        stations: &[StationObservation],
        split: &StationSplit,
        config: &FusionConfig,
        land: Arc<LandMask>,
    ) -> FusionResult<Self> {
        config.validate()?;
        let logger = LogManager::new(format!("period {}", period));
        // A wider day offset must not pull soundings from neighbouring periods
        // into this period's models.
        let soundings: Vec<Sounding> = soundings
            .iter()
            .filter(|s| period.contains(s.date))
            .cloned()
            .collect();
        let soundings = soundings.as_slice();
        let in_period = |o: &StationObservation| period.contains(o.date);
        let training: Vec<StationObservation> =
            split.training(stations).into_iter().filter(in_period).collect();
        let held_out: Vec<StationObservation> =
            split.held_out(stations).into_iter().filter(in_period).collect();
        logger.record(&format!(
            "training with {} station observations, {} held out",
            training.len(),
            held_out.len()
        ));

        let corrector = BiasCorrector::new(config);
        let mut corrections = BTreeMap::new();
        let mut correction_status = BTreeMap::new();
        let mut skills = BTreeMap::new();
        for sensor in Sensor::ALL {
            match corrector.train(soundings, &training, sensor) {
                Ok(model) => {
                    match corrector.evaluate(&model, soundings, &held_out) {
                        Ok(skill) => {
                            skills.insert(sensor, skill);
                        }
                        Err(err) => logger.warn(&format!("{} not evaluated: {}", sensor, err)),
                    }
                    correction_status.insert(
                        sensor,
                        ModelStatus::Ready {
                            version: model.version().clone(),
                            collocations: model.collocations(),
                        },
                    );
                    corrections.insert(sensor, model);
                }
                Err(err) => {
                    logger.warn(&format!("{} has no correction model: {}", sensor, err));
                    correction_status.insert(sensor, ModelStatus::Failed { reason: err.to_string() });
                }
            }
        }

        let reference = config.reference_sensor;
        let mut harmonization_status = BTreeMap::new();
        let harmonizers = match corrections.get(&reference) {
            Some(reference_model) => {
                let harmonizer = Harmonizer::new(config);
                let reference_corrected = correct_within(reference_model, soundings, &period)?;
                let mut set = HarmonizerSet::new(reference, reference_model.version().clone());
                harmonization_status.insert(reference, ModelStatus::Identity);
                for (&sensor, model) in corrections.iter().filter(|&(&s, _)| s != reference) {
                    let corrected = correct_within(model, soundings, &period)?;
                    match harmonizer.train(&reference_corrected, &corrected) {
                        Ok(harmonization) => {
                            harmonization_status.insert(
                                sensor,
                                ModelStatus::Ready {
                                    version: harmonization.version().clone(),
                                    collocations: harmonization.collocations(),
                                },
                            );
                            set.insert(harmonization)?;
                        }
                        Err(err) => {
                            logger.warn(&format!("{} has no harmonization model: {}", sensor, err));
                            harmonization_status.insert(sensor, ModelStatus::Failed { reason: err.to_string() });
                        }
                    }
                }
                Some(set)
            }
            None => {
                logger.warn(&format!(
                    "reference sensor {} has no correction model; nothing can be harmonized",
                    reference
                ));
                None
            }
        };

        let mut reports = Vec::new();
        let mut usable = BTreeSet::new();
        for sensor in Sensor::ALL {
            let correction = correction_status
                .remove(&sensor)
                .unwrap_or_else(|| ModelStatus::NotAttempted { reason: "not trained".into() });
            let harmonization = harmonization_status.remove(&sensor).unwrap_or_else(|| {
                let reason = if !correction.is_usable() {
                    format!("{} has no correction model", sensor)
                } else {
                    format!("reference sensor {} has no correction model", reference)
                };
                ModelStatus::NotAttempted { reason }
            });
            let sensor_usable = correction.is_usable() && harmonization.is_usable();
            if sensor_usable {
                usable.insert(sensor);
            }
            reports.push(SensorModelReport {
                sensor,
                correction,
                skill: skills.remove(&sensor),
                harmonization,
                usable: sensor_usable,
            });
        }
        logger.record(&format!(
            "usable sensors: [{}]",
            usable.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        ));

        Ok(Self {
            period,
            corrections,
            harmonizers,
            usable,
            reports,
            engine: FusionEngine::new(config, land),
            logger,
        })
    }

    pub fn period(&self) -> TrainingPeriod {
        self.period
    }

    pub fn reports(&self) -> &[SensorModelReport] {
        &self.reports
    }

    pub fn usable_sensors(&self) -> Vec<Sensor> {
        self.usable.iter().copied().collect()
    }

    pub fn correction(&self, sensor: Sensor) -> Option<&CorrectionModel> {
        self.corrections.get(&sensor)
    }

    pub fn harmonizers(&self) -> Option<&HarmonizerSet> {
        self.harmonizers.as_ref()
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Whether daily grids of this period carry a baseline field.
    pub fn baseline_available(&self) -> bool {
        self.engine
            .baseline_sensor()
            .is_some_and(|sensor| self.corrections.contains_key(&sensor))
    }

    /// Corrects, harmonizes and fuses one day's batch. Returns the grid and
    /// the number of soundings dropped for lack of usable models.
    pub fn process_day(&self, date: NaiveDate, batch: &[&Sounding]) -> FusionResult<(DailyGrid, usize)> {
        if !self.period.contains(date) {
            return Err(FusionError::InvalidInput(format!(
                "{} lies outside training period {}",
                date, self.period
            )));
        }
        let harmonizers = self.harmonizers.as_ref().ok_or(FusionError::ModelUnavailable {
            sensor: self.reference_sensor(),
        })?;
        let baseline_sensor = self.engine.baseline_sensor();

        let mut harmonized = Vec::with_capacity(batch.len());
        let mut baseline = Vec::new();
        let mut unmodelled = 0;
        for &sounding in batch {
            if sounding.date != date {
                return Err(FusionError::MalformedBatch {
                    date,
                    reason: format!("contains a sounding dated {}", sounding.date),
                });
            }
            let Some(model) = self.corrections.get(&sounding.sensor) else {
                unmodelled += 1;
                continue;
            };
            let corrected = model.apply(sounding)?;
            if baseline_sensor == Some(sounding.sensor) {
                baseline.push(corrected.clone());
            }
            if self.usable.contains(&sounding.sensor) {
                harmonized.push(harmonizers.apply(&corrected)?);
            } else {
                unmodelled += 1;
            }
        }

        let baseline = self.baseline_available().then_some(baseline.as_slice());
        let grid = self.engine.fuse_day(date, &harmonized, baseline)?;
        Ok((grid, unmodelled))
    }

    /// Fuses `dates` in parallel, one task per day. A failing day never
    /// affects the others; days not yet started when `cancel` is raised are
    /// reported as cancelled.
    pub fn fuse_days(
        &self,
        batches: &DayBatches<'_>,
        dates: &[NaiveDate],
        cancel: &CancellationFlag,
    ) -> Vec<DayOutcome> {
        dates
            .par_iter()
            .map(|&date| {
                if cancel.is_cancelled() {
                    return DayOutcome::Cancelled { date };
                }
                match self.process_day(date, batches.get(date)) {
                    Ok((grid, unmodelled)) => DayOutcome::Fused { grid, unmodelled },
                    Err(err) => {
                        self.logger.warn(&format!("{} failed: {}", date, err));
                        DayOutcome::Failed {
                            date,
                            reason: err.to_string(),
                        }
                    }
                }
            })
            .collect()
    }

    fn reference_sensor(&self) -> Sensor {
        self.harmonizers
            .as_ref()
            .map_or(Sensor::Tropomi, HarmonizerSet::reference)
    }
}

fn correct_within(
    model: &CorrectionModel,
    soundings: &[Sounding],
    period: &TrainingPeriod,
) -> FusionResult<Vec<CorrectedSounding>> {
    soundings
        .iter()
        .filter(|s| s.sensor == model.sensor() && period.contains(s.date))
        .map(|s| model.apply(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridModel;
    use crate::processing::bias::tests::synthetic;

    fn january() -> TrainingPeriod {
        TrainingPeriod::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 10).unwrap(),
        )
        .unwrap()
    }

    fn world(sensors: &[(Sensor, f64, u64)]) -> (Vec<Sounding>, Vec<StationObservation>) {
        let mut soundings = Vec::new();
        let mut stations = Vec::new();
        for &(sensor, offset, seed) in sensors {
            let (s, o) = synthetic(sensor, offset, 10, seed);
            soundings.extend(s);
            if stations.is_empty() {
                stations = o;
            }
        }
        (soundings, stations)
    }

    fn train(soundings: &[Sounding], stations: &[StationObservation]) -> PeriodModels {
        let split = StationSplit::holdout_every(stations, 4).unwrap();
        PeriodModels::train(
            january(),
            soundings,
            stations,
            &split,
            &FusionConfig::default(),
            Arc::new(LandMask::all_land()),
        )
        .unwrap()
    }

    #[test]
    fn models_ignore_soundings_outside_the_period() {
        let (soundings, stations) = world(&[(Sensor::Tropomi, 10.0, 1), (Sensor::Gosat, -6.0, 2)]);
        let period = TrainingPeriod::new(
            NaiveDate::from_ymd_opt(2021, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 7).unwrap(),
        )
        .unwrap();
        let config = FusionConfig {
            tolerance: crate::prelude::CollocationTolerance {
                spatial_deg: 0.1,
                max_day_offset: 1,
            },
            ..FusionConfig::default()
        };
        let split = StationSplit::holdout_every(&stations, 4).unwrap();
        let train = |soundings: &[Sounding]| {
            PeriodModels::train(period, soundings, &stations, &split, &config, Arc::new(LandMask::all_land())).unwrap()
        };

        let inside: Vec<Sounding> = soundings.iter().filter(|s| period.contains(s.date)).cloned().collect();
        let everything = train(&soundings);
        let clipped = train(&inside);
        assert_eq!(everything.reports(), clipped.reports());
        assert_eq!(everything.usable_sensors(), vec![Sensor::Gosat, Sensor::Tropomi]);
    }

    #[test]
    fn period_month_covers_whole_calendar_month() {
        let feb = TrainingPeriod::month(2024, 2).unwrap();
        assert_eq!(feb.dates().len(), 29);
        assert_eq!(feb.months(), vec![(2024, 2)]);
        let dec = TrainingPeriod::month(2021, 12).unwrap();
        assert_eq!(dec.end, NaiveDate::from_ymd_opt(2021, 12, 31).unwrap());
        assert!(TrainingPeriod::month(2021, 0).is_err());
    }

    #[test]
    fn sensors_without_models_are_excluded_from_fusion() {
        let (soundings, stations) = world(&[(Sensor::Tropomi, 10.0, 1), (Sensor::Gosat, -6.0, 2)]);
        let models = train(&soundings, &stations);
        assert_eq!(models.usable_sensors(), vec![Sensor::Gosat, Sensor::Tropomi]);

        let gosat2 = &models.reports()[Sensor::Gosat2.index()];
        assert!(!gosat2.usable);
        assert!(matches!(gosat2.correction, ModelStatus::Failed { .. }));
        assert!(matches!(gosat2.harmonization, ModelStatus::NotAttempted { .. }));

        let tropomi = &models.reports()[Sensor::Tropomi.index()];
        assert_eq!(tropomi.harmonization, ModelStatus::Identity);
        assert!(tropomi.skill.is_some());

        let date = NaiveDate::from_ymd_opt(2021, 1, 3).unwrap();
        let stray = Sounding::new(Sensor::Gosat2, 0.05, 0.05, date, 1700.0);
        let mut batch: Vec<&Sounding> = soundings.iter().filter(|s| s.date == date).collect();
        batch.push(&stray);
        let (grid, unmodelled) = models.process_day(date, &batch).unwrap();
        assert_eq!(unmodelled, 1);
        let cell = GridModel::cell_of(0.05, 0.05).unwrap();
        assert_eq!(grid.value_at(cell), None);
        assert!(grid.baseline().is_some());
    }

    #[test]
    fn missing_reference_model_blocks_harmonization() {
        let (soundings, stations) = world(&[(Sensor::Gosat, -6.0, 2), (Sensor::Gosat2, 3.0, 3)]);
        let models = train(&soundings, &stations);
        assert!(models.usable_sensors().is_empty());
        assert!(models.harmonizers().is_none());
        assert!(!models.baseline_available());
        let date = NaiveDate::from_ymd_opt(2021, 1, 2).unwrap();
        assert!(matches!(
            models.process_day(date, &[]),
            Err(FusionError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn fused_days_are_reproducible_and_isolated() {
        let (soundings, stations) = world(&[(Sensor::Tropomi, 10.0, 1), (Sensor::Gosat2, 3.0, 3)]);
        let models = train(&soundings, &stations);
        let batches = DayBatches::group(&soundings);
        let dates = vec![
            NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
        ];
        let cancel = CancellationFlag::new();
        let first = models.fuse_days(&batches, &dates, &cancel);
        let second = models.fuse_days(&batches, &dates, &cancel);

        assert_eq!(first.len(), 3);
        assert!(matches!(first[2], DayOutcome::Failed { .. }));
        for (a, b) in first.iter().zip(&second).take(2) {
            match (a, b) {
                (DayOutcome::Fused { grid: ga, .. }, DayOutcome::Fused { grid: gb, .. }) => {
                    let bits = |g: &DailyGrid| g.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
                    assert_eq!(bits(ga), bits(gb));
                    assert!(ga.valid_pixels() > 0);
                }
                other => panic!("expected fused days, got {:?}", other),
            }
        }
    }

    #[test]
    fn cancelled_run_skips_remaining_days() {
        let (soundings, stations) = world(&[(Sensor::Tropomi, 10.0, 1)]);
        let models = train(&soundings, &stations);
        let batches = DayBatches::group(&soundings);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let outcomes = models.fuse_days(&batches, &january().dates(), &cancel);
        assert!(outcomes.iter().all(|o| matches!(o, DayOutcome::Cancelled { .. })));
    }
}
