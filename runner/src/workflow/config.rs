use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use xch4core::grid::Region;
use xch4core::processing::TrainingPeriod;
use xch4core::FusionConfig;

fn default_holdout_every() -> usize {
    4
}

fn default_chunk_days() -> usize {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Every n-th station (by id) is held out for skill evaluation.
    #[serde(default = "default_holdout_every")]
    pub holdout_every: usize,
    /// Days fused concurrently before they are folded into the monthly mean.
    #[serde(default = "default_chunk_days")]
    pub chunk_days: usize,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(start: NaiveDate, end: NaiveDate, holdout_every: usize) -> Self {
        Self {
            start,
            end,
            holdout_every,
            chunk_days: default_chunk_days(),
            fusion: FusionConfig::default(),
            regions: vec![Region::global()],
        }
    }

    pub fn with_overrides(mut self, spatial_deg: Option<f64>, min_collocations: Option<usize>) -> Self {
        if let Some(spatial_deg) = spatial_deg {
            self.fusion.tolerance.spatial_deg = spatial_deg;
        }
        if let Some(min_collocations) = min_collocations {
            self.fusion.min_collocations = min_collocations;
        }
        self
    }

    pub fn to_fusion_config(&self) -> FusionConfig {
        self.fusion.clone()
    }

    /// Calendar-month training periods covering `start..=end`, clipped at
    /// both ends.
    pub fn periods(&self) -> anyhow::Result<Vec<TrainingPeriod>> {
        if self.end < self.start {
            bail!("workflow ends ({}) before it starts ({})", self.end, self.start);
        }
        let mut periods = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            let month = TrainingPeriod::month(cursor.year(), cursor.month())
                .with_context(|| format!("building training period for {}", cursor))?;
            let period =
                TrainingPeriod::new(cursor, month.end.min(self.end)).context("clipping training period")?;
            periods.push(period);
            match month.end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(periods)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.holdout_every < 2 {
            bail!("holdout_every must be at least 2, got {}", self.holdout_every);
        }
        if self.chunk_days == 0 {
            bail!("chunk_days must be at least 1");
        }
        self.fusion.validate().context("validating fusion settings")?;
        for region in &self.regions {
            region
                .window()
                .with_context(|| format!("validating region {}", region.name))?;
        }
        Ok(())
    }
}
