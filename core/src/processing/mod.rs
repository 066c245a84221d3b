pub mod bias;
pub mod collocation;
pub mod features;
pub mod fusion;
pub mod harmonize;
pub mod monthly;
pub mod pipeline;
pub mod provenance;

pub use bias::{BiasCorrector, CorrectionModel, Skill, StationSplit};
pub use collocation::{Collocation, Collocator};
pub use features::FeatureEncoder;
pub use fusion::{DailyGrid, FusionEngine};
pub use harmonize::{HarmonizationModel, Harmonizer, HarmonizerSet};
pub use monthly::{MonthlyAccumulator, MonthlyGrid};
pub use pipeline::{
    CancellationFlag, DayBatches, DayOutcome, ModelStatus, PeriodModels, SensorModelReport, TrainingPeriod,
};
pub use provenance::{CoverageStats, ProvenanceSource, ProvenanceTracker};
