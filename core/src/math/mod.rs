pub mod boosting;
pub mod stats;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoostedTrees};
pub use stats::StatsHelper;
pub use tree::{RegressionTree, TreeParams};
