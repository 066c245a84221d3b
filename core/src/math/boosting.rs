use super::tree::{RegressionTree, TreeParams};
use crate::prelude::{FusionError, FusionResult};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Hyper-parameters for the gradient-boosted tree ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            trees: 60,
            max_depth: 3,
            learning_rate: 0.1,
            min_samples_leaf: 5,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> FusionResult<()> {
        if self.trees == 0 {
            return Err(FusionError::InvalidInput("boosting needs at least one tree".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(FusionError::InvalidInput(format!(
                "learning rate {} outside (0, 1]",
                self.learning_rate
            )));
        }
        Ok(())
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

/// Squared-loss gradient boosting over [`RegressionTree`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn fit(
        features: ArrayView2<'_, f64>,
        targets: &[f64],
        params: &BoostingParams,
    ) -> FusionResult<Self> {
        params.validate()?;
        if targets.is_empty() || features.nrows() != targets.len() {
            return Err(FusionError::InvalidInput(format!(
                "{} feature rows for {} targets",
                features.nrows(),
                targets.len()
            )));
        }

        let base = targets.iter().sum::<f64>() / targets.len() as f64;
        let mut predictions = vec![base; targets.len()];
        let mut residuals: Vec<f64> = targets.iter().map(|t| t - base).collect();
        let tree_params = params.tree_params();
        let mut trees = Vec::with_capacity(params.trees);

        for _ in 0..params.trees {
            let tree = RegressionTree::fit(features, &residuals, &tree_params);
            for (i, row) in features.outer_iter().enumerate() {
                predictions[i] += params.learning_rate * tree.predict(row);
                residuals[i] = targets[i] - predictions[i];
            }
            trees.push(tree);
        }

        Ok(Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.trees
            .iter()
            .fold(self.base, |acc, tree| acc + self.learning_rate * tree.predict(row))
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn boosting_learns_linear_trend() {
        let features = Array2::from_shape_fn((200, 1), |(i, _)| i as f64 / 10.0);
        let targets: Vec<f64> = (0..200).map(|i| 2.0 * (i as f64 / 10.0) + 5.0).collect();
        let params = BoostingParams {
            trees: 200,
            max_depth: 3,
            learning_rate: 0.2,
            min_samples_leaf: 2,
        };
        let model = GradientBoostedTrees::fit(features.view(), &targets, &params).unwrap();
        assert_eq!(model.len(), 200);
        let prediction = model.predict(array![10.0].view());
        assert!((prediction - 25.0).abs() < 0.5, "prediction {}", prediction);
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let features = Array2::<f64>::zeros((3, 2));
        let result = GradientBoostedTrees::fit(features.view(), &[1.0, 2.0], &BoostingParams::default());
        assert!(matches!(result, Err(FusionError::InvalidInput(_))));
    }

    #[test]
    fn zero_learning_rate_is_rejected() {
        let params = BoostingParams {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
