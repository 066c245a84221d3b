use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Growth limits for a single regression tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Least-squares CART regression tree stored as a flat node arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fits a tree to `targets`, one row of `features` per target.
    pub fn fit(features: ArrayView2<'_, f64>, targets: &[f64], params: &TreeParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let indices: Vec<usize> = (0..targets.len().min(features.nrows())).collect();
        tree.grow(&features, targets, indices, 0, params);
        tree
    }

    pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[feature] <= threshold { left } else { right },
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth_from(0)
    }

    fn depth_from(&self, id: usize) -> usize {
        match self.nodes[id] {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + self.depth_from(left).max(self.depth_from(right)),
        }
    }

    fn grow(
        &mut self,
        features: &ArrayView2<'_, f64>,
        targets: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let id = self.nodes.len();
        let value = if indices.is_empty() {
            0.0
        } else {
            indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
        };
        self.nodes.push(Node::Leaf { value });

        let min_leaf = params.min_samples_leaf.max(1);
        if depth >= params.max_depth || indices.len() < 2 * min_leaf {
            return id;
        }
        let Some(split) = best_split(features, targets, &indices, min_leaf) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| features[[i, split.feature]] <= split.threshold);
        let left = self.grow(features, targets, left_rows, depth + 1, params);
        let right = self.grow(features, targets, right_rows, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }
}

/// Exhaustive search for the split with the largest reduction in squared error.
fn best_split(
    features: &ArrayView2<'_, f64>,
    targets: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let baseline = total * total / n as f64;
    let mut best: Option<SplitCandidate> = None;
    let mut order = indices.to_vec();

    for feature in 0..features.ncols() {
        order.sort_by(|&a, &b| {
            features[[a, feature]]
                .total_cmp(&features[[b, feature]])
                .then(a.cmp(&b))
        });

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += targets[order[k - 1]];
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lower = features[[order[k - 1], feature]];
            let upper = features[[order[k], feature]];
            if lower >= upper {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64
                - baseline;
            if gain > best.map_or(1e-12, |b| b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: lower + (upper - lower) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn tree_separates_step_function() {
        let features = array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
        let targets = [1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        let tree = RegressionTree::fit(features.view(), &targets, &params(2));
        assert_eq!(tree.predict(array![0.5].view()), 1.0);
        assert_eq!(tree.predict(array![11.5].view()), 5.0);
    }

    #[test]
    fn tree_respects_depth_limit() {
        let features = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let targets: Vec<f64> = (0..32).map(|i| (i * i) as f64).collect();
        let tree = RegressionTree::fit(features.view(), &targets, &params(3));
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn constant_targets_produce_single_leaf() {
        let features = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        let tree = RegressionTree::fit(features.view(), &[7.0, 7.0, 7.0], &params(4));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict(array![100.0, -3.0].view()), 7.0);
    }
}
