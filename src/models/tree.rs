//! Regression tree (CART, squared error) and a bagged random forest.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use crate::domain::SupervisedWindow;
use crate::error::ForecastError;
use crate::models::model::{prediction_row, training_set, Forecaster, TrainingSummary, WindowShape};

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TreeParams {
    max_depth: usize,
    min_samples_split: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

fn mean_of(indices: &[usize], y: &[f64]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn grow(x: &[Vec<f64>], y: &[f64], indices: &[usize], depth: usize, params: TreeParams) -> Node {
    let leaf = Node::Leaf(mean_of(indices, y));
    if depth >= params.max_depth || indices.len() < params.min_samples_split.max(2) {
        return leaf;
    }

    let Some(best) = best_split(x, y, indices) else {
        return leaf;
    };

    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| x[i][best.feature] <= best.threshold);
    if left.is_empty() || right.is_empty() {
        return leaf;
    }

    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        left: Box::new(grow(x, y, &left, depth + 1, params)),
        right: Box::new(grow(x, y, &right, depth + 1, params)),
    }
}

/// Exhaustive search over features and midpoints between distinct values.
///
/// Only strictly better splits replace the current best, so ties resolve to
/// the lowest feature index and threshold.
fn best_split(x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> Option<BestSplit> {
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let width = x[indices[0]].len();
    let mut best: Option<BestSplit> = None;
    let mut order = indices.to_vec();

    for feature in 0..width {
        order.sort_by(|&a, &b| {
            x[a][feature]
                .partial_cmp(&x[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 0..n - 1 {
            let yi = y[order[pos]];
            left_sum += yi;
            left_sq += yi * yi;

            let here = x[order[pos]][feature];
            let next = x[order[pos + 1]][feature];
            if next <= here {
                continue;
            }

            let nl = (pos + 1) as f64;
            let nr = (n - pos - 1) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);

            if best.as_ref().is_none_or(|b| sse < b.sse - 1e-12) {
                best = Some(BestSplit {
                    feature,
                    threshold: 0.5 * (here + next),
                    sse,
                });
            }
        }
    }

    best.filter(|b| b.sse < parent_sse)
}

fn mse(model: impl Fn(&[f64]) -> f64, x: &[Vec<f64>], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(row, t)| (model(row) - t).powi(2)).sum::<f64>() / y.len() as f64
}

#[derive(Debug, Clone)]
struct FittedTree {
    root: Node,
    shape: WindowShape,
}

/// Single CART regression tree.
#[derive(Debug, Clone)]
pub struct DecisionTreeRegressor {
    params: TreeParams,
    fitted: Option<FittedTree>,
}

impl DecisionTreeRegressor {
    pub const NAME: &'static str = "DecisionTreeRegressor";

    pub fn new(max_depth: usize, min_samples_split: usize) -> Self {
        Self {
            params: TreeParams {
                max_depth,
                min_samples_split,
            },
            fitted: None,
        }
    }
}

impl Forecaster for DecisionTreeRegressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        let set = training_set(Self::NAME, windows)?;
        let indices: Vec<usize> = (0..set.targets.len()).collect();
        let root = grow(&set.features, &set.targets, &indices, 0, self.params);
        let train_mse = mse(|r| root.predict(r), &set.features, &set.targets);

        self.fitted = Some(FittedTree {
            root,
            shape: set.shape(),
        });
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        let fitted = self.fitted.as_ref().ok_or_else(|| ForecastError::UntrainedModel {
            model: Self::NAME.to_string(),
        })?;
        let row = prediction_row(window, fitted.shape)?;
        Ok(fitted.root.predict(&row))
    }

    fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }
}

/// Bootstrap-aggregated regression trees.
///
/// Tree `i` draws its bootstrap sample from `StdRng::seed_from_u64(seed + i)`,
/// so the ensemble is reproducible regardless of how rayon schedules it.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    n_trees: usize,
    params: TreeParams,
    seed: u64,
    fitted: Option<(Vec<Node>, WindowShape)>,
}

impl RandomForestRegressor {
    pub const NAME: &'static str = "RandomForestRegressor";

    pub fn new(n_trees: usize, max_depth: usize, min_samples_split: usize, seed: u64) -> Self {
        Self {
            n_trees,
            params: TreeParams {
                max_depth,
                min_samples_split,
            },
            seed,
            fitted: None,
        }
    }

    fn average(trees: &[Node], row: &[f64]) -> f64 {
        trees.iter().map(|t| t.predict(row)).sum::<f64>() / trees.len() as f64
    }
}

impl Forecaster for RandomForestRegressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        if self.n_trees == 0 {
            return Err(ForecastError::training(Self::NAME, "forest needs at least one tree"));
        }
        let set = training_set(Self::NAME, windows)?;
        let n = set.targets.len();
        let params = self.params;
        let seed = self.seed;

        let trees: Vec<Node> = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                sample.sort_unstable();
                grow(&set.features, &set.targets, &sample, 0, params)
            })
            .collect();

        let train_mse = mse(|r| Self::average(&trees, r), &set.features, &set.targets);
        self.fitted = Some((trees, set.shape()));
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        let (trees, shape) = self.fitted.as_ref().ok_or_else(|| ForecastError::UntrainedModel {
            model: Self::NAME.to_string(),
        })?;
        let row = prediction_row(window, *shape)?;
        Ok(Self::average(trees, &row))
    }

    fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }
}
