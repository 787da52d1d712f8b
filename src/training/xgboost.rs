//! XGBoost-style gradient boosting with second-order approximation
//!
//! - Uses both gradient and hessian of the loss
//! - Regularized leaf weights: w* = -G / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - Exact greedy, level-wise tree growth

use super::models::{ModelFamily, Regressor};
use crate::error::{GradecastError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// XGBoost configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    #[serde(alias = "seed")]
    pub random_state: u64,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 13,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<XGBNode>,
        right: Box<XGBNode>,
    },
}

impl XGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            XGBNode::Leaf { weight } => *weight,
            XGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn compute_leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g_sum > alpha {
        g_sum - alpha
    } else if g_sum < -alpha {
        g_sum + alpha
    } else {
        return 0.0;
    };
    -g_adj / (h_sum + lambda)
}

/// Build a tree using exact greedy split finding
fn build_tree(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    features: &[usize],
    depth: usize,
    config: &XGBoostConfig,
) -> XGBNode {
    let g_sum: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| hess[i]).sum();
    let leaf = XGBNode::Leaf {
        weight: compute_leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha),
    };

    if depth >= config.max_depth || indices.len() < 2 || h_sum < config.min_child_weight {
        return leaf;
    }

    // Ties on gain go to the lower feature index
    let best = features
        .par_iter()
        .filter_map(|&f| best_split_for_feature(x, grad, hess, indices, f, config))
        .reduce_with(|a, b| if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) { b } else { a });

    match best {
        Some((feature, threshold, gain)) if gain > config.gamma => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                indices.iter().partition(|&&i| x[[i, feature]] <= threshold);
            if left_idx.is_empty() || right_idx.is_empty() {
                return leaf;
            }
            XGBNode::Split {
                feature,
                threshold,
                left: Box::new(build_tree(x, grad, hess, &left_idx, features, depth + 1, config)),
                right: Box::new(build_tree(x, grad, hess, &right_idx, features, depth + 1, config)),
            }
        }
        _ => leaf,
    }
}

/// Best (feature, threshold, gain) for one feature
fn best_split_for_feature(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    feature: usize,
    config: &XGBoostConfig,
) -> Option<(usize, f64, f64)> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let g_total: f64 = sorted.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = sorted.iter().map(|&i| hess[i]).sum();
    let lambda = config.reg_lambda;
    let parent = g_total * g_total / (h_total + lambda);

    let mut g_left = 0.0;
    let mut h_left = 0.0;
    let mut best: Option<(usize, f64, f64)> = None;

    for pos in 0..sorted.len() - 1 {
        let idx = sorted[pos];
        g_left += grad[idx];
        h_left += hess[idx];

        let here = x[[idx, feature]];
        let next = x[[sorted[pos + 1], feature]];
        if (next - here).abs() < 1e-12 {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_child_weight || h_right < config.min_child_weight {
            continue;
        }

        let gain = 0.5
            * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda) - parent);
        if best.map_or(true, |(_, _, g)| gain > g) {
            best = Some((feature, (here + next) / 2.0, gain));
        }
    }
    best
}

/// Draw `ceil(n * rate)` sorted indices without replacement
pub(crate) fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, rate: f64) -> Vec<usize> {
    if rate >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64 * rate).ceil() as usize).clamp(1, n.max(1));
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(rng);
    idx.truncate(k);
    idx.sort_unstable();
    idx
}

/// XGBoost regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    trees: Vec<XGBNode>,
    base_score: f64,
    n_features: usize,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    fn predict_row(&self, row: &ArrayView1<f64>) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|t| self.config.learning_rate * t.predict(row))
                .sum::<f64>()
    }
}

impl Regressor for XGBoostRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples == 0 || n_features == 0 {
            return Err(GradecastError::TrainingError("Empty dataset".into()));
        }
        self.n_features = n_features;
        self.base_score = y.mean().unwrap_or(0.0);
        let mut preds = Array1::from_elem(n_samples, self.base_score);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let hess = vec![1.0; n_samples];

        self.trees.clear();
        for _ in 0..self.config.n_estimators {
            // Squared error: grad = pred - y, hess = 1
            let grad: Vec<f64> = preds.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let rows = subsample(&mut rng, n_samples, self.config.subsample);
            let cols = subsample(&mut rng, n_features, self.config.colsample_bytree);

            let tree = build_tree(x, &grad, &hess, &rows, &cols, 0, &self.config);
            for (i, row) in x.rows().into_iter().enumerate() {
                preds[i] += self.config.learning_rate * tree.predict(&row);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(GradecastError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(GradecastError::ShapeMismatch {
                expected: self.n_features,
                actual: x.ncols(),
                expected_columns: Vec::new(),
            });
        }
        Ok(x.rows().into_iter().map(|row| self.predict_row(&row)).collect())
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::XGBoost
    }

    fn params(&self) -> BTreeMap<String, String> {
        let c = &self.config;
        BTreeMap::from([
            ("n_estimators".to_string(), c.n_estimators.to_string()),
            ("learning_rate".to_string(), c.learning_rate.to_string()),
            ("max_depth".to_string(), c.max_depth.to_string()),
            ("min_child_weight".to_string(), c.min_child_weight.to_string()),
            ("reg_lambda".to_string(), c.reg_lambda.to_string()),
            ("reg_alpha".to_string(), c.reg_alpha.to_string()),
            ("subsample".to_string(), c.subsample.to_string()),
            ("colsample_bytree".to_string(), c.colsample_bytree.to_string()),
            ("random_state".to_string(), c.random_state.to_string()),
        ])
    }
}
