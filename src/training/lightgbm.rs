//! LightGBM-style gradient boosting with leaf-wise tree growth
//!
//! Key differences from the level-wise booster:
//! - Leaf-wise (best-first) growth bounded by `max_leaves`
//! - Gradient-based One-Side Sampling (GOSS): keeps the largest gradients,
//!   samples the rest and up-weights them by `(1 - top_rate) / other_rate`

use super::models::{ModelFamily, Regressor};
use super::xgboost::subsample;
use crate::error::{GradecastError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightGBMConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    #[serde(alias = "num_leaves")]
    pub max_leaves: usize,
    pub max_depth: Option<usize>,
    #[serde(alias = "min_data_in_leaf")]
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    #[serde(alias = "bagging_fraction")]
    pub subsample: f64,
    #[serde(alias = "feature_fraction")]
    pub colsample_bytree: f64,
    /// GOSS is active only when `top_rate + other_rate < 1`
    pub top_rate: f64,
    pub other_rate: f64,
    #[serde(alias = "seed")]
    pub random_state: u64,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.05,
            max_leaves: 31,
            max_depth: None,
            min_child_samples: 20,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            subsample: 0.8,
            colsample_bytree: 0.8,
            top_rate: 1.0,
            other_rate: 0.0,
            random_state: 13,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LGBNode {
    Leaf { value: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<LGBNode>,
        right: Box<LGBNode>,
    },
}

impl LGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            LGBNode::Leaf { value } => *value,
            LGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

fn leaf_value(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g.abs() <= alpha { 0.0 } else { g - alpha * g.signum() };
    if h + lambda <= 0.0 {
        0.0
    } else {
        -g_adj / (h + lambda)
    }
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    if h + lambda <= 0.0 {
        0.0
    } else {
        g * g / (h + lambda)
    }
}

/// Per-sample gradient statistics for one boosting round
struct RoundStats<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
}

impl RoundStats<'_> {
    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn leaf(&self, indices: &[usize], config: &LightGBMConfig) -> LGBNode {
        let (g, h) = self.sums(indices);
        LGBNode::Leaf {
            value: leaf_value(g, h, config.reg_lambda, config.reg_alpha),
        }
    }
}

struct Candidate {
    gain: f64,
    node: usize,
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Max-heap on gain; earlier nodes first on ties
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain.total_cmp(&other.gain).then_with(|| other.node.cmp(&self.node))
    }
}

fn split_feature(
    x: &Array2<f64>,
    stats: &RoundStats,
    indices: &[usize],
    feature: usize,
    config: &LightGBMConfig,
) -> Option<(f64, f64, usize, Vec<usize>)> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let (total_g, total_h) = stats.sums(&sorted);
    let parent = score(total_g, total_h, config.reg_lambda);
    let min_child = config.min_child_samples.max(1);

    let mut left_g = 0.0;
    let mut left_h = 0.0;
    let mut best: Option<(f64, f64, usize)> = None;

    for pos in 0..sorted.len() - 1 {
        left_g += stats.grad[sorted[pos]];
        left_h += stats.hess[sorted[pos]];
        if pos + 1 < min_child || sorted.len() - pos - 1 < min_child {
            continue;
        }
        let here = x[[sorted[pos], feature]];
        let next = x[[sorted[pos + 1], feature]];
        if here == next {
            continue;
        }
        let gain = score(left_g, left_h, config.reg_lambda)
            + score(total_g - left_g, total_h - left_h, config.reg_lambda)
            - parent;
        if best.map_or(true, |(g, _, _)| gain > g) {
            best = Some((gain, (here + next) / 2.0, pos + 1));
        }
    }

    let (gain, threshold, cut) = best.filter(|(g, _, _)| *g > 0.0)?;
    Some((gain, threshold, cut, sorted))
}

fn best_candidate(
    x: &Array2<f64>,
    stats: &RoundStats,
    node: usize,
    indices: &[usize],
    features: &[usize],
    config: &LightGBMConfig,
) -> Option<Candidate> {
    if indices.len() < config.min_child_samples.max(1) * 2 {
        return None;
    }
    features
        .par_iter()
        .filter_map(|&f| {
            split_feature(x, stats, indices, f, config).map(|(gain, threshold, cut, sorted)| {
                let (left, right) = sorted.split_at(cut);
                Candidate {
                    gain,
                    node,
                    feature: f,
                    threshold,
                    left: left.to_vec(),
                    right: right.to_vec(),
                }
            })
        })
        .reduce_with(|a, b| if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) { b } else { a })
}

enum Slot {
    Leaf(Vec<usize>),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Grow one tree best-first until `max_leaves` or no positive gain remains
fn grow_tree(
    x: &Array2<f64>,
    stats: &RoundStats,
    indices: Vec<usize>,
    features: &[usize],
    config: &LightGBMConfig,
) -> LGBNode {
    let depth_limit = config.max_depth.unwrap_or(usize::MAX);
    let mut slots = vec![Slot::Leaf(indices.clone())];
    let mut depths = vec![0usize];
    let mut heap = BinaryHeap::new();
    if depth_limit > 0 {
        heap.extend(best_candidate(x, stats, 0, &indices, features, config));
    }

    let mut n_leaves = 1;
    while n_leaves < config.max_leaves.max(2) {
        let Some(split) = heap.pop() else { break };
        let depth = depths[split.node] + 1;
        let left_id = slots.len();
        let right_id = left_id + 1;

        if depth < depth_limit {
            heap.extend(best_candidate(x, stats, left_id, &split.left, features, config));
            heap.extend(best_candidate(x, stats, right_id, &split.right, features, config));
        }
        slots.push(Slot::Leaf(split.left));
        slots.push(Slot::Leaf(split.right));
        depths.extend([depth, depth]);
        slots[split.node] = Slot::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        n_leaves += 1;
    }

    fn to_node(slots: &[Slot], id: usize, stats: &RoundStats, config: &LightGBMConfig) -> LGBNode {
        match &slots[id] {
            Slot::Leaf(indices) => stats.leaf(indices, config),
            Slot::Split { feature, threshold, left, right } => LGBNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(to_node(slots, *left, stats, config)),
                right: Box::new(to_node(slots, *right, stats, config)),
            },
        }
    }
    to_node(&slots, 0, stats, config)
}

/// GOSS row sample plus the amplification weight of each sampled row
fn goss_sample(grad: &[f64], top_rate: f64, other_rate: f64, rng: &mut Xoshiro256PlusPlus) -> (Vec<usize>, Vec<f64>) {
    let n = grad.len();
    let n_top = ((n as f64 * top_rate).ceil() as usize).min(n);
    let n_other = ((n as f64 * other_rate).ceil() as usize).min(n - n_top);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| grad[b].abs().total_cmp(&grad[a].abs()));

    let mut weights = vec![0.0; n];
    let mut rest = order.split_off(n_top);
    for &i in &order {
        weights[i] = 1.0;
    }
    rest.shuffle(rng);
    rest.truncate(n_other);
    let amplify = if other_rate > 0.0 { (1.0 - top_rate) / other_rate } else { 1.0 };
    for &i in &rest {
        weights[i] = amplify;
    }
    order.extend(rest);
    order.sort_unstable();
    (order, weights)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMRegressor {
    config: LightGBMConfig,
    trees: Vec<LGBNode>,
    base_prediction: f64,
    n_features: usize,
}

impl LightGBMRegressor {
    pub fn new(config: LightGBMConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_prediction: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &LightGBMConfig {
        &self.config
    }

    fn goss_enabled(&self) -> bool {
        self.config.top_rate + self.config.other_rate < 1.0
    }
}

impl Regressor for LightGBMRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(GradecastError::TrainingError("Empty dataset".into()));
        }
        if self.config.max_leaves < 2 {
            return Err(GradecastError::invalid_parameter(
                "max_leaves",
                self.config.max_leaves,
                "must be at least 2",
            ));
        }
        self.n_features = x.ncols();
        self.base_prediction = y.mean().unwrap_or(0.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let mut predictions = Array1::from_elem(n, self.base_prediction);

        self.trees.clear();
        for _ in 0..self.config.n_estimators {
            let residual: Vec<f64> = predictions.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let (rows, weights) = if self.goss_enabled() {
                goss_sample(&residual, self.config.top_rate, self.config.other_rate, &mut rng)
            } else {
                (subsample(&mut rng, n, self.config.subsample), vec![1.0; n])
            };
            let grad: Vec<f64> = residual.iter().zip(&weights).map(|(g, w)| g * w).collect();
            let stats = RoundStats { grad: &grad, hess: &weights };
            let features = subsample(&mut rng, self.n_features, self.config.colsample_bytree);

            let tree = grow_tree(x, &stats, rows, &features, &self.config);
            for (i, row) in x.rows().into_iter().enumerate() {
                predictions[i] += self.config.learning_rate * tree.predict(&row);
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
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                self.base_prediction
                    + self
                        .trees
                        .iter()
                        .map(|t| self.config.learning_rate * t.predict(&row))
                        .sum::<f64>()
            })
            .collect())
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::LightGBM
    }

    fn params(&self) -> BTreeMap<String, String> {
        let c = &self.config;
        BTreeMap::from([
            ("n_estimators".to_string(), c.n_estimators.to_string()),
            ("learning_rate".to_string(), c.learning_rate.to_string()),
            ("num_leaves".to_string(), c.max_leaves.to_string()),
            (
                "max_depth".to_string(),
                c.max_depth.map_or_else(|| "-1".to_string(), |d| d.to_string()),
            ),
            ("min_child_samples".to_string(), c.min_child_samples.to_string()),
            ("reg_lambda".to_string(), c.reg_lambda.to_string()),
            ("subsample".to_string(), c.subsample.to_string()),
            ("colsample_bytree".to_string(), c.colsample_bytree.to_string()),
            ("random_state".to_string(), c.random_state.to_string()),
        ])
    }
}
