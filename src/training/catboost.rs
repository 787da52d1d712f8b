//! CatBoost-style gradient boosting on oblivious trees
//!
//! - Symmetric (oblivious) trees: every node at a level shares one split
//! - Features are quantized once into at most `border_count` borders
//! - Split search uses per-leaf gradient histograms over the quantized bins

use super::models::{ModelFamily, Regressor};
use super::xgboost::subsample;
use crate::error::{GradecastError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatBoostConfig {
    #[serde(alias = "iterations")]
    pub n_estimators: usize,
    pub learning_rate: f64,
    #[serde(alias = "depth")]
    pub max_depth: usize,
    #[serde(alias = "l2_leaf_reg")]
    pub reg_lambda: f64,
    pub subsample: f64,
    pub border_count: usize,
    #[serde(alias = "random_seed")]
    pub random_state: u64,
}

impl Default for CatBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            learning_rate: 0.05,
            max_depth: 6,
            reg_lambda: 3.0,
            subsample: 1.0,
            border_count: 254,
            random_state: 42,
        }
    }
}

/// Each level applies the same (feature, threshold) test
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SymmetricTree {
    splits: Vec<(usize, f64)>,
    leaf_values: Vec<f64>,
}

impl SymmetricTree {
    fn leaf_index(&self, sample: &ArrayView1<f64>) -> usize {
        self.splits
            .iter()
            .fold(0, |idx, &(feature, threshold)| idx * 2 + usize::from(sample[feature] > threshold))
    }

    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        self.leaf_values.get(self.leaf_index(sample)).copied().unwrap_or(0.0)
    }
}

/// Quantized view of the training matrix
struct Quantized {
    /// Sorted split borders per feature
    borders: Vec<Vec<f64>>,
    /// `bins[f][i]` is the number of borders strictly below sample i's value
    bins: Vec<Vec<u16>>,
}

impl Quantized {
    fn new(x: &Array2<f64>, border_count: usize) -> Self {
        let (borders, bins) = x
            .columns()
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|column| {
                let borders = feature_borders(&column, border_count);
                let bins = column
                    .iter()
                    .map(|v| borders.partition_point(|b| b < v) as u16)
                    .collect();
                (borders, bins)
            })
            .unzip();
        Self { borders, bins }
    }
}

/// Midpoints between distinct values, thinned to quantiles past `max_borders`
fn feature_borders(column: &ArrayView1<f64>, max_borders: usize) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    let midpoints: Vec<f64> = values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    let limit = max_borders.clamp(1, u16::MAX as usize - 1);
    if midpoints.len() <= limit {
        return midpoints;
    }
    let mut thinned: Vec<f64> = (1..=limit)
        .map(|k| midpoints[k * midpoints.len() / (limit + 1)])
        .collect();
    thinned.dedup();
    thinned
}

fn build_symmetric_tree(
    q: &Quantized,
    grad: &[f64],
    rows: &[usize],
    config: &CatBoostConfig,
) -> SymmetricTree {
    let lambda = config.reg_lambda;
    let mut splits = Vec::with_capacity(config.max_depth);
    let mut leaf_of = vec![0usize; grad.len()];
    let mut n_leaves = 1usize;

    for _ in 0..config.max_depth {
        // (feature, border, gain); ties keep the lower feature then border
        let best = (0..q.borders.len())
            .into_par_iter()
            .filter_map(|f| {
                let n_bins = q.borders[f].len() + 1;
                if n_bins < 2 {
                    return None;
                }
                let mut hist_g = vec![0.0f64; n_leaves * n_bins];
                let mut hist_h = vec![0.0f64; n_leaves * n_bins];
                for &i in rows {
                    let slot = leaf_of[i] * n_bins + q.bins[f][i] as usize;
                    hist_g[slot] += grad[i];
                    hist_h[slot] += 1.0;
                }

                let mut gains = vec![0.0f64; n_bins - 1];
                for leaf in 0..n_leaves {
                    let g_row = &hist_g[leaf * n_bins..(leaf + 1) * n_bins];
                    let h_row = &hist_h[leaf * n_bins..(leaf + 1) * n_bins];
                    let g_total: f64 = g_row.iter().sum();
                    let h_total: f64 = h_row.iter().sum();
                    let parent = g_total * g_total / (h_total + lambda);
                    let (mut g_left, mut h_left) = (0.0, 0.0);
                    for (k, gain) in gains.iter_mut().enumerate() {
                        g_left += g_row[k];
                        h_left += h_row[k];
                        let g_right = g_total - g_left;
                        let h_right = h_total - h_left;
                        *gain += g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                            - parent;
                    }
                }

                let (border, gain) = gains
                    .into_iter()
                    .enumerate()
                    .fold(None, |best: Option<(usize, f64)>, (k, g)| match best {
                        Some((_, bg)) if bg >= g => best,
                        _ => Some((k, g)),
                    })?;
                Some((f, border, gain))
            })
            .reduce_with(|a, b| if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) { b } else { a });

        let Some((feature, border, gain)) = best else { break };
        if gain <= 1e-12 {
            break;
        }
        for &i in rows {
            leaf_of[i] = leaf_of[i] * 2 + usize::from(q.bins[feature][i] as usize > border);
        }
        n_leaves *= 2;
        splits.push((feature, q.borders[feature][border]));
    }

    let mut g_sum = vec![0.0f64; n_leaves];
    let mut count = vec![0.0f64; n_leaves];
    for &i in rows {
        g_sum[leaf_of[i]] += grad[i];
        count[leaf_of[i]] += 1.0;
    }
    let leaf_values = g_sum
        .iter()
        .zip(&count)
        .map(|(g, h)| if *h == 0.0 { 0.0 } else { -g / (h + lambda) })
        .collect();

    SymmetricTree { splits, leaf_values }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatBoostRegressor {
    config: CatBoostConfig,
    trees: Vec<SymmetricTree>,
    base_prediction: f64,
    n_features: usize,
}

impl CatBoostRegressor {
    pub fn new(config: CatBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_prediction: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &CatBoostConfig {
        &self.config
    }
}

impl Regressor for CatBoostRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(GradecastError::TrainingError("Empty dataset".into()));
        }
        self.n_features = x.ncols();
        self.base_prediction = y.mean().unwrap_or(0.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let quantized = Quantized::new(x, self.config.border_count);
        let mut predictions = Array1::from_elem(n, self.base_prediction);

        self.trees.clear();
        for _ in 0..self.config.n_estimators {
            let grad: Vec<f64> = predictions.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let rows = subsample(&mut rng, n, self.config.subsample);
            let tree = build_symmetric_tree(&quantized, &grad, &rows, &self.config);
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
        ModelFamily::CatBoost
    }

    fn params(&self) -> BTreeMap<String, String> {
        let c = &self.config;
        BTreeMap::from([
            ("iterations".to_string(), c.n_estimators.to_string()),
            ("learning_rate".to_string(), c.learning_rate.to_string()),
            ("depth".to_string(), c.max_depth.to_string()),
            ("l2_leaf_reg".to_string(), c.reg_lambda.to_string()),
            ("subsample".to_string(), c.subsample.to_string()),
            ("border_count".to_string(), c.border_count.to_string()),
            ("random_seed".to_string(), c.random_state.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((100, 3), (0..300).map(|i| (i as f64) / 100.0).collect()).unwrap();
        let y = Array1::from_vec((0..100).map(|i| 2.0 * (i * 3) as f64 / 100.0 + 0.1).collect());
        (x, y)
    }

    #[test]
    fn test_catboost_regressor() {
        let (x, y) = make_regression_data();
        let config = CatBoostConfig {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 4,
            ..Default::default()
        };
        let mut model = CatBoostRegressor::new(config);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 100);
        let mse = (&preds - &y).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 0.1, "mse too high: {}", mse);
    }

    #[test]
    fn test_catboost_symmetric_tree() {
        let (x, y) = make_regression_data();
        let config = CatBoostConfig {
            n_estimators: 5,
            max_depth: 3,
            ..Default::default()
        };
        let mut model = CatBoostRegressor::new(config);
        model.fit(&x, &y).unwrap();
        for tree in &model.trees {
            assert!(tree.splits.len() <= 3);
            assert_eq!(tree.leaf_values.len(), 1 << tree.splits.len());
        }
    }

    #[test]
    fn test_borders_are_thinned() {
        let column = Array1::from_iter((0..1000).map(|i| i as f64));
        let borders = feature_borders(&column.view(), 254);
        assert!(borders.len() <= 254);
        assert!(borders.windows(2).all(|w| w[0] < w[1]));

        let constant = Array1::from_elem(10, 1.0);
        assert!(feature_borders(&constant.view(), 254).is_empty());
    }
}
