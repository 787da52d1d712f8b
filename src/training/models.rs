//! Model implementations and traits

use super::catboost::{CatBoostConfig, CatBoostRegressor};
use super::lightgbm::{LightGBMConfig, LightGBMRegressor};
use super::xgboost::{XGBoostConfig, XGBoostRegressor};
use crate::error::{GradecastError, Result};
use crate::preprocessing::clip_prediction;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Candidate regressor families, in training order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    LightGBM,
    XGBoost,
    CatBoost,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [ModelFamily::LightGBM, ModelFamily::XGBoost, ModelFamily::CatBoost];

    /// Run and registry name
    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::LightGBM => "LightGBM",
            ModelFamily::XGBoost => "XGBoost",
            ModelFamily::CatBoost => "CatBoost",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelFamily {
    type Err = GradecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lightgbm" | "lgbm" => Ok(ModelFamily::LightGBM),
            "xgboost" | "xgb" => Ok(ModelFamily::XGBoost),
            "catboost" => Ok(ModelFamily::CatBoost),
            other => Err(GradecastError::invalid_parameter(
                "model",
                other,
                "expected lightgbm, xgboost or catboost",
            )),
        }
    }
}

/// Trait for the candidate regressors
pub trait Regressor: Send + Sync {
    /// Fit the model to training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Raw (unrounded) predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    fn family(&self) -> ModelFamily;

    /// Hyperparameters as loggable strings
    fn params(&self) -> BTreeMap<String, String>;
}

/// Serializable union of the trained regressors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedRegressor {
    LightGBM(LightGBMRegressor),
    XGBoost(XGBoostRegressor),
    CatBoost(CatBoostRegressor),
}

impl TrainedRegressor {
    pub fn new(family: ModelFamily, params: &HyperParameters) -> Self {
        match family {
            ModelFamily::LightGBM => TrainedRegressor::LightGBM(LightGBMRegressor::new(params.lightgbm.clone())),
            ModelFamily::XGBoost => TrainedRegressor::XGBoost(XGBoostRegressor::new(params.xgboost.clone())),
            ModelFamily::CatBoost => TrainedRegressor::CatBoost(CatBoostRegressor::new(params.catboost.clone())),
        }
    }

    fn inner(&self) -> &dyn Regressor {
        match self {
            TrainedRegressor::LightGBM(m) => m,
            TrainedRegressor::XGBoost(m) => m,
            TrainedRegressor::CatBoost(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Regressor {
        match self {
            TrainedRegressor::LightGBM(m) => m,
            TrainedRegressor::XGBoost(m) => m,
            TrainedRegressor::CatBoost(m) => m,
        }
    }

    /// Predictions rounded half-to-even and clipped to the label range
    pub fn predict_labels(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict(x)?.mapv(|v| clip_prediction(v) as f64))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Regressor for TrainedRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict(x)
    }

    fn family(&self) -> ModelFamily {
        self.inner().family()
    }

    fn params(&self) -> BTreeMap<String, String> {
        self.inner().params()
    }
}

/// Per-family hyperparameters as read from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    pub lightgbm: LightGBMConfig,
    pub xgboost: XGBoostConfig,
    pub catboost: CatBoostConfig,
}

/// Metrics for model evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Quadratic-weighted Cohen's kappa
    pub qwk: f64,
    /// Number of evaluated samples
    pub n_samples: usize,
    /// Training time in seconds
    pub training_time_secs: f64,
}

impl ModelMetrics {
    pub const RMSE: &'static str = "rmse";
    pub const QWK: &'static str = "qwk";
    pub const QWK_LONG: &'static str = "quadratic_weighted_kappa";

    /// Score integer-valued predictions against integer labels
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let n = y_true.len();
        let mse = if n == 0 {
            0.0
        } else {
            y_true
                .iter()
                .zip(y_pred.iter())
                .map(|(t, p)| (t - p).powi(2))
                .sum::<f64>()
                / n as f64
        };
        Self {
            rmse: mse.sqrt(),
            qwk: quadratic_weighted_kappa(y_true, y_pred),
            n_samples: n,
            training_time_secs: 0.0,
        }
    }

    /// Look up a metric by its logged name
    pub fn get(&self, metric: &str) -> Option<f64> {
        match metric {
            Self::RMSE => Some(self.rmse),
            Self::QWK | Self::QWK_LONG | "kappa" => Some(self.qwk),
            _ => None,
        }
    }

    pub fn as_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (Self::RMSE.to_string(), self.rmse),
            (Self::QWK.to_string(), self.qwk),
        ])
    }
}

/// Cohen's kappa with quadratic weights over the observed label set.
///
/// Weights use label index distance. Returns 0.0 when agreement by chance
/// is undefined (a single observed label).
pub fn quadratic_weighted_kappa(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let t: Vec<i64> = y_true.iter().map(|v| v.round() as i64).collect();
    let p: Vec<i64> = y_pred.iter().map(|v| v.round() as i64).collect();

    let mut labels: Vec<i64> = t.iter().chain(p.iter()).copied().collect();
    labels.sort_unstable();
    labels.dedup();
    let k = labels.len();
    if k < 2 || t.is_empty() {
        return 0.0;
    }
    let index = |v: i64| labels.binary_search(&v).unwrap_or(0);

    let mut observed = vec![vec![0.0f64; k]; k];
    for (a, b) in t.iter().zip(&p) {
        observed[index(*a)][index(*b)] += 1.0;
    }
    let n = t.len() as f64;
    let row_sums: Vec<f64> = observed.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> = (0..k).map(|j| observed.iter().map(|r| r[j]).sum()).collect();

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..k {
        for j in 0..k {
            let w = ((i as f64) - (j as f64)).powi(2);
            num += w * observed[i][j];
            den += w * row_sums[i] * col_sums[j] / n;
        }
    }
    if den == 0.0 {
        0.0
    } else {
        1.0 - num / den
    }
}

/// Train/test split of a feature table
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
    pub feature_names: Vec<String>,
}
