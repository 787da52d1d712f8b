//! Model training module
//!
//! Three gradient-boosted tree regressors behind one [`Regressor`] trait,
//! plus the [`ModelTrainer`] that splits the feature table, scores each
//! candidate, tracks the runs and publishes the winner:
//! - LightGBM-style leaf-wise boosting
//! - XGBoost-style level-wise second-order boosting
//! - CatBoost-style oblivious trees

mod models;
mod trainer;
pub mod catboost;
pub mod lightgbm;
pub mod xgboost;

pub use catboost::{CatBoostConfig, CatBoostRegressor};
pub use lightgbm::{LightGBMConfig, LightGBMRegressor};
pub use models::{
    quadratic_weighted_kappa, DataSplit, HyperParameters, ModelFamily, ModelMetrics, Regressor, TrainedRegressor,
};
pub use trainer::{select_best, stratified_split, ModelTrainer, CANDIDATE_TAG, MODEL_ARTIFACT};
pub use xgboost::{XGBoostConfig, XGBoostRegressor};
