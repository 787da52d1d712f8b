//! Serving-side prediction
//!
//! [`ModelPredictor`] replays the persisted feature contract and runs the
//! newest published regressor on one student at a time.

mod predictor;

pub use predictor::{ModelPredictor, ModelSource, PredictionResponse, StudentInput};
