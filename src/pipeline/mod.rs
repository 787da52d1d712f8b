//! Feature pipelines and the end-to-end training runner
//!
//! The training side fits and persists the feature contract (codec and
//! reducer); the inference side replays it from disk.

pub mod artifacts;
mod inference;
mod runner;
mod training;

pub use artifacts::ArtifactPaths;
pub use inference::InferenceFeaturePipeline;
pub use runner::{baseline_file, build_features_file, clean_file, RunSummary, StepStatus, TrainingRunner};
pub use training::{
    Encoded, FeatureOutcome, Loaded, Reduced, SavedFeatures, Selected, Stage, TrainingFeaturePipeline,
};
