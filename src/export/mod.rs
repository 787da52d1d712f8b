//! Model publication
//!
//! A versioned, file-backed registry of trained regressors with lifecycle
//! stages and tags.

mod versioning;

pub use versioning::{ModelArtifact, ModelRegistry, ModelStage, RegisteredVersion};
