//! Variance-retaining dimensionality reduction
//!
//! Eigenvectors of the sample covariance are extracted one at a time by
//! power iteration with deflation until the cumulative explained-variance
//! ratio reaches the configured threshold. Data is centered, never scaled.

use crate::error::{GradecastError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Layout version of the persisted reducer
pub const REDUCER_SCHEMA_VERSION: u32 = 1;

const MAX_ITER: usize = 1000;
const TOLERANCE: f64 = 1e-12;
const VARIANCE_EPS: f64 = 1e-12;

/// Fitted linear projection: `(X - mean) @ components.T`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionalityReducer {
    schema_version: u32,
    variance_threshold: f64,
    n_features_in: usize,
    feature_names_in: Vec<String>,
    mean: Array1<f64>,
    /// n_components x n_features_in
    components: Array2<f64>,
    explained_variance: Vec<f64>,
    explained_variance_ratio: Vec<f64>,
}

impl DimensionalityReducer {
    /// Fit on `matrix` (rows = samples), keeping the fewest components whose
    /// cumulative explained-variance ratio is at least `variance_threshold`.
    pub fn fit(
        matrix: &Array2<f64>,
        feature_names: &[String],
        variance_threshold: f64,
        random_state: u64,
    ) -> Result<Self> {
        if !(variance_threshold > 0.0 && variance_threshold <= 1.0) {
            return Err(GradecastError::invalid_parameter(
                "variance_threshold",
                variance_threshold,
                "must be in (0, 1]",
            ));
        }
        let (n, d) = matrix.dim();
        if n < 2 {
            return Err(GradecastError::SchemaError(
                "reducer requires at least 2 samples".to_string(),
            ));
        }
        if d == 0 {
            return Err(GradecastError::SchemaError(
                "reducer requires at least 1 feature".to_string(),
            ));
        }
        if feature_names.len() != d {
            return Err(GradecastError::DataError(format!(
                "{} feature names given for {} columns",
                feature_names.len(),
                d
            )));
        }

        let mean = matrix
            .mean_axis(Axis(0))
            .ok_or_else(|| GradecastError::DataError("empty matrix".into()))?;
        let centered = matrix - &mean;
        let cov = covariance(&centered);

        let total_variance: f64 = cov.diag().sum();
        if total_variance <= VARIANCE_EPS {
            return Err(GradecastError::SchemaError(
                "feature matrix has zero variance".to_string(),
            ));
        }

        let max_components = d.min(n);
        let mut rng = ChaCha8Rng::seed_from_u64(random_state);
        let mut work = cov;
        let mut vectors: Vec<Array1<f64>> = Vec::new();
        let mut explained_variance = Vec::new();
        let mut explained_variance_ratio = Vec::new();
        let mut cumulative = 0.0;

        while vectors.len() < max_components {
            let (eigenvalue, vector) = power_iteration(&work, &mut rng);
            let eigenvalue = eigenvalue.max(0.0);

            // Deflate: A = A - lambda * v v^T
            for i in 0..d {
                for j in 0..d {
                    work[[i, j]] -= eigenvalue * vector[i] * vector[j];
                }
            }

            let ratio = eigenvalue / total_variance;
            cumulative += ratio;
            explained_variance.push(eigenvalue);
            explained_variance_ratio.push(ratio);
            vectors.push(vector);

            if cumulative >= variance_threshold - 1e-12 {
                break;
            }
        }

        let k = vectors.len();
        let mut components = Array2::<f64>::zeros((k, d));
        for (i, v) in vectors.iter().enumerate() {
            components.row_mut(i).assign(v);
        }

        info!(
            n_features_in = d,
            n_components = k,
            retained = cumulative,
            threshold = variance_threshold,
            "Fitted dimensionality reducer"
        );

        Ok(Self {
            schema_version: REDUCER_SCHEMA_VERSION,
            variance_threshold,
            n_features_in: d,
            feature_names_in: feature_names.to_vec(),
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        })
    }

    /// Center and project. The column count must match the fit-time count.
    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        if matrix.ncols() != self.n_features_in {
            return Err(GradecastError::ShapeMismatch {
                expected: self.n_features_in,
                actual: matrix.ncols(),
                expected_columns: self.feature_names_in.clone(),
            });
        }
        let centered = matrix - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }

    pub fn fit_transform(
        matrix: &Array2<f64>,
        feature_names: &[String],
        variance_threshold: f64,
        random_state: u64,
    ) -> Result<(Self, Array2<f64>)> {
        let reducer = Self::fit(matrix, feature_names, variance_threshold, random_state)?;
        let projected = reducer.transform(matrix)?;
        Ok((reducer, projected))
    }

    pub fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn feature_names_in(&self) -> &[String] {
        &self.feature_names_in
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn variance_threshold(&self) -> f64 {
        self.variance_threshold
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }

    /// `PC1..PCk`
    pub fn component_names(&self) -> Vec<String> {
        (1..=self.n_components()).map(|i| format!("PC{}", i)).collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let reducer: Self = bincode::deserialize(bytes)?;
        if reducer.schema_version != REDUCER_SCHEMA_VERSION {
            return Err(GradecastError::SchemaError(format!(
                "reducer artifact has schema version {}, expected {}",
                reducer.schema_version, REDUCER_SCHEMA_VERSION
            )));
        }
        Ok(reducer)
    }
}

/// Sample covariance (n - 1 denominator) of an already-centered matrix
fn covariance(centered: &Array2<f64>) -> Array2<f64> {
    let (n, d) = centered.dim();
    let denom = (n as f64 - 1.0).max(1.0);
    let columns: Vec<Array1<f64>> = (0..d).map(|j| centered.column(j).to_owned()).collect();

    let upper: Vec<(usize, usize, f64)> = (0..d)
        .into_par_iter()
        .flat_map_iter(|i| {
            let columns = &columns;
            (i..d).map(move |j| (i, j, columns[i].dot(&columns[j]) / denom))
        })
        .collect();

    let mut cov = Array2::<f64>::zeros((d, d));
    for (i, j, v) in upper {
        cov[[i, j]] = v;
        cov[[j, i]] = v;
    }
    cov
}

/// Dominant eigenpair of a symmetric matrix. The vector's largest-magnitude
/// entry is made positive so the basis is sign-stable.
fn power_iteration(matrix: &Array2<f64>, rng: &mut ChaCha8Rng) -> (f64, Array1<f64>) {
    let d = matrix.nrows();
    let mut v: Array1<f64> = (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect();
    normalize(&mut v);

    for _ in 0..MAX_ITER {
        let mut w = matrix.dot(&v);
        if normalize(&mut w) <= VARIANCE_EPS {
            // Remaining spectrum is numerically zero
            break;
        }
        let diff = (&w - &v).mapv(|x| x * x).sum().sqrt();
        v = w;
        if diff < TOLERANCE {
            break;
        }
    }

    let eigenvalue = v.dot(&matrix.dot(&v));

    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    (eigenvalue, v)
}

fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    norm
}
