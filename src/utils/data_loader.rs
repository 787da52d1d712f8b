//! Data loading utilities
//!
//! Every polars touch point of the crate lives here: CSV read/write and the
//! conversions between frames, string/numeric column vectors and dense
//! `ndarray` matrices.

use crate::error::{GradecastError, Result};
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// CSV loader for feature and label tables
pub struct DataLoader {
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: 1000,
        }
    }

    /// Number of rows scanned for dtype inference
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load a CSV file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GradecastError::artifact_not_found("CSV table", path));
        }
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;
        debug!(path = %path.display(), rows = df.height(), cols = df.width(), "Loaded CSV");
        Ok(df)
    }
}

/// CSV writer
pub struct DataSaver;

impl DataSaver {
    /// Save to CSV, creating parent directories as needed
    pub fn save_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(df)?;
        debug!(path = %path.display(), rows = df.height(), "Saved CSV");
        Ok(())
    }
}

/// Column names of a frame, in order
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Read a column as optional strings, casting non-string dtypes
pub fn optional_strings(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| GradecastError::SchemaError(format!("column '{}' not found", name)))?;
    let cast = column.cast(&DataType::String)?;
    let values = cast
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect();
    Ok(values)
}

/// Read a column as strings; nulls are an error
pub fn required_strings(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    optional_strings(df, name)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                GradecastError::DataError(format!("null value in column '{}' at row {}", name, row))
            })
        })
        .collect()
}

/// Read a column as f64; nulls and non-numeric values are an error
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| GradecastError::SchemaError(format!("column '{}' not found", name)))?;
    if !column.dtype().is_primitive_numeric() {
        return Err(GradecastError::SchemaError(format!(
            "column '{}' is not numeric (dtype {})",
            name,
            column.dtype()
        )));
    }
    let cast = column.cast(&DataType::Float64)?;
    cast.f64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                GradecastError::DataError(format!("null value in column '{}' at row {}", name, row))
            })
        })
        .collect()
}

pub fn is_numeric(df: &DataFrame, name: &str) -> bool {
    df.column(name)
        .map(|c| c.dtype().is_primitive_numeric())
        .unwrap_or(false)
}

/// Gather the named numeric columns into a row-major matrix
pub fn frame_to_matrix(df: &DataFrame, columns: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let mut matrix = Array2::<f64>::zeros((n_rows, columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let values = numeric_values(df, name)?;
        for (i, v) in values.into_iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    Ok(matrix)
}

/// Build a frame from a matrix and its column names
pub fn matrix_to_frame(matrix: &Array2<f64>, columns: &[String]) -> Result<DataFrame> {
    if matrix.ncols() != columns.len() {
        return Err(GradecastError::DataError(format!(
            "matrix has {} columns but {} names were given",
            matrix.ncols(),
            columns.len()
        )));
    }
    let cols: Vec<Column> = columns
        .iter()
        .enumerate()
        .map(|(j, name)| Column::new(name.as_str().into(), matrix.column(j).to_vec()))
        .collect();
    Ok(DataFrame::new(cols)?)
}

/// Lift a single string record into a one-row frame
pub fn record_to_frame(record: &BTreeMap<String, String>) -> Result<DataFrame> {
    let cols: Vec<Column> = record
        .iter()
        .map(|(name, value)| Column::new(name.as_str().into(), vec![value.clone()]))
        .collect();
    Ok(DataFrame::new(cols)?)
}

/// Replace (or append) a string column
pub fn put_strings(df: &mut DataFrame, name: &str, values: Vec<Option<String>>) -> Result<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

/// Replace (or append) an integer column
pub fn put_integers(df: &mut DataFrame, name: &str, values: Vec<i64>) -> Result<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}
