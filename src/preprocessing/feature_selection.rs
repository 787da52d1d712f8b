//! Statistical feature selection
//!
//! Nominal columns are kept when a chi-square independence test against the
//! target is significant and Cramér's V reaches a minimum effect size.
//! Ordinal columns are kept when their Spearman rank correlation with the
//! encoded target is significant and strong enough.

use super::{FeatureConfig, Grade};
use crate::error::{GradecastError, Result};
use crate::utils::data_loader;
use crate::utils::stats;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Which test produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionTest {
    ChiSquare,
    Spearman,
}

/// Outcome of one column's test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub column: String,
    pub test: SelectionTest,
    /// Chi-square statistic or Spearman rho
    pub statistic: f64,
    pub p_value: f64,
    /// Cramér's V or |rho|
    pub effect_size: f64,
    pub selected: bool,
}

/// Scores for every declared column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub nominal: Vec<FeatureScore>,
    pub ordinal: Vec<FeatureScore>,
}

impl SelectionReport {
    pub fn selected_nominal(&self) -> Vec<String> {
        selected_names(&self.nominal)
    }

    pub fn selected_ordinal(&self) -> Vec<String> {
        selected_names(&self.ordinal)
    }
}

fn selected_names(scores: &[FeatureScore]) -> Vec<String> {
    scores
        .iter()
        .filter(|s| s.selected)
        .map(|s| s.column.clone())
        .collect()
}

/// Chi-square / Spearman selection gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    alpha: f64,
    min_cramers_v: f64,
    min_correlation: f64,
}

impl Default for FeatureSelector {
    fn default() -> Self {
        Self::new(0.05, 0.1, 0.1)
    }
}

impl FeatureSelector {
    pub fn new(alpha: f64, min_cramers_v: f64, min_correlation: f64) -> Self {
        Self {
            alpha,
            min_cramers_v,
            min_correlation,
        }
    }

    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::new(config.alpha, config.min_cramers_v, config.min_correlation)
    }

    /// Run both gates. Returned column lists keep declaration order.
    pub fn select(
        &self,
        df: &DataFrame,
        nominal_columns: &[String],
        ordinal_columns: &[String],
        target: &str,
    ) -> Result<SelectionReport> {
        let report = SelectionReport {
            nominal: self.select_nominal(df, nominal_columns, target)?,
            ordinal: self.select_ordinal(df, ordinal_columns, target)?,
        };
        info!(
            nominal_kept = report.selected_nominal().len(),
            nominal_total = nominal_columns.len(),
            ordinal_kept = report.selected_ordinal().len(),
            ordinal_total = ordinal_columns.len(),
            "Feature selection finished"
        );
        Ok(report)
    }

    /// Chi-square independence + Cramér's V for each nominal column
    pub fn select_nominal(
        &self,
        df: &DataFrame,
        columns: &[String],
        target: &str,
    ) -> Result<Vec<FeatureScore>> {
        let target_values = data_loader::required_strings(df, target)?;
        let mut scores = Vec::with_capacity(columns.len());

        for col in columns {
            let values = data_loader::required_strings(df, col)?;
            let table = contingency_table(&values, &target_values);
            let test = stats::chi_square_independence(&table);
            let selected = test.p_value < self.alpha && test.cramers_v >= self.min_cramers_v;
            debug!(
                column = %col,
                chi2 = test.statistic,
                p_value = test.p_value,
                cramers_v = test.cramers_v,
                selected,
                "Chi-square test"
            );
            scores.push(FeatureScore {
                column: col.clone(),
                test: SelectionTest::ChiSquare,
                statistic: test.statistic,
                p_value: test.p_value,
                effect_size: test.cramers_v,
                selected,
            });
        }
        Ok(scores)
    }

    /// Spearman correlation of each grade-scale column with the encoded target
    pub fn select_ordinal(
        &self,
        df: &DataFrame,
        columns: &[String],
        target: &str,
    ) -> Result<Vec<FeatureScore>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let target_codes = grade_codes(target, &data_loader::required_strings(df, target)?)?;
        let mut scores = Vec::with_capacity(columns.len());

        for col in columns {
            let codes = grade_codes(col, &data_loader::required_strings(df, col)?)?;
            let score = match stats::spearman(&codes, &target_codes) {
                Some((rho, p_value)) => {
                    let selected = p_value < self.alpha && rho.abs() >= self.min_correlation;
                    FeatureScore {
                        column: col.clone(),
                        test: SelectionTest::Spearman,
                        statistic: rho,
                        p_value,
                        effect_size: rho.abs(),
                        selected,
                    }
                }
                None => {
                    warn!(column = %col, "Rank correlation undefined; column rejected");
                    FeatureScore {
                        column: col.clone(),
                        test: SelectionTest::Spearman,
                        statistic: f64::NAN,
                        p_value: 1.0,
                        effect_size: 0.0,
                        selected: false,
                    }
                }
            };
            debug!(
                column = %col,
                rho = score.statistic,
                p_value = score.p_value,
                selected = score.selected,
                "Spearman test"
            );
            scores.push(score);
        }
        Ok(scores)
    }

    /// Share of the most frequent value per column; warns at or above `threshold`
    pub fn check_dominance(
        df: &DataFrame,
        columns: &[String],
        threshold: f64,
    ) -> Result<Vec<(String, f64)>> {
        let n = df.height();
        let mut shares = Vec::with_capacity(columns.len());
        if n == 0 {
            return Ok(shares);
        }
        for col in columns {
            let mut counts: BTreeMap<Option<String>, usize> = BTreeMap::new();
            for v in data_loader::optional_strings(df, col)? {
                *counts.entry(v).or_default() += 1;
            }
            let top = counts.values().copied().max().unwrap_or(0);
            let share = top as f64 / n as f64;
            if share >= threshold {
                warn!(column = %col, share, "Column dominated by a single value");
            }
            shares.push((col.clone(), share));
        }
        Ok(shares)
    }
}

fn grade_codes(column: &str, values: &[String]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            Grade::from_label(v)
                .map(|g| g.code() as f64)
                .ok_or_else(|| GradecastError::UnseenCategory {
                    column: column.to_string(),
                    value: v.clone(),
                })
        })
        .collect()
}

/// Observed counts with rows = column levels, cols = target levels
fn contingency_table(values: &[String], target: &[String]) -> Vec<Vec<f64>> {
    let rows: BTreeMap<&str, usize> = index_levels(values);
    let cols: BTreeMap<&str, usize> = index_levels(target);
    let mut table = vec![vec![0.0; cols.len()]; rows.len()];
    for (v, t) in values.iter().zip(target) {
        table[rows[v.as_str()]][cols[t.as_str()]] += 1.0;
    }
    table
}

fn index_levels(values: &[String]) -> BTreeMap<&str, usize> {
    let mut levels: BTreeMap<&str, usize> = values.iter().map(|v| (v.as_str(), 0)).collect();
    for (i, idx) in levels.values_mut().enumerate() {
        *idx = i;
    }
    levels
}
