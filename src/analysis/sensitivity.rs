// Sensitivity of measured drift to the analysis parameters
//
// Every sweep configuration refits TF-IDF from scratch (see DriftTable), so
// distances are only compared within one configuration. Cross-configuration
// conclusions use per-configuration summaries: the Spearman trend of mean
// distance over max_features, and a one-way ANOVA over the n-gram
// configurations' distance vectors.

use super::drift::{DriftMeasure, DriftTable};
use super::{or_omit, Omission};
use crate::config::AnalysisSweep;
use crate::embedding::EmbeddingConfig;
use crate::error::AnalysisError;
use crate::pipeline::Experiment;
use crate::stats::{
    anova_oneway, bootstrap_mean, cohens_d, mean, spearman, t_interval, AnovaResult,
    BootstrapResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One row of the flattened sensitivity report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityResult {
    pub parameter_name: String,
    pub parameter_value: String,
    pub statistic: f64,
    pub confidence_interval: Option<(f64, f64)>,
    pub p_value: Option<f64>,
    pub effect_size: Option<f64>,
    pub degenerate: bool,
}

impl SensitivityResult {
    fn new(name: &str, value: impl Into<String>, statistic: f64) -> Self {
        Self {
            parameter_name: name.to_string(),
            parameter_value: value.into(),
            statistic,
            confidence_interval: None,
            p_value: None,
            effect_size: None,
            degenerate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapGroup {
    /// `noise_<level>` or `pooled`
    pub group: String,
    pub result: BootstrapResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub results: Vec<SensitivityResult>,
    pub bootstrap: Vec<BootstrapGroup>,
    /// Across noise-level groups at the base configuration
    pub anova: Option<AnovaResult>,
    /// Across n-gram configurations
    pub ngram_anova: Option<AnovaResult>,
    pub omitted: Vec<Omission>,
}

impl SensitivityReport {
    pub fn find(&self, parameter_name: &str, parameter_value: &str) -> Option<&SensitivityResult> {
        self.results
            .iter()
            .find(|r| r.parameter_name == parameter_name && r.parameter_value == parameter_value)
    }
}

pub struct SensitivityAnalyzer {
    sweep: AnalysisSweep,
}

impl SensitivityAnalyzer {
    pub fn new(sweep: AnalysisSweep) -> Self {
        Self { sweep }
    }

    fn base_config(&self) -> EmbeddingConfig {
        EmbeddingConfig::new(self.sweep.base_max_features, self.sweep.base_ngram_range)
    }

    /// Full sensitivity report over experiments grouped by noise level
    ///
    /// Fails only when no experiment has a final text; individual statistics
    /// that cannot be computed are listed in `omitted`.
    pub fn analyze(
        &self,
        experiments: &BTreeMap<u8, Vec<Experiment>>,
    ) -> Result<SensitivityReport, AnalysisError> {
        let base = DriftTable::compute(experiments, &self.base_config())?;
        if base.is_empty() {
            return Err(AnalysisError::insufficient(
                "no experiment produced a final text",
            ));
        }

        let mut omitted = Vec::new();
        let mut results = Vec::new();

        // Dimension sweep
        let mut dims = Vec::new();
        let mut dim_means = Vec::new();
        for &max_features in &self.sweep.dimensions {
            let config = EmbeddingConfig::new(max_features, self.sweep.base_ngram_range);
            let label = max_features.to_string();
            let Some(table) = or_omit(&mut omitted, format!("max_features={}", label), || {
                DriftTable::compute(experiments, &config)
            }) else {
                continue;
            };
            let row = self.configuration_row("max_features", &label, &table, &mut omitted);
            dims.push(max_features as f64);
            dim_means.push(row.statistic);
            results.push(row);
        }
        if let Some(trend) = or_omit(&mut omitted, "max_features trend", || {
            spearman(&dims, &dim_means, self.sweep.confidence_level)
        }) {
            let mut row = SensitivityResult::new("max_features_trend", "spearman", trend.coefficient);
            row.confidence_interval = trend.confidence_interval;
            row.p_value = Some(trend.p_value);
            row.degenerate = trend.degenerate;
            results.push(row);
        }

        // N-gram sweep
        let mut ngram_vectors: Vec<Vec<f64>> = Vec::new();
        for &range in &self.sweep.ngram_ranges {
            let config = EmbeddingConfig::new(self.sweep.base_max_features, range);
            let label = config.label();
            let Some(table) = or_omit(&mut omitted, format!("ngram_range={}", label), || {
                DriftTable::compute(experiments, &config)
            }) else {
                continue;
            };
            results.push(self.configuration_row("ngram_range", &label, &table, &mut omitted));
            ngram_vectors.push(table.columns(DriftMeasure::CosineDistance).1);
        }
        let ngram_refs: Vec<&[f64]> = ngram_vectors.iter().map(Vec::as_slice).collect();
        let ngram_anova = or_omit(&mut omitted, "ngram_range anova", || anova_oneway(&ngram_refs));
        if let Some(anova) = &ngram_anova {
            results.push(anova_row("ngram_range_anova", "all", anova));
        }

        // Bootstrap per noise level and pooled
        let groups = base.groups(DriftMeasure::CosineDistance);
        let mut bootstrap = Vec::new();
        let pooled: Vec<f64> = base.columns(DriftMeasure::CosineDistance).1;
        let labelled = groups
            .iter()
            .map(|(level, values)| (format!("noise_{}", level), values.as_slice()))
            .chain(std::iter::once(("pooled".to_string(), pooled.as_slice())));
        for (group, values) in labelled {
            if let Some(result) = or_omit(&mut omitted, format!("bootstrap {}", group), || {
                bootstrap_mean(
                    values,
                    self.sweep.bootstrap_iterations,
                    self.sweep.bootstrap_seed,
                    self.sweep.confidence_level,
                )
            }) {
                let mut row = SensitivityResult::new("bootstrap", group.clone(), result.sample_mean);
                row.confidence_interval = Some((result.ci_low, result.ci_high));
                row.degenerate = result.standard_error == 0.0;
                results.push(row);
                bootstrap.push(BootstrapGroup { group, result });
            }
        }

        // ANOVA and effect size across noise levels
        let anova = or_omit(&mut omitted, "noise_level anova", || {
            Self::anova_across_levels(&base)
        });
        if let Some(anova) = &anova {
            results.push(anova_row("anova", "noise_level", anova));
        }
        if let (Some((lo, low)), Some((hi, high))) = (groups.first_key_value(), groups.last_key_value()) {
            let label = format!("{}_vs_{}", lo, hi);
            if let Some(d) = or_omit(&mut omitted, format!("cohens_d {}", label), || {
                if lo == hi {
                    return Err(AnalysisError::insufficient("only one noise level"));
                }
                cohens_d(low, high)
            }) {
                let mut row = SensitivityResult::new("cohens_d", label, d.value);
                row.effect_size = Some(d.value);
                row.degenerate = d.degenerate;
                results.push(row);
            }
        }

        debug!(
            results = results.len(),
            omitted = omitted.len(),
            "sensitivity analysis complete"
        );
        Ok(SensitivityReport {
            results,
            bootstrap,
            anova,
            ngram_anova,
            omitted,
        })
    }

    /// One-way ANOVA of cosine distance across noise-level groups
    pub fn anova_across_levels(table: &DriftTable) -> Result<AnovaResult, AnalysisError> {
        let groups = table.groups(DriftMeasure::CosineDistance);
        let refs: Vec<&[f64]> = groups.values().map(Vec::as_slice).collect();
        anova_oneway(&refs)
    }

    /// Mean distance with t-interval, Spearman p of level vs distance, and
    /// Cohen's d between the lowest and highest noise level
    fn configuration_row(
        &self,
        name: &str,
        label: &str,
        table: &DriftTable,
        omitted: &mut Vec<Omission>,
    ) -> SensitivityResult {
        let (levels, distances) = table.columns(DriftMeasure::CosineDistance);
        let statistic = format!("{}={}", name, label);
        let mut row = SensitivityResult::new(name, label, mean(&distances));

        row.confidence_interval = or_omit(omitted, format!("{} interval", statistic), || {
            t_interval(&distances, self.sweep.confidence_level)
        });
        if let Some(corr) = or_omit(omitted, format!("{} spearman", statistic), || {
            spearman(&levels, &distances, self.sweep.confidence_level)
        }) {
            row.p_value = Some(corr.p_value);
            row.degenerate |= corr.degenerate;
        }

        let groups = table.groups(DriftMeasure::CosineDistance);
        if let (Some((lo, low)), Some((hi, high))) = (groups.first_key_value(), groups.last_key_value()) {
            if lo != hi {
                if let Some(d) = or_omit(omitted, format!("{} cohens_d", statistic), || {
                    cohens_d(low, high)
                }) {
                    row.effect_size = Some(d.value);
                    row.degenerate |= d.degenerate;
                }
            }
        }
        row
    }
}

fn anova_row(name: &str, value: &str, anova: &AnovaResult) -> SensitivityResult {
    let mut row = SensitivityResult::new(name, value, anova.f_statistic);
    row.p_value = Some(anova.p_value);
    row.effect_size = Some(anova.eta_squared);
    row.degenerate = anova.degenerate;
    row
}
