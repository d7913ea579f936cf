// Pairwise and omnibus comparisons across noise-level groups
//
// Group comparisons (pairwise tests, diagnostics, regressions) use cosine
// distance; correlations are reported for all three drift measures.

use super::drift::{DriftMeasure, DriftTable};
use super::{or_omit, Omission};
use crate::embedding::EmbeddingConfig;
use crate::error::AnalysisError;
use crate::pipeline::Experiment;
use crate::stats::{
    bartlett, cliffs_delta, kendall_tau_b, kruskal_wallis, levene, mann_whitney_u, pearson,
    polyfit, shapiro_wilk, spearman, welch_t_test, CorrectionMethod, CorrelationResult,
    MannWhitneyMethod, RegressionFit, TestResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Smallest group size the comparative analysis accepts
pub const MIN_GROUP_SIZE: usize = 3;

/// One pair of noise levels under one correction method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub group_a: u8,
    pub group_b: u8,
    /// Mann-Whitney U of `group_a`
    pub statistic: f64,
    pub raw_p: f64,
    pub corrected_p: f64,
    pub correction_method: CorrectionMethod,
    /// Cliff's delta of `group_a` against `group_b`
    pub effect_size: f64,
    pub method: MannWhitneyMethod,
    pub welch_t: Option<f64>,
    pub welch_p: Option<f64>,
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub metric: DriftMeasure,
    #[serde(flatten)]
    pub result: CorrelationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalityCheck {
    pub noise_level: u8,
    pub w_statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub normality: Vec<NormalityCheck>,
    pub levene: Option<TestResult>,
    pub bartlett: Option<TestResult>,
    pub kruskal_wallis: Option<TestResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeReport {
    pub pairwise_comparisons: Vec<PairwiseComparison>,
    pub correlations: Vec<CorrelationEntry>,
    pub regressions: Vec<RegressionFit>,
    pub diagnostics: Diagnostics,
    pub omitted: Vec<Omission>,
}

impl ComparativeReport {
    pub fn pairwise_for(&self, method: CorrectionMethod) -> impl Iterator<Item = &PairwiseComparison> {
        self.pairwise_comparisons
            .iter()
            .filter(move |c| c.correction_method == method)
    }
}

struct PairTest {
    group_a: u8,
    group_b: u8,
    u: f64,
    p: f64,
    method: MannWhitneyMethod,
    delta: f64,
    welch: Option<TestResult>,
    degenerate: bool,
}

pub struct ComparativeAnalyzer {
    embedding: EmbeddingConfig,
    confidence_level: f64,
}

impl Default for ComparativeAnalyzer {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default(), 0.95)
    }
}

impl ComparativeAnalyzer {
    pub fn new(embedding: EmbeddingConfig, confidence_level: f64) -> Self {
        Self {
            embedding,
            confidence_level,
        }
    }

    pub fn compare(
        &self,
        experiments: &BTreeMap<u8, Vec<Experiment>>,
    ) -> Result<ComparativeReport, AnalysisError> {
        let table = DriftTable::compute(experiments, &self.embedding)?;
        self.compare_table(&table)
    }

    /// Requires at least two noise levels with [`MIN_GROUP_SIZE`] metrics each
    pub fn compare_table(&self, table: &DriftTable) -> Result<ComparativeReport, AnalysisError> {
        let groups = table.groups(DriftMeasure::CosineDistance);
        if groups.len() < 2 {
            return Err(AnalysisError::insufficient(format!(
                "comparison needs at least 2 noise levels, got {}",
                groups.len()
            )));
        }
        if let Some((level, values)) = groups.iter().find(|(_, v)| v.len() < MIN_GROUP_SIZE) {
            return Err(AnalysisError::insufficient(format!(
                "noise level {} has {} observations, need at least {}",
                level,
                values.len(),
                MIN_GROUP_SIZE
            )));
        }

        let mut omitted = Vec::new();
        let pairwise_comparisons = self.pairwise(&groups, &mut omitted);
        let correlations = self.correlations(table, &mut omitted);

        let (levels, distances) = table.columns(DriftMeasure::CosineDistance);
        let regressions: Vec<RegressionFit> = (1..=3)
            .filter_map(|degree| {
                or_omit(&mut omitted, format!("regression degree {}", degree), || {
                    polyfit(&levels, &distances, degree)
                })
            })
            .collect();

        let diagnostics = Self::diagnostics(&groups, &mut omitted);

        debug!(
            pairs = pairwise_comparisons.len(),
            omitted = omitted.len(),
            "comparative analysis complete"
        );
        Ok(ComparativeReport {
            pairwise_comparisons,
            correlations,
            regressions,
            diagnostics,
            omitted,
        })
    }

    fn pairwise(
        &self,
        groups: &BTreeMap<u8, Vec<f64>>,
        omitted: &mut Vec<Omission>,
    ) -> Vec<PairwiseComparison> {
        let entries: Vec<(&u8, &Vec<f64>)> = groups.iter().collect();
        let mut tests = Vec::new();
        for (i, &(&level_a, a)) in entries.iter().enumerate() {
            for &(&level_b, b) in &entries[i + 1..] {
                let pair = format!("{} vs {}", level_a, level_b);
                let Some(mw) = or_omit(omitted, format!("mann_whitney {}", pair), || {
                    mann_whitney_u(a, b)
                }) else {
                    continue;
                };
                let Some(delta) = or_omit(omitted, format!("cliffs_delta {}", pair), || {
                    cliffs_delta(a, b)
                }) else {
                    continue;
                };
                let welch = or_omit(omitted, format!("welch {}", pair), || welch_t_test(a, b));
                tests.push(PairTest {
                    group_a: level_a,
                    group_b: level_b,
                    u: mw.u_statistic,
                    p: mw.p_value,
                    method: mw.method,
                    delta,
                    welch,
                    degenerate: mw.degenerate,
                });
            }
        }

        let raw: Vec<f64> = tests.iter().map(|t| t.p).collect();
        let mut rows = Vec::with_capacity(tests.len() * CorrectionMethod::ALL.len());
        for method in CorrectionMethod::ALL {
            let corrected = method.apply(&raw);
            for (test, corrected_p) in tests.iter().zip(corrected) {
                rows.push(PairwiseComparison {
                    group_a: test.group_a,
                    group_b: test.group_b,
                    statistic: test.u,
                    raw_p: test.p,
                    corrected_p,
                    correction_method: method,
                    effect_size: test.delta,
                    method: test.method,
                    welch_t: test.welch.map(|w| w.statistic),
                    welch_p: test.welch.map(|w| w.p_value),
                    degenerate: test.degenerate,
                });
            }
        }
        rows
    }

    fn correlations(&self, table: &DriftTable, omitted: &mut Vec<Omission>) -> Vec<CorrelationEntry> {
        let mut entries = Vec::new();
        for measure in DriftMeasure::ALL {
            let (levels, values) = table.columns(measure);
            let name = measure.as_str();
            let results = [
                or_omit(omitted, format!("pearson {}", name), || {
                    pearson(&levels, &values, self.confidence_level)
                }),
                or_omit(omitted, format!("spearman {}", name), || {
                    spearman(&levels, &values, self.confidence_level)
                }),
                or_omit(omitted, format!("kendall {}", name), || {
                    kendall_tau_b(&levels, &values)
                }),
            ];
            entries.extend(results.into_iter().flatten().map(|result| CorrelationEntry {
                metric: measure,
                result,
            }));
        }
        entries
    }

    fn diagnostics(groups: &BTreeMap<u8, Vec<f64>>, omitted: &mut Vec<Omission>) -> Diagnostics {
        let normality = groups
            .iter()
            .filter_map(|(&level, values)| {
                or_omit(omitted, format!("shapiro_wilk noise_{}", level), || {
                    shapiro_wilk(values)
                })
                .map(|result| NormalityCheck {
                    noise_level: level,
                    w_statistic: result.statistic,
                    p_value: result.p_value,
                })
            })
            .collect();

        let refs: Vec<&[f64]> = groups.values().map(Vec::as_slice).collect();
        Diagnostics {
            normality,
            levene: or_omit(omitted, "levene", || levene(&refs)),
            bartlett: or_omit(omitted, "bartlett", || bartlett(&refs)),
            kruskal_wallis: or_omit(omitted, "kruskal_wallis", || kruskal_wallis(&refs)),
        }
    }
}
