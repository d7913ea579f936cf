// Persisted analysis report
//
// serde_json writes non-finite floats as `null`; every statistic that can be
// non-finite carries its own `degenerate` flag, so the file stays valid JSON
// and readers can tell a sentinel from a missing value.

use super::comparative::{ComparativeAnalyzer, ComparativeReport};
use super::drift::{DriftMeasure, DriftMetric, DriftTable};
use super::information::{InformationAnalyzer, InformationReport};
use super::sensitivity::{SensitivityAnalyzer, SensitivityReport};
use super::Omission;
use crate::config::AnalysisSweep;
use crate::cost::now_ms;
use crate::embedding::EmbeddingConfig;
use crate::error::AnalysisError;
use crate::pipeline::Experiment;
use crate::stats::Summary;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::thread;
use tracing::{info, warn};

/// Drift summary for one noise level at the base embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub noise_level: u8,
    pub cosine_distance: Summary,
    pub text_similarity: Summary,
    pub word_overlap: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at_ms: u64,
    /// SHA-256 over the analysed texts, ordered by experiment id
    pub corpus_fingerprint: String,
    pub embedding: EmbeddingConfig,
    pub experiments_analyzed: usize,
    pub excluded_experiments: Vec<String>,
    pub drift_summary: Vec<LevelSummary>,
    pub metrics: Vec<DriftMetric>,
    pub sensitivity: Option<SensitivityReport>,
    pub comparative: Option<ComparativeReport>,
    pub information: Option<InformationReport>,
    /// Analysis steps that produced no report at all
    pub failures: Vec<Omission>,
}

impl AnalysisReport {
    /// Run every analyzer over `experiments`
    ///
    /// Never fails: a step that cannot run is recorded in `failures`.
    pub fn build(experiments: &BTreeMap<u8, Vec<Experiment>>, sweep: &AnalysisSweep) -> Self {
        let embedding = EmbeddingConfig::new(sweep.base_max_features, sweep.base_ngram_range);
        let mut failures = Vec::new();

        let (table, sensitivity, comparative, information) = thread::scope(|s| {
            let sensitivity =
                s.spawn(|| SensitivityAnalyzer::new(sweep.clone()).analyze(experiments));
            let comparative = s.spawn(|| {
                ComparativeAnalyzer::new(embedding, sweep.confidence_level).compare(experiments)
            });
            let information =
                s.spawn(|| InformationAnalyzer::new(sweep.confidence_level).analyze(experiments));
            let table = DriftTable::compute(experiments, &embedding);
            (table, join(sensitivity), join(comparative), join(information))
        });

        let table = table.unwrap_or_else(|err| {
            failures.push(Omission::new("drift_table", &err));
            DriftTable {
                config: embedding,
                metrics: Vec::new(),
                excluded: Vec::new(),
            }
        });
        let sensitivity = sensitivity
            .map_err(|err| failures.push(Omission::new("sensitivity", &err)))
            .ok();
        let comparative = comparative
            .map_err(|err| failures.push(Omission::new("comparative", &err)))
            .ok();
        let information = information
            .map_err(|err| failures.push(Omission::new("information", &err)))
            .ok();

        let drift_summary = level_summaries(&table);
        for failure in &failures {
            warn!(step = %failure.statistic, reason = %failure.reason, "analysis step failed");
        }
        info!(
            experiments = table.metrics.len(),
            excluded = table.excluded.len(),
            failures = failures.len(),
            "analysis report built"
        );

        Self {
            generated_at_ms: now_ms(),
            corpus_fingerprint: fingerprint(experiments),
            embedding,
            experiments_analyzed: table.metrics.len(),
            excluded_experiments: table.excluded,
            drift_summary,
            metrics: table.metrics,
            sensitivity,
            comparative,
            information,
            failures,
        }
    }

    /// True when every analysis step produced a report
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self.sensitivity.is_some()
            && self.comparative.is_some()
            && self.information.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, Result<T, AnalysisError>>) -> Result<T, AnalysisError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(AnalysisError::Numerical("analyzer thread panicked".into())))
}

fn level_summaries(table: &DriftTable) -> Vec<LevelSummary> {
    let per_measure: Vec<BTreeMap<u8, Vec<f64>>> =
        DriftMeasure::ALL.iter().map(|m| table.groups(*m)).collect();
    let [distance, similarity, overlap] = per_measure.as_slice() else {
        return Vec::new();
    };
    distance
        .iter()
        .filter_map(|(&level, values)| {
            Some(LevelSummary {
                noise_level: level,
                cosine_distance: Summary::from_slice(values).ok()?,
                text_similarity: Summary::from_slice(similarity.get(&level)?).ok()?,
                word_overlap: Summary::from_slice(overlap.get(&level)?).ok()?,
            })
        })
        .collect()
}

fn fingerprint(experiments: &BTreeMap<u8, Vec<Experiment>>) -> String {
    let mut ordered: Vec<&Experiment> = experiments.values().flatten().collect();
    ordered.sort_by_key(|e| (e.noise_level, e.repetition));
    let mut hasher = Sha256::new();
    for experiment in ordered {
        hasher.update(experiment.id().as_bytes());
        hasher.update([0u8]);
        hasher.update(experiment.original_text.as_bytes());
        hasher.update([0u8]);
        if let Some(text) = &experiment.final_text {
            hasher.update(text.as_bytes());
        }
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}
