// Per-experiment drift between the original text and the chain's final output
//
// One TF-IDF fit per table: the corpus is every distinct original text plus
// every final text, so all distances in a table share one vocabulary.
// Experiments without a final text are excluded and listed by id.

use crate::embedding::{EmbeddingConfig, EmbeddingEngine};
use crate::error::AnalysisError;
use crate::pipeline::Experiment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetric {
    pub noise_level: u8,
    pub repetition: u32,
    pub seed: u64,
    pub cosine_distance: f64,
    pub text_similarity: f64,
    pub word_overlap: f64,
}

/// The three drift measures reported per experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMeasure {
    CosineDistance,
    TextSimilarity,
    WordOverlap,
}

impl DriftMeasure {
    pub const ALL: [DriftMeasure; 3] = [
        DriftMeasure::CosineDistance,
        DriftMeasure::TextSimilarity,
        DriftMeasure::WordOverlap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftMeasure::CosineDistance => "cosine_distance",
            DriftMeasure::TextSimilarity => "text_similarity",
            DriftMeasure::WordOverlap => "word_overlap",
        }
    }

    pub fn value(&self, metric: &DriftMetric) -> f64 {
        match self {
            DriftMeasure::CosineDistance => metric.cosine_distance,
            DriftMeasure::TextSimilarity => metric.text_similarity,
            DriftMeasure::WordOverlap => metric.word_overlap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftTable {
    pub config: EmbeddingConfig,
    /// Ordered by noise level, then repetition
    pub metrics: Vec<DriftMetric>,
    /// Ids of experiments that produced no final text
    pub excluded: Vec<String>,
}

impl DriftTable {
    pub fn compute(
        experiments: &BTreeMap<u8, Vec<Experiment>>,
        config: &EmbeddingConfig,
    ) -> Result<Self, AnalysisError> {
        let engine = EmbeddingEngine::new();
        let mut excluded = Vec::new();
        let mut usable: Vec<(&Experiment, &str)> = Vec::new();
        for experiment in experiments.values().flatten() {
            match &experiment.final_text {
                Some(text) => usable.push((experiment, text.as_str())),
                None => excluded.push(experiment.id()),
            }
        }
        usable.sort_by_key(|(e, _)| (e.noise_level, e.repetition));

        // Distinct originals first, then one row per final text
        let mut original_rows: BTreeMap<&str, usize> = BTreeMap::new();
        let mut corpus: Vec<&str> = Vec::new();
        for (experiment, _) in &usable {
            let original = experiment.original_text.as_str();
            if !original_rows.contains_key(original) {
                original_rows.insert(original, corpus.len());
                corpus.push(original);
            }
        }
        let first_final = corpus.len();
        corpus.extend(usable.iter().map(|(_, text)| *text));

        let matrix = engine.embed(&corpus, config)?;
        let mut metrics = Vec::with_capacity(usable.len());
        for (i, (experiment, final_text)) in usable.iter().enumerate() {
            let original = experiment.original_text.as_str();
            let original_row = original_rows
                .get(original)
                .and_then(|&row| matrix.row(row))
                .ok_or_else(|| AnalysisError::Numerical("missing original embedding".into()))?;
            let final_row = matrix
                .row(first_final + i)
                .ok_or_else(|| AnalysisError::Numerical("missing final embedding".into()))?;

            metrics.push(DriftMetric {
                noise_level: experiment.noise_level,
                repetition: experiment.repetition,
                seed: experiment.seed,
                cosine_distance: engine.cosine_distance(original_row, final_row)?,
                text_similarity: engine.text_similarity(original, final_text),
                word_overlap: engine.word_overlap(original, final_text)?,
            });
        }

        Ok(Self {
            config: *config,
            metrics,
            excluded,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Values of `measure` grouped by noise level
    pub fn groups(&self, measure: DriftMeasure) -> BTreeMap<u8, Vec<f64>> {
        let mut groups: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
        for metric in &self.metrics {
            groups
                .entry(metric.noise_level)
                .or_default()
                .push(measure.value(metric));
        }
        groups
    }

    /// `(noise level, value)` columns over every metric
    pub fn columns(&self, measure: DriftMeasure) -> (Vec<f64>, Vec<f64>) {
        self.metrics
            .iter()
            .map(|m| (f64::from(m.noise_level), measure.value(m)))
            .unzip()
    }
}
