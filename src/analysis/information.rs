// Information-theoretic view of drift
//
// Word distributions come from lowercase whitespace splitting, the same words
// `word_overlap` compares. Divergences smooth both distributions over the
// shared vocabulary with additive SMOOTHING_ALPHA and use natural logarithms;
// entropies are in bits.

use super::{or_omit, Omission};
use crate::error::AnalysisError;
use crate::pipeline::Experiment;
use crate::stats::{spearman, CorrelationResult, Summary};
use aprender::loss::kl_divergence;
use aprender::primitives::Vector;
use aprender::text::similarity::jaccard_similarity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const SMOOTHING_ALPHA: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyProfile {
    pub word_entropy: f64,
    pub char_entropy: f64,
    /// Word entropy over `log2(distinct words)`; 0 with fewer than two distinct words
    pub normalized_entropy: f64,
    pub redundancy: f64,
}

impl EntropyProfile {
    pub fn of(text: &str) -> Self {
        let words = word_counts(text);
        let word_entropy = entropy_bits(words.values().copied());

        let mut chars: BTreeMap<char, usize> = BTreeMap::new();
        for c in text.to_lowercase().chars() {
            *chars.entry(c).or_insert(0) += 1;
        }
        let char_entropy = entropy_bits(chars.values().copied());

        let max_entropy = (words.len() as f64).log2();
        let normalized_entropy = if words.len() > 1 {
            (word_entropy / max_entropy).min(1.0)
        } else {
            0.0
        };

        Self {
            word_entropy,
            char_entropy,
            normalized_entropy,
            redundancy: 1.0 - normalized_entropy,
        }
    }
}

/// Distribution shift from an original to an output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    /// `D(P || Q)`, P the original
    pub kl_divergence: f64,
    pub reverse_kl: f64,
    /// Bounded by `ln 2`
    pub jensen_shannon: f64,
    pub total_variation: f64,
}

impl Divergence {
    pub fn between(original: &str, output: &str) -> Self {
        let p_counts = word_counts(original);
        let q_counts = word_counts(output);
        let vocabulary: BTreeSet<&str> = p_counts
            .keys()
            .chain(q_counts.keys())
            .map(String::as_str)
            .collect();
        if vocabulary.is_empty() {
            return Self {
                kl_divergence: 0.0,
                reverse_kl: 0.0,
                jensen_shannon: 0.0,
                total_variation: 0.0,
            };
        }

        let p = smoothed(&p_counts, &vocabulary);
        let q = smoothed(&q_counts, &vocabulary);
        let m: Vec<f64> = p.iter().zip(&q).map(|(a, b)| 0.5 * (a + b)).collect();

        Self {
            kl_divergence: kl(&p, &q),
            reverse_kl: kl(&q, &p),
            jensen_shannon: 0.5 * kl(&p, &m) + 0.5 * kl(&q, &m),
            total_variation: 0.5 * p.iter().zip(&q).map(|(a, b)| (a - b).abs()).sum::<f64>(),
        }
    }
}

/// Overlap-based estimate of the information an output shares with its original
///
/// The joint entropy is approximated as `H(X) + H(Y) * (1 - J)` with `J` the
/// Jaccard index of the two word sets, so `I(X;Y) = H(Y) * J`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharedInformation {
    pub mutual_information: f64,
    /// `I / sqrt(H(X) H(Y))` capped at 1; the Jaccard index when either entropy is 0
    pub normalized_mi: f64,
    /// `H(X) - I`, floored at 0
    pub information_loss: f64,
}

impl SharedInformation {
    pub fn between(original: &str, output: &str) -> Result<Self, AnalysisError> {
        let words = |s: &str| -> Vec<String> { s.split_whitespace().map(str::to_lowercase).collect() };
        let overlap = jaccard_similarity(&words(original), &words(output))
            .map_err(|e| AnalysisError::Numerical(e.to_string()))?;
        let h_x = EntropyProfile::of(original).word_entropy;
        let h_y = EntropyProfile::of(output).word_entropy;

        let mutual_information = h_y * overlap;
        let normalized_mi = if h_x > 0.0 && h_y > 0.0 {
            (mutual_information / (h_x * h_y).sqrt()).min(1.0)
        } else {
            overlap
        };
        Ok(Self {
            mutual_information,
            normalized_mi,
            information_loss: (h_x - mutual_information).max(0.0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationMetric {
    pub noise_level: u8,
    pub repetition: u32,
    pub output: EntropyProfile,
    pub divergence: Divergence,
    pub shared: SharedInformation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationLevel {
    pub noise_level: u8,
    pub word_entropy: Summary,
    pub kl_divergence: Summary,
    pub jensen_shannon: Summary,
    pub normalized_mi: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationReport {
    /// Entropy of the first analysed original; batches share one original text
    pub original: EntropyProfile,
    pub metrics: Vec<InformationMetric>,
    pub levels: Vec<InformationLevel>,
    /// Spearman of Jensen-Shannon divergence over noise level
    pub jensen_shannon_trend: Option<CorrelationResult>,
    /// Spearman of normalised mutual information over noise level
    pub mutual_information_trend: Option<CorrelationResult>,
    pub omitted: Vec<Omission>,
}

pub struct InformationAnalyzer {
    confidence_level: f64,
}

impl Default for InformationAnalyzer {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl InformationAnalyzer {
    pub fn new(confidence_level: f64) -> Self {
        Self { confidence_level }
    }

    /// Entropy, divergence and shared information of every completed experiment
    pub fn analyze(
        &self,
        experiments: &BTreeMap<u8, Vec<Experiment>>,
    ) -> Result<InformationReport, AnalysisError> {
        let mut usable: Vec<(&Experiment, &str)> = experiments
            .values()
            .flatten()
            .filter_map(|e| e.final_text.as_deref().map(|text| (e, text)))
            .collect();
        usable.sort_by_key(|(e, _)| (e.noise_level, e.repetition));
        let Some((first, _)) = usable.first() else {
            return Err(AnalysisError::insufficient(
                "information analysis needs at least one completed experiment",
            ));
        };
        let original = EntropyProfile::of(&first.original_text);

        let mut metrics = Vec::with_capacity(usable.len());
        for (experiment, output) in &usable {
            metrics.push(InformationMetric {
                noise_level: experiment.noise_level,
                repetition: experiment.repetition,
                output: EntropyProfile::of(output),
                divergence: Divergence::between(&experiment.original_text, output),
                shared: SharedInformation::between(&experiment.original_text, output)?,
            });
        }

        let mut omitted = Vec::new();
        let levels = level_summaries(&metrics, &mut omitted);

        let noise: Vec<f64> = metrics.iter().map(|m| f64::from(m.noise_level)).collect();
        let js: Vec<f64> = metrics.iter().map(|m| m.divergence.jensen_shannon).collect();
        let nmi: Vec<f64> = metrics.iter().map(|m| m.shared.normalized_mi).collect();
        let jensen_shannon_trend = or_omit(&mut omitted, "jensen_shannon trend", || {
            spearman(&noise, &js, self.confidence_level)
        });
        let mutual_information_trend = or_omit(&mut omitted, "normalized_mi trend", || {
            spearman(&noise, &nmi, self.confidence_level)
        });

        debug!(
            experiments = metrics.len(),
            levels = levels.len(),
            omitted = omitted.len(),
            "information analysis complete"
        );
        Ok(InformationReport {
            original,
            metrics,
            levels,
            jensen_shannon_trend,
            mutual_information_trend,
            omitted,
        })
    }
}

fn level_summaries(metrics: &[InformationMetric], omitted: &mut Vec<Omission>) -> Vec<InformationLevel> {
    let mut by_level: BTreeMap<u8, Vec<&InformationMetric>> = BTreeMap::new();
    for metric in metrics {
        by_level.entry(metric.noise_level).or_default().push(metric);
    }
    by_level
        .into_iter()
        .filter_map(|(level, group)| {
            let column = |f: fn(&InformationMetric) -> f64| -> Vec<f64> {
                group.iter().map(|m| f(m)).collect()
            };
            or_omit(omitted, format!("information summary noise_{}", level), || {
                Ok(InformationLevel {
                    noise_level: level,
                    word_entropy: Summary::from_slice(&column(|m| m.output.word_entropy))?,
                    kl_divergence: Summary::from_slice(&column(|m| m.divergence.kl_divergence))?,
                    jensen_shannon: Summary::from_slice(&column(|m| m.divergence.jensen_shannon))?,
                    normalized_mi: Summary::from_slice(&column(|m| m.shared.normalized_mi))?,
                })
            })
        })
        .collect()
}

fn word_counts(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for word in text.split_whitespace() {
        *counts.entry(word.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

fn entropy_bits(counts: impl Iterator<Item = usize>) -> f64 {
    let counts: Vec<usize> = counts.filter(|&c| c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total as f64;
            p * (1.0 / p).log2()
        })
        .sum()
}

fn smoothed(counts: &BTreeMap<String, usize>, vocabulary: &BTreeSet<&str>) -> Vec<f64> {
    let total: usize = counts.values().sum();
    let denominator = total as f64 + SMOOTHING_ALPHA * vocabulary.len() as f64;
    vocabulary
        .iter()
        .map(|&w| (counts.get(w).copied().unwrap_or(0) as f64 + SMOOTHING_ALPHA) / denominator)
        .collect()
}

fn kl(p: &[f64], q: &[f64]) -> f64 {
    let to_f32 = |xs: &[f64]| -> Vec<f32> { xs.iter().map(|&x| x as f32).collect() };
    let divergence = f64::from(kl_divergence(
        &Vector::from_slice(&to_f32(p)),
        &Vector::from_slice(&to_f32(q)),
    ));
    divergence.max(0.0)
}
