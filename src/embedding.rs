//! TF-IDF embeddings and text distance metrics
//!
//! Vectors are fitted jointly over the corpus of one [`EmbeddingEngine::embed`]
//! call. Vectors from different calls live in different vocabularies and must
//! never be compared with each other.
//!
//! Weighting is aprender's smooth-idf TF-IDF,
//! `tfidf(t, d) = count(t, d) * (ln((1 + n) / (1 + df(t))) + 1)`, with rows
//! L2-normalised afterwards.

use crate::error::AnalysisError;
use aprender::text::similarity::jaccard_similarity;
use aprender::text::vectorize::TfidfVectorizer;
use aprender::text::Tokenizer;
use aprender::AprenderError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use trueno::Vector;

const TOKEN_PATTERN: &str = r"\b\w\w+\b";

/// Vectoriser parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub max_features: usize,
    /// Inclusive `(min_n, max_n)`
    pub ngram_range: (usize, usize),
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            ngram_range: (1, 3),
        }
    }
}

impl EmbeddingConfig {
    pub fn new(max_features: usize, ngram_range: (usize, usize)) -> Self {
        Self {
            max_features,
            ngram_range,
        }
    }

    pub fn label(&self) -> String {
        format!("({},{})", self.ngram_range.0, self.ngram_range.1)
    }
}

/// Dense TF-IDF matrix, one row per input document
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    /// Column terms, most frequent first; n-gram words are joined with `_`
    pub vocabulary: Vec<String>,
    pub rows: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    fn empty(documents: usize) -> Self {
        Self {
            vocabulary: Vec::new(),
            rows: vec![Vec::new(); documents],
        }
    }

    pub fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        self.rows.get(index).map(Vec::as_slice)
    }
}

/// Lowercased tokens of at least two word characters
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pattern: Regex,
}

impl WordTokenizer {
    pub fn new() -> Result<Self, AnalysisError> {
        let pattern = Regex::new(TOKEN_PATTERN)
            .map_err(|e| AnalysisError::Numerical(format!("token pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    pub fn words(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, AprenderError> {
        Ok(self.words(text))
    }
}

/// Stateless TF-IDF vectoriser and metric provider
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingEngine;

impl EmbeddingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Fit TF-IDF over `corpus` and return one L2-normalised row per document
    ///
    /// The vocabulary keeps the `max_features` terms with the highest corpus
    /// frequency, ties broken alphabetically. A document with no known terms
    /// gets an all-zero row; a corpus with no terms at all gets empty rows.
    pub fn embed<S: AsRef<str>>(
        &self,
        corpus: &[S],
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingMatrix, AnalysisError> {
        if corpus.is_empty() {
            return Ok(EmbeddingMatrix::empty(0));
        }
        let min_n = config.ngram_range.0.max(1);
        let max_n = config.ngram_range.1.max(min_n);
        let mut vectorizer = TfidfVectorizer::new()
            .with_tokenizer(Box::new(WordTokenizer::new()?))
            .with_ngram_range(min_n, max_n)
            .with_max_features(config.max_features);
        vectorizer.fit(corpus).map_err(numerical)?;

        let dimension = vectorizer.vocabulary_size();
        if dimension == 0 {
            return Ok(EmbeddingMatrix::empty(corpus.len()));
        }
        let weights = vectorizer.transform(corpus).map_err(numerical)?;

        let mut vocabulary = vec![String::new(); dimension];
        for (term, &index) in vectorizer.vocabulary() {
            if let Some(slot) = vocabulary.get_mut(index) {
                slot.clone_from(term);
            }
        }

        let rows = (0..weights.n_rows())
            .map(|r| {
                let mut row: Vec<f64> = (0..weights.n_cols()).map(|c| weights.get(r, c)).collect();
                let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    row.iter_mut().for_each(|v| *v /= norm);
                }
                row.into_iter().map(|v| v as f32).collect()
            })
            .collect();

        Ok(EmbeddingMatrix { vocabulary, rows })
    }

    /// `1 - cos(a, b)` clamped to `[0, 2]`
    ///
    /// Identical vectors (including two zero vectors) give exactly 0; exactly
    /// one zero vector gives 1.
    pub fn cosine_distance(&self, a: &[f32], b: &[f32]) -> Result<f64, AnalysisError> {
        if a.len() != b.len() {
            return Err(AnalysisError::DimensionMismatch {
                left: a.len(),
                right: b.len(),
            });
        }
        if a == b {
            return Ok(0.0);
        }

        let va = Vector::from_slice(a);
        let vb = Vector::from_slice(b);
        let dot = f64::from(va.dot(&vb).map_err(numerical)?);
        let norm_a = f64::from(va.dot(&va).map_err(numerical)?).sqrt();
        let norm_b = f64::from(vb.dot(&vb).map_err(numerical)?).sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(1.0);
        }
        let distance = 1.0 - dot / (norm_a * norm_b);
        if !distance.is_finite() {
            return Err(AnalysisError::Numerical("non-finite cosine distance".into()));
        }
        Ok(distance.clamp(0.0, 2.0))
    }

    /// `2 * LCS / (|a| + |b|)` over codepoints; 1.0 only for identical strings
    pub fn text_similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        2.0 * lcs_len(&a, &b) as f64 / total as f64
    }

    /// Jaccard index of lowercase whitespace-separated word sets
    pub fn word_overlap(&self, a: &str, b: &str) -> Result<f64, AnalysisError> {
        let words = |s: &str| -> Vec<String> { s.split_whitespace().map(str::to_lowercase).collect() };
        jaccard_similarity(&words(a), &words(b)).map_err(numerical)
    }
}

fn numerical<E: std::fmt::Display>(err: E) -> AnalysisError {
    AnalysisError::Numerical(err.to_string())
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];
    for &x in long {
        for (j, &y) in short.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}
