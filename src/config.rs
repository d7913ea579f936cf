//! Experiment configuration (`semdrift.toml`)
//!
//! Every field has a default, so an empty file (or no file at all) reproduces
//! the reference experiment: three chained translation skills, noise levels
//! 0 to 50, three repetitions per level.
//!
//! ```toml
//! original_text = "The quick brown fox jumps over the lazy dog."
//! noise_levels = [0, 25, 50]
//! repetitions = 5
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 250
//! ```

use crate::error::InputError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ORIGINAL_TEXT: &str = "The artificial intelligence system can efficiently process natural language and understand complex semantic relationships within textual data.";

pub const DEFAULT_NOISE_LEVELS: [u8; 7] = [0, 10, 20, 25, 30, 40, 50];

pub const DEFAULT_SKILLS: [&str; 3] = [
    "english-to-french-translator",
    "french-to-hebrew-translator",
    "hebrew-to-english-translator",
];

/// Bounded retry policy for one stage call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout; an attempt exceeding it counts as transient
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            attempt_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, after `attempt` failures (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Zero delays, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            attempt_timeout_ms: 5_000,
        }
    }
}

/// Token pricing in USD per million tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Enumerated parameter sweep for the sensitivity analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSweep {
    pub dimensions: Vec<usize>,
    pub ngram_ranges: Vec<(usize, usize)>,
    pub bootstrap_iterations: usize,
    pub bootstrap_seed: u64,
    pub confidence_level: f64,
    /// Configuration used for the per-experiment drift table
    pub base_max_features: usize,
    pub base_ngram_range: (usize, usize),
}

impl Default for AnalysisSweep {
    fn default() -> Self {
        Self {
            dimensions: vec![100, 250, 500, 1000, 2000, 5000],
            ngram_ranges: vec![(1, 1), (1, 2), (1, 3), (1, 4), (2, 3), (2, 4)],
            bootstrap_iterations: 10_000,
            bootstrap_seed: 42,
            confidence_level: 0.95,
            base_max_features: 1000,
            base_ngram_range: (1, 3),
        }
    }
}

/// Which transformation backend a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Output equals input; dry runs
    #[default]
    Passthrough,
    /// External program, see [`crate::service::CommandService`]
    Command,
}

/// Full experiment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub original_text: String,
    pub noise_levels: Vec<u8>,
    pub repetitions: u32,
    pub seed: u64,
    pub skills: Vec<String>,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub service: ServiceKind,
    /// Program and leading arguments for [`ServiceKind::Command`]
    pub service_command: Vec<String>,
    pub retry: RetryPolicy,
    pub pricing: Pricing,
    pub analysis: AnalysisSweep,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            original_text: DEFAULT_ORIGINAL_TEXT.to_string(),
            noise_levels: DEFAULT_NOISE_LEVELS.to_vec(),
            repetitions: 3,
            seed: 42,
            skills: DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect(),
            output_dir: PathBuf::from("results"),
            workers: 4,
            queue_capacity: 16,
            service: ServiceKind::default(),
            service_command: Vec::new(),
            retry: RetryPolicy::default(),
            pricing: Pricing::default(),
            analysis: AnalysisSweep::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ExperimentConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn with_original_text(mut self, text: impl Into<String>) -> Self {
        self.original_text = text.into();
        self
    }

    pub fn with_noise_levels(mut self, levels: Vec<u8>) -> Self {
        self.noise_levels = levels;
        self
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_skills<S: Into<String>>(mut self, skills: impl IntoIterator<Item = S>) -> Self {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_service(mut self, service: ServiceKind) -> Self {
        self.service = service;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisSweep) -> Self {
        self.analysis = analysis;
        self
    }

    /// Reject configurations that would fail mid-batch
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        if self.original_text.is_empty() {
            return Err(InputError::EmptyText);
        }
        if self.skills.is_empty() {
            return Err(InputError::EmptyChain);
        }
        if self.noise_levels.is_empty() {
            return Err(InputError::InvalidConfig(
                "noise_levels must not be empty".to_string(),
            ));
        }
        if let Some(&level) = self.noise_levels.iter().find(|&&l| l > 100) {
            return Err(InputError::InvalidNoiseLevel {
                level: i64::from(level),
            });
        }
        let mut seen = BTreeSet::new();
        if let Some(&level) = self.noise_levels.iter().find(|&&l| !seen.insert(l)) {
            return Err(InputError::DuplicateNoiseLevel { level });
        }
        if self.repetitions == 0 {
            return Err(InputError::InvalidConfig(
                "repetitions must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(InputError::InvalidConfig(
                "workers and queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(InputError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.service == ServiceKind::Command && self.service_command.is_empty() {
            return Err(InputError::InvalidConfig(
                "service = \"command\" requires service_command".to_string(),
            ));
        }
        if self.pricing.input_per_million < 0.0 || self.pricing.output_per_million < 0.0 {
            return Err(InputError::InvalidConfig(
                "pricing must be non-negative".to_string(),
            ));
        }
        let sweep = &self.analysis;
        if sweep.dimensions.iter().any(|&d| d == 0) || sweep.base_max_features == 0 {
            return Err(InputError::InvalidConfig(
                "analysis dimensions must be positive".to_string(),
            ));
        }
        let bad_range = |&(lo, hi): &(usize, usize)| lo == 0 || lo > hi;
        if sweep.ngram_ranges.iter().any(bad_range) || bad_range(&sweep.base_ngram_range) {
            return Err(InputError::InvalidConfig(
                "n-gram ranges must satisfy 1 <= min <= max".to_string(),
            ));
        }
        if !(sweep.confidence_level > 0.0 && sweep.confidence_level < 1.0) {
            return Err(InputError::InvalidConfig(format!(
                "confidence_level must be in (0, 1), got {}",
                sweep.confidence_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.noise_levels, vec![0, 10, 20, 25, 30, 40, 50]);
        assert_eq!(config.skills.len(), 3);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            noise_levels = [0, 50]
            repetitions = 5

            [retry]
            max_attempts = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.noise_levels, vec![0, 50]);
        assert_eq!(config.repetitions, 5);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.pricing.output_per_million, 15.0);
    }

    #[test]
    fn test_service_kind_parses() {
        let config = ExperimentConfig::from_toml_str(
            "service = \"command\"\nservice_command = [\"./translate.sh\"]",
        )
        .unwrap();
        assert_eq!(config.service, ServiceKind::Command);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_fails() {
        assert!(ExperimentConfig::from_toml_str("noise_levels = \"all\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ExperimentConfig::new().with_skills(Vec::<String>::new());
        assert_eq!(config.validate(), Err(InputError::EmptyChain));

        let config = ExperimentConfig::new().with_noise_levels(vec![0, 120]);
        assert_eq!(
            config.validate(),
            Err(InputError::InvalidNoiseLevel { level: 120 })
        );

        let config = ExperimentConfig::new().with_original_text("");
        assert_eq!(config.validate(), Err(InputError::EmptyText));

        let config = ExperimentConfig::new().with_noise_levels(vec![10, 25, 25]);
        assert_eq!(
            config.validate(),
            Err(InputError::DuplicateNoiseLevel { level: 25 })
        );

        let config = ExperimentConfig::new().with_workers(0);
        assert!(matches!(
            config.validate(),
            Err(InputError::InvalidConfig(_))
        ));

        let config = ExperimentConfig::new().with_service(ServiceKind::Command);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 350,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(60), Duration::from_millis(350));
    }

    #[test]
    fn test_pricing_cost() {
        let pricing = Pricing::default();
        let cost = pricing.cost(1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-12);
        assert_eq!(pricing.cost(0, 0), 0.0);
    }
}
