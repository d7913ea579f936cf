// Percentile bootstrap for the mean

use super::descriptive::{mean, percentile, std_dev};
use crate::error::AnalysisError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub sample_mean: f64,
    pub bootstrap_mean: f64,
    pub standard_error: f64,
    /// `bootstrap_mean - sample_mean`
    pub bias: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub confidence_level: f64,
    pub iterations: usize,
    pub n: usize,
}

impl BootstrapResult {
    pub fn width(&self) -> f64 {
        self.ci_high - self.ci_low
    }
}

/// Resample `data` with replacement `iterations` times from a seeded generator
pub fn bootstrap_mean(
    data: &[f64],
    iterations: usize,
    seed: u64,
    confidence_level: f64,
) -> Result<BootstrapResult, AnalysisError> {
    if data.len() < 2 {
        return Err(AnalysisError::insufficient(format!(
            "bootstrap needs at least 2 observations, got {}",
            data.len()
        )));
    }
    if iterations == 0 {
        return Err(AnalysisError::insufficient("bootstrap needs at least 1 iteration"));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n = data.len();
    let mut means: Vec<f64> = (0..iterations)
        .map(|_| (0..n).map(|_| data[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);

    let alpha = 1.0 - confidence_level;
    let sample_mean = mean(data);
    let bootstrap_mean = mean(&means);

    Ok(BootstrapResult {
        sample_mean,
        bootstrap_mean,
        standard_error: std_dev(&means),
        bias: bootstrap_mean - sample_mean,
        ci_low: percentile(&means, alpha / 2.0),
        ci_high: percentile(&means, 1.0 - alpha / 2.0),
        confidence_level,
        iterations,
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_contains_mean() {
        let data: Vec<f64> = (0..30).map(|i| (i % 7) as f64 * 0.1).collect();
        let result = bootstrap_mean(&data, 2000, 42, 0.95).unwrap();
        assert!(result.ci_low <= result.sample_mean && result.sample_mean <= result.ci_high);
        assert!(result.bias.abs() < 0.05);
        assert!(result.standard_error > 0.0);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let data = [0.1, 0.4, 0.35, 0.8, 0.2];
        let a = bootstrap_mean(&data, 500, 7, 0.95).unwrap();
        let b = bootstrap_mean(&data, 500, 7, 0.95).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_data_has_zero_width() {
        let result = bootstrap_mean(&[0.5; 10], 200, 1, 0.95).unwrap();
        assert_eq!(result.width(), 0.0);
        assert_eq!(result.standard_error, 0.0);
    }

    #[test]
    fn test_insufficient_data() {
        assert!(bootstrap_mean(&[1.0], 100, 1, 0.95).is_err());
        assert!(bootstrap_mean(&[1.0, 2.0], 0, 1, 0.95).is_err());
    }
}
