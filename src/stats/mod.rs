// Statistics for drift analysis
//
// Everything here works on f64 slices and is pure: no logging, no I/O.
// Tail probabilities come from the special functions in `distributions`;
// aprender supplies Welch's t-test and report medians, trueno the min/max
// reductions.
//
// Degenerate inputs are reported through `degenerate` flags with fixed
// sentinel values, never as NaN. Inputs that make a statistic meaningless
// (too few observations, mismatched lengths) are `AnalysisError`s.

pub mod bootstrap;
pub mod correction;
pub mod correlation;
pub mod descriptive;
pub mod distributions;
pub mod effect;
pub mod hypothesis;
pub mod regression;

pub use bootstrap::{bootstrap_mean, BootstrapResult};
pub use correction::CorrectionMethod;
pub use correlation::{kendall_tau_b, pearson, spearman, CorrelationMethod, CorrelationResult};
pub use descriptive::{mean, median, std_dev, variance, Summary};
pub use effect::{cliffs_delta, cohens_d, interpret_cohens_d, EffectSize};
pub use hypothesis::{
    anova_oneway, bartlett, kruskal_wallis, levene, mann_whitney_u, shapiro_wilk, welch_t_test,
    AnovaResult, MannWhitneyMethod, MannWhitneyResult, TestResult,
};
pub use regression::{polyfit, RegressionFit};

/// Two-sided t confidence interval for the mean of `xs`
///
/// Zero spread collapses the interval onto the mean.
pub fn t_interval(
    xs: &[f64],
    confidence_level: f64,
) -> Result<(f64, f64), crate::error::AnalysisError> {
    if xs.len() < 2 {
        return Err(crate::error::AnalysisError::insufficient(format!(
            "confidence interval needs at least 2 observations, got {}",
            xs.len()
        )));
    }
    let m = mean(xs);
    let se = std_dev(xs) / (xs.len() as f64).sqrt();
    if se <= 0.0 {
        return Ok((m, m));
    }
    let df = (xs.len() - 1) as f64;
    let t = distributions::t_ppf(1.0 - (1.0 - confidence_level) / 2.0, df);
    Ok((m - t * se, m + t * se))
}
