// Effect sizes

use super::descriptive::{mean, variance};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    pub value: f64,
    pub degenerate: bool,
}

/// Cohen's d of `b` relative to `a` with pooled standard deviation
///
/// Positive when `b` has the larger mean. Zero pooled variance gives 0.
pub fn cohens_d(a: &[f64], b: &[f64]) -> Result<EffectSize, AnalysisError> {
    if a.len() < 2 || b.len() < 2 {
        return Err(AnalysisError::insufficient(
            "Cohen's d needs at least 2 observations per group",
        ));
    }
    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let pooled =
        (((n1 - 1.0) * variance(a) + (n2 - 1.0) * variance(b)) / (n1 + n2 - 2.0)).sqrt();
    if pooled <= 0.0 {
        return Ok(EffectSize {
            value: 0.0,
            degenerate: true,
        });
    }
    Ok(EffectSize {
        value: (mean(b) - mean(a)) / pooled,
        degenerate: false,
    })
}

/// Cliff's delta: `P(a > b) - P(a < b)` over all cross pairs
pub fn cliffs_delta(a: &[f64], b: &[f64]) -> Result<f64, AnalysisError> {
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::insufficient("Cliff's delta needs two non-empty samples"));
    }
    let mut dominance = 0i64;
    for x in a {
        for y in b {
            if x > y {
                dominance += 1;
            } else if x < y {
                dominance -= 1;
            }
        }
    }
    Ok(dominance as f64 / (a.len() * b.len()) as f64)
}

/// Conventional magnitude label for |d|
pub fn interpret_cohens_d(d: f64) -> &'static str {
    match d.abs() {
        x if x < 0.2 => "negligible",
        x if x < 0.5 => "small",
        x if x < 0.8 => "medium",
        _ => "large",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohens_d() {
        let a = [1.0, 2.0, 3.0];
        let b = [3.0, 4.0, 5.0];
        let d = cohens_d(&a, &b).unwrap();
        assert!((d.value - 2.0).abs() < 1e-12);
        assert!(!d.degenerate);
        assert_eq!(interpret_cohens_d(d.value), "large");
    }

    #[test]
    fn test_cohens_d_zero_variance() {
        let d = cohens_d(&[0.0, 0.0], &[0.0, 0.0]).unwrap();
        assert_eq!(d.value, 0.0);
        assert!(d.degenerate);
        assert!(cohens_d(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_cliffs_delta() {
        assert_eq!(cliffs_delta(&[5.0, 6.0], &[1.0, 2.0]).unwrap(), 1.0);
        assert_eq!(cliffs_delta(&[1.0, 2.0], &[5.0, 6.0]).unwrap(), -1.0);
        assert_eq!(cliffs_delta(&[1.0, 2.0], &[1.0, 2.0]).unwrap(), 0.0);
    }
}
