// Pearson, Spearman and Kendall tau-b correlation with p-values
//
// Zero variance in either variable yields coefficient 0, p-value 1 and
// `degenerate = true`.

use super::descriptive::{average_ranks, mean};
use super::distributions::{normal_ppf, normal_sf, t_two_sided};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
            CorrelationMethod::Kendall => "kendall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub method: CorrelationMethod,
    pub coefficient: f64,
    pub p_value: f64,
    /// Fisher-z interval; absent for Kendall and for n <= 3
    pub confidence_interval: Option<(f64, f64)>,
    pub n: usize,
    pub degenerate: bool,
}

fn check_pairs(x: &[f64], y: &[f64]) -> Result<(), AnalysisError> {
    if x.len() != y.len() {
        return Err(AnalysisError::DimensionMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    if x.len() < 3 {
        return Err(AnalysisError::insufficient(format!(
            "correlation needs at least 3 pairs, got {}",
            x.len()
        )));
    }
    Ok(())
}

fn degenerate(method: CorrelationMethod, n: usize) -> CorrelationResult {
    CorrelationResult {
        method,
        coefficient: 0.0,
        p_value: 1.0,
        confidence_interval: None,
        n,
        degenerate: true,
    }
}

fn raw_pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

fn t_p_value(r: f64, n: usize) -> f64 {
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    t_two_sided(t, df)
}

/// Fisher-z confidence interval for a correlation coefficient
pub fn fisher_z_interval(r: f64, n: usize, confidence: f64) -> Option<(f64, f64)> {
    if n <= 3 {
        return None;
    }
    if r.abs() >= 1.0 {
        return Some((r, r));
    }
    let z = r.atanh();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    let crit = normal_ppf(1.0 - (1.0 - confidence) / 2.0);
    Some(((z - crit * se).tanh(), (z + crit * se).tanh()))
}

pub fn pearson(x: &[f64], y: &[f64], confidence: f64) -> Result<CorrelationResult, AnalysisError> {
    check_pairs(x, y)?;
    let n = x.len();
    let Some(r) = raw_pearson(x, y) else {
        return Ok(degenerate(CorrelationMethod::Pearson, n));
    };
    Ok(CorrelationResult {
        method: CorrelationMethod::Pearson,
        coefficient: r,
        p_value: t_p_value(r, n),
        confidence_interval: fisher_z_interval(r, n, confidence),
        n,
        degenerate: false,
    })
}

/// Pearson correlation of average ranks
pub fn spearman(x: &[f64], y: &[f64], confidence: f64) -> Result<CorrelationResult, AnalysisError> {
    check_pairs(x, y)?;
    let n = x.len();
    let (rx, _) = average_ranks(x);
    let (ry, _) = average_ranks(y);
    let Some(rho) = raw_pearson(&rx, &ry) else {
        return Ok(degenerate(CorrelationMethod::Spearman, n));
    };
    Ok(CorrelationResult {
        method: CorrelationMethod::Spearman,
        coefficient: rho,
        p_value: t_p_value(rho, n),
        confidence_interval: fisher_z_interval(rho, n, confidence),
        n,
        degenerate: false,
    })
}

/// `(Σ t(t-1)/2, Σ t(t-1)(t-2), Σ t(t-1)(2t+5))` over tie groups
fn tie_sums(values: &[f64]) -> (f64, f64, f64) {
    let (_, ties) = average_ranks(values);
    ties.iter().fold((0.0, 0.0, 0.0), |(a, b, c), &t| {
        let t = t as f64;
        (
            a + t * (t - 1.0) / 2.0,
            b + t * (t - 1.0) * (t - 2.0),
            c + t * (t - 1.0) * (2.0 * t + 5.0),
        )
    })
}

/// Kendall tau-b with the tie-adjusted normal approximation
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> Result<CorrelationResult, AnalysisError> {
    check_pairs(x, y)?;
    let n = x.len();

    let mut concordant_minus_discordant = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            let s = dx.signum() * dy.signum();
            if dx != 0.0 && dy != 0.0 {
                concordant_minus_discordant += s;
            }
        }
    }

    let (x_tie, x0, x1) = tie_sums(x);
    let (y_tie, y0, y1) = tie_sums(y);
    let nf = n as f64;
    let total_pairs = nf * (nf - 1.0) / 2.0;
    if total_pairs - x_tie <= 0.0 || total_pairs - y_tie <= 0.0 {
        return Ok(degenerate(CorrelationMethod::Kendall, n));
    }

    let tau = (concordant_minus_discordant
        / ((total_pairs - x_tie).sqrt() * (total_pairs - y_tie).sqrt()))
    .clamp(-1.0, 1.0);

    let m = nf * (nf - 1.0);
    let var = (m * (2.0 * nf + 5.0) - x1 - y1) / 18.0
        + (2.0 * x_tie * y_tie) / m
        + x0 * y0 / (9.0 * m * (nf - 2.0));
    let p_value = if var > 0.0 {
        let z = concordant_minus_discordant / var.sqrt();
        (2.0 * normal_sf(z.abs())).min(1.0)
    } else {
        1.0
    };

    Ok(CorrelationResult {
        method: CorrelationMethod::Kendall,
        coefficient: tau,
        p_value,
        confidence_interval: None,
        n,
        degenerate: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_linear() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        let r = pearson(&x, &y, 0.95).unwrap();
        assert!((r.coefficient - 1.0).abs() < 1e-12);
        assert_eq!(r.p_value, 0.0);
        assert_eq!(r.confidence_interval, Some((1.0, 1.0)));
    }

    #[test]
    fn test_pearson_known_value() {
        // r = 0.8, n = 5
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 4.0, 3.0, 5.0];
        let r = pearson(&x, &y, 0.95).unwrap();
        assert!((r.coefficient - 0.8).abs() < 1e-12);
        // t = 0.8 * sqrt(3 / 0.36) = 2.3094, two-sided p = 0.10408
        assert!((r.p_value - 0.104_088).abs() < 1e-4);
        let (lo, hi) = r.confidence_interval.unwrap();
        assert!(lo < 0.8 && 0.8 < hi);
    }

    #[test]
    fn test_zero_variance_is_degenerate() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [5.0, 5.0, 5.0, 5.0];
        for result in [
            pearson(&x, &y, 0.95).unwrap(),
            spearman(&x, &y, 0.95).unwrap(),
            kendall_tau_b(&x, &y).unwrap(),
        ] {
            assert!(result.degenerate);
            assert_eq!(result.coefficient, 0.0);
            assert_eq!(result.p_value, 1.0);
        }
    }

    #[test]
    fn test_spearman_monotone_nonlinear() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [1.0, 4.0, 9.0, 16.0, 25.0, 36.0];
        let rho = spearman(&x, &y, 0.95).unwrap();
        assert!((rho.coefficient - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kendall_with_ties() {
        let x = [1.0, 2.0, 2.0, 3.0, 4.0];
        let y = [1.0, 3.0, 2.0, 4.0, 4.0];
        let tau = kendall_tau_b(&x, &y).unwrap();
        // C = 8, D = 0, one tied pair in each variable
        let expected = 8.0 / (9.0f64.sqrt() * 9.0f64.sqrt());
        assert!((tau.coefficient - expected).abs() < 1e-12);
        assert!(tau.p_value > 0.0 && tau.p_value < 1.0);
    }

    #[test]
    fn test_length_checks() {
        assert!(pearson(&[1.0, 2.0], &[1.0, 2.0], 0.95).is_err());
        assert!(matches!(
            spearman(&[1.0, 2.0, 3.0], &[1.0, 2.0], 0.95),
            Err(AnalysisError::DimensionMismatch { .. })
        ));
    }
}
