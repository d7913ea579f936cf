// Least-squares polynomial regression
//
// x is scaled to [-1, 1] before forming the normal equations, which keeps
// cubic fits over noise percentages well conditioned; coefficients are mapped
// back to the original scale.

use super::descriptive::mean;
use super::distributions::f_sf;
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub model_type: String,
    pub degree: usize,
    /// Ascending powers: `y = c0 + c1 x + c2 x² + ...`
    pub coefficients: Vec<f64>,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub rmse: f64,
    pub f_statistic: f64,
    pub p_value: f64,
    /// Absent when every residual is zero
    pub durbin_watson: Option<f64>,
    pub n: usize,
    pub degenerate: bool,
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Durbin-Watson statistic of residuals in observation order
pub fn durbin_watson(residuals: &[f64]) -> Option<f64> {
    let ss: f64 = residuals.iter().map(|e| e * e).sum();
    if residuals.len() < 2 || ss <= 0.0 {
        return None;
    }
    let diff: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    Some(diff / ss)
}

/// Fit a polynomial of `degree` (1 to 3) to `(x, y)`
///
/// Residuals for Durbin-Watson are taken in ascending x order.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<RegressionFit, AnalysisError> {
    if !(1..=3).contains(&degree) {
        return Err(AnalysisError::insufficient(format!(
            "polynomial degree must be 1 to 3, got {}",
            degree
        )));
    }
    if x.len() != y.len() {
        return Err(AnalysisError::DimensionMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    let n = x.len();
    let p = degree + 1;
    if n <= p {
        return Err(AnalysisError::insufficient(format!(
            "degree {} fit needs more than {} points, got {}",
            degree, p, n
        )));
    }

    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let center = (lo + hi) / 2.0;
    let half_range = (hi - lo) / 2.0;
    if half_range <= 0.0 {
        return Err(AnalysisError::Degenerate(
            "regression needs at least two distinct x values".to_string(),
        ));
    }
    let scaled: Vec<f64> = x.iter().map(|v| (v - center) / half_range).collect();

    let mut ata = vec![vec![0.0; p]; p];
    let mut aty = vec![0.0; p];
    for (&s, &yi) in scaled.iter().zip(y) {
        let powers: Vec<f64> = (0..p).map(|k| s.powi(k as i32)).collect();
        for i in 0..p {
            aty[i] += powers[i] * yi;
            for j in 0..p {
                ata[i][j] += powers[i] * powers[j];
            }
        }
    }
    let beta = solve(ata, aty).ok_or_else(|| {
        AnalysisError::Degenerate(format!(
            "design matrix is singular for degree {} (too few distinct x values)",
            degree
        ))
    })?;

    // y = Σ β_k ((x - c)/h)^k  expanded into powers of x
    let mut coefficients = vec![0.0; p];
    for (k, &b) in beta.iter().enumerate() {
        let scale = b / half_range.powi(k as i32);
        for j in 0..=k {
            coefficients[j] += scale * binomial(k, j) * (-center).powi((k - j) as i32);
        }
    }

    let fitted: Vec<f64> = scaled
        .iter()
        .map(|&s| beta.iter().enumerate().map(|(k, b)| b * s.powi(k as i32)).sum())
        .collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| yi - fi).collect();

    let y_mean = mean(y);
    let ss_res: f64 = residuals.iter().map(|e| e * e).sum();
    let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let ss_reg = (ss_tot - ss_res).max(0.0);
    let df_model = degree as f64;
    let df_resid = (n - p) as f64;

    let (r_squared, f_statistic, p_value, degenerate) = if ss_tot <= 0.0 {
        (0.0, 0.0, 1.0, true)
    } else if ss_res <= f64::EPSILON * ss_tot {
        (1.0, f64::INFINITY, 0.0, true)
    } else {
        let f = (ss_reg / df_model) / (ss_res / df_resid);
        (1.0 - ss_res / ss_tot, f, f_sf(f, df_model, df_resid), false)
    };
    let adjusted_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let ordered_residuals: Vec<f64> = order.iter().map(|&i| residuals[i]).collect();

    Ok(RegressionFit {
        model_type: if degree == 1 { "linear" } else { "polynomial" }.to_string(),
        degree,
        coefficients,
        r_squared,
        adjusted_r_squared,
        rmse: (ss_res / n as f64).sqrt(),
        f_statistic,
        p_value,
        durbin_watson: durbin_watson(&ordered_residuals),
        n,
        degenerate,
    })
}
