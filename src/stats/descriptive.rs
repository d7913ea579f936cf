// Descriptive statistics in f64
//
// Medians for reporting go through aprender's DescriptiveStats (R-7 quantile,
// QuickSelect); everything feeding a test statistic stays in f64.

use crate::error::AnalysisError;
use aprender::stats::DescriptiveStats;
use serde::{Deserialize, Serialize};
use trueno::Vector;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample variance (n - 1 denominator); 0 for fewer than two values
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

/// R-7 percentile (linear interpolation between order statistics), `q` in `[0, 1]`
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn median(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, 0.5)
}

/// 1-based average ranks, plus the sizes of every tie group (> 1)
pub fn average_ranks(xs: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..xs.len()).collect();
    order.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]));

    let mut ranks = vec![0.0; xs.len()];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && xs[order[j + 1]] == xs[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        if j > i {
            ties.push(j - i + 1);
        }
        i = j + 1;
    }
    (ranks, ties)
}

/// `Σ (t³ - t)` over tie group sizes
pub fn tie_term(ties: &[usize]) -> f64 {
    ties.iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum()
}

/// Per-group summary for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn from_slice(xs: &[f64]) -> Result<Self, AnalysisError> {
        if xs.is_empty() {
            return Err(AnalysisError::insufficient("cannot summarise an empty sample"));
        }
        let data: Vec<f32> = xs.iter().map(|&x| x as f32).collect();
        let vector = Vector::from_slice(&data);
        let median = DescriptiveStats::new(&vector)
            .quantile(0.5)
            .map_err(|e| AnalysisError::Numerical(format!("failed to compute median: {}", e)))?;
        let min = vector
            .min()
            .map_err(|e| AnalysisError::Numerical(format!("failed to compute min: {}", e)))?;
        let max = vector
            .max()
            .map_err(|e| AnalysisError::Numerical(format!("failed to compute max: {}", e)))?;

        Ok(Self {
            n: xs.len(),
            mean: mean(xs),
            median: f64::from(median),
            std_dev: std_dev(xs),
            min: f64::from(min),
            max: f64::from(max),
        })
    }
}
