// Multiple-comparison corrections
//
// All three return adjusted p-values in the input order, capped at 1 and
// never below the raw value.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    Bonferroni,
    Holm,
    BenjaminiHochberg,
}

impl CorrectionMethod {
    pub const ALL: [CorrectionMethod; 3] = [
        CorrectionMethod::Bonferroni,
        CorrectionMethod::Holm,
        CorrectionMethod::BenjaminiHochberg,
    ];

    pub fn apply(&self, p_values: &[f64]) -> Vec<f64> {
        match self {
            CorrectionMethod::Bonferroni => bonferroni(p_values),
            CorrectionMethod::Holm => holm(p_values),
            CorrectionMethod::BenjaminiHochberg => benjamini_hochberg(p_values),
        }
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrectionMethod::Bonferroni => "bonferroni",
            CorrectionMethod::Holm => "holm",
            CorrectionMethod::BenjaminiHochberg => "benjamini_hochberg",
        };
        write!(f, "{}", name)
    }
}

fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len()).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    order
}

fn finish(raw: &[f64], adjusted: Vec<f64>) -> Vec<f64> {
    adjusted
        .into_iter()
        .zip(raw)
        .map(|(adj, &p)| adj.max(p).min(1.0))
        .collect()
}

pub fn bonferroni(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len() as f64;
    finish(p_values, p_values.iter().map(|p| p * m).collect())
}

/// Holm step-down with a running maximum
pub fn holm(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut adjusted = vec![0.0; m];
    let mut running = 0.0f64;
    for (rank, &idx) in ascending_order(p_values).iter().enumerate() {
        running = running.max((m - rank) as f64 * p_values[idx]);
        adjusted[idx] = running;
    }
    finish(p_values, adjusted)
}

/// Benjamini-Hochberg step-up with a running minimum from the largest p
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut adjusted = vec![0.0; m];
    let mut running = f64::INFINITY;
    for (rank, &idx) in ascending_order(p_values).iter().enumerate().rev() {
        running = running.min(m as f64 / (rank + 1) as f64 * p_values[idx]);
        adjusted[idx] = running;
    }
    finish(p_values, adjusted)
}
