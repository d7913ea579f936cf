// Hypothesis tests across groups
//
// Degenerate inputs (zero variance, all values tied) never produce NaN: the
// statistic falls back to a documented sentinel and `degenerate` is set.
// Infinite statistics are possible (F with zero within-group variance); they
// serialize as null through the report layer.

use super::descriptive::{average_ranks, mean, median, tie_term, variance};
use super::distributions::{chi2_sf, f_sf, normal_sf};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Generic test statistic with its p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub statistic: f64,
    pub p_value: f64,
    pub df: Option<f64>,
    pub degenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_between: f64,
    pub df_within: f64,
    pub eta_squared: f64,
    pub degenerate: bool,
}

fn require_groups(groups: &[&[f64]], min_size: usize) -> Result<(), AnalysisError> {
    if groups.len() < 2 {
        return Err(AnalysisError::insufficient(format!(
            "need at least 2 groups, got {}",
            groups.len()
        )));
    }
    if let Some(small) = groups.iter().find(|g| g.len() < min_size) {
        return Err(AnalysisError::insufficient(format!(
            "every group needs at least {} observations, found one with {}",
            min_size,
            small.len()
        )));
    }
    Ok(())
}

/// Ratio of mean squares with the zero-denominator sentinels
fn f_ratio(ms_between: f64, ms_within: f64, d1: f64, d2: f64) -> (f64, f64, bool) {
    if ms_within > 0.0 {
        let f = ms_between / ms_within;
        (f, f_sf(f, d1, d2), false)
    } else if ms_between > 0.0 {
        (f64::INFINITY, 0.0, true)
    } else {
        (0.0, 1.0, true)
    }
}

/// One-way ANOVA; at least 2 groups of at least 2 observations
pub fn anova_oneway(groups: &[&[f64]]) -> Result<AnovaResult, AnalysisError> {
    require_groups(groups, 2)?;

    let all: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let grand = mean(&all);
    let n = all.len() as f64;
    let k = groups.len() as f64;

    let ss_between: f64 = groups
        .iter()
        .map(|g| g.len() as f64 * (mean(g) - grand).powi(2))
        .sum();
    let ss_within: f64 = groups
        .iter()
        .map(|g| {
            let m = mean(g);
            g.iter().map(|x| (x - m).powi(2)).sum::<f64>()
        })
        .sum();

    let df_between = k - 1.0;
    let df_within = n - k;
    let (f_statistic, p_value, degenerate) = f_ratio(
        ss_between / df_between,
        ss_within / df_within,
        df_between,
        df_within,
    );
    let ss_total = ss_between + ss_within;
    let eta_squared = if ss_total > 0.0 {
        ss_between / ss_total
    } else {
        0.0
    };

    Ok(AnovaResult {
        f_statistic,
        p_value,
        df_between,
        df_within,
        eta_squared,
        degenerate,
    })
}

/// How the Mann-Whitney p-value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MannWhitneyMethod {
    Exact,
    NormalApproximation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitneyResult {
    /// U of the first sample
    pub u_statistic: f64,
    pub p_value: f64,
    pub method: MannWhitneyMethod,
    pub degenerate: bool,
}

/// Largest sample size for which the exact null distribution is enumerated
pub const EXACT_MANN_WHITNEY_LIMIT: usize = 20;

/// Number of arrangements giving each U, for sample sizes `n1`, `n2`
fn mann_whitney_counts(n1: usize, n2: usize) -> Vec<f64> {
    // table[i][j] holds the distribution for sizes (i, j)
    let mut table: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); n2 + 1]; n1 + 1];
    for i in 0..=n1 {
        for j in 0..=n2 {
            if i == 0 || j == 0 {
                table[i][j] = vec![1.0];
                continue;
            }
            let mut dist = vec![0.0; i * j + 1];
            for (u, slot) in dist.iter_mut().enumerate() {
                let from_i = if u >= j {
                    table[i - 1][j].get(u - j).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                let from_j = table[i][j - 1].get(u).copied().unwrap_or(0.0);
                *slot = from_i + from_j;
            }
            table[i][j] = dist;
        }
    }
    std::mem::take(&mut table[n1][n2])
}

/// Two-sided Mann-Whitney U test
///
/// Exact null distribution when there are no ties and both samples have at
/// most [`EXACT_MANN_WHITNEY_LIMIT`] values; otherwise the tie-corrected
/// normal approximation with continuity correction.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Result<MannWhitneyResult, AnalysisError> {
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::insufficient("Mann-Whitney needs two non-empty samples"));
    }
    let n1 = a.len();
    let n2 = b.len();
    let combined: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    let (ranks, ties) = average_ranks(&combined);
    let r1: f64 = ranks[..n1].iter().sum();
    let u1 = r1 - (n1 * (n1 + 1)) as f64 / 2.0;
    let u2 = (n1 * n2) as f64 - u1;

    if ties.is_empty() && n1 <= EXACT_MANN_WHITNEY_LIMIT && n2 <= EXACT_MANN_WHITNEY_LIMIT {
        let counts = mann_whitney_counts(n1, n2);
        let total: f64 = counts.iter().sum();
        let u = u1.max(u2).round() as usize;
        // P(U >= max(U1, U2)), doubled
        let upper: f64 = counts[u.min(counts.len() - 1)..].iter().sum::<f64>() / total;
        return Ok(MannWhitneyResult {
            u_statistic: u1,
            p_value: (2.0 * upper).min(1.0),
            method: MannWhitneyMethod::Exact,
            degenerate: false,
        });
    }

    let n = (n1 + n2) as f64;
    let mu = (n1 * n2) as f64 / 2.0;
    let sigma_sq = (n1 * n2) as f64 / 12.0 * ((n + 1.0) - tie_term(&ties) / (n * (n - 1.0)));
    if sigma_sq <= 0.0 {
        return Ok(MannWhitneyResult {
            u_statistic: u1,
            p_value: 1.0,
            method: MannWhitneyMethod::NormalApproximation,
            degenerate: true,
        });
    }
    let z = ((u1.max(u2) - mu - 0.5) / sigma_sq.sqrt()).max(0.0);
    Ok(MannWhitneyResult {
        u_statistic: u1,
        p_value: (2.0 * normal_sf(z)).min(1.0),
        method: MannWhitneyMethod::NormalApproximation,
        degenerate: false,
    })
}

/// Kruskal-Wallis H test with tie correction
pub fn kruskal_wallis(groups: &[&[f64]]) -> Result<TestResult, AnalysisError> {
    require_groups(groups, 1)?;
    let all: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let n = all.len() as f64;
    let (ranks, ties) = average_ranks(&all);
    let df = (groups.len() - 1) as f64;

    let correction = 1.0 - tie_term(&ties) / (n * n * n - n);
    if correction <= 0.0 {
        return Ok(TestResult {
            statistic: 0.0,
            p_value: 1.0,
            df: Some(df),
            degenerate: true,
        });
    }

    let mut offset = 0;
    let mut sum = 0.0;
    for group in groups {
        let r: f64 = ranks[offset..offset + group.len()].iter().sum();
        sum += r * r / group.len() as f64;
        offset += group.len();
    }
    let h = (12.0 / (n * (n + 1.0)) * sum - 3.0 * (n + 1.0)) / correction;
    let h = h.max(0.0);

    Ok(TestResult {
        statistic: h,
        p_value: chi2_sf(h, df),
        df: Some(df),
        degenerate: false,
    })
}

/// Levene's test centred on group medians (Brown-Forsythe)
pub fn levene(groups: &[&[f64]]) -> Result<TestResult, AnalysisError> {
    require_groups(groups, 2)?;
    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| {
            let m = median(g);
            g.iter().map(|x| (x - m).abs()).collect()
        })
        .collect();
    let refs: Vec<&[f64]> = deviations.iter().map(Vec::as_slice).collect();
    let anova = anova_oneway(&refs)?;
    Ok(TestResult {
        statistic: anova.f_statistic,
        p_value: anova.p_value,
        df: Some(anova.df_between),
        degenerate: anova.degenerate,
    })
}

/// Bartlett's test for equal variances; undefined for a zero-variance group
pub fn bartlett(groups: &[&[f64]]) -> Result<TestResult, AnalysisError> {
    require_groups(groups, 2)?;
    let variances: Vec<f64> = groups.iter().map(|g| variance(g)).collect();
    if variances.iter().any(|&v| v <= 0.0) {
        return Err(AnalysisError::Degenerate(
            "Bartlett's test is undefined when a group has zero variance".to_string(),
        ));
    }

    let k = groups.len() as f64;
    let n: f64 = groups.iter().map(|g| g.len() as f64).sum();
    let dfs: Vec<f64> = groups.iter().map(|g| g.len() as f64 - 1.0).collect();
    let pooled = dfs.iter().zip(&variances).map(|(d, v)| d * v).sum::<f64>() / (n - k);

    let numerator =
        (n - k) * pooled.ln() - dfs.iter().zip(&variances).map(|(d, v)| d * v.ln()).sum::<f64>();
    let denominator =
        1.0 + (dfs.iter().map(|d| 1.0 / d).sum::<f64>() - 1.0 / (n - k)) / (3.0 * (k - 1.0));
    let statistic = (numerator / denominator).max(0.0);

    Ok(TestResult {
        statistic,
        p_value: chi2_sf(statistic, k - 1.0),
        df: Some(k - 1.0),
        degenerate: false,
    })
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Shapiro-Wilk W test (Royston 1995, AS R94), 3 <= n <= 5000
pub fn shapiro_wilk(xs: &[f64]) -> Result<TestResult, AnalysisError> {
    const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
    const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
    const C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
    const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
    const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
    const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
    const G: [f64; 2] = [-2.273, 0.459];

    let n = xs.len();
    if !(3..=5000).contains(&n) {
        return Err(AnalysisError::insufficient(format!(
            "Shapiro-Wilk needs 3 to 5000 observations, got {}",
            n
        )));
    }
    let mut x = xs.to_vec();
    x.sort_by(f64::total_cmp);
    if x[n - 1] - x[0] <= 0.0 {
        return Err(AnalysisError::Degenerate(
            "Shapiro-Wilk is undefined for a constant sample".to_string(),
        ));
    }

    let nf = n as f64;
    let half = n / 2;
    // Positive expected normal order statistics of the lower half
    let m: Vec<f64> = (0..half)
        .map(|i| -super::distributions::normal_ppf((i as f64 + 1.0 - 0.375) / (nf + 0.25)))
        .collect();

    let mut a = vec![0.0; half];
    if n == 3 {
        a[0] = std::f64::consts::FRAC_1_SQRT_2;
    } else {
        let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        let ssumm2 = summ2.sqrt();
        let rsn = 1.0 / nf.sqrt();
        let a1 = poly(&C1, rsn) + m[0] / ssumm2;
        a[0] = a1;
        let (first, fac) = if n > 5 {
            let a2 = m[1] / ssumm2 + poly(&C2, rsn);
            a[1] = a2;
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
                .sqrt();
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
            (1, fac)
        };
        for i in first..half {
            a[i] = m[i] / fac;
        }
    }

    let xbar = mean(&x);
    let ss: f64 = x.iter().map(|v| (v - xbar).powi(2)).sum();
    let numerator: f64 = (0..half).map(|i| a[i] * (x[n - 1 - i] - x[i])).sum();
    let w = (numerator * numerator / ss).min(1.0);

    let p_value = if n == 3 {
        let pi6 = 6.0 / std::f64::consts::PI;
        let stqr = (0.75f64).sqrt().asin();
        (pi6 * (w.sqrt().asin() - stqr)).max(0.0)
    } else {
        let mut w1 = (1.0 - w).ln();
        let (mu, sigma) = if n <= 11 {
            let gamma = poly(&G, nf);
            if w1 >= gamma {
                return Ok(TestResult {
                    statistic: w,
                    p_value: 1e-99,
                    df: None,
                    degenerate: false,
                });
            }
            w1 = -(gamma - w1).ln();
            (poly(&C3, nf), poly(&C4, nf).exp())
        } else {
            let ln_n = nf.ln();
            (poly(&C5, ln_n), poly(&C6, ln_n).exp())
        };
        normal_sf((w1 - mu) / sigma)
    };

    Ok(TestResult {
        statistic: w,
        p_value: p_value.clamp(0.0, 1.0),
        df: None,
        degenerate: false,
    })
}

/// Welch's t-test through aprender (parametric companion to Mann-Whitney)
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Result<TestResult, AnalysisError> {
    if a.len() < 2 || b.len() < 2 {
        return Err(AnalysisError::insufficient(
            "Welch's t-test needs at least 2 samples per group",
        ));
    }
    if variance(a) == 0.0 && variance(b) == 0.0 {
        let same = mean(a) == mean(b);
        return Ok(TestResult {
            statistic: if same { 0.0 } else { f64::INFINITY },
            p_value: if same { 1.0 } else { 0.0 },
            df: None,
            degenerate: true,
        });
    }
    let a32: Vec<f32> = a.iter().map(|&x| x as f32).collect();
    let b32: Vec<f32> = b.iter().map(|&x| x as f32).collect();
    let result = aprender::stats::hypothesis::ttest_ind(&a32, &b32, false)
        .map_err(|e| AnalysisError::Numerical(format!("failed to compute t-test: {}", e)))?;
    Ok(TestResult {
        statistic: f64::from(result.statistic),
        p_value: f64::from(result.pvalue).clamp(0.0, 1.0),
        df: Some(f64::from(result.df)),
        degenerate: false,
    })
}
