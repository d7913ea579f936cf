//! Drift analysis over a finished batch
//!
//! [`drift::DriftTable`] turns experiments into per-experiment
//! [`drift::DriftMetric`]s; [`sensitivity::SensitivityAnalyzer`] and
//! [`comparative::ComparativeAnalyzer`] turn the table into statistical
//! conclusions. [`information::InformationAnalyzer`] looks at the word
//! distributions directly. [`report::AnalysisReport`] runs all of them and
//! collects what could not be computed.
//!
//! Analyzers are pure functions of their input and may run concurrently.

pub mod comparative;
pub mod drift;
pub mod information;
pub mod report;
pub mod sensitivity;

pub use comparative::{ComparativeAnalyzer, ComparativeReport, PairwiseComparison};
pub use drift::{DriftMeasure, DriftMetric, DriftTable};
pub use information::{InformationAnalyzer, InformationReport};
pub use report::{AnalysisReport, LevelSummary};
pub use sensitivity::{SensitivityAnalyzer, SensitivityReport, SensitivityResult};

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// A statistic left out of a report, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Omission {
    pub statistic: String,
    pub reason: String,
}

impl Omission {
    pub fn new(statistic: impl Into<String>, err: &AnalysisError) -> Self {
        Self {
            statistic: statistic.into(),
            reason: err.to_string(),
        }
    }
}

/// Run `f`, pushing an [`Omission`] for `statistic` when it fails
pub(crate) fn or_omit<T>(
    omitted: &mut Vec<Omission>,
    statistic: impl Into<String>,
    f: impl FnOnce() -> Result<T, AnalysisError>,
) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(err) => {
            omitted.push(Omission::new(statistic, &err));
            None
        }
    }
}
