//! Multi-stage pipeline orchestration
//!
//! ```text
//! original ──NoiseInjector──▶ noisy ──stage 0──▶ ... ──stage N-1──▶ final
//!                                      │                  │
//!                                  RetryExecutor      RetryExecutor
//!                                      │                  │
//!                              CostAccumulator ◀──────────┘
//!                              ResultStore (stage_<kk>_<skill>.txt)
//! ```
//!
//! Stages within an experiment are strictly sequential. Experiments run on a
//! bounded worker pool ([`pool::run_jobs`]); the cost ledger is the only
//! shared mutable state.

mod orchestrator;
mod pool;
mod retry;

pub use orchestrator::{BatchOutcome, PipelineOrchestrator};
pub use pool::{run_jobs, ExperimentJob};
pub use retry::{RetryExecutor, RetryOutcome};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag; once set, no further stage call starts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Ok,
    Transient,
    Fatal,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: u32,
    pub kind: AttemptKind,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    /// Reasons of the attempts that failed before the final success
    RetriedThenSuccess { reasons: Vec<String> },
    Failed { reason: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, StageOutcome::Failed { .. })
    }
}

/// Result of one stage; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_index: usize,
    pub skill_id: String,
    pub input_text: String,
    /// Empty when the stage failed
    pub output_text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub attempt_count: u32,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExperimentStatus {
    Completed,
    Failed { stage_index: usize, reason: String },
    Cancelled { completed_stages: usize },
}

/// One `(noise level, repetition)` run of the whole chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub noise_level: u8,
    pub repetition: u32,
    pub seed: u64,
    pub original_text: String,
    pub noisy_text: String,
    pub stage_outputs: Vec<StageResult>,
    /// Absent unless every stage succeeded
    pub final_text: Option<String>,
    pub status: ExperimentStatus,
}

impl Experiment {
    pub fn id(&self) -> String {
        experiment_id(self.noise_level, self.repetition)
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExperimentStatus::Completed
    }

    pub fn total_cost(&self) -> f64 {
        self.stage_outputs.iter().map(|s| s.cost).sum()
    }
}

pub fn experiment_id(noise_level: u8, repetition: u32) -> String {
    format!("noise_{}/rep_{:03}", noise_level, repetition)
}

/// Group experiments by noise level, preserving repetition order
pub fn group_by_noise_level(experiments: &[Experiment]) -> BTreeMap<u8, Vec<Experiment>> {
    let mut groups: BTreeMap<u8, Vec<Experiment>> = BTreeMap::new();
    for experiment in experiments {
        groups
            .entry(experiment.noise_level)
            .or_default()
            .push(experiment.clone());
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| e.repetition);
    }
    groups
}

#[cfg(test)]
mod tests;
