// Pipeline orchestrator: noise injection, sequential stages, persistence

use super::pool::{run_jobs, ExperimentJob};
use super::retry::{RetryExecutor, RetryOutcome};
use super::{
    group_by_noise_level, AttemptKind, AttemptRecord, CancellationToken, Experiment,
    ExperimentStatus, StageOutcome, StageResult,
};
use crate::config::{ExperimentConfig, RetryPolicy};
use crate::cost::{CostAccumulator, CostContext};
use crate::error::InputError;
use crate::noise::NoiseInjector;
use crate::persistence::ResultStore;
use crate::service::TransformService;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

/// Runs experiments against one transformation service
///
/// # Example
/// ```
/// use semdrift::config::RetryPolicy;
/// use semdrift::cost::CostAccumulator;
/// use semdrift::pipeline::PipelineOrchestrator;
/// use semdrift::service::PassthroughService;
/// use std::sync::Arc;
///
/// let orchestrator = PipelineOrchestrator::new(
///     Arc::new(PassthroughService),
///     Arc::new(CostAccumulator::default()),
/// )
/// .with_retry(RetryPolicy::immediate(3));
///
/// let skills = vec!["en-fr".to_string(), "fr-en".to_string()];
/// let experiment = orchestrator
///     .run_chain(0, "hello world", 0, 42, &skills)
///     .unwrap();
/// assert_eq!(experiment.final_text.as_deref(), Some("hello world"));
/// ```
pub struct PipelineOrchestrator {
    service: Arc<dyn TransformService>,
    costs: Arc<CostAccumulator>,
    store: Option<ResultStore>,
    retry: RetryPolicy,
    injector: NoiseInjector,
    cancel: CancellationToken,
}

/// All experiments of a batch, ordered by `(noise_level, repetition)`
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub experiments: Vec<Experiment>,
}

impl BatchOutcome {
    pub fn failed(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.iter().filter(|e| !e.is_completed())
    }

    pub fn all_completed(&self) -> bool {
        self.experiments.iter().all(Experiment::is_completed)
    }

    pub fn by_noise_level(&self) -> BTreeMap<u8, Vec<Experiment>> {
        group_by_noise_level(&self.experiments)
    }
}

impl PipelineOrchestrator {
    pub fn new(service: Arc<dyn TransformService>, costs: Arc<CostAccumulator>) -> Self {
        Self {
            service,
            costs,
            store: None,
            retry: RetryPolicy::default(),
            injector: NoiseInjector::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Persist stage outputs and experiment manifests under `store`
    pub fn with_store(mut self, store: ResultStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn costs(&self) -> &Arc<CostAccumulator> {
        &self.costs
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one experiment: inject noise, then each stage in order
    ///
    /// Only invalid parameters are errors. A failed or cancelled chain is
    /// reported through [`Experiment::status`].
    pub fn run_chain(
        &self,
        repetition: u32,
        original_text: &str,
        noise_level: i64,
        seed: u64,
        stage_skills: &[String],
    ) -> Result<Experiment, InputError> {
        if stage_skills.is_empty() {
            return Err(InputError::EmptyChain);
        }
        let noisy_text = self.injector.inject(original_text, noise_level, seed)?;
        let level = u8::try_from(noise_level)
            .map_err(|_| InputError::InvalidNoiseLevel { level: noise_level })?;

        let span = info_span!("experiment", noise_level = level, repetition);
        let _guard = span.enter();

        let executor = RetryExecutor::new(&self.retry, &self.costs, &self.cancel);
        let mut stage_outputs: Vec<StageResult> = Vec::with_capacity(stage_skills.len());
        let mut current = noisy_text.clone();
        let mut status = ExperimentStatus::Completed;

        for (stage_index, skill_id) in stage_skills.iter().enumerate() {
            if self.cancel.is_cancelled() {
                status = ExperimentStatus::Cancelled {
                    completed_stages: stage_index,
                };
                break;
            }

            let ctx = CostContext {
                skill_id,
                stage_index,
                noise_level: level,
                repetition,
                attempt: 1,
            };

            match executor.execute(&self.service, ctx, &current) {
                RetryOutcome::Success { output, attempts } => {
                    let failures: Vec<String> = attempts
                        .iter()
                        .filter(|a| a.kind != AttemptKind::Ok)
                        .filter_map(|a| a.error.clone())
                        .collect();
                    let outcome = if failures.is_empty() {
                        StageOutcome::Success
                    } else {
                        StageOutcome::RetriedThenSuccess { reasons: failures }
                    };
                    let result = stage_result(
                        stage_index,
                        skill_id,
                        &current,
                        output.output_text,
                        attempts,
                        outcome,
                    );

                    if let Some(store) = &self.store {
                        if let Err(e) = store.write_stage_output(
                            level,
                            repetition,
                            stage_index,
                            skill_id,
                            &result.output_text,
                        ) {
                            error!(stage = stage_index, error = %e, "failed to persist stage output");
                            status = ExperimentStatus::Failed {
                                stage_index,
                                reason: format!("failed to persist stage output: {}", e),
                            };
                            stage_outputs.push(result);
                            break;
                        }
                    }

                    current = result.output_text.clone();
                    stage_outputs.push(result);
                }
                RetryOutcome::Failed { reason, attempts } => {
                    warn!(stage = stage_index, skill = %skill_id, reason = %reason, "stage failed");
                    stage_outputs.push(stage_result(
                        stage_index,
                        skill_id,
                        &current,
                        String::new(),
                        attempts,
                        StageOutcome::Failed {
                            reason: reason.clone(),
                        },
                    ));
                    status = ExperimentStatus::Failed {
                        stage_index,
                        reason,
                    };
                    break;
                }
                RetryOutcome::Cancelled { attempts } => {
                    if !attempts.is_empty() {
                        stage_outputs.push(stage_result(
                            stage_index,
                            skill_id,
                            &current,
                            String::new(),
                            attempts,
                            StageOutcome::Failed {
                                reason: "cancelled while retrying".to_string(),
                            },
                        ));
                    }
                    status = ExperimentStatus::Cancelled {
                        completed_stages: stage_index,
                    };
                    break;
                }
            }
        }

        let final_text = match status {
            ExperimentStatus::Completed => Some(current),
            _ => None,
        };

        let experiment = Experiment {
            noise_level: level,
            repetition,
            seed,
            original_text: original_text.to_string(),
            noisy_text,
            stage_outputs,
            final_text,
            status,
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.write_experiment(&experiment) {
                error!(error = %e, "failed to persist experiment manifest");
            }
        }

        info!(
            status = ?experiment.status,
            cost = experiment.total_cost(),
            "experiment finished"
        );
        Ok(experiment)
    }

    /// Run every `(noise level, repetition)` of `config` on the worker pool
    pub fn run_batch(&self, config: &ExperimentConfig) -> Result<BatchOutcome, InputError> {
        config.validate()?;

        let jobs: Vec<ExperimentJob> = config
            .noise_levels
            .iter()
            .flat_map(|&noise_level| {
                (0..config.repetitions).map(move |repetition| ExperimentJob {
                    noise_level,
                    repetition,
                    seed: config.seed.wrapping_add(u64::from(repetition)),
                })
            })
            .collect();

        info!(
            experiments = jobs.len(),
            workers = config.workers,
            stages = config.skills.len(),
            "starting batch"
        );

        let experiments = run_jobs(
            self,
            &config.original_text,
            &config.skills,
            jobs,
            config.workers,
            config.queue_capacity,
        )?;

        let outcome = BatchOutcome { experiments };
        info!(
            completed = outcome.experiments.len() - outcome.failed().count(),
            failed = outcome.failed().count(),
            total_cost = self.costs.total_cost(),
            "batch finished"
        );
        Ok(outcome)
    }
}

fn stage_result(
    stage_index: usize,
    skill_id: &str,
    input_text: &str,
    output_text: String,
    attempts: Vec<AttemptRecord>,
    outcome: StageOutcome,
) -> StageResult {
    StageResult {
        stage_index,
        skill_id: skill_id.to_string(),
        input_text: input_text.to_string(),
        output_text,
        input_tokens: attempts.iter().map(|a| a.input_tokens).sum(),
        output_tokens: attempts.iter().map(|a| a.output_tokens).sum(),
        cost: attempts.iter().map(|a| a.cost).sum(),
        attempt_count: attempts.len() as u32,
        attempts,
        outcome,
    }
}
