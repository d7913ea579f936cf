// Pipeline orchestration tests with scripted services

use super::*;
use crate::config::{ExperimentConfig, RetryPolicy};
use crate::cost::CostAccumulator;
use crate::error::InputError;
use crate::persistence::ResultStore;
use crate::service::{PassthroughService, ServiceError, StageOutput, TokenUsage, TransformService};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Replays a fixed script of results, then passes through
struct ScriptedService {
    script: Mutex<VecDeque<Result<StageOutput, ServiceError>>>,
    calls: AtomicUsize,
}

impl ScriptedService {
    fn new(script: Vec<Result<StageOutput, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransformService for ScriptedService {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => PassthroughService.invoke(skill_id, input_text),
        }
    }
}

/// Fails every call to one skill
struct FailingSkill {
    skill: &'static str,
}

impl TransformService for FailingSkill {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        if skill_id == self.skill {
            Err(ServiceError::Fatal {
                reason: "invalid api key".to_string(),
                usage: TokenUsage::new(4, 0),
            })
        } else {
            PassthroughService.invoke(skill_id, input_text)
        }
    }
}

struct SlowService {
    delay: Duration,
}

impl TransformService for SlowService {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        std::thread::sleep(self.delay);
        PassthroughService.invoke(skill_id, input_text)
    }
}

fn skills(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn orchestrator(service: Arc<dyn TransformService>) -> PipelineOrchestrator {
    PipelineOrchestrator::new(service, Arc::new(CostAccumulator::default()))
        .with_retry(RetryPolicy::immediate(3))
}

fn ok(text: &str) -> Result<StageOutput, ServiceError> {
    Ok(StageOutput {
        output_text: text.to_string(),
        usage: TokenUsage::new(10, 20),
    })
}

#[test]
fn test_identity_chain_at_zero_noise() {
    let orch = orchestrator(Arc::new(PassthroughService));
    let exp = orch
        .run_chain(0, "the cat sat on the mat", 0, 42, &skills(&["a", "b", "c"]))
        .unwrap();

    assert!(exp.is_completed());
    assert_eq!(exp.noisy_text, "the cat sat on the mat");
    assert_eq!(exp.final_text.as_deref(), Some("the cat sat on the mat"));
    assert_eq!(exp.stage_outputs.len(), 3);
    for (i, stage) in exp.stage_outputs.iter().enumerate() {
        assert_eq!(stage.stage_index, i);
        assert_eq!(stage.outcome, StageOutcome::Success);
        assert_eq!(stage.attempt_count, 1);
    }
}

#[test]
fn test_stage_input_is_previous_output() {
    let service = Arc::new(ScriptedService::new(vec![ok("bonjour"), ok("שלום")]));
    let orch = orchestrator(service);
    let exp = orch
        .run_chain(0, "hello", 0, 1, &skills(&["en-fr", "fr-he", "he-en"]))
        .unwrap();

    assert_eq!(exp.stage_outputs[0].input_text, "hello");
    assert_eq!(exp.stage_outputs[1].input_text, "bonjour");
    assert_eq!(exp.stage_outputs[2].input_text, "שלום");
    assert_eq!(exp.final_text.as_deref(), Some("שלום"));
}

#[test]
fn test_transient_then_success() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(ServiceError::transient("rate limited")),
        Err(ServiceError::Transient {
            reason: "connection reset".to_string(),
            usage: TokenUsage::new(7, 0),
        }),
        ok("done"),
    ]));
    let orch = orchestrator(service.clone());
    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["only"])).unwrap();

    assert!(exp.is_completed());
    let stage = &exp.stage_outputs[0];
    assert_eq!(stage.attempt_count, 3);
    assert_eq!(service.calls(), 3);
    assert_eq!(
        stage.outcome,
        StageOutcome::RetriedThenSuccess {
            reasons: vec!["rate limited".to_string(), "connection reset".to_string()]
        }
    );
    // Failed attempt with usage is billed too
    assert_eq!(stage.input_tokens, 17);
    assert_eq!(orch.costs().len(), 2);
}

#[test]
fn test_fatal_error_not_retried() {
    let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::fatal("bad request"))]));
    let orch = orchestrator(service.clone());
    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["a", "b"])).unwrap();

    assert_eq!(service.calls(), 1);
    assert_eq!(exp.stage_outputs.len(), 1);
    assert_eq!(
        exp.status,
        ExperimentStatus::Failed {
            stage_index: 0,
            reason: "bad request".to_string()
        }
    );
    assert!(exp.final_text.is_none());
}

#[test]
fn test_retries_exhausted() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(ServiceError::transient("overloaded")),
        Err(ServiceError::transient("overloaded")),
        Err(ServiceError::transient("overloaded")),
    ]));
    let orch = orchestrator(service.clone());
    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["a"])).unwrap();

    assert_eq!(service.calls(), 3);
    match &exp.stage_outputs[0].outcome {
        StageOutcome::Failed { reason } => assert!(reason.contains("retries exhausted")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(matches!(exp.status, ExperimentStatus::Failed { stage_index: 0, .. }));
}

#[test]
fn test_empty_reason_replaced() {
    let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::fatal(""))]));
    let exp = orchestrator(service)
        .run_chain(0, "text", 0, 1, &skills(&["a"]))
        .unwrap();
    match &exp.stage_outputs[0].outcome {
        StageOutcome::Failed { reason } => assert!(!reason.is_empty()),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_timeout_is_transient() {
    let orch = PipelineOrchestrator::new(
        Arc::new(SlowService {
            delay: Duration::from_millis(300),
        }),
        Arc::new(CostAccumulator::default()),
    )
    .with_retry(RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 0,
        max_delay_ms: 0,
        attempt_timeout_ms: 20,
    });
    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["slow"])).unwrap();

    let stage = &exp.stage_outputs[0];
    assert_eq!(stage.attempt_count, 2);
    assert!(stage.attempts.iter().all(|a| a.kind == AttemptKind::Timeout));
    assert!(!exp.is_completed());
}

#[test]
fn test_timed_out_attempts_are_billed_when_they_finish() {
    let costs = Arc::new(CostAccumulator::default());
    let orch = PipelineOrchestrator::new(
        Arc::new(SlowService {
            delay: Duration::from_millis(150),
        }),
        Arc::clone(&costs),
    )
    .with_retry(RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 0,
        max_delay_ms: 0,
        attempt_timeout_ms: 20,
    });
    let exp = orch
        .run_chain(3, "three word text", 0, 1, &skills(&["slow"]))
        .unwrap();
    assert!(!exp.is_completed());
    // Usage is unknown when the attempt is given up
    assert!(exp.stage_outputs[0].attempts.iter().all(|a| a.input_tokens == 0));

    let deadline = Instant::now() + Duration::from_secs(5);
    while costs.len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let entries = costs.entries();
    assert_eq!(entries.len(), 2);
    let mut attempts: Vec<u32> = entries.iter().map(|e| e.attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2]);
    for entry in &entries {
        assert_eq!(entry.skill_id, "slow");
        assert_eq!(entry.repetition, 3);
        assert_eq!((entry.input_tokens, entry.output_tokens), (3, 3));
    }
    assert!(costs.summary().total_tokens.total >= 12);
}

#[test]
fn test_failure_mid_chain_persists_completed_stages() {
    let temp = TempDir::new().unwrap();
    let store = ResultStore::new(temp.path());
    let orch = orchestrator(Arc::new(FailingSkill { skill: "b" })).with_store(store.clone());

    let exp = orch
        .run_chain(0, "hello world", 0, 1, &skills(&["a", "b", "c"]))
        .unwrap();

    assert_eq!(
        exp.status,
        ExperimentStatus::Failed {
            stage_index: 1,
            reason: "invalid api key".to_string()
        }
    );
    assert_eq!(exp.stage_outputs.len(), 2);
    assert_eq!(store.stage_files(0, 0).unwrap().len(), 1);
    assert!(store.experiment_dir(0, 0).join("experiment.json").exists());
    // Stage "a" plus the fatal attempt, which reported usage
    assert_eq!(orch.costs().len(), 2);
}

#[test]
fn test_cancelled_before_start() {
    let token = CancellationToken::new();
    token.cancel();
    let service = Arc::new(ScriptedService::new(vec![]));
    let orch = orchestrator(service.clone()).with_cancellation(token);

    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["a", "b"])).unwrap();
    assert_eq!(exp.status, ExperimentStatus::Cancelled { completed_stages: 0 });
    assert_eq!(service.calls(), 0);
    assert!(exp.final_text.is_none());
}

#[test]
fn test_cancel_during_backoff() {
    let token = CancellationToken::new();
    let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::transient("busy"))]));
    let orch = PipelineOrchestrator::new(service.clone(), Arc::new(CostAccumulator::default()))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10_000,
            max_delay_ms: 10_000,
            attempt_timeout_ms: 1_000,
        })
        .with_cancellation(token.clone());

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let exp = orch.run_chain(0, "text", 0, 1, &skills(&["a"])).unwrap();
    canceller.join().unwrap();

    assert_eq!(exp.status, ExperimentStatus::Cancelled { completed_stages: 0 });
    assert_eq!(service.calls(), 1);
}

#[test]
fn test_invalid_parameters() {
    let orch = orchestrator(Arc::new(PassthroughService));
    assert_eq!(
        orch.run_chain(0, "text", 101, 1, &skills(&["a"])),
        Err(InputError::InvalidNoiseLevel { level: 101 })
    );
    for level in [-1, 256, 356] {
        assert_eq!(
            orch.run_chain(0, "text", level, 1, &skills(&["a"])),
            Err(InputError::InvalidNoiseLevel { level })
        );
    }
    assert_eq!(
        orch.run_chain(0, "", 10, 1, &skills(&["a"])),
        Err(InputError::EmptyText)
    );
    assert_eq!(
        orch.run_chain(0, "text", 10, 1, &[]),
        Err(InputError::EmptyChain)
    );
}

#[test]
fn test_batch_rejects_duplicate_levels_before_any_call() {
    let temp = TempDir::new().unwrap();
    let config = ExperimentConfig::new()
        .with_noise_levels(vec![25, 25])
        .with_repetitions(1)
        .with_output_dir(temp.path());
    let service = Arc::new(ScriptedService::new(vec![]));
    let orch = orchestrator(service.clone()).with_store(ResultStore::new(temp.path()));

    assert_eq!(
        orch.run_batch(&config).unwrap_err(),
        InputError::DuplicateNoiseLevel { level: 25 }
    );
    assert_eq!(service.calls(), 0);
    assert!(!temp.path().join("noise_25").exists());
}

#[test]
fn test_batch_runs_every_level_and_repetition() {
    let temp = TempDir::new().unwrap();
    let config = ExperimentConfig::new()
        .with_noise_levels(vec![0, 25, 50])
        .with_repetitions(3)
        .with_skills(["a", "b"])
        .with_workers(3)
        .with_output_dir(temp.path());
    let orch = orchestrator(Arc::new(PassthroughService)).with_store(ResultStore::new(temp.path()));

    let outcome = orch.run_batch(&config).unwrap();
    assert_eq!(outcome.experiments.len(), 9);
    assert!(outcome.all_completed());

    let keys: Vec<(u8, u32)> = outcome
        .experiments
        .iter()
        .map(|e| (e.noise_level, e.repetition))
        .collect();
    assert_eq!(keys[0], (0, 0));
    assert_eq!(keys[8], (50, 2));
    assert_eq!(outcome.experiments[4].seed, 43);

    let groups = outcome.by_noise_level();
    assert_eq!(groups.len(), 3);
    assert!(groups.values().all(|g| g.len() == 3));
    assert_eq!(orch.costs().len(), 18);
}

#[test]
fn test_batch_is_deterministic_for_passthrough() {
    let config = ExperimentConfig::new()
        .with_noise_levels(vec![30])
        .with_repetitions(4)
        .with_skills(["a"]);
    let first = orchestrator(Arc::new(PassthroughService))
        .run_batch(&config)
        .unwrap();
    let second = orchestrator(Arc::new(PassthroughService))
        .with_retry(RetryPolicy::immediate(1))
        .run_batch(&config.clone().with_workers(1))
        .unwrap();

    let finals = |o: &BatchOutcome| -> Vec<Option<String>> {
        o.experiments.iter().map(|e| e.final_text.clone()).collect()
    };
    assert_eq!(finals(&first), finals(&second));
}

#[test]
fn test_batch_rejects_invalid_config() {
    let config = ExperimentConfig::new().with_noise_levels(vec![150]);
    let orch = orchestrator(Arc::new(PassthroughService));
    assert!(matches!(
        orch.run_batch(&config),
        Err(InputError::InvalidNoiseLevel { level: 150 })
    ));
}

#[test]
fn test_group_by_noise_level_orders_repetitions() {
    let orch = orchestrator(Arc::new(PassthroughService));
    let s = skills(&["a"]);
    let experiments = vec![
        orch.run_chain(1, "some text here", 20, 2, &s).unwrap(),
        orch.run_chain(0, "some text here", 20, 1, &s).unwrap(),
        orch.run_chain(0, "some text here", 0, 1, &s).unwrap(),
    ];
    let groups = group_by_noise_level(&experiments);
    assert_eq!(groups[&0].len(), 1);
    assert_eq!(groups[&20][0].repetition, 0);
    assert_eq!(groups[&20][1].repetition, 1);
}
