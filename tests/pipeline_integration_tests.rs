//! End-to-end pipeline scenarios: noise injection, stage chain, persistence
//! and drift analysis with stub services

use semdrift::analysis::{AnalysisReport, DriftTable};
use semdrift::config::{AnalysisSweep, ExperimentConfig, RetryPolicy, DEFAULT_ORIGINAL_TEXT};
use semdrift::cost::CostAccumulator;
use semdrift::embedding::EmbeddingConfig;
use semdrift::persistence::ResultStore;
use semdrift::pipeline::{group_by_noise_level, ExperimentStatus, PipelineOrchestrator};
use semdrift::service::{
    PassthroughService, ServiceError, StageOutput, TokenUsage, TransformService,
};
use std::sync::Arc;
use tempfile::TempDir;

fn skills(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("skill-{}", i)).collect()
}

/// Fails the second stage of every chain with a non-retryable error
struct SecondStageRejects;

impl TransformService for SecondStageRejects {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        if skill_id == "skill-1" {
            return Err(ServiceError::Fatal {
                reason: "content policy rejection".to_string(),
                usage: TokenUsage::new(12, 0),
            });
        }
        PassthroughService.invoke(skill_id, input_text)
    }
}

fn orchestrator(service: Arc<dyn TransformService>, store: &ResultStore) -> PipelineOrchestrator {
    PipelineOrchestrator::new(service, Arc::new(CostAccumulator::default()))
        .with_store(store.clone())
        .with_retry(RetryPolicy::immediate(3))
}

#[test]
fn test_identity_chain_at_level_zero_has_no_drift() {
    let dir = TempDir::new().unwrap();
    let store = ResultStore::new(dir.path());
    let orch = orchestrator(Arc::new(PassthroughService), &store);

    let experiment = orch
        .run_chain(0, DEFAULT_ORIGINAL_TEXT, 0, 42, &skills(3))
        .unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Completed);
    assert_eq!(experiment.final_text.as_deref(), Some(DEFAULT_ORIGINAL_TEXT));
    assert_eq!(store.stage_files(0, 0).unwrap().len(), 3);

    let table =
        DriftTable::compute(&group_by_noise_level(&[experiment]), &EmbeddingConfig::default())
            .unwrap();
    assert_eq!(table.metrics[0].cosine_distance, 0.0);
    assert_eq!(table.metrics[0].word_overlap, 1.0);
}

#[test]
fn test_noisy_passthrough_chain_drifts() {
    let dir = TempDir::new().unwrap();
    let store = ResultStore::new(dir.path());
    let orch = orchestrator(Arc::new(PassthroughService), &store);

    let clean = orch
        .run_chain(0, DEFAULT_ORIGINAL_TEXT, 0, 42, &skills(3))
        .unwrap();
    let noisy = orch
        .run_chain(0, DEFAULT_ORIGINAL_TEXT, 50, 42, &skills(3))
        .unwrap();
    assert_ne!(noisy.noisy_text, DEFAULT_ORIGINAL_TEXT);
    assert_eq!(noisy.final_text.as_deref(), Some(noisy.noisy_text.as_str()));

    let table = DriftTable::compute(
        &group_by_noise_level(&[clean, noisy]),
        &EmbeddingConfig::default(),
    )
    .unwrap();
    let clean_metric = &table.metrics[0];
    let noisy_metric = &table.metrics[1];
    assert_eq!(noisy_metric.noise_level, 50);
    assert!(noisy_metric.cosine_distance > clean_metric.cosine_distance);
    assert!(noisy_metric.word_overlap < 1.0);
    assert!(noisy_metric.text_similarity < 1.0);
}

#[test]
fn test_second_stage_failure_persists_one_stage() {
    let dir = TempDir::new().unwrap();
    let store = ResultStore::new(dir.path());
    let costs = Arc::new(CostAccumulator::default());
    let orch = PipelineOrchestrator::new(Arc::new(SecondStageRejects), Arc::clone(&costs))
        .with_store(store.clone())
        .with_retry(RetryPolicy::immediate(3));

    let experiment = orch
        .run_chain(2, DEFAULT_ORIGINAL_TEXT, 20, 9, &skills(3))
        .unwrap();

    match &experiment.status {
        ExperimentStatus::Failed {
            stage_index,
            reason,
        } => {
            assert_eq!(*stage_index, 1);
            assert!(reason.contains("content policy"));
        }
        other => panic!("expected failure at stage 1, got {:?}", other),
    }
    assert!(experiment.final_text.is_none());
    assert_eq!(experiment.stage_outputs.len(), 2);

    let files = store.stage_files(20, 2).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("stage_00_skill-0.txt"));

    // Fatal errors are not retried, but their usage is billed
    assert_eq!(costs.len(), 2);

    let reloaded = store.load_experiments().unwrap();
    assert_eq!(reloaded, vec![experiment]);
}

#[test]
fn test_batch_round_trip_through_store() {
    let dir = TempDir::new().unwrap();
    let config = ExperimentConfig::default()
        .with_noise_levels(vec![0, 25, 50])
        .with_repetitions(3)
        .with_output_dir(dir.path())
        .with_retry(RetryPolicy::immediate(2))
        .with_analysis(AnalysisSweep {
            dimensions: vec![50, 500],
            ngram_ranges: vec![(1, 1), (1, 2)],
            bootstrap_iterations: 200,
            ..AnalysisSweep::default()
        });
    let store = ResultStore::new(&config.output_dir);
    let costs = Arc::new(CostAccumulator::new(config.pricing.clone()));
    let orch = PipelineOrchestrator::new(Arc::new(PassthroughService), Arc::clone(&costs))
        .with_store(store.clone())
        .with_retry(config.retry.clone());

    let batch = orch.run_batch(&config).unwrap();
    assert!(batch.all_completed());
    assert_eq!(batch.experiments.len(), 9);

    let cost_path = store.write_cost_report(&costs.report()).unwrap();
    let cost_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(cost_path).unwrap()).unwrap();
    assert_eq!(cost_json["summary"]["total_calls"], 27);

    let loaded = store.load_experiments().unwrap();
    assert_eq!(loaded, batch.experiments);

    let report = AnalysisReport::build(&group_by_noise_level(&loaded), &config.analysis);
    assert_eq!(report.experiments_analyzed, 9);
    assert_eq!(report.drift_summary.len(), 3);
    // Level 0 passthrough reproduces the original exactly
    assert_eq!(report.drift_summary[0].cosine_distance.max, 0.0);
    assert!(report.drift_summary[2].cosine_distance.mean > 0.0);

    let path = store.write_analysis_report(&report).unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert!(parsed["comparative"]["pairwise_comparisons"].is_array());
    assert!(parsed["sensitivity"]["results"].is_array());
}
