use anyhow::{bail, Context, Result};
use clap::Parser;
use semdrift::analysis::AnalysisReport;
use semdrift::cli::{AnalyzeArgs, Cli, Command, NoiseSelection, RunArgs, ServiceArg};
use semdrift::config::{ExperimentConfig, ServiceKind};
use semdrift::cost::CostAccumulator;
use semdrift::error::InputError;
use semdrift::persistence::ResultStore;
use semdrift::pipeline::{group_by_noise_level, PipelineOrchestrator};
use semdrift::service::{CommandService, PassthroughService, TransformService};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` raises the level to trace
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::from_file(path),
        None => Ok(ExperimentConfig::default()),
    }
}

fn build_service(config: &ExperimentConfig) -> Result<Arc<dyn TransformService>> {
    match config.service {
        ServiceKind::Passthrough => Ok(Arc::new(PassthroughService)),
        ServiceKind::Command => match CommandService::from_argv(&config.service_command) {
            Some(service) => Ok(Arc::new(
                service.with_timeout(config.retry.attempt_timeout()),
            )),
            None => bail!("service = \"command\" requires a non-empty service_command"),
        },
    }
}

fn apply_run_overrides(mut config: ExperimentConfig, args: &RunArgs) -> Result<ExperimentConfig> {
    if let NoiseSelection::Level(level) = args.noise {
        let level = u8::try_from(level)
            .ok()
            .filter(|l| *l <= 100)
            .ok_or(InputError::InvalidNoiseLevel { level })?;
        config = config.with_noise_levels(vec![level]);
    }
    config = config.with_seed(args.seed);
    if let Some(output) = &args.output {
        config = config.with_output_dir(output);
    }
    if let Some(service) = args.service {
        config = config.with_service(match service {
            ServiceArg::Passthrough => ServiceKind::Passthrough,
            ServiceArg::Command => ServiceKind::Command,
        });
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(repetitions) = args.repetitions {
        config = config.with_repetitions(repetitions);
    }
    config.validate()?;
    Ok(config)
}

fn write_report(store: &ResultStore, report: &AnalysisReport) -> Result<()> {
    let path = store
        .write_analysis_report(report)
        .context("Failed to write analysis report")?;
    println!("Analysis report: {}", path.display());
    for failure in &report.failures {
        eprintln!("analysis step '{}' failed: {}", failure.statistic, failure.reason);
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let config = apply_run_overrides(load_config(args.config.as_deref())?, &args)?;
    let service = build_service(&config)?;
    let costs = Arc::new(CostAccumulator::new(config.pricing.clone()));
    let store = ResultStore::new(&config.output_dir);

    let orchestrator = PipelineOrchestrator::new(service, Arc::clone(&costs))
        .with_store(store.clone())
        .with_retry(config.retry.clone());
    let batch = orchestrator.run_batch(&config)?;

    let cost_path = store
        .write_cost_report(&costs.report())
        .context("Failed to write cost report")?;
    let report = AnalysisReport::build(&batch.by_noise_level(), &config.analysis);
    write_report(&store, &report)?;

    let failed: Vec<_> = batch.failed().collect();
    println!(
        "Experiments: {} completed, {} failed",
        batch.experiments.len() - failed.len(),
        failed.len()
    );
    for experiment in &failed {
        eprintln!("{}: {:?}", experiment.id(), experiment.status);
    }
    println!("Total cost: ${:.6} ({})", costs.total_cost(), cost_path.display());

    if failed.is_empty() && report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn analyze(args: AnalyzeArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(output) = &args.output {
        config = config.with_output_dir(output);
    }
    let store = ResultStore::new(&config.output_dir);
    let experiments = store
        .load_experiments()
        .with_context(|| format!("Failed to load experiments from {}", store.root().display()))?;
    if experiments.is_empty() {
        bail!("no experiments found under {}", store.root().display());
    }

    let report = AnalysisReport::build(&group_by_noise_level(&experiments), &config.analysis);
    write_report(&store, &report)?;
    println!(
        "Analysed {} experiments ({} excluded)",
        report.experiments_analyzed,
        report.excluded_experiments.len()
    );

    let all_completed = experiments.iter().all(|e| e.is_completed());
    if all_completed && report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Analyze(args) => analyze(args),
    }
}
