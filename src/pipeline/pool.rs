// Bounded worker pool
//
// Jobs flow through a bounded crossbeam channel into `workers` scoped threads;
// finished experiments come back on an unbounded channel and are sorted by
// (noise_level, repetition) so batch output does not depend on scheduling.

use super::orchestrator::PipelineOrchestrator;
use super::Experiment;
use crate::error::InputError;
use crossbeam::channel;
use std::thread;
use tracing::debug;

/// One experiment to schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentJob {
    pub noise_level: u8,
    pub repetition: u32,
    pub seed: u64,
}

/// Run `jobs` on a bounded pool and return experiments in job-key order
pub fn run_jobs(
    orchestrator: &PipelineOrchestrator,
    original_text: &str,
    skills: &[String],
    jobs: Vec<ExperimentJob>,
    workers: usize,
    queue_capacity: usize,
) -> Result<Vec<Experiment>, InputError> {
    let workers = workers.max(1).min(jobs.len().max(1));
    let (job_tx, job_rx) = channel::bounded::<ExperimentJob>(queue_capacity.max(1));
    let (result_tx, result_rx) = channel::unbounded();

    thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for job in job_rx.iter() {
                    debug!(
                        worker,
                        noise_level = job.noise_level,
                        repetition = job.repetition,
                        "job picked up"
                    );
                    let result = orchestrator.run_chain(
                        job.repetition,
                        original_text,
                        i64::from(job.noise_level),
                        job.seed,
                        skills,
                    );
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        // Blocks while the queue is full: backpressure on the producer
        for job in jobs {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let mut experiments = result_rx.iter().collect::<Result<Vec<_>, _>>()?;
    experiments.sort_by_key(|e| (e.noise_level, e.repetition));
    Ok(experiments)
}
