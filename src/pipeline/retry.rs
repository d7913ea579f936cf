// Bounded retry with exponential backoff and per-attempt timeouts
//
// Each attempt runs on its own thread and hands its result over a rendezvous
// channel; the caller waits with `recv_timeout`. An attempt that outlives its
// timeout is counted as transient. The hand-off fails exactly when the caller
// has given up, and the attempt thread then bills whatever usage the late
// result reported under the same attempt number.

use super::{AttemptKind, AttemptRecord, CancellationToken};
use crate::config::RetryPolicy;
use crate::cost::{CostAccumulator, CostContext};
use crate::service::{ServiceError, StageOutput, TokenUsage, TransformService};
use crossbeam::channel::{self, RecvTimeoutError, SendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Terminal result of a retried call
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Success {
        output: StageOutput,
        attempts: Vec<AttemptRecord>,
    },
    Failed {
        reason: String,
        attempts: Vec<AttemptRecord>,
    },
    /// Cancelled before or between attempts
    Cancelled { attempts: Vec<AttemptRecord> },
}

impl RetryOutcome {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => attempts,
        }
    }
}

enum AttemptError {
    Service(ServiceError),
    Timeout(Duration),
    Panicked,
}

/// Runs one stage call under a [`RetryPolicy`], billing every attempt
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    costs: &'a Arc<CostAccumulator>,
    cancel: &'a CancellationToken,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(
        policy: &'a RetryPolicy,
        costs: &'a Arc<CostAccumulator>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            policy,
            costs,
            cancel,
        }
    }

    /// Call `service` until success, a fatal error, exhaustion or cancellation
    ///
    /// `ctx.attempt` is overwritten per attempt.
    pub fn execute(
        &self,
        service: &Arc<dyn TransformService>,
        ctx: CostContext<'_>,
        input_text: &str,
    ) -> RetryOutcome {
        let mut attempts = Vec::new();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }

            let started = Instant::now();
            let late = LateBilling {
                costs: Arc::clone(self.costs),
                skill_id: ctx.skill_id.to_string(),
                stage_index: ctx.stage_index,
                noise_level: ctx.noise_level,
                repetition: ctx.repetition,
                attempt,
            };
            let result = call_with_timeout(
                Arc::clone(service),
                input_text,
                self.policy.attempt_timeout(),
                late,
            );
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (kind, usage, error) = match &result {
                Ok(output) => (AttemptKind::Ok, output.usage, None),
                Err(AttemptError::Service(err)) => {
                    let kind = if err.is_transient() {
                        AttemptKind::Transient
                    } else {
                        AttemptKind::Fatal
                    };
                    (kind, err.usage(), Some(describe(err)))
                }
                Err(AttemptError::Timeout(limit)) => (
                    AttemptKind::Timeout,
                    TokenUsage::default(),
                    Some(format!("attempt timed out after {} ms", limit.as_millis())),
                ),
                Err(AttemptError::Panicked) => (
                    AttemptKind::Fatal,
                    TokenUsage::default(),
                    Some("service panicked".to_string()),
                ),
            };

            let cost = if usage.is_zero() {
                0.0
            } else {
                self.costs.record(
                    CostContext { attempt, ..ctx },
                    usage.input_tokens,
                    usage.output_tokens,
                )
            };

            attempts.push(AttemptRecord {
                attempt,
                kind,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cost,
                elapsed_ms,
                error: error.clone(),
            });

            let reason = match result {
                Ok(output) => return RetryOutcome::Success { output, attempts },
                Err(_) => error.unwrap_or_default(),
            };

            if kind == AttemptKind::Fatal {
                warn!(
                    skill = ctx.skill_id,
                    stage = ctx.stage_index,
                    attempt,
                    reason = %reason,
                    "fatal service error, not retrying"
                );
                return RetryOutcome::Failed { reason, attempts };
            }

            if attempt == max_attempts {
                warn!(
                    skill = ctx.skill_id,
                    stage = ctx.stage_index,
                    attempts = attempt,
                    reason = %reason,
                    "retries exhausted"
                );
                return RetryOutcome::Failed {
                    reason: format!("retries exhausted after {} attempts: {}", attempt, reason),
                    attempts,
                };
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                skill = ctx.skill_id,
                stage = ctx.stage_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "transient failure, backing off"
            );
            if !self.sleep_unless_cancelled(delay) {
                return RetryOutcome::Cancelled { attempts };
            }
        }

        // max_attempts >= 1, so the loop always returns
        RetryOutcome::Cancelled { attempts }
    }

    /// Returns false when cancelled during the wait
    fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

fn describe(err: &ServiceError) -> String {
    match err.reason().trim() {
        "" if err.is_transient() => "unspecified transient service error".to_string(),
        "" => "unspecified fatal service error".to_string(),
        reason => reason.to_string(),
    }
}

/// Cost context of an attempt, owned by its thread
struct LateBilling {
    costs: Arc<CostAccumulator>,
    skill_id: String,
    stage_index: usize,
    noise_level: u8,
    repetition: u32,
    attempt: u32,
}

impl LateBilling {
    fn record(&self, result: &Result<StageOutput, ServiceError>) {
        let usage = match result {
            Ok(output) => output.usage,
            Err(err) => err.usage(),
        };
        if usage.is_zero() {
            return;
        }
        let cost = self.costs.record(
            CostContext {
                skill_id: &self.skill_id,
                stage_index: self.stage_index,
                noise_level: self.noise_level,
                repetition: self.repetition,
                attempt: self.attempt,
            },
            usage.input_tokens,
            usage.output_tokens,
        );
        debug!(
            skill = %self.skill_id,
            stage = self.stage_index,
            attempt = self.attempt,
            cost,
            "billed result of timed-out attempt"
        );
    }
}

fn call_with_timeout(
    service: Arc<dyn TransformService>,
    input_text: &str,
    timeout: Duration,
    late: LateBilling,
) -> Result<StageOutput, AttemptError> {
    let (tx, rx) = channel::bounded(0);
    let input_text = input_text.to_string();

    thread::spawn(move || {
        let result = service.invoke(&late.skill_id, &input_text);
        if let Err(SendError(result)) = tx.send(result) {
            late.record(&result);
        }
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(AttemptError::Service),
        Err(RecvTimeoutError::Timeout) => Err(AttemptError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(AttemptError::Panicked),
    }
}
