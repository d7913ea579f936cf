//! Transformation service boundary
//!
//! A stage is an opaque call `invoke(skill_id, input) -> output + token usage`.
//! The pipeline never inspects the output; it only retries, times out and
//! bills the call.

use crossbeam::channel::{self, Receiver};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Exit status an external service uses to request a retry (`EX_TEMPFAIL`)
pub const EXIT_TRANSIENT: i32 = 75;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long a killed child's pipes may take to close
const KILL_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Successful stage output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub output_text: String,
    pub usage: TokenUsage,
}

/// Service failure, possibly after consuming tokens
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Rate limit, network, timeout: worth retrying
    #[error("transient service error: {reason}")]
    Transient { reason: String, usage: TokenUsage },

    /// Authentication, validation: never retried
    #[error("fatal service error: {reason}")]
    Fatal { reason: String, usage: TokenUsage },
}

impl ServiceError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } | Self::Fatal { reason, .. } => reason,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::Transient { usage, .. } | Self::Fatal { usage, .. } => *usage,
        }
    }
}

/// One-method transformation service
pub trait TransformService: Send + Sync {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError>;
}

/// Rough whitespace token count, used when a service reports no usage
pub fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Returns its input unchanged; usage is estimated from word counts
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughService;

impl TransformService for PassthroughService {
    fn invoke(&self, _skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        let tokens = estimate_tokens(input_text);
        Ok(StageOutput {
            output_text: input_text.to_string(),
            usage: TokenUsage::new(tokens, tokens),
        })
    }
}

/// External program: input on stdin, output on stdout
///
/// The skill is passed as `--skill <id>` after the configured arguments.
/// Exit status [`EXIT_TRANSIENT`] is transient, any other failure is fatal.
/// If the last non-empty stderr line is a JSON object with `input_tokens` and
/// `output_tokens`, it is taken as the reported usage.
///
/// With a timeout, a child still running at the deadline is killed and the
/// call fails as transient, carrying any usage it printed before dying.
#[derive(Debug, Clone)]
pub struct CommandService {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct ReportedUsage {
    input_tokens: u64,
    output_tokens: u64,
}

fn parse_usage(stderr: &str) -> Option<TokenUsage> {
    let line = stderr.lines().rev().find(|l| !l.trim().is_empty())?;
    let reported: ReportedUsage = serde_json::from_str(line.trim()).ok()?;
    Some(TokenUsage::new(reported.input_tokens, reported.output_tokens))
}

impl CommandService {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build from `[program, args...]`
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// `None` when the deadline passed and the child was killed
    fn wait_or_kill(&self, child: &mut Child) -> Result<Option<ExitStatus>, ServiceError> {
        let Some(timeout) = self.timeout else {
            return child.wait().map(Some).map_err(wait_failed);
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(wait_failed)? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                // Fails only if the child exited in between, which is fine
                if let Err(e) = child.kill() {
                    debug!(program = %self.program, error = %e, "kill after deadline failed");
                }
                child.wait().map_err(wait_failed)?;
                return Ok(None);
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

fn wait_failed(e: std::io::Error) -> ServiceError {
    ServiceError::transient(format!("failed to wait for service: {}", e))
}

/// Read a child pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!(error = %e, "service pipe read failed");
            }
        }
        let _ = tx.send(buf);
    });
    rx
}

impl TransformService for CommandService {
    fn invoke(&self, skill_id: &str, input_text: &str) -> Result<StageOutput, ServiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--skill")
            .arg(skill_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ServiceError::fatal(format!("failed to spawn {}: {}", self.program, e)))?;

        let writer = child.stdin.take().map(|mut stdin| {
            let input = input_text.to_string();
            thread::spawn(move || stdin.write_all(input.as_bytes()))
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let Some(status) = self.wait_or_kill(&mut child)? else {
            let stderr = stderr.recv_timeout(KILL_GRACE).unwrap_or_default();
            let usage = parse_usage(&String::from_utf8_lossy(&stderr)).unwrap_or_default();
            let limit_ms = self.timeout.map_or(0, |t| t.as_millis() as u64);
            warn!(skill = skill_id, program = %self.program, limit_ms, "service killed after deadline");
            return Err(ServiceError::Transient {
                reason: format!("service killed after {} ms", limit_ms),
                usage,
            });
        };

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(ServiceError::transient(format!(
                        "failed to write service input: {}",
                        e
                    )));
                }
                _ => {}
            }
        }

        let stdout = stdout.recv().unwrap_or_default();
        let stderr = stderr.recv().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr);
        let usage = parse_usage(&stderr).unwrap_or_default();
        debug!(
            skill = skill_id,
            status = ?status.code(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "service command finished"
        );

        if !status.success() {
            let reason = stderr
                .lines()
                .find(|l| !l.trim().is_empty() && parse_usage(l).is_none())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("exited with {}", status));
            return Err(match status.code() {
                Some(EXIT_TRANSIENT) => ServiceError::Transient { reason, usage },
                _ => ServiceError::Fatal { reason, usage },
            });
        }

        let output_text = String::from_utf8(stdout)
            .map_err(|_| ServiceError::Fatal {
                reason: "service output is not valid UTF-8".to_string(),
                usage,
            })?
            .trim_end_matches(['\n', '\r'])
            .to_string();

        Ok(StageOutput { output_text, usage })
    }
}
