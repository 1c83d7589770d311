//! C3 — classifier-driven retry with jittered exponential backoff for a
//! single HTTP submission attempt.
//!
//! Grounded on the teacher's `mqk-execution::gateway` tagged-error idiom
//! (`GateRefusal`-style enums classify a situation before any action is
//! taken) generalized here to HTTP delivery outcomes, and on
//! `EffortlessMetrics-shipper::retry` for the backoff/jitter shape — the
//! exact formula below is spec-mandated and differs from the shipper's
//! `(1±jitter)` multiplicative jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Error reported by a single delivery attempt. Transport-agnostic: callers
/// construct this from whatever HTTP client they use (`From<reqwest::Error>`
/// is provided for the common case).
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Connection refused/reset, DNS failure, timeout, unreachable network,
    /// unexpected EOF — anything reported before an HTTP status was read.
    NetworkTransient(String),
    /// A response with an HTTP status code was received.
    Http { status: u16, body: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NetworkTransient(msg) => write!(f, "network error: {msg}"),
            TransportError::Http { status, body } => write!(f, "http {status}: {body}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TransportError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => TransportError::NetworkTransient(e.to_string()),
        }
    }
}

/// The four error classes spec.md §4.C3 evaluates in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    NetworkTransient,
    ClientError(u16),
    ServerError(u16),
    Unclassified,
}

impl RetryClass {
    pub fn classify(error: &TransportError) -> Self {
        match error {
            TransportError::NetworkTransient(_) => RetryClass::NetworkTransient,
            TransportError::Http { status, .. } => match status {
                400..=499 => RetryClass::ClientError(*status),
                500..=599 => RetryClass::ServerError(*status),
                _ => RetryClass::Unclassified,
            },
        }
    }

    fn retryable(self, retry_on_server_error: bool) -> bool {
        match self {
            RetryClass::NetworkTransient => true,
            RetryClass::ClientError(_) => false,
            RetryClass::ServerError(_) | RetryClass::Unclassified => retry_on_server_error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub retry_on_server_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(600),
            multiplier: 2.0,
            retry_on_server_error: true,
        }
    }
}

/// Backoff for attempt `k >= 1`: `base = min(initial * multiplier^(k-1), max)`,
/// `delay = base - base/4 + uniform(0, base/2)` — base ± 25%.
pub fn backoff_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(32);
    let scaled = config.initial_backoff.as_secs_f64() * config.multiplier.powi(pow as i32);
    let base = scaled.min(config.max_backoff.as_secs_f64());

    let jitter = rand::thread_rng().gen_range(0.0..=(base / 2.0).max(0.0));
    let delay_secs = (base - base / 4.0 + jitter).max(0.0);
    Duration::from_secs_f64(delay_secs)
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub duration: Duration,
    pub class: Option<RetryClass>,
    pub delay_applied: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Delivered { attempts: Vec<AttemptRecord> },
    Failed {
        attempts: Vec<AttemptRecord>,
        last_error: String,
    },
    /// The cancellation token fired while waiting out a backoff delay.
    Cancelled { attempts: Vec<AttemptRecord> },
}

/// Run `attempt` (1-indexed) up to `config.max_attempts` times, applying the
/// classifier and backoff rules above. `attempt` performs exactly one
/// delivery try and returns its outcome; this function owns sequencing,
/// timing, and cancellation.
pub async fn send_with_retry<F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut attempt: F,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut records = Vec::new();
    let mut cumulative = Duration::ZERO;

    for k in 1..=config.max_attempts.max(1) {
        let started = std::time::Instant::now();
        let result = attempt(k).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                records.push(AttemptRecord {
                    attempt: k,
                    duration: elapsed,
                    class: None,
                    delay_applied: None,
                });
                tracing::info!(attempt = k, duration_ms = elapsed.as_millis() as u64, "csf-retry: delivered");
                return RetryOutcome::Delivered { attempts: records };
            }
            Err(err) => {
                let class = RetryClass::classify(&err);
                let is_terminal_class = matches!(class, RetryClass::ClientError(_));
                let retryable = class.retryable(config.retry_on_server_error);
                let attempts_exhausted = k >= config.max_attempts;

                if is_terminal_class || !retryable || attempts_exhausted {
                    records.push(AttemptRecord {
                        attempt: k,
                        duration: elapsed,
                        class: Some(class),
                        delay_applied: None,
                    });
                    tracing::warn!(
                        attempt = k,
                        class = ?class,
                        error = %err,
                        "csf-retry: final failure"
                    );
                    return RetryOutcome::Failed {
                        attempts: records,
                        last_error: err.to_string(),
                    };
                }

                let delay = backoff_for_attempt(config, k);
                cumulative += delay;
                records.push(AttemptRecord {
                    attempt: k,
                    duration: elapsed,
                    class: Some(class),
                    delay_applied: Some(delay),
                });
                tracing::debug!(
                    attempt = k,
                    class = ?class,
                    delay_ms = delay.as_millis() as u64,
                    cumulative_ms = cumulative.as_millis() as u64,
                    "csf-retry: retrying after backoff"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return RetryOutcome::Cancelled { attempts: records };
                    }
                }
            }
        }
    }

    RetryOutcome::Failed {
        attempts: records,
        last_error: "max attempts exhausted".to_string(),
    }
}
