//! Re-running failed transfers with exponential backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::{InvalidStateError, TransferError, TransferTask};

/// Fraction of the base delay added or removed at random.
const JITTER: f64 = 0.25;

/// Backoff schedule for [`run_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-based), with ±25% jitter.
    ///
    /// The base grows by `backoff_factor` per attempt and stops at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let mut base = self.initial_delay.as_secs_f64().min(cap);
        for _ in 1..attempt.min(64) {
            if base >= cap {
                break;
            }
            base = (base * self.backoff_factor).min(cap);
        }
        Duration::try_from_secs_f64(base * (1.0 + JITTER * jitter_unit()))
            .unwrap_or(self.max_delay)
    }

    /// Only unclassified backend failures are worth another attempt.
    pub fn is_retryable(&self, error: &TransferError) -> bool {
        matches!(error, TransferError::Unknown { .. })
    }
}

/// Value in [-1, 1) taken from the clock's sub-second nanoseconds.
fn jitter_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos) / 500_000_000.0 - 1.0
}

/// Final task and result of [`run_with_retry`].
pub struct RetryOutcome {
    /// The task of the last attempt.
    pub task: TransferTask,
    pub attempts: u32,
    pub result: Result<(), TransferError>,
}

/// Starts `task` and waits for it, retrying retryable failures per `policy`.
///
/// `prepare` runs before every attempt with the task about to be started and
/// its 1-based attempt number, so observers can be attached to each fresh
/// task. Fails only if `task` was not pending.
pub async fn run_with_retry<F>(
    task: TransferTask,
    policy: &RetryPolicy,
    mut prepare: F,
) -> Result<RetryOutcome, InvalidStateError>
where
    F: FnMut(&TransferTask, u32),
{
    let mut task = task;
    let mut attempt = 1;
    loop {
        prepare(&task, attempt);
        task.start()?;
        let result = task.wait().await;

        match result {
            Err(error) if attempt < policy.max_attempts && policy.is_retryable(&error) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    path = %task.resource_path(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "transfer failed, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                task = task.retry()?;
                attempt += 1;
            }
            result => {
                debug!(path = %task.resource_path(), attempt, ok = result.is_ok(), "transfer finished");
                return Ok(RetryOutcome {
                    task,
                    attempts: attempt,
                    result,
                });
            }
        }
    }
}
