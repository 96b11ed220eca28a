//! Retry policy and the shared "call external service with policy" helper.
//!
//! Every stage goes through [`call_with_policy`] for its external calls, so
//! timeouts, backoff and retry classification behave the same everywhere.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::adapters::ExternalError;
use crate::domain::ErrorKind;

/// Retry policy for one class of external call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Error kinds worth another attempt
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorKind>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_timeout() -> u64 {
    30_000
}
fn default_retryable() -> Vec<ErrorKind> {
    vec![ErrorKind::TransientExternal]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_ms: default_timeout(),
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn is_retryable(&self, error: &ExternalError) -> bool {
        self.retryable.contains(&error.kind())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A successful call and how many attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error once retries are exhausted (or a non-retryable error)
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub error: ExternalError,
    pub attempts: u32,
}

impl CallFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

/// Run `call` under `policy`: bounded timeout per attempt, exponential
/// backoff between attempts, retry only on the policy's retryable kinds.
///
/// A timeout counts as a transient failure.
pub async fn call_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<Attempted<T>, CallFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let error = match tokio::time::timeout(policy.timeout(), call(attempt)).await {
            Ok(Ok(value)) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Ok(Err(error)) => error,
            Err(_) => ExternalError::Timeout(policy.timeout()),
        };

        if policy.is_retryable(&error) && policy.should_retry(attempt) {
            let delay = policy.delay_for_attempt(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "External call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err(CallFailure {
            error,
            attempts: attempt,
        });
    }
}
