//! Reconnect policy: which failures earn another attempt, and how long to wait.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tether_types::{CorrelationError, DispatchError, FailureCause};

/// Bounded retry budget with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts after the first (0 = no retries).
    pub max_retries: u32,
    /// Delay in milliseconds before the first reconnect.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
    /// Spread delays by ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Total attempts a call may make, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Returns `true` if the failure is transient and a fresh session may succeed.
///
/// Timeouts while correlating are only retried when `redispatch_on_timeout`
/// is set, since the peer may already have executed the request.
pub fn is_retryable(cause: &FailureCause, redispatch_on_timeout: bool) -> bool {
    match cause {
        FailureCause::Transport(_) => true,
        // A fresh stream may announce a usable endpoint
        FailureCause::Negotiation(_) => true,
        FailureCause::Dispatch(e) => matches!(e, DispatchError::Transport(_)),
        FailureCause::Correlation(CorrelationError::Timeout { .. }) => redispatch_on_timeout,
        FailureCause::Correlation(
            CorrelationError::StreamClosed { .. } | CorrelationError::ServerError { .. },
        ) => true,
        FailureCause::Cancelled => false,
    }
}

/// Delay in milliseconds before reconnect attempt `attempt` (0-based).
///
/// `initial_delay_ms * backoff_factor^attempt`, clamped to `max_delay_ms`,
/// with optional ±25% jitter.
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_delay_ms as f64 * config.backoff_factor.powi(attempt as i32);
    let clamped = base.min(config.max_delay_ms as f64);

    let delayed = if config.jitter {
        clamped * rand::rng().random_range(0.75..=1.25)
    } else {
        clamped
    };

    (delayed as u64).min(config.max_delay_ms)
}
