//! Retry Policy
//!
//! Only `GatewayUnavailable` is retried. A retried checkout resends the same
//! request, so the provider sees the same idempotency key and deduplicates.

use std::time::Duration;

use crate::checkout::CheckoutRequest;
use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::session::CheckoutSession;

/// Exponential backoff settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,

    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling and capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Create a checkout session, retrying transient gateway failures
pub async fn create_session_with_retry(
    gateway: &dyn PaymentGateway,
    request: &CheckoutRequest,
    policy: &RetryPolicy,
) -> Result<CheckoutSession> {
    let mut attempt = 1;
    loop {
        match gateway.create_session(request).await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    idempotency_key = %request.idempotency_key,
                    error = %err,
                    "Retrying checkout session creation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
