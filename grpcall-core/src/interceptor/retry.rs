use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use serde::{Deserialize, Serialize};

use super::{Interceptor, UnaryCall, UnaryFuture, UnaryInterceptor, UnaryNext};
use crate::cancellation::CANCELLED_BY_HANDLE;
use crate::{GrpcError, StatusCode};

const JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff policy for unary calls.
///
/// `max_attempts` counts the first attempt, so `1` disables retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 1.5,
            retryable_status_codes: vec![StatusCode::Unavailable],
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        self.max_backoff_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_retryable_status_codes(
        mut self,
        codes: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn is_retryable(&self, code: StatusCode) -> bool {
        self.retryable_status_codes.contains(&code)
    }

    /// Delay before the next attempt. `unit` is a sample in `[0, 1)` driving the +/-20% jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay(&self, backoff_ms: f64, unit: f64) -> Duration {
        let jitter = backoff_ms * JITTER_FACTOR * (2.0 * unit - 1.0);
        let capped = (backoff_ms + jitter).min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Re-issues a failed unary call while its status is retryable and attempts remain.
///
/// The whole downstream chain runs again on every attempt. Cancelling the call's handle
/// during a backoff sleep ends the loop with CANCELLED.
#[derive(Debug, Clone, Default)]
pub struct RetryInterceptor {
    policy: Arc<RetryPolicy>,
}

impl RetryInterceptor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Interceptor for RetryInterceptor {
    fn unary(&self) -> Option<&dyn UnaryInterceptor> {
        Some(self)
    }
}

impl UnaryInterceptor for RetryInterceptor {
    fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryFuture {
        let policy = Arc::clone(&self.policy);
        async move {
            let mut attempt: u32 = 1;
            #[allow(clippy::cast_precision_loss)]
            let mut backoff_ms = policy.initial_backoff_ms as f64;

            loop {
                let err = match next.run(call.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };
                if attempt >= policy.max_attempts || !policy.is_retryable(err.code()) {
                    return Err(err);
                }

                let delay = policy.delay(backoff_ms, rand::random::<f64>());
                tracing::debug!(
                    method = %call.method.path(),
                    attempt,
                    code = %err.code(),
                    delay_ms = delay.as_millis(),
                    "retrying call"
                );

                if !delay.is_zero() {
                    match &call.options.cancellation {
                        Some(handle) => {
                            tokio::select! {
                                biased;
                                () = handle.cancelled() => {
                                    return Err(GrpcError::cancelled(CANCELLED_BY_HANDLE));
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }

                backoff_ms *= policy.backoff_multiplier;
                attempt += 1;
            }
        }
        .boxed()
    }
}
