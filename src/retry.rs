//! Retry wrapper for flaky payloads.
//!
//! The composition engine itself never retries. [`Retry`] is an ordinary
//! payload that re-invokes the payload it wraps when a failure is
//! retryable, sleeping between attempts according to a [`RetryPolicy`]
//! (exponential backoff with jitter).

use crate::dispatch::guarded;
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, Payload, PayloadOutput};
use crate::PipelineError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether an error should be retried.
pub type RetryIf = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Backoff schedule for [`Retry`].
///
/// # Example
///
/// ```
/// use llm_runnable::retry::{JitterStrategy, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::standard().with_jitter(JitterStrategy::None);
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,

    /// Upper bound on a single delay.
    pub max_delay: Duration,

    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

/// Jitter applied to each computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Delay is exactly the calculated value.
    None,

    /// Random value in `[0, calculated_delay]`.
    Full,

    /// `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// 3 retries, 500ms initial, 2x multiplier, 30s max, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::Full,
        }
    }

    /// Retry up to `max_retries` times with the standard schedule.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::standard()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay before retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Re-invokes a payload on retryable failures.
///
/// By default an error is retried when [`PipelineError::is_retryable`]
/// holds. Cancellation is never retried and interrupts the backoff sleep.
pub struct Retry {
    inner: Arc<dyn Payload>,
    policy: RetryPolicy,
    retry_if: Option<RetryIf>,
}

impl Retry {
    pub fn new<P: Payload + 'static>(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(inner),
            policy,
            retry_if: None,
        }
    }

    /// Retry only errors for which `f` returns true.
    pub fn retry_if(
        mut self,
        f: impl Fn(&PipelineError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_if = Some(Arc::new(f));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, err: &PipelineError) -> bool {
        if matches!(err, PipelineError::Cancelled) {
            return false;
        }
        match &self.retry_if {
            Some(f) => f(err),
            None => err.is_retryable(),
        }
    }

    async fn run(&self, ctx: &ExecCtx, input: Value) -> Result<PayloadOutput> {
        let name = self.inner.name();
        let mut attempt: u32 = 0;
        loop {
            let err = match self.inner.invoke(ctx, input.clone()).await {
                Ok(out) => {
                    if attempt > 0 {
                        emit(
                            &ctx.event_handler,
                            Event::RetryEnd {
                                name: name.to_string(),
                                attempts: attempt,
                                success: true,
                            },
                        );
                    }
                    return Ok(out);
                }
                Err(err) => err,
            };

            if attempt >= self.policy.max_retries || !self.should_retry(&err) {
                if attempt > 0 {
                    warn!(unit = name, attempts = attempt, error = %err, "retries exhausted");
                    emit(
                        &ctx.event_handler,
                        Event::RetryEnd {
                            name: name.to_string(),
                            attempts: attempt,
                            success: false,
                        },
                    );
                }
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            attempt += 1;
            debug!(unit = name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            emit(
                &ctx.event_handler,
                Event::RetryStart {
                    name: name.to_string(),
                    attempt,
                    reason: err.to_string(),
                },
            );
            guarded(ctx, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }
    }
}

impl Payload for Retry {
    fn kind(&self) -> &'static str {
        "retry"
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(self.run(ctx, input))
    }
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("inner", &self.inner.name())
            .field("policy", &self.policy)
            .field("has_retry_if", &self.retry_if.is_some())
            .finish()
    }
}
