//! Retry with backoff for fallible async operations.
//!
//! [`with_retry`] runs an operation until it succeeds, the error is not worth
//! retrying, or the attempt budget is spent. Between attempts it sleeps for
//! [`BackoffPolicy::calculate_delay`].
//!
//! ```rust
//! use agentwire_core::retry::{with_retry, BackoffPolicy, RetryPredicate};
//! use agentwire_core::error::WireResult;
//!
//! # async fn example() -> WireResult<()> {
//! let policy = BackoffPolicy::default();
//! let value = with_retry(&policy, &RetryPredicate::Default, |_attempt| async {
//!     Ok::<_, agentwire_core::WireError>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{WireError, WireResult};

/// How the delay grows between attempts.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// `base * 2^(attempt - 1)`
    Exponential,
    /// `base * attempt`
    Linear,
    /// Always `base`
    Constant,
    /// Caller-supplied delay for a 1-based attempt number
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "Exponential"),
            Self::Linear => write!(f, "Linear"),
            Self::Constant => write!(f, "Constant"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay unit for the strategy
    pub base_delay: Duration,
    /// Upper bound applied before jitter
    pub max_delay: Duration,
    /// Delay growth
    pub strategy: BackoffStrategy,
    /// Add up to 25% random delay on top of the capped value
    pub jitter: bool,
}

/// Retries after the first attempt in the default policy.
pub const DEFAULT_RETRIES: u32 = 3;

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRIES + 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            strategy: BackoffStrategy::Exponential,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base and maximum delays.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the growth strategy.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match &self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Custom(delay) => delay(attempt),
        };

        let capped = raw.min(self.max_delay);
        if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..=0.25);
            capped.saturating_add(capped.mul_f64(extra))
        } else {
            capped
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Decides whether an error is worth another attempt.
#[derive(Clone, Default)]
pub enum RetryPredicate {
    /// [`WireError::is_retryable`]
    #[default]
    Default,
    /// Never retry
    Never,
    /// Caller-supplied predicate
    Custom(Arc<dyn Fn(&WireError) -> bool + Send + Sync>),
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Never => write!(f, "Never"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl RetryPredicate {
    /// Wrap a closure.
    pub fn custom(predicate: impl Fn(&WireError) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    /// Apply the predicate.
    pub fn should_retry(&self, error: &WireError) -> bool {
        match self {
            Self::Default => error.is_retryable(),
            Self::Never => false,
            Self::Custom(predicate) => predicate(error),
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Retried<T> {
    /// Final result: the first success or the last error
    pub result: WireResult<T>,
    /// Number of attempts made
    pub attempts: u32,
}

/// Run `operation` under `policy`, reporting how many attempts were made.
///
/// The operation receives the 1-based attempt number.
pub async fn run_with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    retry_if: &RetryPredicate,
    operation: F,
) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WireResult<T>>,
{
    retry_loop(policy, retry_if, operation, |policy, attempt, _| {
        policy.calculate_delay(attempt)
    })
    .await
}

/// Run `operation` under `policy` and return its final result.
pub async fn with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    retry_if: &RetryPredicate,
    operation: F,
) -> WireResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WireResult<T>>,
{
    run_with_retry(policy, retry_if, operation).await.result
}

/// Like [`run_with_retry`], but honours a server's `Retry-After` hint.
///
/// When the error carries [`WireError::retry_after`], that delay is used
/// instead of the computed one.
pub async fn run_with_rate_limit_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    retry_if: &RetryPredicate,
    operation: F,
) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WireResult<T>>,
{
    retry_loop(policy, retry_if, operation, |policy, attempt, error| {
        error
            .retry_after()
            .unwrap_or_else(|| policy.calculate_delay(attempt))
    })
    .await
}

/// Like [`with_retry`], but honours a server's `Retry-After` hint.
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    retry_if: &RetryPredicate,
    operation: F,
) -> WireResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WireResult<T>>,
{
    run_with_rate_limit_retry(policy, retry_if, operation)
        .await
        .result
}

async fn retry_loop<T, F, Fut, D>(
    policy: &BackoffPolicy,
    retry_if: &RetryPredicate,
    mut operation: F,
    delay_for: D,
) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WireResult<T>>,
    D: Fn(&BackoffPolicy, u32, &WireError) -> Duration,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(error) if attempt < max_attempts && retry_if.should_retry(&error) => {
                let delay = delay_for(policy, attempt, &error);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if attempt > 1 {
                    warn!(attempts = attempt, "Giving up after retries: {}", error);
                }
                return Retried {
                    result: Err(error),
                    attempts: attempt,
                };
            }
        }
    }
}
