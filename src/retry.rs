//! Retry policies and the per-invocation retry state.
//!
//! A [`RetryPolicy`] is the stateless description of how long to wait before
//! each retry. A [`RetryState`] is allocated fresh at the start of every
//! top-level invocation and carries the mutable budget: retry count, start
//! instant, and the caps. Budgets therefore never leak between unrelated
//! calls, and a shared policy can drive any number of concurrent
//! invocations.
//!
//! Decode-triggered retry-signals and transport-failure signals draw from
//! the same budget.

use crate::Error;
use rand::Rng;
use std::time::{Duration, Instant};

/// A recoverable failure, asking for another attempt.
///
/// Carries the error behind the failed attempt and, when the server
/// suggested one, a preferred wait before retrying.
#[derive(Debug)]
pub struct RetrySignal {
    /// Server-suggested wait before the next attempt, e.g. from
    /// `Retry-After`. Takes precedence over the policy-computed backoff,
    /// capped by the configured maximum.
    pub retry_after: Option<Duration>,
    /// The error behind the failed attempt; rethrown when the budget runs
    /// out.
    pub cause: Box<Error>,
}

impl RetrySignal {
    /// A signal with no suggested wait.
    pub fn new(cause: Error) -> Self {
        Self {
            retry_after: None,
            cause: Box::new(cause),
        }
    }

    /// A signal carrying a server-suggested wait.
    pub fn with_retry_after(cause: Error, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            cause: Box::new(cause),
        }
    }

    /// Unwraps the underlying cause.
    pub fn into_cause(self) -> Error {
        *self.cause
    }
}

/// When and how long to wait between attempts.
///
/// # Examples
///
/// ```
/// use beckon::RetryPolicy;
/// use std::time::Duration;
///
/// // The default: 100ms growing 1.5x per retry, capped at 1s, 4 retries.
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(150)));
/// assert_eq!(policy.delay_for_attempt(5), None);
/// ```
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Never retry.
    None,

    /// Multiplicatively increasing delay with a cap.
    ///
    /// Retry `n` waits `initial_delay * multiplier^(n-1)`, capped at
    /// `max_delay`. Deterministic from the attempt index unless `jitter` is
    /// set, which scales each delay by a random factor in `0.5..=1.0` to
    /// spread out thundering herds.
    ExponentialBackoff {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Number of retries after the initial attempt.
        max_retries: usize,
        /// Growth factor per retry.
        multiplier: f64,
        /// Randomize delays.
        jitter: bool,
    },

    /// A fixed delay between attempts.
    Linear {
        /// The delay before every retry.
        delay: Duration,
        /// Number of retries after the initial attempt.
        max_retries: usize,
    },

    /// Custom logic: attempt number in (1-indexed), `Some(delay)` to retry
    /// after the delay, `None` to stop.
    Custom {
        /// Function that determines the delay for each retry.
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_retries: 4,
            multiplier: 1.5,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before the given retry, or `None` when the policy
    /// is exhausted.
    ///
    /// `attempt` is the retry number, 1-indexed: `1` is the first retry,
    /// i.e. the second attempt overall.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                multiplier,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay = initial_delay.mul_f64(factor).min(*max_delay);
                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryPolicy::Linear { delay, max_retries } => {
                (attempt <= *max_retries).then_some(*delay)
            }
            RetryPolicy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// The maximum number of retries, when the policy knows it.
    pub fn max_retries(&self) -> Option<usize> {
        match self {
            RetryPolicy::None => Some(0),
            RetryPolicy::ExponentialBackoff { max_retries, .. } => Some(*max_retries),
            RetryPolicy::Linear { max_retries, .. } => Some(*max_retries),
            RetryPolicy::Custom { .. } => None,
        }
    }
}

/// The mutable retry budget of one invocation.
///
/// Created at invocation start, discarded at its end, never shared.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    retries: usize,
    started: Instant,
    max_elapsed: Option<Duration>,
    retry_after_cap: Duration,
}

impl RetryState {
    /// Starts a fresh budget.
    ///
    /// `max_elapsed` bounds the total invocation lifetime across attempts;
    /// `retry_after_cap` bounds how long a server-suggested `Retry-After`
    /// may stall a retry.
    pub fn new(
        policy: RetryPolicy,
        max_elapsed: Option<Duration>,
        retry_after_cap: Duration,
    ) -> Self {
        Self {
            policy,
            retries: 0,
            started: Instant::now(),
            max_elapsed,
            retry_after_cap,
        }
    }

    /// Consults the budget with a retry-signal.
    ///
    /// `Some(delay)` permits another attempt after the delay; `None` means
    /// the budget is exhausted and the signal's cause must surface. The
    /// elapsed-time bound counts the wait about to be granted, so a long
    /// server-suggested delay cannot stall an invocation past its bound.
    pub fn consider(&mut self, signal: &RetrySignal) -> Option<Duration> {
        self.retries += 1;
        let computed = self.policy.delay_for_attempt(self.retries)?;
        let delay = match signal.retry_after {
            Some(suggested) => suggested.min(self.retry_after_cap),
            None => computed,
        };
        if let Some(max) = self.max_elapsed {
            if self.started.elapsed() + delay >= max {
                return None;
            }
        }
        Some(delay)
    }

    /// How many retries this budget has granted or been asked about.
    pub fn retries(&self) -> usize {
        self.retries
    }
}
