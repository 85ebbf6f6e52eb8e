//! Bounded retry with linear backoff.
//!
//! [`RetryState`] is the state machine: feed it each attempt's outcome and it
//! says whether to stop, wait, or give up. [`RetryPolicy::run`] drives it with
//! `tokio::time::sleep`, so tests can pause the clock and observe the exact
//! delays.

use std::future::Future;
use std::time::Duration;

use feedsift_core::ClassificationError;

/// Default attempt budget, first attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff step. The wait after attempt `n` is `n * step`.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

/// What to do after an attempt.
#[derive(Debug)]
pub enum RetryStep<T> {
    /// The attempt succeeded.
    Finished(T),
    /// The attempt failed; wait `delay` and try again.
    Wait {
        delay: Duration,
        error: ClassificationError,
    },
    /// Stop: the error is terminal or the budget is spent.
    GiveUp(ClassificationError),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    /// Delay after the given 1-based attempt fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }

    /// Longest a full run can take when every attempt uses up `per_attempt`
    /// and fails: all attempts plus every backoff between them.
    pub fn worst_case_duration(&self, per_attempt: Duration) -> Duration {
        let backoff = (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        per_attempt
            .saturating_mul(self.max_attempts)
            .saturating_add(backoff)
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempt: 1,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ClassificationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClassificationError>>,
    {
        let mut state = self.start();
        loop {
            let attempt = state.attempt();
            let outcome = op(attempt).await;

            match state.observe(outcome) {
                RetryStep::Finished(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                RetryStep::Wait { delay, error } => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryStep::GiveUp(error) => {
                    tracing::error!(operation, attempt, error = %error, "Giving up");
                    return Err(error);
                }
            }
        }
    }
}

/// Progress through one retry budget.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// The 1-based number of the attempt about to run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record the outcome of the current attempt and advance.
    pub fn observe<T>(&mut self, outcome: Result<T, ClassificationError>) -> RetryStep<T> {
        let error = match outcome {
            Ok(value) => return RetryStep::Finished(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return RetryStep::GiveUp(error);
        }

        if self.attempt >= self.policy.max_attempts {
            return RetryStep::GiveUp(exhausted(error, self.attempt));
        }

        let delay = self.policy.delay_after(self.attempt);
        self.attempt += 1;
        RetryStep::Wait { delay, error }
    }
}

/// Keep the last failure's kind, note the budget in the message.
fn exhausted(error: ClassificationError, attempts: u32) -> ClassificationError {
    match error {
        ClassificationError::TransportError(msg) => {
            ClassificationError::TransportError(format!("after {attempts} attempts: {msg}"))
        }
        ClassificationError::ParseError(msg) => {
            ClassificationError::ParseError(format!("after {attempts} attempts: {msg}"))
        }
        other => other,
    }
}
