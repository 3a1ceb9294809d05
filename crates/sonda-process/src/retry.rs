use std::future::Future;
use std::time::Duration;

/// Delay curve applied between two attempts of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// Wait the same amount of time between attempts.
    Constant(Duration),

    /// Double the delay after each attempt, up to `max`.
    Exponential {
        /// Delay after the first failed attempt.
        initial: Duration,

        /// Upper bound of the delay.
        max: Duration,
    },
}

impl Backoff {
    /// Returns the delay to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => delay,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Policy for retrying failed debug information uploads.
///
/// The default policy performs a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy performing at most `max_attempts` attempts.
    ///
    /// A value of zero is treated as one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Creates a policy performing a single attempt.
    pub fn never() -> Self {
        Self::new(1, Backoff::None)
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay curve between attempts.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Runs `op` until it succeeds or the attempts are exhausted.
    ///
    /// The number of performed attempts is returned along with the outcome
    /// of the last attempt.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(v) => break (Ok(v), attempt),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);

                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break (Err(e), attempt),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never()
    }
}
