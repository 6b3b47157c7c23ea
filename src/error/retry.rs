/// Retry strategies for external commands and device writes
///
/// Tool invocations against drives that are spinning up or busy can fail
/// transiently, so they are retried with a fixed pause between attempts.
/// The unrecoverable-failure path persists its boot flag with a strategy
/// that never gives up.
use std::time::Duration;

/// Retry strategy trait
pub trait RetryStrategy: Send + Sync {
    /// Whether another attempt may follow failed attempt number `attempt` (1-based)
    fn should_retry(&self, attempt: u32) -> bool;

    /// Pause before the next attempt
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Total attempts, or `None` when unbounded
    fn max_attempts(&self) -> Option<u32>;
}

/// Same delay between every attempt
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    max_attempts: Option<u32>,
    delay: Duration,
}

impl FixedDelay {
    /// At most `max_attempts` attempts in total
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
        }
    }

    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Preset for ATA tool invocations
    pub fn tool_invocation(config: &crate::EraseConfig) -> Self {
        Self::new(config.tool_retries, config.tool_retry_delay())
    }
}

impl RetryStrategy for FixedDelay {
    fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// Run `f` until it succeeds or the strategy gives up, sleeping the thread
/// between attempts. Returns the last error on exhaustion.
pub fn retry_blocking<T, E, F>(strategy: &dyn RetryStrategy, operation: &str, mut f: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if strategy.should_retry(attempt) => {
                let delay = strategy.next_delay(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = ?strategy.max_attempts(),
                    error = %e,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation, attempt, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}
