use std::{
    fmt::Display,
    future::Future,
    time::Duration,
};

use tracing::error;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 5;


/// Retry forever with a fixed delay. Used for establishing connections, since
/// nothing supervises the writer that would restart it any sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub const fn new(delay: Duration) -> Self { Self { delay } }

    /// Runs `op` until it succeeds, logging every failure against `target`
    pub async fn run<T, E, F, Fut>(&self, target: &str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        loop {
            match op().await {
                Ok(val) => return val,
                Err(e) => {
                    error!(error = %e, delay = ?self.delay, "Cannot connect to {target}; retrying");
                    tokio::time::sleep(self.delay).await;
                },
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self { Self::new(DEFAULT_RETRY_DELAY) }
}


/// Bounded retry for writes: `max_attempts` tries in total with `delay` slept between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl BatchRetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self { Self { max_attempts, delay } }

    /// Whether another attempt is allowed after `attempt` (1 based) failed
    pub fn should_retry(&self, attempt: u32) -> bool { attempt < self.max_attempts.max(1) }

    pub async fn backoff(&self) { tokio::time::sleep(self.delay).await }
}

impl Default for BatchRetryPolicy {
    fn default() -> Self { Self::new(DEFAULT_WRITE_ATTEMPTS, DEFAULT_RETRY_DELAY) }
}
