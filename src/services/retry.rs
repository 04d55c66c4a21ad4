use std::future::Future;
use std::time::Duration;

use super::poll::Clock;
use super::transport::TransportError;

/// Capped exponential backoff for idempotent reads.
///
/// Uploads, submissions and downloads never go through this: repeating
/// them could duplicate server-side work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Why [`with_retries_until`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Permanent error, or the retry budget ran out.
    #[error(transparent)]
    Failed(#[from] TransportError),

    /// The next backoff would end at or past the deadline.
    #[error("deadline reached after {attempts} attempts: {last}")]
    DeadlineReached { attempts: u32, last: TransportError },
}

impl RetryError {
    pub fn into_transport(self) -> TransportError {
        match self {
            RetryError::Failed(e) | RetryError::DeadlineReached { last: e, .. } => e,
        }
    }
}

/// Run `op`, retrying transient failures according to `policy`.
pub async fn with_retries<C, F, Fut, T>(
    clock: &C,
    policy: RetryPolicy,
    what: &str,
    op: F,
) -> Result<T, TransportError>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    with_retries_until(clock, policy, None, what, op)
        .await
        .map_err(RetryError::into_transport)
}

/// Like [`with_retries`], but never sleeps across `deadline` (a
/// [`Clock::now`] value). A transient failure whose backoff would reach it
/// ends the loop with [`RetryError::DeadlineReached`].
pub async fn with_retries_until<C, F, Fut, T>(
    clock: &C,
    policy: RetryPolicy,
    deadline: Option<Duration>,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry < policy.max_retries => {
                let delay = policy.backoff(retry + 1);
                if deadline.is_some_and(|d| clock.now().saturating_add(delay) >= d) {
                    return Err(RetryError::DeadlineReached {
                        attempts: retry + 1,
                        last: e,
                    });
                }

                retry += 1;
                tracing::warn!(
                    request = what,
                    retry,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                clock.sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
