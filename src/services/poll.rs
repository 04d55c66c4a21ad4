//! Time-bounded, cancellable polling.
//!
//! The loop only sees time through [`Clock`], so tests drive it with a
//! [`ManualClock`] that advances on `sleep` instead of waiting.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    elapsed_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.elapsed_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Externally settable stop request, checked once per poll iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, PartialEq)]
pub enum PollOutcome<T> {
    Done { value: T, attempts: u32 },
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled { attempts: u32 },
}

/// Call `step` every `interval` until it yields a value, fails, the
/// `timeout` elapses, or `cancel` is set.
///
/// The deadline is checked before each attempt, so a step that never
/// finishes runs `timeout / interval` times (rounded down, at least once
/// for a non-zero timeout). The last sleep is cut short at the deadline.
/// `step` receives the 1-based attempt number.
pub async fn poll_until<C, F, Fut, T, E>(
    clock: &C,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelFlag,
    mut step: F,
) -> Result<PollOutcome<T>, E>
where
    C: Clock,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = clock.now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled { attempts });
        }

        let elapsed = clock.now().saturating_sub(start);
        if elapsed >= timeout {
            return Ok(PollOutcome::TimedOut { attempts, elapsed });
        }

        attempts += 1;
        if let Some(value) = step(attempts).await? {
            return Ok(PollOutcome::Done { value, attempts });
        }

        let remaining = timeout.saturating_sub(clock.now().saturating_sub(start));
        clock.sleep(interval.min(remaining)).await;
    }
}
