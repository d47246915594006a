//! Condition polling
//!
//! [`Poller`] repeatedly evaluates a probe until it yields a value, the
//! deadline in a [`WaitSpec`] passes, or the probe reports a fatal error.
//! Transient failures inside a probe never escape: they only show up as the
//! `last_observed` state of the eventual timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Poll interval used by the presets
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll intervals below this are raised to it
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout and poll spacing for one polling episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitSpec {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Quick displayed-checks (5s)
    pub fn short() -> Self {
        Self::new(Duration::from_secs(5), DEFAULT_POLL_INTERVAL)
    }

    /// Page-object level operations (10s)
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(10), DEFAULT_POLL_INTERVAL)
    }

    /// Full page loads (30s)
    pub fn long() -> Self {
        Self::new(Duration::from_secs(30), DEFAULT_POLL_INTERVAL)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs), DEFAULT_POLL_INTERVAL)
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self::new(timeout, self.poll_interval)
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self::new(self.timeout, poll_interval)
    }
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outcome of one evaluation of a condition
#[derive(Debug)]
pub enum Probe<T> {
    /// Condition holds; stop polling with this value
    Ready(T),
    /// Not yet; optionally describes what was seen instead
    Pending(Option<String>),
    /// Stop polling and propagate
    Fatal(Error),
}

impl<T> Probe<T> {
    pub fn pending(observed: impl Into<String>) -> Self {
        Probe::Pending(Some(observed.into()))
    }

    /// Transient errors become `Pending`, everything else is `Fatal`
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Probe::Ready(value),
            Err(e) => Probe::from_error(e),
        }
    }

    pub fn from_error(err: Error) -> Self {
        if err.is_transient() {
            Probe::Pending(Some(err.to_string()))
        } else {
            Probe::Fatal(err)
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Probe::Ready(value) => Probe::Ready(f(value)),
            Probe::Pending(observed) => Probe::Pending(observed),
            Probe::Fatal(e) => Probe::Fatal(e),
        }
    }
}

/// Unwrap a driver result inside a probe, turning errors into the probe's
/// early return value.
macro_rules! probe_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::wait::Probe::from_error(e),
        }
    };
}
pub(crate) use probe_try;

/// Generic polling engine
#[derive(Debug, Clone, Default)]
pub struct Poller {
    cancel: CancellationToken,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poller whose waits abort once `cancel` fires
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Poll until the probe is ready; time out with [`Error::Timeout`]
    pub async fn until<T, F, Fut>(&self, spec: WaitSpec, condition: &str, probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let start = Instant::now();
        // A check still running past this point is abandoned.
        let hard_deadline = start + spec.timeout + spec.poll_interval;
        let mut probe = probe;
        let mut last_observed = None;
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    condition: condition.to_string(),
                });
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                outcome = probe() => outcome,
                _ = self.cancel.cancelled() => {
                    return Err(Error::Cancelled {
                        condition: condition.to_string(),
                    });
                }
                _ = tokio::time::sleep_until(hard_deadline) => {
                    let elapsed = start.elapsed();
                    tracing::warn!(
                        condition,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "check did not answer before the deadline"
                    );
                    let observed = last_observed
                        .unwrap_or_else(|| "no answer from the page".to_string());
                    return Err(Error::timeout(condition, elapsed, Some(observed)));
                }
            };
            match outcome {
                Probe::Ready(value) => {
                    tracing::debug!(
                        condition,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "condition satisfied"
                    );
                    return Ok(value);
                }
                Probe::Pending(observed) => {
                    tracing::trace!(condition, attempts, ?observed, "condition pending");
                    if observed.is_some() {
                        last_observed = observed;
                    }
                }
                Probe::Fatal(e) => {
                    tracing::debug!(condition, attempts, error = %e, "condition failed");
                    return Err(e);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= spec.timeout {
                tracing::warn!(
                    condition,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "condition timed out"
                );
                return Err(Error::timeout(condition, elapsed, last_observed));
            }

            // Never sleep past the deadline; the final probe lands on it.
            let nap = spec.poll_interval.min(spec.timeout - elapsed);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::Cancelled {
                        condition: condition.to_string(),
                    });
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Like [`Poller::until`], but a timeout yields `Ok(None)`
    ///
    /// Returns `None` exactly when `until` would have returned
    /// [`Error::Timeout`]; fatal probe errors and cancellation still
    /// propagate.
    pub async fn try_until<T, F, Fut>(
        &self,
        spec: WaitSpec,
        condition: &str,
        probe: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        match self.until(spec, condition, probe).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
