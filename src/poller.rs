/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/poller.rs
*
* The convergence poller used by every wait-for-X step in the tool. A probe is
* evaluated repeatedly at a fixed interval until it reports convergence, the
* time budget elapses, or an optional attempt cap is reached. The final sleep is
* clamped to the remaining budget so a timeout is reported no later than
* `timeout + interval` after the first probe.
*
* Query failures are treated as "not yet converged" unless the call site asked
* for hard failure, in which case the first error is returned as-is.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result, Timeout};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// What a probe saw on one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<T> {
    /// The awaited condition holds; carries the value the caller wants back.
    Converged(T),
    /// Not there yet; carries a rendering of the observed state for diagnostics.
    Pending(String),
}

/// How the poller reacts to a probe returning `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrors {
    Tolerate,
    Abort,
}

/// Interval, budget and error policy for one wait.
#[derive(Debug, Clone)]
pub struct PollSpec {
    pub what: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_attempts: Option<u32>,
    pub query_errors: QueryErrors,
}

impl PollSpec {
    pub fn new(what: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            what: what.into(),
            interval,
            timeout,
            max_attempts: None,
            query_errors: QueryErrors::Tolerate,
        }
    }

    /// Caps the number of probe evaluations in addition to the time budget.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn abort_on_query_error(mut self) -> Self {
        self.query_errors = QueryErrors::Abort;
        self
    }
}

/// Evaluates `probe` until it converges or the budget in `spec` is exhausted.
///
/// On exhaustion returns [`Error::ConvergenceTimeout`] with the elapsed time,
/// the attempt count and the last observed state.
pub async fn poll_until<T, F, Fut>(spec: &PollSpec, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_observed = String::from("nothing observed yet");

    loop {
        attempts += 1;
        match probe().await {
            Ok(Observation::Converged(value)) => {
                debug!(
                    what = %spec.what,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Converged"
                );
                return Ok(value);
            }
            Ok(Observation::Pending(state)) => {
                trace!(what = %spec.what, attempts, state = %state, "Not converged yet");
                last_observed = state;
            }
            Err(e) => match spec.query_errors {
                QueryErrors::Abort => return Err(e),
                QueryErrors::Tolerate => {
                    debug!(what = %spec.what, attempts, error = %e, "Query failed, treating as pending");
                    last_observed = format!("query error: {}", e);
                }
            },
        }

        let elapsed = started.elapsed();
        let attempts_exhausted = spec.max_attempts.is_some_and(|max| attempts >= max);
        if elapsed >= spec.timeout || attempts_exhausted {
            return Err(Error::ConvergenceTimeout(Timeout {
                what: spec.what.clone(),
                elapsed,
                attempts,
                last_observed,
            }));
        }

        sleep(spec.interval.min(spec.timeout - elapsed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_pending_observations() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let spec = PollSpec::new("counter", Duration::from_secs(5), Duration::from_secs(60));

        let value = poll_until(&spec, || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 3 {
                    Ok(Observation::Converged(n))
                } else {
                    Ok(Observation::Pending(format!("n={}", n)))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_bounded_by_interval() {
        let interval = Duration::from_secs(7);
        let timeout = Duration::from_secs(30);
        let spec = PollSpec::new("never", interval, timeout);
        let started = Instant::now();

        let err = poll_until::<(), _, _>(&spec, || async {
            Ok(Observation::Pending("still waiting".to_string()))
        })
        .await
        .unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "elapsed {:?} < timeout", elapsed);
        assert!(elapsed <= timeout + interval, "elapsed {:?} overshoots", elapsed);

        match err {
            Error::ConvergenceTimeout(t) => {
                assert_eq!(t.what, "never");
                assert_eq!(t.last_observed, "still waiting");
                assert!(t.elapsed >= timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_tolerated() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let spec = PollSpec::new("flaky", Duration::from_secs(1), Duration::from_secs(10));

        let value = poll_until(&spec, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::QueryFailed {
                        resource: "vm/x".to_string(),
                        detail: "connection reset".to_string(),
                    })
                } else {
                    Ok(Observation::Converged("ok"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_policy_returns_first_query_error() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let spec = PollSpec::new("strict", Duration::from_secs(1), Duration::from_secs(10))
            .abort_on_query_error();

        let err = poll_until::<(), _, _>(&spec, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::PrereqMissing("vm/x".to_string()))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PrereqMissing(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_stops_early() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let spec = PollSpec::new("ssh", Duration::from_secs(10), Duration::from_secs(3600))
            .max_attempts(30);

        let err = poll_until::<(), _, _>(&spec, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Observation::Pending("no answer".to_string()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(count.load(Ordering::SeqCst), 30);
        let t = err.timeout().unwrap();
        assert_eq!(t.attempts, 30);
        assert_eq!(t.elapsed, Duration::from_secs(290));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerated_error_becomes_last_observed() {
        let spec = PollSpec::new("missing", Duration::from_secs(2), Duration::from_secs(4));

        let err = poll_until::<(), _, _>(&spec, || async {
            Err(Error::QueryFailed {
                resource: "vmi/test-1".to_string(),
                detail: "not found".to_string(),
            })
        })
        .await
        .unwrap_err();

        let t = err.timeout().unwrap();
        assert!(t.last_observed.contains("not found"));
    }
}
