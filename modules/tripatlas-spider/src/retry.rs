//! Bounded retry with uniform jitter.
//!
//! The delay band is deliberately uniform rather than exponential: its job is
//! request-rate throttling between attempts, not congestion control, and the
//! narrow band keeps the crawl cadence below the target site's rate limits.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use tripatlas_common::{Outcome, PipelinePolicy};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Uniform jitter band between attempts, seconds.
    pub delay_secs: (f64, f64),
}

impl RetryPolicy {
    pub fn from_pipeline(policy: &PipelinePolicy) -> Self {
        Self {
            max_attempts: policy.retry_max_attempts,
            delay_secs: policy.seed_delay_secs,
        }
    }
}

/// Draw a jittered delay from a uniform band.
pub fn jitter(band: (f64, f64)) -> Duration {
    let (lo, hi) = band;
    if hi <= lo {
        return Duration::from_secs_f64(lo.max(0.0));
    }
    Duration::from_secs_f64(rand::rng().random_range(lo..=hi))
}

/// Run `op` until it yields anything other than `Retryable`, up to
/// `max_attempts`. Between attempts the `on_failure` hook runs (typically a
/// session recycle) followed by a jittered sleep. Exhaustion returns the last
/// `Retryable` — the caller marks the unit failed and moves on; a retry
/// exhaustion is never fatal to the run.
pub async fn with_retry<T, F, Fut, H, HFut>(
    policy: &RetryPolicy,
    unit: &str,
    mut op: F,
    mut on_failure: H,
) -> Outcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Outcome<T>>,
    H: FnMut() -> HFut,
    HFut: Future<Output = ()>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Outcome::Retryable(e) => {
                if attempt >= policy.max_attempts {
                    warn!(unit, attempt, "Retries exhausted: {e:#}");
                    return Outcome::Retryable(e);
                }
                warn!(unit, attempt, "Attempt failed, recycling and retrying: {e:#}");
                on_failure().await;
                sleep(jitter(policy.delay_secs)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay_secs: (0.0, 0.0),
        }
    }

    #[tokio::test]
    async fn succeeds_without_invoking_hook() {
        let hooks = AtomicU32::new(0);
        let out = with_retry(
            &fast_policy(),
            "unit",
            || async { Outcome::Ok(7u32) },
            || async {
                hooks.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert!(matches!(out, Outcome::Ok(7)));
        assert_eq!(hooks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_then_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let hooks = AtomicU32::new(0);
        let out: Outcome<u32> = with_retry(
            &fast_policy(),
            "unit",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Outcome::Retryable(anyhow::anyhow!("timeout")) }
            },
            || async {
                hooks.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert!(matches!(out, Outcome::Retryable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The hook runs between attempts, not after the last one.
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Outcome<u32> = with_retry(
            &fast_policy(),
            "unit",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Outcome::Empty }
            },
            || async {},
        )
        .await;
        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_inside_band() {
        for _ in 0..100 {
            let d = jitter((1.5, 3.5));
            assert!(d >= Duration::from_secs_f64(1.5));
            assert!(d <= Duration::from_secs_f64(3.5));
        }
    }
}
