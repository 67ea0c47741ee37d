//! Fixed-delay retry helper
//!
//! Polling loops against the cluster (image stream tags, pods coming up)
//! all use the same shape: a bounded number of attempts with a fixed delay,
//! first attempt immediate. Keeping it in one helper keeps the cadence
//! consistent and the call sites short.

use std::future::Future;
use std::time::Duration;

/// Run `op` up to `max_attempts` times with `delay` between attempts
///
/// Returns the first `Some` produced, or `None` after exhaustion. The first
/// attempt runs immediately; the delay only separates attempts.
pub async fn with_fixed_delay<T, F, Fut>(max_attempts: usize, delay: Duration, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
        }
        if let Some(value) = op().await {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let calls = AtomicUsize::new(0);
        let result = with_fixed_delay(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Some(42) }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_fixed_delay(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n >= 2 { Some(n) } else { None } }
        })
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let calls = AtomicUsize::new(0);
        let result: Option<()> = with_fixed_delay(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
