use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::{self, Instant};

pub async fn with_timeout<F, Fut, T>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match time::timeout(duration, f()).await {
        Ok(result) => result,
        Err(_) => bail!("Request timed out after {:?}", duration),
    }
}

/// Evaluates `condition` every `interval` until it holds or `deadline` passes.
///
/// The condition is always checked before sleeping, so a condition that already holds returns
/// immediately, and it is checked one last time at the deadline. Returns whether it held.
pub async fn poll_until<F, Fut>(deadline: Instant, interval: Duration, mut condition: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if condition().await? {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_until_returns_early() {
        let start = Instant::now();
        let mut calls = 0;
        let held = poll_until(start + Duration::from_secs(30), Duration::from_millis(10), || {
            calls += 1;
            let done = calls >= 3;
            async move { anyhow::Ok(done) }
        })
        .await
        .unwrap();

        assert!(held);
        assert_eq!(calls, 3);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_until_gives_up_at_deadline() {
        let start = Instant::now();
        let held = poll_until(
            start + Duration::from_millis(100),
            Duration::from_millis(20),
            || async { anyhow::Ok(false) },
        )
        .await
        .unwrap();

        assert!(!held);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_poll_until_propagates_errors() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let result = poll_until(deadline, Duration::from_millis(10), || async {
            Err(anyhow::anyhow!("log unreadable"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let fast = with_timeout(Duration::from_secs(1), || async { anyhow::Ok(5) }).await;
        assert_eq!(fast.unwrap(), 5);

        let slow = with_timeout(Duration::from_millis(20), || async {
            time::sleep(Duration::from_secs(5)).await;
            anyhow::Ok(())
        })
        .await;
        assert!(slow.is_err());
    }
}
