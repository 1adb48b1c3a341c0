//! Bounded waits.

use std::future::Future;
use std::time::Duration;

/// Outcome of waiting on a future for at most a fixed duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline<T> {
    /// The future finished in time.
    Completed(T),
    /// The limit passed first; the future was dropped.
    Elapsed,
}

impl<T> Deadline<T> {
    /// Get the value if the future finished in time.
    pub fn completed(self) -> Option<T> {
        match self {
            Deadline::Completed(value) => Some(value),
            Deadline::Elapsed => None,
        }
    }

    /// Check if the limit passed first.
    pub fn is_elapsed(&self) -> bool {
        matches!(self, Deadline::Elapsed)
    }
}

/// Run `fut` for at most `limit`.
pub async fn within<F: Future>(limit: Duration, fut: F) -> Deadline<F::Output> {
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Deadline::Completed(value),
        Err(_) => Deadline::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_completes_in_time() {
        let result = within(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Deadline::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapses() {
        let result = within(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            7
        })
        .await;
        assert!(result.is_elapsed());
        assert_eq!(result.completed(), None);
    }
}
