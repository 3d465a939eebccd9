//! Request spacing for the ledger store.
//!
//! The store caps requests per minute. Rather than counting requests in a
//! window, [`RequestThrottle`] spaces calls at least `60s / max_rpm` apart and
//! serializes them: a [`ThrottlePermit`] is held for the whole call, and the
//! next caller waits until the interval has elapsed after the previous permit
//! was released. One throttle is shared by every writer in the process.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Serializing, spacing throttle for outbound store requests.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Throttle with a fixed minimum spacing between calls.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Throttle allowing at most `max_rpm` calls per minute.
    ///
    /// `0` disables spacing; calls are still serialized.
    pub fn per_minute(max_rpm: u32) -> Self {
        let interval = if max_rpm == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / max_rpm
        };
        Self::new(interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn.
    ///
    /// The returned permit must be held for the duration of the call.
    pub async fn acquire(&self) -> ThrottlePermit<'_> {
        let guard = self.last_call.lock().await;
        if let Some(previous) = *guard {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                log::debug!(
                    "Ledger throttle: waiting {:?} before next append",
                    ready_at - Instant::now()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        ThrottlePermit { last_call: guard }
    }
}

/// Exclusive right to make one throttled call.
///
/// Dropping it records the call's completion time.
#[derive(Debug)]
pub struct ThrottlePermit<'a> {
    last_call: MutexGuard<'a, Option<Instant>>,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        *self.last_call = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_per_minute_interval() {
        assert_eq!(RequestThrottle::per_minute(60).min_interval(), Duration::from_secs(1));
        assert_eq!(
            RequestThrottle::per_minute(120).min_interval(),
            Duration::from_millis(500)
        );
        assert_eq!(RequestThrottle::per_minute(0).min_interval(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_first_call_is_not_delayed() {
        let throttle = RequestThrottle::new(Duration::from_secs(30));
        let started = Instant::now();
        drop(throttle.acquire().await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let throttle = RequestThrottle::new(Duration::from_millis(80));
        let started = Instant::now();
        for _ in 0..3 {
            drop(throttle.acquire().await);
        }
        assert!(started.elapsed() >= Duration::from_millis(160));
    }

    #[tokio::test]
    async fn test_shared_throttle_spaces_concurrent_writers() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(60)));
        let started = Instant::now();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move {
                    let _permit = throttle.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for task in tasks {
            finished.push(task.await.unwrap());
        }
        finished.sort();

        assert!(finished[2] - finished[0] >= Duration::from_millis(120));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
