//! Process-wide download rate limiter.
//!
//! A single token bucket shared by every download stream. Capacity refills at
//! the configured bytes/sec and holds at most one second of traffic. Readers
//! reserve bytes before consuming a chunk; when the bucket is low they poll
//! until a minimum threshold is available, so the stream is never read a few
//! bytes at a time.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long a reader sleeps while waiting for capacity.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Largest minimum-read threshold (64 KiB).
pub const MAX_THRESHOLD: usize = 1 << 16;

/// Width of the throughput window.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5);

/// Error returned when a reservation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limiter wait cancelled")]
pub struct ReserveCancelled;

#[derive(Debug)]
struct Bucket {
    rate: u64,
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.available = (self.available + elapsed * self.rate as f64).min(self.rate as f64);
    }
}

/// Shared token-bucket limiter. Construct once and pass by `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    window: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl RateLimiter {
    /// Limiter capped at `bytes_per_second`. Zero means unlimited.
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                rate: bytes_per_second,
                available: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Current cap in bytes/sec (0 = unlimited).
    pub fn rate(&self) -> u64 {
        self.bucket.lock().rate
    }

    /// Change the cap. Takes effect for the next reservation.
    pub fn set_rate(&self, bytes_per_second: u64) {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.rate = bytes_per_second;
        bucket.available = bucket.available.min(bytes_per_second as f64);
        tracing::debug!(bytes_per_second, "Download rate limit changed");
    }

    /// Minimum capacity to wait for before reading `wanted` bytes.
    ///
    /// The largest power of two not above `min(wanted, rate)`, clamped to
    /// `1..=MAX_THRESHOLD`. Never exceeds the bucket size, so it is always
    /// reachable.
    pub fn threshold(wanted: usize, rate: u64) -> usize {
        let base = (wanted as u64).min(rate).max(1);
        let exp = (63 - base.leading_zeros()).min(16);
        1usize << exp
    }

    /// Reserve up to `wanted` bytes of capacity.
    ///
    /// Returns how many bytes the caller may consume now (at least one, at
    /// most `wanted`). Waits in [`POLL_INTERVAL`] steps until the threshold is
    /// available, observing `cancel` between polls.
    pub async fn reserve(
        &self,
        wanted: usize,
        cancel: &CancellationToken,
    ) -> Result<usize, ReserveCancelled> {
        if wanted == 0 {
            return Ok(0);
        }

        loop {
            if cancel.is_cancelled() {
                return Err(ReserveCancelled);
            }

            {
                let mut bucket = self.bucket.lock();
                if bucket.rate == 0 {
                    return Ok(wanted);
                }
                bucket.refill(Instant::now());
                let threshold = Self::threshold(wanted, bucket.rate);
                if bucket.available >= threshold as f64 {
                    let granted = (bucket.available as usize).min(wanted).max(1);
                    bucket.available -= granted as f64;
                    return Ok(granted);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ReserveCancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Record bytes that were actually read, for throughput reporting.
    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back((now, bytes));
        prune_window(&mut window, now);
    }

    /// Average bytes/sec over the last [`THROUGHPUT_WINDOW`].
    pub fn throughput(&self) -> u64 {
        let now = Instant::now();
        let mut window = self.window.lock();
        prune_window(&mut window, now);
        let total: u64 = window.iter().map(|(_, n)| n).sum();
        total / THROUGHPUT_WINDOW.as_secs().max(1)
    }
}

fn prune_window(window: &mut VecDeque<(Instant, u64)>, now: Instant) {
    while let Some((at, _)) = window.front() {
        if now.saturating_duration_since(*at) > THROUGHPUT_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_threshold_clamps() {
        assert_eq!(RateLimiter::threshold(0, 0), 1);
        assert_eq!(RateLimiter::threshold(1, 1_000_000), 1);
        assert_eq!(RateLimiter::threshold(1000, 1_000_000), 512);
        assert_eq!(RateLimiter::threshold(8192, 1_000_000), 8192);
        assert_eq!(RateLimiter::threshold(1 << 20, 1 << 30), MAX_THRESHOLD);
        // Rate caps the threshold so a slow limit can still make progress.
        assert_eq!(RateLimiter::threshold(65536, 100), 64);
    }

    #[tokio::test]
    async fn test_unlimited_grants_everything() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancellationToken::new();
        assert_eq!(limiter.reserve(1 << 24, &cancel).await, Ok(1 << 24));
    }

    #[tokio::test]
    async fn test_initial_burst_available() {
        let limiter = RateLimiter::new(1000);
        let cancel = CancellationToken::new();
        assert_eq!(limiter.reserve(400, &cancel).await, Ok(400));
        assert_eq!(limiter.reserve(400, &cancel).await, Ok(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_to_rate() {
        let limiter = RateLimiter::new(1000);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut total = 0;
        while total < 3000 {
            total += limiter.reserve(3000 - total, &cancel).await.unwrap();
        }

        // One second of burst, then two seconds of refill.
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_readers() {
        let limiter = Arc::new(RateLimiter::new(1000));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut total = 0;
                    while total < 1000 {
                        total += limiter.reserve(1000 - total, &cancel).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // 4000 bytes at 1000 B/s with a 1000 byte burst.
        assert!(start.elapsed() >= Duration::from_millis(2900));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let limiter = RateLimiter::new(10);
        let cancel = CancellationToken::new();
        limiter.reserve(10, &cancel).await.unwrap();

        cancel.cancel();
        assert_eq!(limiter.reserve(10, &cancel).await, Err(ReserveCancelled));
    }

    #[tokio::test]
    async fn test_set_rate_to_unlimited() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        limiter.set_rate(0);
        assert_eq!(limiter.rate(), 0);
        assert_eq!(limiter.reserve(5000, &cancel).await, Ok(5000));
    }

    #[tokio::test]
    async fn test_throughput_window() {
        let limiter = RateLimiter::unlimited();
        limiter.record(5000);
        limiter.record(5000);
        assert_eq!(limiter.throughput(), 2000);
    }
}
