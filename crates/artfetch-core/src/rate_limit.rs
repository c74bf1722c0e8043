//! Randomized per-request delay

use std::time::Duration;

use rand::Rng;

use crate::config::RequestConfig;

/// Sleeps a uniformly random duration in `[min, max]` before a request.
///
/// Each caller waits independently; the limiter holds no shared state, so
/// concurrent callers never serialize behind each other.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    min: Duration,
    max: Duration,
}

impl RateLimiter {
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            return Self { min: max, max: min };
        }
        Self { min, max }
    }

    pub fn from_config(request: &RequestConfig) -> Self {
        let (min, max) = request.delay_bounds();
        Self::new(min, max)
    }

    pub const fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Draw one delay from `[min, max]`.
    pub fn sample(&self) -> Duration {
        sample_between(self.min, self.max)
    }

    pub async fn await_slot(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Uniform draw from `[lo, hi]`; returns `lo` when the interval is empty.
pub(crate) fn sample_between(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let secs = rand::thread_rng().gen_range(lo.as_secs_f64()..=hi.as_secs_f64());
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn samples_within_bounds() {
        let limiter = RateLimiter::new(Duration::from_millis(10), Duration::from_millis(30));
        for _ in 0..1000 {
            let d = limiter.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(30));
        }
    }

    #[test]
    fn swapped_bounds_normalized() {
        let limiter = RateLimiter::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(
            limiter.bounds(),
            (Duration::from_secs(1), Duration::from_secs(2))
        );
    }

    #[test]
    fn degenerate_interval_is_fixed() {
        let limiter = RateLimiter::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(limiter.sample(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn concurrent_callers_wait_independently() {
        let limiter = RateLimiter::new(Duration::from_millis(40), Duration::from_millis(50));
        let start = Instant::now();
        futures_util::future::join_all((0..8).map(|_| limiter.await_slot())).await;
        // Serialized waits would take >= 320ms
        assert!(start.elapsed() < Duration::from_millis(250));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
