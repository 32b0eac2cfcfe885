//! Send pacing: fixed pauses after every message and every set, with an
//! optional token bucket layered on top.

use std::time::Duration;

use fbminer_core::config::{DispatchConfig, RateLimitConfig};
use fbminer_core::error::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Classic token bucket; one token per send.
pub struct TokenBucket {
    capacity: f64,
    per_second: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Fails on a zero, negative or non-finite refill rate.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        config.validate()?;
        let capacity = f64::from(config.burst.max(1));
        Ok(Self {
            capacity,
            per_second: config.per_second,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last: Instant::now(),
            }),
        })
    }

    /// Take a token at `now`, or say how long until one is available.
    async fn try_take_at(&self, now: Instant) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock().await;
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.per_second).min(self.capacity);
        state.last = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - state.tokens) / self.per_second))
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_take_at(Instant::now()).await {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!("rate limit: waiting {wait:?}");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

pub struct Pacer {
    message_delay: Duration,
    set_delay: Duration,
    bucket: Option<TokenBucket>,
}

impl Pacer {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            message_delay: Duration::from_millis(config.message_delay_ms),
            set_delay: Duration::from_millis(config.set_delay_ms),
            bucket: config.rate_limit.as_ref().map(TokenBucket::new).transpose()?,
        })
    }

    /// No waiting at all.
    pub fn immediate() -> Self {
        Self {
            message_delay: Duration::ZERO,
            set_delay: Duration::ZERO,
            bucket: None,
        }
    }

    pub async fn before_send(&self) {
        if let Some(bucket) = &self.bucket {
            bucket.acquire().await;
        }
    }

    /// Pause after a send, whether it succeeded or not.
    pub async fn after_message(&self) {
        pause(self.message_delay).await;
    }

    pub async fn after_set(&self) {
        pause(self.set_delay).await;
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbminer_core::error::MinerError;

    #[tokio::test]
    async fn test_bucket_burst_then_wait() {
        let bucket = TokenBucket::new(&RateLimitConfig {
            per_second: 2.0,
            burst: 2,
        })
        .unwrap();
        let t0 = Instant::now();
        assert!(bucket.try_take_at(t0).await.is_ok());
        assert!(bucket.try_take_at(t0).await.is_ok());
        let wait = bucket.try_take_at(t0).await.unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
        // Half a second later one token has refilled.
        assert!(bucket.try_take_at(t0 + Duration::from_millis(500)).await.is_ok());
    }

    #[test]
    fn test_pacer_from_config() {
        let pacer = Pacer::new(&DispatchConfig::default()).unwrap();
        assert_eq!(pacer.message_delay, Duration::from_millis(500));
        assert_eq!(pacer.set_delay, Duration::from_millis(1000));
        assert!(pacer.bucket.is_none());
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        for per_second in [0.0, f64::NAN] {
            let config = DispatchConfig {
                rate_limit: Some(RateLimitConfig { per_second, burst: 1 }),
                ..Default::default()
            };
            let err = Pacer::new(&config).err().unwrap();
            assert!(matches!(err, MinerError::Config(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rate_waits_instead_of_failing() {
        let config = DispatchConfig {
            rate_limit: Some(RateLimitConfig { per_second: 0.01, burst: 1 }),
            ..Default::default()
        };
        let pacer = Pacer::new(&config).unwrap();
        pacer.before_send().await;
        pacer.before_send().await;
    }

    #[tokio::test]
    async fn test_immediate_pacer_does_not_sleep() {
        let pacer = Pacer::immediate();
        let start = Instant::now();
        pacer.before_send().await;
        pacer.after_message().await;
        pacer.after_set().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
