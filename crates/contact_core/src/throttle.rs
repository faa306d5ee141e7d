//! Per-domain request throttling shared by every worker
//!
//! Two limits apply together: a keyed token bucket (governor) capping
//! requests per domain per minute, and a minimum spacing between requests
//! to the same web host.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::{PipelineError, Result};

pub struct DomainThrottle {
    limiter: DefaultKeyedRateLimiter<String>,
    min_host_interval: Duration,
    /// Next free slot per host
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl DomainThrottle {
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            PipelineError::Configuration("rate_limit.requests_per_minute must be greater than zero".to_string())
        })?;

        debug!(
            "Domain throttle initialized - {} req/min per domain, {:?} host spacing",
            per_minute,
            config.min_host_interval()
        );

        Ok(Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            min_host_interval: config.min_host_interval(),
            next_slot: Mutex::new(HashMap::new()),
        })
    }

    /// Wait for a token from the domain's bucket.
    pub async fn acquire(&self, domain: &str) {
        let key = domain.to_lowercase();
        if self.limiter.check_key(&key).is_err() {
            debug!("Rate limit reached for {}, waiting for a token", key);
            self.limiter.until_key_ready(&key).await;
        }
    }

    /// Wait for a token and for the host's spacing window. Used before page
    /// fetches, which hit the target site itself.
    pub async fn acquire_host(&self, host: &str) {
        let host = host.to_lowercase();
        self.acquire(&host).await;

        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&host).copied().map_or(now, |next| next.max(now));
            slots.insert(host.clone(), slot + self.min_host_interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Spacing requests to {}: waiting {:?}", host, wait);
            sleep(wait).await;
        }
    }

    /// Drop idle per-key state.
    pub async fn forget_idle(&self) {
        self.limiter.retain_recent();
        let now = Instant::now();
        self.next_slot.lock().await.retain(|_, next| *next > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn config(per_minute: u32, spacing_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: per_minute,
            min_host_interval_ms: spacing_ms,
        }
    }

    #[test]
    fn test_zero_quota_is_rejected() {
        assert!(DomainThrottle::new(&config(0, 0)).is_err());
    }

    #[test]
    fn test_bucket_is_keyed_by_domain() {
        let throttle = DomainThrottle::new(&config(2, 0)).unwrap();

        assert!(throttle.limiter.check_key(&"a.example".to_string()).is_ok());
        assert!(throttle.limiter.check_key(&"a.example".to_string()).is_ok());
        assert!(throttle.limiter.check_key(&"a.example".to_string()).is_err());
        // Another domain has its own bucket
        assert!(throttle.limiter.check_key(&"b.example".to_string()).is_ok());
    }

    // governor keeps its own clock, so these run in real time
    #[tokio::test]
    async fn test_exhausted_domain_waits_while_others_proceed() {
        let throttle = DomainThrottle::new(&config(2, 0)).unwrap();

        throttle.acquire("a.example").await;
        throttle.acquire("A.Example").await;

        let third = tokio::time::timeout(Duration::from_millis(300), throttle.acquire("a.example")).await;
        assert!(third.is_err(), "third request inside the minute should wait for a token");

        let other = tokio::time::timeout(Duration::from_millis(300), throttle.acquire("b.example")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_workers_share_one_bucket_per_domain() {
        let throttle = Arc::new(DomainThrottle::new(&config(2, 0)).unwrap());

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move { throttle.acquire("foundertown.example").await })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        let late = Arc::clone(&throttle);
        let third = tokio::spawn(async move { late.acquire("foundertown.example").await });
        let waited = tokio::time::timeout(Duration::from_millis(300), third).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_requests_are_spaced() {
        let throttle = Arc::new(DomainThrottle::new(&config(100, 2_500)).unwrap());
        let start = Instant::now();

        throttle.acquire_host("foundertown.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        throttle.acquire_host("foundertown.example").await;
        assert!(start.elapsed() >= Duration::from_millis(2_500));

        throttle.acquire_host("FounderTown.example").await;
        assert!(start.elapsed() >= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_hosts_are_not_spaced() {
        let throttle = DomainThrottle::new(&config(100, 2_500)).unwrap();
        let start = Instant::now();

        throttle.acquire_host("a.example").await;
        throttle.acquire_host("b.example").await;
        throttle.acquire_host("c.example").await;

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_reserve_distinct_slots() {
        let throttle = Arc::new(DomainThrottle::new(&config(100, 1_000)).unwrap());
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move {
                    throttle.acquire_host("foundertown.example").await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap().duration_since(start));
        }
        finished.sort();

        assert_eq!(finished[0], Duration::ZERO);
        assert!(finished[1] >= Duration::from_millis(1_000));
        assert!(finished[2] >= Duration::from_millis(2_000));
    }
}
