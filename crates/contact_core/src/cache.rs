//! TTL-scoped memoization for the expensive, rate-limited checks
//!
//! The key space is partitioned by [`Concern`], each with its own
//! time-to-live. A [`CacheLayer`] sits in front of a [`CacheStore`] (in
//! memory by default, any key-value store in principle) and adds request
//! coalescing: concurrent lookups for the same missing key share a single
//! underlying computation.
//!
//! The computation runs on its own task and writes its result before the
//! in-flight entry is released, so a caller that goes away mid-lookup can
//! never leave a half-written record behind.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::CacheConfig;
use crate::{PipelineError, Result};

/// Values that have a neutral "everything unknown" form, handed to every
/// waiter when the computation behind a coalesced lookup dies.
pub trait Degradable {
    fn unknown(domain: &str) -> Self;
}

/// Cache partition. Each concern has its own TTL because the underlying
/// data changes at different rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concern {
    /// Full per-domain assessment (DNS, MX, age, catch-all, activity)
    Assessment,
    /// Per-company aggregates, for callers batching above the domain level
    Company,
    /// Raw DNS answers reused outside the full assessment
    Dns,
}

impl Concern {
    pub fn prefix(&self) -> &'static str {
        match self {
            Concern::Assessment => "assessment",
            Concern::Company => "company",
            Concern::Dns => "dns",
        }
    }

    pub fn ttl(&self, config: &CacheConfig) -> Duration {
        let secs = match self {
            Concern::Assessment => config.assessment_ttl_secs,
            Concern::Company => config.company_ttl_secs,
            Concern::Dns => config.dns_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// `{concern}:{domain}`, with the domain trimmed, lower-cased and stripped
/// of a trailing dot. There is no partial-key invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    concern: Concern,
    domain: String,
}

impl CacheKey {
    pub fn new(concern: Concern, domain: &str) -> Self {
        Self {
            concern,
            domain: domain.trim().trim_end_matches('.').to_lowercase(),
        }
    }

    pub fn concern(&self) -> Concern {
        self.concern
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.concern.prefix(), self.domain)
    }
}

/// Backing key-value storage with TTL-scoped expiry.
///
/// `put` replaces the whole value for a key. Errors mean the store cannot be
/// trusted and abort the caller.
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<V>>;
    async fn put(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    /// Remove expired entries, returning how many were dropped
    async fn purge_expired(&self) -> Result<usize>;
}

/// How often `put` sweeps expired entries out of a [`MemoryStore`]
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entries<V> {
    map: HashMap<CacheKey, (V, Instant)>,
    next_sweep: Instant,
}

impl<V> Entries<V> {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, (_, expires_at)| now < *expires_at);
        self.next_sweep = now + SWEEP_INTERVAL;
        before - self.map.len()
    }
}

/// In-process store. Expiry uses the tokio clock; expired entries are
/// dropped when read, on [`CacheStore::purge_expired`], and by a periodic
/// sweep on write.
pub struct MemoryStore<V> {
    entries: Mutex<Entries<V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
        }
    }

    /// Stored entries, expired ones included
    #[cfg(test)]
    async fn raw_len(&self) -> usize {
        self.entries.lock().await.map.len()
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<V>> {
        let mut entries = self.entries.lock().await;
        match entries.map.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                debug!("Cache entry expired: {}", key);
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if now >= entries.next_sweep {
            let dropped = entries.sweep(now);
            if dropped > 0 {
                debug!("Swept {} expired cache entries", dropped);
            }
        }
        entries.map.insert(key.clone(), (value, now + ttl));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.map.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .map
            .values()
            .filter(|(_, expires_at)| now < *expires_at)
            .count())
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.entries.lock().await.sweep(Instant::now()))
    }
}

type Pending<V> = Shared<BoxFuture<'static, std::result::Result<V, String>>>;

struct CacheInner<V> {
    concern: Concern,
    ttl: Duration,
    store: Arc<dyn CacheStore<V>>,
    in_flight: Mutex<HashMap<CacheKey, Pending<V>>>,
}

/// Snapshot of one concern's cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcernStats {
    pub concern: Concern,
    pub ttl_secs: u64,
    pub entries: usize,
    pub in_flight: usize,
}

/// Coalescing, TTL-scoped cache for one concern.
pub struct CacheLayer<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for CacheLayer<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheLayer<V>
where
    V: Degradable + Clone + Send + Sync + 'static,
{
    pub fn new(concern: Concern, ttl: Duration, store: Arc<dyn CacheStore<V>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                concern,
                ttl,
                store,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// In-memory cache for `concern` with the TTL from `config`
    pub fn in_memory(concern: Concern, config: &CacheConfig) -> Self {
        Self::new(concern, concern.ttl(config), Arc::new(MemoryStore::new()))
    }

    pub fn concern(&self) -> Concern {
        self.inner.concern
    }

    /// Return the cached value for `domain`, or run `compute` and cache its
    /// result (whatever it is, `unknown` included) with a fresh TTL.
    ///
    /// Concurrent calls for the same uncached key wait on the first call's
    /// computation instead of starting their own. If that computation
    /// panics, every waiter gets `V::unknown(domain)`, which is cached too.
    pub async fn get_or_compute<F, Fut>(&self, domain: &str, compute: F) -> Result<V>
    where
        F: FnOnce(String) -> Fut + Send,
        Fut: Future<Output = V> + Send + 'static,
    {
        let key = CacheKey::new(self.inner.concern, domain);

        // Hits never touch the in-flight lock
        if let Some(value) = self.inner.store.get(&key).await? {
            debug!("Cache hit: {}", key);
            return Ok(value);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock().await;

            if let Some(pending) = in_flight.get(&key) {
                debug!("Coalescing onto in-flight lookup: {}", key);
                pending.clone()
            } else {
                // Re-checked under the lock: a computation may have stored its
                // result and left the in-flight map since the first read.
                if let Some(value) = self.inner.store.get(&key).await? {
                    debug!("Cache hit: {}", key);
                    return Ok(value);
                }

                debug!("Cache miss: {}", key);
                let pending = self.spawn_computation(key.clone(), compute(key.domain().to_string()));
                in_flight.insert(key, pending.clone());
                pending
            }
        };

        pending.await.map_err(PipelineError::CacheCorruption)
    }

    fn spawn_computation<Fut>(&self, key: CacheKey, computation: Fut) -> Pending<V>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        let writer = tokio::spawn(async move {
            let value = match tokio::spawn(computation).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Lookup for {} failed, degrading to unknown: {}", key, e);
                    V::unknown(key.domain())
                }
            };

            let stored = inner.store.put(&key, value.clone(), inner.ttl).await;
            inner.in_flight.lock().await.remove(&key);

            match stored {
                Ok(()) => Ok(value),
                Err(e) => {
                    error!("Failed to store {}: {}", key, e);
                    Err(format!("{}: {}", key, e))
                }
            }
        });

        async move {
            match writer.await {
                Ok(result) => result,
                Err(e) => Err(format!("cache writer task failed: {}", e)),
            }
        }
        .boxed()
        .shared()
    }

    pub async fn stats(&self) -> Result<ConcernStats> {
        let entries = self.inner.store.len().await?;
        let in_flight = self.inner.in_flight.lock().await.len();
        Ok(ConcernStats {
            concern: self.inner.concern,
            ttl_secs: self.inner.ttl.as_secs(),
            entries,
            in_flight,
        })
    }

    /// Drop every stored entry. In-flight computations still complete and
    /// store their result.
    pub async fn clear(&self) -> Result<()> {
        self.inner.store.clear().await
    }

    /// Drop expired entries from the backing store
    pub async fn purge_expired(&self) -> Result<usize> {
        let dropped = self.inner.store.purge_expired().await?;
        if dropped > 0 {
            debug!("Purged {} expired {} entries", dropped, self.inner.concern.prefix());
        }
        Ok(dropped)
    }
}
