//! In-memory collaborators for unit tests. Nothing here touches the network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{FetchedPage, PageFetcher};
use crate::config::{PipelineConfig, RateLimitConfig};
use crate::dns::DnsLookup;
use crate::model::MxRecord;
use crate::registry::RegistryLookup;
use crate::throttle::DomainThrottle;
use crate::SignalError;

/// Throttle that never makes a test wait
pub fn permissive_throttle() -> Arc<DomainThrottle> {
    Arc::new(
        DomainThrottle::new(&RateLimitConfig {
            requests_per_minute: 10_000,
            min_host_interval_ms: 0,
        })
        .unwrap(),
    )
}

/// Default config with limits that never make a test wait
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.rate_limit.requests_per_minute = 10_000;
    config.rate_limit.min_host_interval_ms = 0;
    config
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

/// Scripted DNS. Unknown names are NXDOMAIN for address lookups and empty
/// for MX and TXT.
#[derive(Default)]
pub struct FakeDns {
    addresses: HashMap<String, bool>,
    mx: HashMap<String, Vec<MxRecord>>,
    txt: HashMap<String, Vec<String>>,
    failing_mx: HashSet<String>,
    failing_txt: HashSet<String>,
    delay: Option<Duration>,
    pub address_calls: AtomicUsize,
    pub mx_calls: AtomicUsize,
    pub txt_calls: AtomicUsize,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, domain: &str, exists: bool) -> Self {
        self.addresses.insert(domain.to_string(), exists);
        self
    }

    pub fn with_mx(mut self, domain: &str, records: Vec<MxRecord>) -> Self {
        self.mx.insert(domain.to_string(), records);
        self
    }

    pub fn with_txt(mut self, name: &str, records: Vec<String>) -> Self {
        self.txt.insert(name.to_string(), records);
        self
    }

    pub fn with_failing_mx(mut self, domain: &str) -> Self {
        self.failing_mx.insert(domain.to_string());
        self
    }

    pub fn with_failing_txt(mut self, name: &str) -> Self {
        self.failing_txt.insert(name.to_string());
        self
    }

    /// Delay every lookup
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A resolving domain with one MX host
    pub fn with_mail_domain(self, domain: &str, mx_host: &str) -> Self {
        self.with_address(domain, true).with_mx(
            domain,
            vec![MxRecord {
                host: mx_host.to_string(),
                priority: 10,
            }],
        )
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn address_exists(&self, domain: &str) -> Result<bool, SignalError> {
        self.address_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        self.addresses
            .get(domain)
            .copied()
            .ok_or_else(|| SignalError::NxDomain(domain.to_string()))
    }

    async fn mx_records(&self, domain: &str) -> Result<Vec<MxRecord>, SignalError> {
        self.mx_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        if self.failing_mx.contains(domain) {
            return Err(SignalError::Unavailable(format!("MX for {}", domain)));
        }
        Ok(self.mx.get(domain).cloned().unwrap_or_default())
    }

    async fn txt_records(&self, name: &str) -> Result<Vec<String>, SignalError> {
        self.txt_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        if self.failing_txt.contains(name) {
            return Err(SignalError::Unavailable(format!("TXT for {}", name)));
        }
        Ok(self.txt.get(name).cloned().unwrap_or_default())
    }
}

/// Scripted registry. Unknown domains have no creation date.
#[derive(Default)]
pub struct FakeRegistry {
    created: HashMap<String, DateTime<Utc>>,
    failing: bool,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_created(mut self, domain: &str, created: DateTime<Utc>) -> Self {
        self.created.insert(domain.to_string(), created);
        self
    }

    pub fn with_age_days(self, domain: &str, days: i64) -> Self {
        self.with_created(domain, Utc::now() - chrono::Duration::days(days))
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl RegistryLookup for FakeRegistry {
    async fn creation_date(&self, domain: &str) -> Result<Option<DateTime<Utc>>, SignalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        if self.failing {
            return Err(SignalError::Registry("registry unavailable".to_string()));
        }
        Ok(self.created.get(domain).copied())
    }
}

/// Scripted page fetcher. Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, FetchedPage>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, page: FetchedPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Homepage for `domain` that satisfies every activity heuristic
    pub fn with_active_site(self, domain: &str) -> Self {
        use chrono::Datelike;

        let paragraph = "Our team ships new features for small businesses every single week.";
        let mut blocks = vec![paragraph.to_string(); 4];
        blocks.push(format!("Copyright {} {}", Utc::now().year(), domain));

        self.with_page(
            &format!("https://{}", domain),
            FetchedPage {
                status: 200,
                text: blocks.join("\n\n"),
                links: vec!["/about".to_string(), "/team".to_string(), "/blog".to_string()],
            },
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SignalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| SignalError::Unavailable(format!("connection refused: {}", url)))
    }
}
