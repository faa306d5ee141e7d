//! DNS existence and mail-exchange lookups
//!
//! [`DnsLookup`] is the DNS capability the pipeline consumes; [`HickoryDns`]
//! implements it with hickory-resolver. [`DomainResolver`] applies the
//! fail-fast policy on top: if the address lookup itself fails or times
//! out, the domain is reported unresolved with no MX records and the MX
//! query is skipped.

use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::op::ResponseCode,
    AsyncResolver, TokioAsyncResolver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DnsConfig;
use crate::model::{DnsAnswer, MxRecord};
use crate::throttle::DomainThrottle;
use crate::{bounded, SignalError};

/// DNS capability used by the resolver and the catch-all estimator
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// `Ok(true)` if the name has A or AAAA records, `Ok(false)` if it
    /// exists without them. NXDOMAIN and transport failures are errors.
    async fn address_exists(&self, domain: &str) -> Result<bool, SignalError>;

    /// MX records in any order; empty if the name has none.
    async fn mx_records(&self, domain: &str) -> Result<Vec<MxRecord>, SignalError>;

    /// TXT record strings for `name`; empty if it has none.
    async fn txt_records(&self, name: &str) -> Result<Vec<String>, SignalError>;
}

/// hickory-resolver backed DNS lookups
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    /// Create a resolver using Cloudflare's public DNS
    ///
    /// # Arguments
    /// * `config` - Timeout, attempts and record cache size
    pub fn new(config: &DnsConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.timeout();
        opts.attempts = config.attempts;
        opts.cache_size = config.cache_size;
        opts.negative_min_ttl = Some(Duration::from_secs(30));
        opts.positive_max_ttl = Some(Duration::from_secs(3600));

        let resolver = AsyncResolver::tokio(ResolverConfig::cloudflare(), opts);

        info!(
            "DNS resolver initialized - timeout: {}ms, attempts: {}, cache_size: {}",
            config.timeout_ms, config.attempts, config.cache_size
        );

        Self { resolver }
    }
}

/// `Ok(())` for "name exists, no records of this type", the error otherwise.
fn absent_or_error(domain: &str, error: ResolveError) -> Result<(), SignalError> {
    let no_records = match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => Some(*response_code),
        _ => None,
    };

    match no_records {
        Some(ResponseCode::NXDomain) => Err(SignalError::NxDomain(domain.to_string())),
        Some(_) => Ok(()),
        None => Err(SignalError::Dns(error)),
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn address_exists(&self, domain: &str) -> Result<bool, SignalError> {
        debug!("Checking A/AAAA records for domain: {}", domain);

        match self.resolver.ipv4_lookup(domain).await {
            Ok(response) if response.iter().next().is_some() => {
                debug!("Domain {} has A records", domain);
                return Ok(true);
            }
            Ok(_) => {}
            Err(e) => absent_or_error(domain, e)?,
        }

        match self.resolver.ipv6_lookup(domain).await {
            Ok(response) if response.iter().next().is_some() => {
                debug!("Domain {} has AAAA records", domain);
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => {
                absent_or_error(domain, e)?;
                debug!("Domain {} has no A or AAAA records", domain);
                Ok(false)
            }
        }
    }

    async fn mx_records(&self, domain: &str) -> Result<Vec<MxRecord>, SignalError> {
        debug!("Checking MX records for domain: {}", domain);

        match self.resolver.mx_lookup(domain).await {
            Ok(response) => {
                let records: Vec<MxRecord> = response
                    .iter()
                    .map(|mx| MxRecord {
                        host: mx.exchange().to_utf8(),
                        priority: mx.preference(),
                    })
                    .collect();
                debug!("Domain {} has {} MX record(s)", domain, records.len());
                Ok(records)
            }
            Err(e) => {
                absent_or_error(domain, e)?;
                debug!("Domain {} has no MX records", domain);
                Ok(Vec::new())
            }
        }
    }

    async fn txt_records(&self, name: &str) -> Result<Vec<String>, SignalError> {
        debug!("Querying TXT records for: {}", name);

        match self.resolver.txt_lookup(name).await {
            Ok(response) => {
                // A TXT record may be split into several character strings
                let records: Vec<String> = response
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|chunk| String::from_utf8_lossy(chunk))
                            .collect::<String>()
                    })
                    .collect();
                debug!("Found {} TXT record(s) for {}", records.len(), name);
                Ok(records)
            }
            Err(e) => {
                absent_or_error(name, e)?;
                Ok(Vec::new())
            }
        }
    }
}

/// Sorts MX records by ascending priority (ties by host) and drops null MX
/// entries, which advertise that the domain accepts no mail.
pub fn normalize_mx(records: Vec<MxRecord>) -> Vec<MxRecord> {
    let mut records: Vec<MxRecord> = records
        .into_iter()
        .map(|mx| MxRecord {
            host: mx.host.trim_end_matches('.').to_lowercase(),
            priority: mx.priority,
        })
        .filter(|mx| !mx.host.is_empty())
        .collect();
    records.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.host.cmp(&b.host)));
    records
}

/// Domain existence and MX resolution with fail-fast degradation
pub struct DomainResolver {
    dns: Arc<dyn DnsLookup>,
    throttle: Arc<DomainThrottle>,
    timeout: Duration,
}

impl DomainResolver {
    pub fn new(dns: Arc<dyn DnsLookup>, throttle: Arc<DomainThrottle>, timeout: Duration) -> Self {
        Self { dns, throttle, timeout }
    }

    /// Resolve a domain. Never fails: any resolver problem degrades the
    /// answer instead.
    pub async fn resolve(&self, domain: &str) -> DnsAnswer {
        self.throttle.acquire(domain).await;

        let dns_resolved = match bounded(self.timeout, self.dns.address_exists(domain)).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Address lookup failed for {}, skipping MX: {}", domain, e);
                return DnsAnswer::unresolved();
            }
        };

        let mx_records = match bounded(self.timeout, self.dns.mx_records(domain)).await {
            Ok(records) => normalize_mx(records),
            Err(e) => {
                warn!("MX lookup failed for {}: {}", domain, e);
                Vec::new()
            }
        };

        debug!(
            "Domain {} - resolved: {}, MX: {}",
            domain,
            dns_resolved,
            mx_records.len()
        );

        DnsAnswer {
            dns_resolved,
            mx_records,
        }
    }
}
