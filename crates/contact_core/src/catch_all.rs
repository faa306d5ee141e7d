//! Catch-all likelihood without SMTP probing
//!
//! The estimate only uses indirect signals: who hosts the domain's mail and
//! whether the domain publishes SPF and DMARC policies. It is a tunable
//! heuristic, not a verdict.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CatchAllConfig;
use crate::dns::DnsLookup;
use crate::model::MxRecord;
use crate::throttle::DomainThrottle;
use crate::{bounded, SignalError};

/// Known policy of the MX provider, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MxPolicy {
    /// Forwarders and parked-domain hosts that accept any local part
    AcceptAll,
    /// Providers that reject unknown recipients
    Strict,
    Unknown,
}

fn matches_suffix(host: &str, suffix: &str) -> bool {
    let suffix = suffix.trim_matches('.').to_lowercase();
    host == suffix || host.ends_with(&format!(".{}", suffix))
}

/// Classify MX hosts against the configured provider suffix lists.
/// Accept-all providers win over strict ones.
pub fn classify_mx(mx_records: &[MxRecord], config: &CatchAllConfig) -> MxPolicy {
    let hosts: Vec<String> = mx_records
        .iter()
        .map(|mx| mx.host.trim_end_matches('.').to_lowercase())
        .collect();

    let any_match = |suffixes: &[String]| {
        hosts
            .iter()
            .any(|host| suffixes.iter().any(|suffix| matches_suffix(host, suffix)))
    };

    if any_match(&config.accept_all_mx_suffixes) {
        MxPolicy::AcceptAll
    } else if any_match(&config.strict_mx_suffixes) {
        MxPolicy::Strict
    } else {
        MxPolicy::Unknown
    }
}

/// First `v=spf1` record among TXT strings
pub fn find_spf(records: &[String]) -> Option<&String> {
    records
        .iter()
        .find(|record| record.trim().to_lowercase().starts_with("v=spf1"))
}

/// First `v=DMARC1` record among TXT strings
pub fn find_dmarc(records: &[String]) -> Option<&String> {
    records
        .iter()
        .find(|record| record.trim().to_lowercase().starts_with("v=dmarc1"))
}

/// Both policies missing suggests an unmanaged domain; both present suggests
/// one that is administered. Anything in between is inconclusive.
pub fn from_auth_records(has_spf: Option<bool>, has_dmarc: Option<bool>) -> Option<bool> {
    match (has_spf, has_dmarc) {
        (Some(false), Some(false)) => Some(true),
        (Some(true), Some(true)) => Some(false),
        _ => None,
    }
}

pub struct CatchAllEstimator {
    dns: Arc<dyn DnsLookup>,
    throttle: Arc<DomainThrottle>,
    config: CatchAllConfig,
    timeout: Duration,
}

impl CatchAllEstimator {
    pub fn new(
        dns: Arc<dyn DnsLookup>,
        throttle: Arc<DomainThrottle>,
        config: CatchAllConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            dns,
            throttle,
            config,
            timeout,
        }
    }

    /// Estimate for `domain` given its (already resolved) MX records.
    pub async fn estimate(&self, domain: &str, mx_records: &[MxRecord]) -> Option<bool> {
        if mx_records.is_empty() {
            return None;
        }

        match classify_mx(mx_records, &self.config) {
            MxPolicy::AcceptAll => {
                debug!("MX provider for {} accepts all recipients by default", domain);
                return Some(true);
            }
            MxPolicy::Strict => {
                debug!("MX provider for {} rejects unknown recipients", domain);
                return Some(false);
            }
            MxPolicy::Unknown => {}
        }

        self.throttle.acquire(domain).await;

        let dmarc_name = format!("_dmarc.{}", domain);
        let (spf, dmarc) = tokio::join!(
            self.policy_present(domain, find_spf),
            self.policy_present(&dmarc_name, find_dmarc),
        );

        let estimate = from_auth_records(spf, dmarc);
        debug!(
            "Catch-all estimate for {} - spf: {:?}, dmarc: {:?} -> {:?}",
            domain, spf, dmarc, estimate
        );
        estimate
    }

    async fn policy_present(&self, name: &str, find: fn(&[String]) -> Option<&String>) -> Option<bool> {
        let records: Result<Vec<String>, SignalError> = bounded(self.timeout, self.dns.txt_records(name)).await;
        match records {
            Ok(records) => Some(find(&records).is_some()),
            Err(SignalError::NxDomain(_)) => Some(false),
            Err(e) => {
                warn!("TXT lookup failed for {}: {}", name, e);
                None
            }
        }
    }
}
