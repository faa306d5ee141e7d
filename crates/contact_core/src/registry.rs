//! Domain age from registry records
//!
//! Creation dates come from RDAP (`{base_url}/domain/{name}`), read off the
//! `registration` event. A missing record, missing event or a date in the
//! future all mean "age unknown".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{HttpConfig, RegistryConfig};
use crate::throttle::DomainThrottle;
use crate::{bounded, PipelineError, Result, SignalError};

/// Registry capability: when was a domain registered
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    /// `Ok(None)` if the registry has no creation date for the domain.
    async fn creation_date(&self, domain: &str) -> std::result::Result<Option<DateTime<Utc>>, SignalError>;
}

#[derive(Debug, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: Option<String>,
}

impl RdapDomain {
    fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|event| event.action.eq_ignore_ascii_case("registration"))
            .filter_map(|event| event.date.as_deref())
            .filter_map(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.with_timezone(&Utc))
            .min()
    }
}

/// RDAP client
pub struct RdapClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl RdapClient {
    pub fn new(config: &RegistryConfig, http: &HttpConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(http.user_agent.as_str())
            .timeout(config.timeout())
            .build()
            .map_err(|e| PipelineError::Initialization(format!("RDAP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RegistryLookup for RdapClient {
    async fn creation_date(&self, domain: &str) -> std::result::Result<Option<DateTime<Utc>>, SignalError> {
        let url = format!("{}/domain/{}", self.base_url, domain);
        debug!(domain = %domain, url = %url, "Querying RDAP");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/rdap+json, application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SignalError::Status(status.as_u16()));
        }

        let record: RdapDomain = response
            .json()
            .await
            .map_err(|e| SignalError::Registry(e.to_string()))?;

        Ok(record.registered_at())
    }
}

/// Whole days from `created` to `now`; `None` for dates in the future.
pub fn age_days(created: DateTime<Utc>, now: DateTime<Utc>) -> Option<u32> {
    let days = (now - created).num_days();
    if days < 0 {
        return None;
    }
    u32::try_from(days).ok()
}

/// Domain age check with timeout and per-domain throttling
pub struct RegistryAgeAssessor {
    registry: Arc<dyn RegistryLookup>,
    throttle: Arc<DomainThrottle>,
    timeout: Duration,
}

impl RegistryAgeAssessor {
    pub fn new(registry: Arc<dyn RegistryLookup>, throttle: Arc<DomainThrottle>, timeout: Duration) -> Self {
        Self {
            registry,
            throttle,
            timeout,
        }
    }

    /// Age of the domain in days, or `None` if it cannot be determined.
    pub async fn assess(&self, domain: &str) -> Option<u32> {
        self.throttle.acquire(domain).await;

        match bounded(self.timeout, self.registry.creation_date(domain)).await {
            Ok(Some(created)) => {
                let age = age_days(created, Utc::now());
                if age.is_none() {
                    warn!("Registry reports a future creation date for {}: {}", domain, created);
                }
                age
            }
            Ok(None) => {
                debug!("No registration date for {}", domain);
                None
            }
            Err(e) => {
                warn!("Registry lookup failed for {}: {}", domain, e);
                None
            }
        }
    }
}
