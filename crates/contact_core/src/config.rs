//! Configuration for the validation pipeline
//!
//! Defaults are layered with an optional TOML file and `CONTACT_CORE_`
//! environment variables using figment. Nested keys are separated by a
//! double underscore, e.g. `CONTACT_CORE_RATE_LIMIT__REQUESTS_PER_MINUTE=20`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{PipelineError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONTACT_CORE_";

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: ConcurrencyConfig,
    pub rate_limit: RateLimitConfig,
    pub dns: DnsConfig,
    pub registry: RegistryConfig,
    pub activity: ActivityConfig,
    pub cache: CacheConfig,
    pub scoring: ScoringConfig,
    pub catch_all: CatchAllConfig,
    pub http: HttpConfig,
    pub observability: ObservabilityConfig,
}

impl PipelineConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(PipelineError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: PipelineConfig = figment
            .extract()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.concurrency.max_concurrent_validations == 0, "concurrency.max_concurrent_validations"),
            (self.rate_limit.requests_per_minute == 0, "rate_limit.requests_per_minute"),
            (self.dns.timeout_ms == 0, "dns.timeout_ms"),
            (self.registry.timeout_ms == 0, "registry.timeout_ms"),
            (self.activity.fetch_timeout_ms == 0, "activity.fetch_timeout_ms"),
            (self.cache.assessment_ttl_secs == 0, "cache.assessment_ttl_secs"),
            (self.cache.company_ttl_secs == 0, "cache.company_ttl_secs"),
            (self.cache.dns_ttl_secs == 0, "cache.dns_ttl_secs"),
        ];

        for (is_zero, key) in checks {
            if is_zero {
                return Err(PipelineError::Configuration(format!("{} must be greater than zero", key)));
            }
        }

        if self.registry.base_url.trim().is_empty() {
            return Err(PipelineError::Configuration("registry.base_url must be set".to_string()));
        }

        Ok(())
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum validations in flight at once, across all callers
    pub max_concurrent_validations: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: 5,
        }
    }
}

/// Per-domain rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Token bucket quota per domain
    pub requests_per_minute: u32,
    /// Minimum spacing between page fetches to the same host
    pub min_host_interval_ms: u64,
}

impl RateLimitConfig {
    pub fn min_host_interval(&self) -> Duration {
        Duration::from_millis(self.min_host_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            min_host_interval_ms: 2_500,
        }
    }
}

/// DNS resolver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsConfig {
    /// Per-lookup timeout in milliseconds
    pub timeout_ms: u64,
    /// Resolver attempts per query
    pub attempts: usize,
    /// Resolver-internal record cache size
    pub cache_size: usize,
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            attempts: 2,
            cache_size: 1_024,
        }
    }
}

/// Domain registry (RDAP) settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// RDAP bootstrap base URL; `/domain/{name}` is appended
    pub base_url: String,
    pub timeout_ms: u64,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rdap.org".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Site activity heuristics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivityConfig {
    pub fetch_timeout_ms: u64,
    /// "Has content" needs more paragraphs than this
    pub min_paragraphs: usize,
    /// Words a block needs to count as a paragraph
    pub min_paragraph_words: usize,
    /// Distinct same-site links needed for "has navigation"
    pub min_internal_links: usize,
}

impl ActivityConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 8_000,
            min_paragraphs: 3,
            min_paragraph_words: 8,
            min_internal_links: 3,
        }
    }
}

/// Time-to-live per cache concern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Full domain assessment
    pub assessment_ttl_secs: u64,
    /// Per-company aggregates
    pub company_ttl_secs: u64,
    /// Raw DNS answers
    pub dns_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            assessment_ttl_secs: 7 * 24 * 60 * 60,
            company_ttl_secs: 24 * 60 * 60,
            dns_ttl_secs: 60 * 60,
        }
    }
}

/// Scoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// A domain older than this many days is "established"
    pub established_after_days: u32,
    /// How long an accepted lead stays valid before re-verification
    pub validity_horizon_days: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            established_after_days: 365,
            validity_horizon_days: 30,
        }
    }
}

/// Catch-all heuristic tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatchAllConfig {
    /// MX host suffixes of forwarding services that accept any local part
    /// unless configured otherwise
    pub accept_all_mx_suffixes: Vec<String>,
    /// MX host suffixes of providers that reject unknown recipients
    pub strict_mx_suffixes: Vec<String>,
}

impl Default for CatchAllConfig {
    fn default() -> Self {
        Self {
            accept_all_mx_suffixes: [
                "improvmx.com",
                "forwardemail.net",
                "registrar-servers.com",
                "secureserver.net",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            strict_mx_suffixes: [
                "google.com",
                "googlemail.com",
                "outlook.com",
                "protection.outlook.com",
                "zoho.com",
                "zoho.in",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("contact_core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable JSON structured logging
    pub json_logs: bool,
    /// Filter used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.concurrency.max_concurrent_validations, 5);
        assert_eq!(config.rate_limit.requests_per_minute, 10);
        assert_eq!(config.rate_limit.min_host_interval(), Duration::from_millis(2_500));
        assert_eq!(config.cache.assessment_ttl_secs, 604_800);
        assert_eq!(config.cache.company_ttl_secs, 86_400);
        assert_eq!(config.cache.dns_ttl_secs, 3_600);
        assert_eq!(config.scoring.established_after_days, 365);
        assert!(!config.observability.json_logs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.concurrency.max_concurrent_validations = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));

        let mut config = PipelineConfig::default();
        config.cache.dns_ttl_secs = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));

        let mut config = PipelineConfig::default();
        config.registry.base_url = " ".to_string();
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "contact.toml",
                r#"
                [rate_limit]
                requests_per_minute = 30

                [scoring]
                validity_horizon_days = 14
                "#,
            )?;
            jail.set_env("CONTACT_CORE_RATE_LIMIT__MIN_HOST_INTERVAL_MS", "3000");
            jail.set_env("CONTACT_CORE_OBSERVABILITY__JSON_LOGS", "true");

            let config = PipelineConfig::load(Some(Path::new("contact.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.rate_limit.requests_per_minute, 30);
            assert_eq!(config.rate_limit.min_host_interval_ms, 3_000);
            assert_eq!(config.scoring.validity_horizon_days, 14);
            assert_eq!(config.scoring.established_after_days, 365);
            assert!(config.observability.json_logs);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let result = PipelineConfig::load(Some(Path::new("/nonexistent/contact.toml")));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
