//! Free, consumer and disposable mail provider detection
//!
//! The denylists are static configuration bundled with the crate as plain
//! text lists (one domain per line, `#` comments).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::syntax::is_valid_hostname;

const FREE_PROVIDERS: &str = include_str!("../data/free_providers.txt");
const DISPOSABLE_PROVIDERS: &str = include_str!("../data/disposable_providers.txt");

/// Shared-mailbox local parts. Substring match, as `sales.team` or
/// `hello-india` are just as shared.
const ROLE_PATTERNS: &[&str] = &[
    "info", "admin", "support", "sales", "contact", "hello", "help", "team", "noreply", "no-reply",
];

/// Class of the mail provider behind a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    Business,
    Free,
    Disposable,
}

impl ProviderClass {
    /// Free and disposable providers are both excluded from leads.
    pub fn is_free_provider(&self) -> bool {
        !matches!(self, ProviderClass::Business)
    }
}

/// Classifies email domains against the bundled denylists
pub struct ProviderClassifier {
    free: HashSet<String>,
    disposable: HashSet<String>,
}

impl ProviderClassifier {
    /// Build a classifier from the lists bundled with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_lists(FREE_PROVIDERS, DISPOSABLE_PROVIDERS)
    }

    /// Build a classifier from list contents
    ///
    /// # Arguments
    /// * `free_list` - Free/consumer provider list content
    /// * `disposable_list` - Disposable provider list content
    pub fn from_lists(free_list: &str, disposable_list: &str) -> Result<Self> {
        let free = parse_provider_list(free_list)?;
        let disposable = parse_provider_list(disposable_list)?;

        info!(
            "Provider classifier initialized with {} free and {} disposable domains",
            free.len(),
            disposable.len()
        );

        Ok(Self { free, disposable })
    }

    /// Classify the domain part of a normalized address
    pub fn classify(&self, domain: &str) -> ProviderClass {
        let domain = domain.trim().to_lowercase();

        if self.disposable.contains(&domain) {
            debug!("Domain '{}' is a disposable provider", domain);
            ProviderClass::Disposable
        } else if self.free.contains(&domain) {
            debug!("Domain '{}' is a free provider", domain);
            ProviderClass::Free
        } else {
            ProviderClass::Business
        }
    }

    pub fn is_free_provider(&self, domain: &str) -> bool {
        self.classify(domain).is_free_provider()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn disposable_count(&self) -> usize {
        self.disposable.len()
    }
}

/// Whether a local part looks like a shared role mailbox
pub fn is_role_based(local_part: &str) -> bool {
    let local = local_part.to_lowercase();
    ROLE_PATTERNS.iter().any(|pattern| local.contains(pattern))
}

fn parse_provider_list(content: &str) -> Result<HashSet<String>> {
    let mut domains = HashSet::new();
    let mut invalid_count = 0;

    for (index, line) in content.lines().enumerate() {
        let domain = line.trim();

        if domain.is_empty() || domain.starts_with('#') {
            continue;
        }

        let domain = domain.to_lowercase();
        if is_valid_hostname(&domain) {
            domains.insert(domain);
        } else {
            invalid_count += 1;
            warn!("Invalid provider domain at line {}: '{}'", index + 1, domain);
        }
    }

    if invalid_count > 0 {
        debug!("Skipped {} invalid provider entries", invalid_count);
    }

    if domains.is_empty() {
        return Err(anyhow!("No valid domains found in provider list"));
    }

    Ok(domains)
}
