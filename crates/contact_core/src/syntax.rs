//! Structural validation of email addresses
//!
//! Local checks only: the `email_address` grammar for the whole address plus
//! hostname rules for the domain part. No network access. Internationalized
//! domains are checked and returned in their ASCII (punycode) form.

use email_address::EmailAddress;
use reqwest::Url;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Why an address failed structural validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("empty address")]
    Empty,
    #[error("malformed address: {0}")]
    Malformed(String),
    #[error("domain part is not a hostname: {0}")]
    InvalidDomain(String),
}

/// An address that passed validation. The domain is lower-cased ASCII, the
/// local part is kept as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddress {
    local_part: String,
    domain: String,
}

impl NormalizedAddress {
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for NormalizedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Syntax validator for candidate addresses
#[derive(Debug, Clone, Default)]
pub struct SyntaxValidator;

impl SyntaxValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate and normalize an address
    ///
    /// # Returns
    /// * `Ok(NormalizedAddress)` if the address is well formed
    /// * `Err(SyntaxError)` otherwise
    pub fn validate(&self, raw: &str) -> Result<NormalizedAddress, SyntaxError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyntaxError::Empty);
        }

        // Display-name forms ("Name <a@b>") and embedded whitespace are not
        // bare addresses.
        if trimmed.contains(['<', '>']) || trimmed.chars().any(char::is_whitespace) {
            debug!("Rejecting address with display text or whitespace: {}", trimmed);
            return Err(SyntaxError::Malformed(trimmed.to_string()));
        }

        let parsed = EmailAddress::parse_with_options(trimmed, Default::default())
            .map_err(|e| SyntaxError::Malformed(format!("{}: {}", trimmed, e)))?;

        let written = parsed.domain().to_lowercase();
        let domain = match domain_to_ascii(&written) {
            Some(domain) if is_valid_hostname(&domain) => domain,
            _ => {
                debug!("Domain part failed hostname validation: {}", written);
                return Err(SyntaxError::InvalidDomain(written));
            }
        };

        Ok(NormalizedAddress {
            local_part: parsed.local_part().to_string(),
            domain,
        })
    }
}

/// ASCII form of a domain. Unicode labels go through IDNA processing; the
/// result must be a bare host with nothing else attached.
pub fn domain_to_ascii(domain: &str) -> Option<String> {
    if domain.is_ascii() {
        return Some(domain.to_string());
    }

    let url = Url::parse(&format!("https://{}/", domain)).ok()?;
    if url.path() != "/"
        || url.query().is_some()
        || url.fragment().is_some()
        || url.port().is_some()
        || !url.username().is_empty()
    {
        return None;
    }

    url.host_str().map(str::to_string)
}

/// Dotted hostname check: at most 253 characters, at least two labels,
/// labels of 1-63 alphanumerics or hyphens that do not start or end with a
/// hyphen.
pub fn is_valid_hostname(domain: &str) -> bool {
    if domain.len() > 253 || domain.is_empty() {
        return false;
    }

    if !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Normalize a company domain as supplied by discovery: strips scheme,
/// `www.`, path, port and trailing dot, and lower-cases the rest. Unicode
/// domains come back in ASCII form so they compare with address domains.
pub fn normalize_company_domain(input: &str) -> String {
    let mut domain = input.trim().to_lowercase();

    if let Some((_, rest)) = domain.split_once("://") {
        domain = rest.to_string();
    }
    if let Some(end) = domain.find(['/', '?', '#']) {
        domain.truncate(end);
    }
    if let Some((host, _port)) = domain.split_once(':') {
        domain = host.to_string();
    }

    let domain = domain.trim_end_matches('.');
    let domain = domain.strip_prefix("www.").unwrap_or(domain);
    domain_to_ascii(domain).unwrap_or_else(|| domain.to_string())
}
