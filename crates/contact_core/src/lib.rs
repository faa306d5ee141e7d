//! # contact_core
//!
//! Contact validation and confidence scoring for published business email
//! addresses.
//!
//! A [`Candidate`] (person, role, email address, company domain, source URL)
//! is pushed through cheap local checks, a set of cached and rate-limited
//! network checks, a deterministic weighted scorer and a final inclusion
//! gate. The result is either a [`ValidatedLead`] or a structured
//! [`Rejection`].
//!
//! ## Features
//!
//! - **Syntax validation** via the `email_address` crate plus hostname rules
//! - **Free / disposable provider detection** from bundled lists
//! - **DNS validation** (A/AAAA then MX) with hickory-resolver
//! - **Registry age** from RDAP creation events
//! - **Site activity** heuristics on the company homepage
//! - **Catch-all estimation** from MX provider and SPF/DMARC presence
//! - **TTL cache with request coalescing** per concern
//! - **Per-domain rate limiting** and a global concurrency cap
//!
//! Every network signal that fails or times out degrades to `unknown`; it
//! never fails the candidate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use contact_core::{Candidate, LeadValidator, PipelineConfig, ValidationOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load(None)?;
//!     let validator = LeadValidator::new(config).await?;
//!
//!     let candidate = Candidate {
//!         person_name: "Asha Rao".to_string(),
//!         role: "Founder".to_string(),
//!         email_address: "asha@foundertown.example".to_string(),
//!         company_domain: "foundertown.example".to_string(),
//!         source_url: Some("https://foundertown.example/about".to_string()),
//!     };
//!
//!     match validator.validate(&candidate).await? {
//!         ValidationOutcome::Accepted(lead) => println!("accepted: {}", lead.email),
//!         ValidationOutcome::Rejected(rejection) => println!("rejected: {}", rejection.reason),
//!     }
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod cache;
pub mod catch_all;
pub mod config;
pub mod dns;
pub mod filter;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod scoring;
pub mod syntax;
pub mod telemetry;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a call or a whole batch.
///
/// Per-candidate network problems never show up here; they are folded into
/// `unknown` signals and [`RejectionReason`]s.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failure of a single network-bound signal.
///
/// Always caught by the component that owns the check and converted to
/// `unknown`.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("domain does not exist: {0}")]
    NxDomain(String),
    #[error("DNS lookup failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("registry lookup failed: {0}")]
    Registry(String),
    #[error("signal unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Run a network check under its own deadline. Elapsed deadlines become
/// [`SignalError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, check: F) -> std::result::Result<T, SignalError>
where
    F: Future<Output = std::result::Result<T, SignalError>>,
{
    match tokio::time::timeout(limit, check).await {
        Ok(result) => result,
        Err(_) => Err(SignalError::Timeout(limit)),
    }
}

// Re-export main types
pub use cache::{CacheKey, CacheLayer, CacheStore, Concern, MemoryStore};
pub use config::PipelineConfig;
pub use model::{
    Candidate, DnsAnswer, DomainAssessment, MxRecord, Rejection, RejectionReason,
    ValidatedLead, ValidationOutcome, ValidationStage,
};
pub use pipeline::{BatchReport, CacheStores, Collaborators, FunnelCounts, LeadValidator};
pub use scoring::{ConfidenceLabel, ConfidenceResult, Factor};
