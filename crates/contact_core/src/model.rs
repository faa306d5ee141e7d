//! Records that flow through the pipeline: candidates in, leads or
//! rejections out, and the cached per-domain assessment in between.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::Degradable;
use crate::scoring::ConfidenceResult;

/// An unverified contact tuple supplied by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub person_name: String,
    pub role: String,
    pub email_address: String,
    pub company_domain: String,
    /// URL where the address was reportedly published
    #[serde(default)]
    pub source_url: Option<String>,
}

impl Candidate {
    /// The source URL if it is present and not blank.
    pub fn source(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// A single mail-exchange record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub host: String,
    pub priority: u16,
}

/// Raw DNS answer for a domain, cached on its own under the DNS concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub dns_resolved: bool,
    /// Ascending by priority; empty when the domain has no usable MX
    pub mx_records: Vec<MxRecord>,
}

impl DnsAnswer {
    pub fn unresolved() -> Self {
        Self {
            dns_resolved: false,
            mx_records: Vec::new(),
        }
    }
}

impl Degradable for DnsAnswer {
    fn unknown(_domain: &str) -> Self {
        Self::unresolved()
    }
}

/// Output of the site-activity heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub has_content: bool,
    pub has_navigation: bool,
    pub shows_activity: bool,
    /// Weighted combination of the three flags, in `[0, 1]`
    pub score: f32,
}

/// Everything the network checks know about one domain.
///
/// `None` means the check failed, timed out or was inconclusive. It is
/// neutral: it never grants a factor and never counts against one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAssessment {
    pub domain: String,
    pub dns_resolved: bool,
    pub mx_records: Vec<MxRecord>,
    pub domain_age_days: Option<u32>,
    pub is_catch_all_likely: Option<bool>,
    pub activity: Option<ActivityReport>,
    pub assessed_at: DateTime<Utc>,
}

impl DomainAssessment {
    pub fn has_mx(&self) -> bool {
        !self.mx_records.is_empty()
    }

    pub fn activity_score(&self) -> Option<f32> {
        self.activity.map(|report| report.score)
    }

    /// Whether the activity probe explicitly saw recent activity.
    pub fn shows_activity(&self) -> bool {
        matches!(self.activity, Some(ActivityReport { shows_activity: true, .. }))
    }
}

impl Degradable for DomainAssessment {
    fn unknown(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            dns_resolved: false,
            mx_records: Vec::new(),
            domain_age_days: None,
            is_catch_all_likely: None,
            activity: None,
            assessed_at: Utc::now(),
        }
    }
}

/// Per-candidate state machine. `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Pending,
    SyntaxChecked,
    AssessmentGathered,
    Scored,
    Accepted,
    Rejected,
}

/// Why a candidate was not promoted to a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    SyntaxInvalid,
    FreeProvider,
    NoMxRecords,
    NoSource,
    LowConfidence,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 5] = [
        RejectionReason::SyntaxInvalid,
        RejectionReason::FreeProvider,
        RejectionReason::NoMxRecords,
        RejectionReason::NoSource,
        RejectionReason::LowConfidence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::SyntaxInvalid => "syntax_invalid",
            RejectionReason::FreeProvider => "free_provider",
            RejectionReason::NoMxRecords => "no_mx_records",
            RejectionReason::NoSource => "no_source",
            RejectionReason::LowConfidence => "low_confidence",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, non-exceptional rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub candidate: Candidate,
    /// Primary reason, used for funnel counts
    pub reason: RejectionReason,
    /// Every failing condition, primary first
    pub reasons: Vec<RejectionReason>,
    /// Last stage reached before the rejection
    pub stage: ValidationStage,
    /// Present once the candidate reached scoring
    pub confidence: Option<ConfidenceResult>,
}

/// A candidate that passed every inclusion condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedLead {
    pub person_name: String,
    pub role: String,
    /// Normalized address
    pub email: String,
    pub company_domain: String,
    pub source_url: String,
    pub confidence: ConfidenceResult,
    /// Advisory: address looks like a shared mailbox (info@, sales@, ...)
    pub role_based: bool,
    pub verified_at: DateTime<Utc>,
    /// Re-verify before reuse after this instant
    pub expires_at: DateTime<Utc>,
}

impl ValidatedLead {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn build(
        candidate: &Candidate,
        email: String,
        company_domain: String,
        source_url: String,
        confidence: ConfidenceResult,
        role_based: bool,
        validity: Duration,
    ) -> Self {
        let verified_at = Utc::now();
        Self {
            person_name: candidate.person_name.clone(),
            role: candidate.role.clone(),
            email,
            company_domain,
            source_url,
            confidence,
            role_based,
            verified_at,
            expires_at: verified_at + validity,
        }
    }
}

/// Terminal result of validating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted(ValidatedLead),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    pub fn confidence(&self) -> Option<&ConfidenceResult> {
        match self {
            ValidationOutcome::Accepted(lead) => Some(&lead.confidence),
            ValidationOutcome::Rejected(rejection) => rejection.confidence.as_ref(),
        }
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            ValidationOutcome::Accepted(_) => None,
            ValidationOutcome::Rejected(rejection) => Some(rejection.reason),
        }
    }
}
