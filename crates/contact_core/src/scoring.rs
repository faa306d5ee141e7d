//! Confidence scoring
//!
//! A deterministic weighted sum over five factors. A factor is granted only
//! on an explicit positive signal, so unknown inputs never add or subtract
//! anything. The catch-all cap is applied after the sum and recorded next to
//! the uncapped label.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::DomainAssessment;

/// Named scoring signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    /// Source URL is hosted on the company's own domain
    OfficialSource,
    /// Domain has at least one usable MX record
    MxValid,
    /// Domain registered for longer than the configured threshold
    EstablishedDomain,
    /// Homepage shows current or prior year activity
    ActiveSite,
    /// Address domain is the company domain or one of its subdomains
    DomainMatch,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::OfficialSource,
        Factor::MxValid,
        Factor::EstablishedDomain,
        Factor::ActiveSite,
        Factor::DomainMatch,
    ];

    pub fn weight(&self) -> u8 {
        match self {
            Factor::OfficialSource => 40,
            Factor::MxValid => 20,
            Factor::EstablishedDomain => 15,
            Factor::ActiveSite => 15,
            Factor::DomainMatch => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::OfficialSource => "official_source",
            Factor::MxValid => "mx_valid",
            Factor::EstablishedDomain => "established_domain",
            Factor::ActiveSite => "active_site",
            Factor::DomainMatch => "domain_match",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence band, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

impl ConfidenceLabel {
    /// `>= 80` High, `60..80` Medium, below that Low
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => ConfidenceLabel::High,
            60..=79 => ConfidenceLabel::Medium,
            _ => ConfidenceLabel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLabel::Low => "Low",
            ConfidenceLabel::Medium => "Medium",
            ConfidenceLabel::High => "High",
        }
    }
}

impl fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score, label and the factors behind them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    /// Sum of the weights in `factors`
    pub score: u8,
    /// Label implied by `score` alone
    pub raw_label: ConfidenceLabel,
    /// Label after the catch-all cap
    pub label: ConfidenceLabel,
    /// Whether the catch-all cap lowered the label
    pub capped: bool,
    pub factors: BTreeSet<Factor>,
}

impl ConfidenceResult {
    pub fn has(&self, factor: Factor) -> bool {
        self.factors.contains(&factor)
    }
}

/// Everything the scorer reads for one candidate
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub source_url: Option<&'a str>,
    /// Lower-cased domain part of the address
    pub email_domain: &'a str,
    /// Normalized company domain
    pub company_domain: &'a str,
    pub assessment: &'a DomainAssessment,
}

/// Host of `source_url` is the company domain or a subdomain of it
pub fn is_official_source(source_url: &str, company_domain: &str) -> bool {
    let source_url = source_url.trim();
    if source_url.is_empty() || company_domain.is_empty() {
        return false;
    }

    let parsed = Url::parse(source_url).or_else(|_| Url::parse(&format!("https://{}", source_url)));
    match parsed {
        Ok(url) => url
            .host_str()
            .map(|host| is_same_or_subdomain(host, company_domain))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// `domain` equals `parent` or ends with `.{parent}`
pub fn is_same_or_subdomain(domain: &str, parent: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_lowercase();
    let parent = parent.trim_end_matches('.').to_lowercase();
    if parent.is_empty() {
        return false;
    }
    domain == parent || domain.ends_with(&format!(".{}", parent))
}

/// Weighted factor scorer
pub struct ConfidenceScorer {
    established_after_days: u32,
}

impl ConfidenceScorer {
    pub fn new(established_after_days: u32) -> Self {
        Self { established_after_days }
    }

    /// Which factors `input` satisfies
    pub fn factors(&self, input: &ScoringInput<'_>) -> BTreeSet<Factor> {
        let assessment = input.assessment;
        let mut factors = BTreeSet::new();

        if input
            .source_url
            .is_some_and(|url| is_official_source(url, input.company_domain))
        {
            factors.insert(Factor::OfficialSource);
        }
        if assessment.has_mx() {
            factors.insert(Factor::MxValid);
        }
        if assessment
            .domain_age_days
            .is_some_and(|days| days > self.established_after_days)
        {
            factors.insert(Factor::EstablishedDomain);
        }
        if assessment.shows_activity() {
            factors.insert(Factor::ActiveSite);
        }
        if is_same_or_subdomain(input.email_domain, input.company_domain) {
            factors.insert(Factor::DomainMatch);
        }

        factors
    }

    pub fn score(&self, input: &ScoringInput<'_>) -> ConfidenceResult {
        let factors = self.factors(input);
        let score: u8 = factors.iter().map(Factor::weight).sum();
        let raw_label = ConfidenceLabel::from_score(score);
        let (label, capped) = apply_catch_all_cap(raw_label, input.assessment.is_catch_all_likely);

        ConfidenceResult {
            score,
            raw_label,
            label,
            capped,
            factors,
        }
    }
}

/// A likely catch-all domain can never be labelled High
pub fn apply_catch_all_cap(label: ConfidenceLabel, catch_all_likely: Option<bool>) -> (ConfidenceLabel, bool) {
    if catch_all_likely == Some(true) && label > ConfidenceLabel::Medium {
        (ConfidenceLabel::Medium, true)
    } else {
        (label, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Degradable;
    use crate::model::{ActivityReport, MxRecord};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const ACTIVE: ActivityReport = ActivityReport {
        has_content: true,
        has_navigation: true,
        shows_activity: true,
        score: 1.0,
    };

    fn assessment(
        has_mx: bool,
        age: Option<u32>,
        catch_all: Option<bool>,
        activity: Option<ActivityReport>,
    ) -> DomainAssessment {
        let mut assessment = DomainAssessment::unknown("foundertown.example");
        assessment.dns_resolved = true;
        if has_mx {
            assessment.mx_records = vec![MxRecord {
                host: "mx.foundertown.example".to_string(),
                priority: 10,
            }];
        }
        assessment.domain_age_days = age;
        assessment.is_catch_all_likely = catch_all;
        assessment.activity = activity;
        assessment
    }

    fn input<'a>(source: Option<&'a str>, assessment: &'a DomainAssessment) -> ScoringInput<'a> {
        ScoringInput {
            source_url: source,
            email_domain: "foundertown.example",
            company_domain: "foundertown.example",
            assessment,
        }
    }

    #[test]
    fn test_weights_sum_to_one_hundred() {
        let total: u32 = Factor::ALL.iter().map(|f| u32::from(f.weight())).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_all_factors_score_high() {
        let assessment = assessment(true, Some(1_200), Some(false), Some(ACTIVE));
        let result = ConfidenceScorer::new(365).score(&input(Some("https://foundertown.example/about"), &assessment));

        assert_eq!(result.score, 100);
        assert_eq!(result.label, ConfidenceLabel::High);
        assert!(!result.capped);
        assert_eq!(result.factors, Factor::ALL.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_missing_source_drops_official_source() {
        let assessment = assessment(true, Some(1_200), Some(false), Some(ACTIVE));
        let result = ConfidenceScorer::new(365).score(&input(None, &assessment));

        assert_eq!(result.score, 60);
        assert_eq!(result.label, ConfidenceLabel::Medium);
        assert!(!result.has(Factor::OfficialSource));
    }

    #[test]
    fn test_unknown_age_is_neutral() {
        let assessment = assessment(true, None, None, Some(ACTIVE));
        let result = ConfidenceScorer::new(365).score(&input(Some("https://foundertown.example"), &assessment));

        assert!(!result.has(Factor::EstablishedDomain));
        assert_eq!(result.score, 85);
    }

    #[test]
    fn test_established_threshold_is_exclusive() {
        let scorer = ConfidenceScorer::new(365);
        let at_threshold = assessment(false, Some(365), None, None);
        let past_threshold = assessment(false, Some(366), None, None);

        assert!(!scorer.factors(&input(None, &at_threshold)).contains(&Factor::EstablishedDomain));
        assert!(scorer.factors(&input(None, &past_threshold)).contains(&Factor::EstablishedDomain));
    }

    #[test]
    fn test_inactive_site_gets_no_activity_factor() {
        let quiet = ActivityReport {
            shows_activity: false,
            ..ACTIVE
        };
        let assessment = assessment(true, Some(1_200), None, Some(quiet));
        let result = ConfidenceScorer::new(365).score(&input(None, &assessment));

        assert!(!result.has(Factor::ActiveSite));
    }

    #[test]
    fn test_catch_all_caps_label_but_keeps_score() {
        let assessment = assessment(true, Some(1_200), Some(true), Some(ACTIVE));
        let result = ConfidenceScorer::new(365).score(&input(Some("https://foundertown.example/team"), &assessment));

        assert_eq!(result.score, 100);
        assert_eq!(result.raw_label, ConfidenceLabel::High);
        assert_eq!(result.label, ConfidenceLabel::Medium);
        assert!(result.capped);
    }

    #[test]
    fn test_official_source_matching() {
        assert!(is_official_source("https://foundertown.example/about", "foundertown.example"));
        assert!(is_official_source("https://www.foundertown.example", "foundertown.example"));
        assert!(is_official_source("foundertown.example/team", "foundertown.example"));
        assert!(!is_official_source("https://linkedin.com/in/asha", "foundertown.example"));
        assert!(!is_official_source("https://notfoundertown.example", "foundertown.example"));
        assert!(!is_official_source("", "foundertown.example"));
    }

    #[test]
    fn test_domain_match() {
        assert!(is_same_or_subdomain("foundertown.example", "foundertown.example"));
        assert!(is_same_or_subdomain("mail.foundertown.example", "foundertown.example"));
        assert!(!is_same_or_subdomain("foundertown.co", "foundertown.example"));
        assert!(!is_same_or_subdomain("xfoundertown.example", "foundertown.example"));
    }

    #[test]
    fn test_label_boundaries() {
        assert_eq!(ConfidenceLabel::from_score(100), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(80), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(79), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(60), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(59), ConfidenceLabel::Low);
        assert_eq!(ConfidenceLabel::from_score(0), ConfidenceLabel::Low);
    }

    fn arb_activity() -> impl Strategy<Value = Option<ActivityReport>> {
        prop_oneof![
            Just(None),
            any::<bool>().prop_map(|shows_activity| Some(ActivityReport {
                shows_activity,
                ..ACTIVE
            })),
        ]
    }

    proptest! {
        #[test]
        fn prop_score_is_weight_sum(
            has_source in any::<bool>(),
            has_mx in any::<bool>(),
            age in proptest::option::of(0u32..5_000),
            catch_all in proptest::option::of(any::<bool>()),
            activity in arb_activity(),
            matching_domain in any::<bool>(),
        ) {
            let assessment = assessment(has_mx, age, catch_all, activity);
            let email_domain = if matching_domain { "foundertown.example" } else { "elsewhere.example" };
            let input = ScoringInput {
                source_url: has_source.then_some("https://foundertown.example/about"),
                email_domain,
                company_domain: "foundertown.example",
                assessment: &assessment,
            };

            let result = ConfidenceScorer::new(365).score(&input);
            let expected: u32 = result.factors.iter().map(|f| u32::from(f.weight())).sum();

            prop_assert_eq!(u32::from(result.score), expected);
            prop_assert!(result.score <= 100);
            if result.score >= 80 {
                prop_assert_eq!(result.raw_label, ConfidenceLabel::High);
            }
            if catch_all == Some(true) {
                prop_assert!(result.label != ConfidenceLabel::High);
            }
            if age.is_none() {
                prop_assert!(!result.has(Factor::EstablishedDomain));
            }
            prop_assert!(result.label <= result.raw_label);
        }
    }
}
