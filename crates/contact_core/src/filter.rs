//! Final inclusion gate
//!
//! A candidate becomes a lead only if its post-cap label is High, it is not
//! on a free or disposable provider, its domain has MX records and it has a
//! source URL. Every failing condition is reported; the first one in
//! [`PRIORITY`] is the primary reason used for funnel counts.

use crate::model::RejectionReason;
use crate::scoring::ConfidenceLabel;

/// Order in which failing conditions are reported
pub const PRIORITY: [RejectionReason; 4] = [
    RejectionReason::FreeProvider,
    RejectionReason::NoMxRecords,
    RejectionReason::LowConfidence,
    RejectionReason::NoSource,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterInput {
    pub label: ConfidenceLabel,
    pub is_free_provider: bool,
    pub has_mx: bool,
    pub has_source: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionDecision {
    Include,
    Exclude {
        primary: RejectionReason,
        reasons: Vec<RejectionReason>,
    },
}

impl InclusionDecision {
    pub fn is_included(&self) -> bool {
        matches!(self, InclusionDecision::Include)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InclusionFilter;

impl InclusionFilter {
    pub fn evaluate(&self, input: &FilterInput) -> InclusionDecision {
        let reasons: Vec<RejectionReason> = PRIORITY
            .into_iter()
            .filter(|reason| match reason {
                RejectionReason::FreeProvider => input.is_free_provider,
                RejectionReason::NoMxRecords => !input.has_mx,
                RejectionReason::LowConfidence => input.label != ConfidenceLabel::High,
                RejectionReason::NoSource => !input.has_source,
                RejectionReason::SyntaxInvalid => false,
            })
            .collect();

        match reasons.first() {
            None => InclusionDecision::Include,
            Some(&primary) => InclusionDecision::Exclude { primary, reasons },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PASSING: FilterInput = FilterInput {
        label: ConfidenceLabel::High,
        is_free_provider: false,
        has_mx: true,
        has_source: true,
    };

    #[test]
    fn test_all_conditions_hold() {
        assert_eq!(InclusionFilter.evaluate(&PASSING), InclusionDecision::Include);
    }

    #[test]
    fn test_included_iff_every_condition_holds() {
        let labels = [ConfidenceLabel::Low, ConfidenceLabel::Medium, ConfidenceLabel::High];

        for label in labels {
            for mask in 0u8..8 {
                let input = FilterInput {
                    label,
                    is_free_provider: mask & 1 != 0,
                    has_mx: mask & 2 == 0,
                    has_source: mask & 4 == 0,
                };
                let expected = label == ConfidenceLabel::High && mask == 0;

                assert_eq!(
                    InclusionFilter.evaluate(&input).is_included(),
                    expected,
                    "input: {:?}",
                    input
                );
            }
        }
    }

    #[test]
    fn test_single_failures_name_their_reason() {
        let cases = [
            (FilterInput { is_free_provider: true, ..PASSING }, RejectionReason::FreeProvider),
            (FilterInput { has_mx: false, ..PASSING }, RejectionReason::NoMxRecords),
            (FilterInput { label: ConfidenceLabel::Medium, ..PASSING }, RejectionReason::LowConfidence),
            (FilterInput { has_source: false, ..PASSING }, RejectionReason::NoSource),
        ];

        for (input, reason) in cases {
            assert_eq!(
                InclusionFilter.evaluate(&input),
                InclusionDecision::Exclude {
                    primary: reason,
                    reasons: vec![reason],
                }
            );
        }
    }

    #[test]
    fn test_primary_reason_follows_priority() {
        let input = FilterInput {
            label: ConfidenceLabel::Medium,
            is_free_provider: false,
            has_mx: true,
            has_source: false,
        };

        assert_eq!(
            InclusionFilter.evaluate(&input),
            InclusionDecision::Exclude {
                primary: RejectionReason::LowConfidence,
                reasons: vec![RejectionReason::LowConfidence, RejectionReason::NoSource],
            }
        );
    }
}
