//! Validation orchestrator
//!
//! Runs each candidate through
//! `Pending -> SyntaxChecked -> AssessmentGathered -> Scored -> Accepted | Rejected`.
//! Domain signals are gathered concurrently, cached per domain and shared by
//! every candidate on that domain. A global semaphore caps how many
//! candidates are in flight at once.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::activity::{ActivityProber, HttpPageFetcher, PageFetcher};
use crate::cache::{CacheLayer, CacheStore, Concern, ConcernStats, MemoryStore};
use crate::catch_all::CatchAllEstimator;
use crate::config::PipelineConfig;
use crate::dns::{DnsLookup, DomainResolver, HickoryDns};
use crate::filter::{FilterInput, InclusionDecision, InclusionFilter};
use crate::model::{
    Candidate, DnsAnswer, DomainAssessment, Rejection, RejectionReason, ValidatedLead,
    ValidationOutcome, ValidationStage,
};
use crate::providers::{is_role_based, ProviderClassifier};
use crate::registry::{RdapClient, RegistryAgeAssessor, RegistryLookup};
use crate::scoring::{ConfidenceResult, ConfidenceScorer, ScoringInput};
use crate::syntax::{normalize_company_domain, SyntaxValidator};
use crate::throttle::DomainThrottle;
use crate::{PipelineError, Result};

/// External capabilities the pipeline consumes
#[derive(Clone)]
pub struct Collaborators {
    pub dns: Arc<dyn DnsLookup>,
    pub registry: Arc<dyn RegistryLookup>,
    pub fetcher: Arc<dyn PageFetcher>,
}

impl Collaborators {
    /// hickory DNS, RDAP registry and reqwest page fetcher
    pub fn production(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            dns: Arc::new(HickoryDns::new(&config.dns)),
            registry: Arc::new(RdapClient::new(&config.registry, &config.http)?),
            fetcher: Arc::new(HttpPageFetcher::new(&config.http, config.activity.fetch_timeout())?),
        })
    }
}

/// Backing stores for the cache concerns the orchestrator produces
#[derive(Clone)]
pub struct CacheStores {
    pub assessment: Arc<dyn CacheStore<DomainAssessment>>,
    pub dns: Arc<dyn CacheStore<DnsAnswer>>,
}

impl CacheStores {
    pub fn in_memory() -> Self {
        Self {
            assessment: Arc::new(MemoryStore::new()),
            dns: Arc::new(MemoryStore::new()),
        }
    }
}

/// The four network-bound domain checks
struct SignalGatherers {
    resolver: Arc<DomainResolver>,
    dns_cache: CacheLayer<DnsAnswer>,
    registry: RegistryAgeAssessor,
    activity: ActivityProber,
    catch_all: CatchAllEstimator,
}

impl SignalGatherers {
    /// Every check runs to completion or to `unknown`; nothing here fails.
    async fn gather(&self, domain: String) -> DomainAssessment {
        let mail = async {
            let resolver = Arc::clone(&self.resolver);
            let answer = self
                .dns_cache
                .get_or_compute(&domain, move |name| async move { resolver.resolve(&name).await })
                .await
                .unwrap_or_else(|e| {
                    warn!("DNS cache unavailable for {}: {}", domain, e);
                    DnsAnswer::unresolved()
                });
            let catch_all = self.catch_all.estimate(&domain, &answer.mx_records).await;
            (answer, catch_all)
        };

        let ((answer, is_catch_all_likely), domain_age_days, activity) = tokio::join!(
            mail,
            self.registry.assess(&domain),
            self.activity.probe(&domain),
        );

        DomainAssessment {
            dns_resolved: answer.dns_resolved,
            mx_records: answer.mx_records,
            domain_age_days,
            is_catch_all_likely,
            activity,
            assessed_at: Utc::now(),
            domain,
        }
    }
}

/// Rejection counts per reason, pre-filled so every reason is reported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelCounts {
    pub accepted: usize,
    pub rejected: BTreeMap<RejectionReason, usize>,
    /// Candidates never started because the batch was cancelled
    pub skipped: usize,
}

impl FunnelCounts {
    pub fn new() -> Self {
        Self {
            accepted: 0,
            rejected: RejectionReason::ALL.iter().map(|reason| (*reason, 0)).collect(),
            skipped: 0,
        }
    }

    pub fn record(&mut self, outcome: &ValidationOutcome) {
        match outcome.rejection_reason() {
            None => self.accepted += 1,
            Some(reason) => *self.rejected.entry(reason).or_insert(0) += 1,
        }
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    /// Candidates that reached a terminal state
    pub fn processed(&self) -> usize {
        self.accepted + self.rejected_total()
    }

    /// Percentage of processed candidates rejected for `reason`
    pub fn rejection_share(&self, reason: RejectionReason) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        let count = self.rejected.get(&reason).copied().unwrap_or(0);
        count as f64 * 100.0 / processed as f64
    }

    pub fn acceptance_share(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.accepted as f64 * 100.0 / processed as f64
    }
}

impl Default for FunnelCounts {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accepted: Vec<ValidatedLead>,
    pub rejected: Vec<Rejection>,
    pub funnel: FunnelCounts,
}

impl BatchReport {
    fn new(batch_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            started_at: now,
            finished_at: now,
            accepted: Vec::new(),
            rejected: Vec::new(),
            funnel: FunnelCounts::new(),
        }
    }

    fn record(&mut self, outcome: ValidationOutcome) {
        self.funnel.record(&outcome);
        match outcome {
            ValidationOutcome::Accepted(lead) => self.accepted.push(lead),
            ValidationOutcome::Rejected(rejection) => self.rejected.push(rejection),
        }
    }
}

/// Contact validation pipeline
pub struct LeadValidator {
    config: PipelineConfig,
    syntax: SyntaxValidator,
    providers: ProviderClassifier,
    scorer: ConfidenceScorer,
    filter: InclusionFilter,
    signals: Arc<SignalGatherers>,
    assessments: CacheLayer<DomainAssessment>,
    throttle: Arc<DomainThrottle>,
    permits: Semaphore,
}

impl LeadValidator {
    /// Create a validator backed by live DNS, RDAP and HTTP
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let collaborators = Collaborators::production(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    /// Create a validator over the given collaborators with in-memory caches
    pub fn with_collaborators(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_stores(config, collaborators, CacheStores::in_memory())
    }

    pub fn with_stores(config: PipelineConfig, collaborators: Collaborators, stores: CacheStores) -> Result<Self> {
        info!("Initializing validation pipeline");
        config.validate()?;

        let providers = ProviderClassifier::bundled()
            .map_err(|e| PipelineError::Initialization(format!("provider lists: {}", e)))?;
        let throttle = Arc::new(DomainThrottle::new(&config.rate_limit)?);

        let signals = SignalGatherers {
            resolver: Arc::new(DomainResolver::new(
                Arc::clone(&collaborators.dns),
                Arc::clone(&throttle),
                config.dns.timeout(),
            )),
            dns_cache: CacheLayer::new(Concern::Dns, Concern::Dns.ttl(&config.cache), stores.dns),
            registry: RegistryAgeAssessor::new(
                collaborators.registry,
                Arc::clone(&throttle),
                config.registry.timeout(),
            ),
            activity: ActivityProber::new(collaborators.fetcher, Arc::clone(&throttle), &config.activity)?,
            catch_all: CatchAllEstimator::new(
                collaborators.dns,
                Arc::clone(&throttle),
                config.catch_all.clone(),
                config.dns.timeout(),
            ),
        };

        let validator = Self {
            syntax: SyntaxValidator::new(),
            providers,
            scorer: ConfidenceScorer::new(config.scoring.established_after_days),
            filter: InclusionFilter,
            signals: Arc::new(signals),
            assessments: CacheLayer::new(
                Concern::Assessment,
                Concern::Assessment.ttl(&config.cache),
                stores.assessment,
            ),
            throttle,
            permits: Semaphore::new(config.concurrency.max_concurrent_validations),
            config,
        };

        info!(
            "Validation pipeline initialized - max concurrent: {}, {} req/min per domain",
            validator.config.concurrency.max_concurrent_validations,
            validator.config.rate_limit.requests_per_minute
        );
        Ok(validator)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate one candidate. Waits for a slot under the global cap.
    ///
    /// Rejections are `Ok`; `Err` is reserved for conditions that should
    /// abort the caller's batch, such as a failing cache store.
    pub async fn validate(&self, candidate: &Candidate) -> Result<ValidationOutcome> {
        let _permit = self.permits.acquire().await.map_err(anyhow::Error::new)?;
        self.run(candidate).await
    }

    /// Validate candidates concurrently and summarize the outcomes.
    ///
    /// After `cancel` fires no new candidate is started; candidates already
    /// running finish normally and unstarted ones are counted as skipped.
    #[instrument(skip(self, candidates, cancel), fields(batch_id = field::Empty, candidates = candidates.len()))]
    pub async fn validate_batch(&self, candidates: Vec<Candidate>, cancel: CancellationToken) -> Result<BatchReport> {
        let mut report = BatchReport::new(Uuid::new_v4());
        Span::current().record("batch_id", field::display(report.batch_id));
        info!("Starting batch");

        let mut pending: FuturesUnordered<_> = candidates
            .iter()
            .map(|candidate| self.validate_unless_cancelled(candidate, &cancel))
            .collect();

        while let Some(result) = pending.next().await {
            match result? {
                Some(outcome) => report.record(outcome),
                None => report.funnel.skipped += 1,
            }
        }
        drop(pending);

        self.throttle.forget_idle().await;
        self.purge_expired().await?;
        report.finished_at = Utc::now();

        info!(
            accepted = report.funnel.accepted,
            rejected = report.funnel.rejected_total(),
            skipped = report.funnel.skipped,
            "Batch complete"
        );
        for (reason, count) in &report.funnel.rejected {
            debug!(
                "Rejected for {}: {} ({:.1}%)",
                reason,
                count,
                report.funnel.rejection_share(*reason)
            );
        }

        Ok(report)
    }

    async fn validate_unless_cancelled(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<Option<ValidationOutcome>> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Batch cancelled, skipping {}", candidate.email_address);
                return Ok(None);
            }
            permit = self.permits.acquire() => permit.map_err(anyhow::Error::new)?,
        };

        self.run(candidate).await.map(Some)
    }

    /// Cached assessment for a domain, gathering it on a miss
    pub async fn assess_domain(&self, domain: &str) -> Result<DomainAssessment> {
        let signals = Arc::clone(&self.signals);
        self.assessments
            .get_or_compute(domain, move |domain| async move { signals.gather(domain).await })
            .await
    }

    pub async fn cache_stats(&self) -> Result<Vec<ConcernStats>> {
        Ok(vec![
            self.assessments.stats().await?,
            self.signals.dns_cache.stats().await?,
        ])
    }

    /// Drop expired entries from every cache, returning how many went
    pub async fn purge_expired(&self) -> Result<usize> {
        let assessments = self.assessments.purge_expired().await?;
        let dns = self.signals.dns_cache.purge_expired().await?;
        Ok(assessments + dns)
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.assessments.clear().await?;
        self.signals.dns_cache.clear().await?;
        info!("Validation caches cleared");
        Ok(())
    }

    #[instrument(skip(self, candidate), fields(email = %candidate.email_address, company = %candidate.company_domain))]
    async fn run(&self, candidate: &Candidate) -> Result<ValidationOutcome> {
        let mut stage = ValidationStage::Pending;
        debug!(?stage, "Starting candidate validation");

        // Step 1: Syntax
        let address = match self.syntax.validate(&candidate.email_address) {
            Ok(address) => address,
            Err(e) => {
                debug!("Syntax check failed: {}", e);
                return Ok(reject(candidate, vec![RejectionReason::SyntaxInvalid], stage, None));
            }
        };
        stage = ValidationStage::SyntaxChecked;
        debug!(?stage, domain = %address.domain());

        // Step 2: Free providers never become leads, skip the network entirely
        let provider = self.providers.classify(address.domain());
        if provider.is_free_provider() {
            debug!("Address is on a {:?} provider", provider);
            return Ok(reject(candidate, vec![RejectionReason::FreeProvider], stage, None));
        }

        // Step 3: Domain signals, cached and coalesced per domain
        let assessment = self.assess_domain(address.domain()).await?;
        stage = ValidationStage::AssessmentGathered;
        debug!(
            ?stage,
            dns_resolved = assessment.dns_resolved,
            mx = assessment.mx_records.len(),
            age_days = ?assessment.domain_age_days,
            catch_all = ?assessment.is_catch_all_likely,
            activity = ?assessment.activity_score()
        );

        // Step 4: Score
        let company_domain = normalize_company_domain(&candidate.company_domain);
        let source = candidate.source();
        let confidence = self.scorer.score(&ScoringInput {
            source_url: source,
            email_domain: address.domain(),
            company_domain: &company_domain,
            assessment: &assessment,
        });
        stage = ValidationStage::Scored;
        debug!(?stage, score = confidence.score, label = %confidence.label, capped = confidence.capped);

        // Step 5: Inclusion
        let decision = self.filter.evaluate(&FilterInput {
            label: confidence.label,
            is_free_provider: false,
            has_mx: assessment.has_mx(),
            has_source: source.is_some(),
        });

        match (decision, source) {
            (InclusionDecision::Include, Some(source_url)) => {
                let lead = ValidatedLead::build(
                    candidate,
                    address.to_string(),
                    company_domain,
                    source_url.to_string(),
                    confidence,
                    is_role_based(address.local_part()),
                    chrono::Duration::days(i64::from(self.config.scoring.validity_horizon_days)),
                );
                info!(email = %lead.email, score = lead.confidence.score, role_based = lead.role_based, "Candidate accepted");
                Ok(ValidationOutcome::Accepted(lead))
            }
            (InclusionDecision::Include, None) => {
                Ok(reject(candidate, vec![RejectionReason::NoSource], stage, Some(confidence)))
            }
            (InclusionDecision::Exclude { reasons, .. }, _) => {
                Ok(reject(candidate, reasons, stage, Some(confidence)))
            }
        }
    }
}

fn reject(
    candidate: &Candidate,
    reasons: Vec<RejectionReason>,
    stage: ValidationStage,
    confidence: Option<ConfidenceResult>,
) -> ValidationOutcome {
    let reason = reasons.first().copied().unwrap_or(RejectionReason::LowConfidence);
    info!(reason = %reason, ?stage, "Candidate rejected");

    ValidationOutcome::Rejected(Rejection {
        candidate: candidate.clone(),
        reason,
        reasons,
        stage,
        confidence,
    })
}
