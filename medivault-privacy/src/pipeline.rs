use std::{sync::Arc, time::Instant};

use medivault_telemetry::TelemetryHandle;
use tracing::{debug, info, warn};

use crate::{
    api::{QueryEcho, QueryReply, QueryRequest, QueryResponse, DP_MESSAGE},
    budget::{BudgetError, BudgetReport, BudgetStore, PrivacyBudgetLedger},
    cache::EncodeCache,
    codec::ValueCodec,
    config::EngineConfig,
    dp::{validate_epsilon, LaplaceMechanism},
    errors::{QueryError, QueryResult},
    matcher::QueryMatcher,
    source::RecordSource,
    types::{Predicate, ValidationError},
};

pub const COUNTER_REQUESTS: &str = "query.requests";
pub const COUNTER_EXECUTED: &str = "query.executed";
pub const COUNTER_REJECTED_BUDGET: &str = "query.rejected.budget";
pub const COUNTER_REJECTED_VALIDATION: &str = "query.rejected.validation";
pub const COUNTER_FAILED: &str = "query.failed";
pub const LATENCY_QUERY: &str = "query.latency";

/// Lifecycle of one request through the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPhase {
    Requested,
    BudgetChecked,
    Rejected,
    Executed,
    Recorded,
    Responded,
}

/// Sequences ledger check, match, noise, and ledger commit for each request.
///
/// All methods take `&self`; share one engine behind an `Arc` across threads.
pub struct QueryEngine {
    ledger: Arc<dyn BudgetStore>,
    source: Arc<dyn RecordSource>,
    cache: Arc<EncodeCache>,
    matcher: QueryMatcher,
    noise: LaplaceMechanism,
    telemetry: TelemetryHandle,
}

impl QueryEngine {
    /// Builds an engine with a fresh in-memory ledger.
    pub fn new(config: &EngineConfig, source: Arc<dyn RecordSource>) -> QueryResult<Self> {
        config.validate()?;
        let ledger = Arc::new(PrivacyBudgetLedger::new(config.budget.clone())?);
        Self::with_ledger(config, ledger, source)
    }

    /// Builds an engine around a caller-owned budget store.
    pub fn with_ledger(
        config: &EngineConfig,
        ledger: Arc<dyn BudgetStore>,
        source: Arc<dyn RecordSource>,
    ) -> QueryResult<Self> {
        config.validate()?;
        let codec = ValueCodec::from_config(&config.codec)?;
        let noise = LaplaceMechanism::from_config(&config.noise)?;
        Ok(Self::from_parts(
            ledger,
            source,
            Arc::new(EncodeCache::new(codec)),
            noise,
            TelemetryHandle::from_config(config.telemetry.clone()),
            config,
        ))
    }

    /// Assembles an engine from already-built collaborators.
    pub fn from_parts(
        ledger: Arc<dyn BudgetStore>,
        source: Arc<dyn RecordSource>,
        cache: Arc<EncodeCache>,
        noise: LaplaceMechanism,
        telemetry: TelemetryHandle,
        config: &EngineConfig,
    ) -> Self {
        info!(
            key = %cache.codec().key_fingerprint(),
            mode = ?config.matcher.integrity_mode,
            default_budget = config.budget.default_total_budget,
            "query engine ready"
        );
        let matcher = QueryMatcher::new(Arc::clone(&cache), &config.matcher, telemetry.clone());
        Self {
            ledger,
            source,
            cache,
            matcher,
            noise,
            telemetry,
        }
    }

    pub fn cache(&self) -> &Arc<EncodeCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<dyn BudgetStore> {
        &self.ledger
    }

    pub fn telemetry(&self) -> &TelemetryHandle {
        &self.telemetry
    }

    /// Runs a request and maps failures onto the wire error shapes.
    pub fn respond(&self, request: &QueryRequest) -> QueryReply {
        self.handle_request(request).into()
    }

    pub fn handle_request(&self, request: &QueryRequest) -> QueryResult<QueryResponse> {
        let started = Instant::now();
        self.telemetry.incr(COUNTER_REQUESTS);
        let result = self.run(request);
        self.telemetry
            .record_latency_ms(LATENCY_QUERY, started.elapsed().as_millis() as u64);
        match &result {
            Ok(_) => self.telemetry.incr(COUNTER_EXECUTED),
            Err(QueryError::BudgetExhausted { .. }) => {
                self.telemetry.incr(COUNTER_REJECTED_BUDGET)
            }
            Err(QueryError::Validation(_)) => self.telemetry.incr(COUNTER_REJECTED_VALIDATION),
            Err(err) => {
                warn!(requester = %request.requester_identity, error = %err, "query failed");
                self.telemetry.incr(COUNTER_FAILED);
            }
        }
        result
    }

    /// Budget-inspection surface. Never creates a ledger entry.
    pub fn budget_report(&self, requester: &str) -> BudgetReport {
        self.ledger.report(requester)
    }

    fn run(&self, request: &QueryRequest) -> QueryResult<QueryResponse> {
        let requester = request.requester_identity.as_str();
        let (predicate, epsilon) = validate(request)?;
        trace_phase(requester, QueryPhase::Requested);

        self.ledger.get_or_create(requester);
        if !self.ledger.can_run(requester, epsilon) {
            trace_phase(requester, QueryPhase::Rejected);
            let remaining = self.ledger.remaining(requester);
            info!(requester, epsilon, remaining, "query rejected: budget exhausted");
            return Err(QueryError::BudgetExhausted { remaining });
        }
        trace_phase(requester, QueryPhase::BudgetChecked);

        let records = self.source.snapshot()?;
        let noisy_count = {
            let outcome = self.matcher.count_matching(&records, &predicate)?;
            if !outcome.excluded.is_empty() {
                warn!(
                    excluded = outcome.excluded.len(),
                    scanned = outcome.scanned,
                    "records excluded from count"
                );
            }
            self.noise.add_noise(outcome.true_count, epsilon)?
        };
        trace_phase(requester, QueryPhase::Executed);

        self.ledger
            .record(requester, epsilon, predicate)
            .map_err(|source| match source {
                BudgetError::Exhausted { .. } => QueryError::Concurrency {
                    requester: requester.to_owned(),
                    source,
                },
                other => other.into(),
            })?;
        trace_phase(requester, QueryPhase::Recorded);

        let budget_remaining = self.ledger.remaining(requester);
        info!(requester, epsilon, budget_remaining, "query answered");
        trace_phase(requester, QueryPhase::Responded);
        Ok(QueryResponse {
            query: QueryEcho::from(&predicate),
            noisy_count,
            budget_remaining,
            message: DP_MESSAGE.into(),
        })
    }
}

/// Rejects malformed requests before any ledger or decoding work.
fn validate(request: &QueryRequest) -> Result<(Predicate, f64), ValidationError> {
    if request.requester_identity.trim().is_empty() {
        return Err(ValidationError::EmptyRequester);
    }
    if validate_epsilon(request.epsilon).is_err() {
        return Err(ValidationError::InvalidEpsilon(request.epsilon));
    }
    let predicate = Predicate::parse(request.age_min, request.age_max, &request.condition)?;
    Ok((predicate, request.epsilon))
}

fn trace_phase(requester: &str, phase: QueryPhase) {
    debug!(requester, ?phase, "query phase");
}
