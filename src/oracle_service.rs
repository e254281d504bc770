//! Inbound facade
//!
//! Wraps the coordinator, state machine and dispute ledger behind a single
//! service. Each call gets a correlation id, is timed by
//! [`log_operation`], and converts domain errors into [`AppError`].

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::community::{CommunityPoll, CommunityVote};
use crate::config::Config;
use crate::consensus::ConsensusCoordinator;
use crate::dispute::{Dispute, DisputeLedger, DisputeSettlement};
use crate::insurance::InsuranceFallback;
use crate::market::{Market, MarketStatus};
use crate::resolution::{ResolutionReport, ResolutionStateMachine};
use crate::store::{DisputeStore, InMemoryStore, MarketStore};
use crate::tracing_logger::{log_operation, CorrelationId};
use crate::typed_errors::{AppError, AppResult, ErrorContext, ErrorExt};
use crate::types::Outcome;
use crate::voters::VoterRegistry;

const SERVICE: &str = "oracle_service";

/// Response to `resolve_market`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveMarketResponse {
    /// 1 = yes, 2 = no, 3 = invalid
    pub outcome: u8,
    pub confidence: u8,
    pub agreeing_count: usize,
    pub total_voters: usize,
}

pub struct OracleService {
    coordinator: Arc<ConsensusCoordinator>,
    resolution: Arc<ResolutionStateMachine>,
    disputes: DisputeLedger,
    markets: Arc<dyn MarketStore>,
    required_agreement: f64,
}

/// In-process collaborators created by [`OracleService::from_config`]
pub struct LocalCollaborators {
    pub store: InMemoryStore,
    pub community: CommunityPoll,
}

impl OracleService {
    pub fn new(
        coordinator: Arc<ConsensusCoordinator>,
        resolution: Arc<ResolutionStateMachine>,
        disputes: DisputeLedger,
        markets: Arc<dyn MarketStore>,
    ) -> Self {
        let required_agreement = resolution.config().required_agreement;
        Self {
            coordinator,
            resolution,
            disputes,
            markets,
            required_agreement,
        }
    }

    /// Wire LLM voters from configuration around the caller's insurance fallback
    ///
    /// Markets, disputes and community ballots are kept in process.
    pub fn from_config(
        config: &Config,
        insurance: Arc<dyn InsuranceFallback>,
    ) -> (Self, LocalCollaborators) {
        let registry = VoterRegistry::from_config(&config.voters, config.consensus.voter_timeout);
        let local = LocalCollaborators {
            store: InMemoryStore::new(),
            community: CommunityPoll::new(config.resolution.required_agreement),
        };

        let service = Self::assemble(
            registry,
            config,
            Arc::new(local.store.clone()),
            Arc::new(local.store.clone()),
            Arc::new(local.community.clone()),
            insurance,
            Arc::new(SystemClock),
        );
        (service, local)
    }

    /// Build the full pipeline around the given collaborators
    pub fn assemble(
        registry: VoterRegistry,
        config: &Config,
        markets: Arc<dyn MarketStore>,
        disputes: Arc<dyn DisputeStore>,
        community: Arc<dyn CommunityVote>,
        insurance: Arc<dyn InsuranceFallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = Arc::new(ConsensusCoordinator::new(registry, config.consensus.clone()));
        let resolution = Arc::new(ResolutionStateMachine::new(
            markets.clone(),
            coordinator.clone(),
            community,
            insurance,
            clock.clone(),
            config.resolution.clone(),
        ));
        let ledger = DisputeLedger::new(disputes, resolution.clone(), clock, config.dispute.clone());

        Self::new(coordinator, resolution, ledger, markets)
    }

    fn context(operation: &str, correlation_id: &CorrelationId) -> ErrorContext {
        ErrorContext::new(SERVICE, operation).with_request_id(correlation_id.to_string())
    }

    /// Resolve a free-standing question with the voter consensus
    pub async fn resolve_market(
        &self,
        description: &str,
        context: Option<&str>,
    ) -> AppResult<ResolveMarketResponse> {
        let correlation_id = CorrelationId::new();
        let result = log_operation(
            "resolve_market",
            &correlation_id,
            self.coordinator
                .resolve(description, context, self.required_agreement),
        )
        .await
        .app_err(Self::context("resolve_market", &correlation_id))?;

        Ok(ResolveMarketResponse {
            outcome: result.outcome.code(),
            confidence: result.confidence,
            agreeing_count: result.agreeing_count,
            total_voters: result.total_voters,
        })
    }

    pub async fn register_market(&self, market: Market) -> AppResult<Market> {
        let correlation_id = CorrelationId::new();
        if market.id.trim().is_empty() {
            return Err(AppError::validation(
                "id",
                "market id is required",
                Self::context("register_market", &correlation_id),
            ));
        }
        if market.question.trim().is_empty() {
            return Err(AppError::validation(
                "question",
                "market question is required",
                Self::context("register_market", &correlation_id),
            ));
        }
        if market.status != MarketStatus::Active {
            return Err(AppError::validation(
                "status",
                "new markets must be active",
                Self::context("register_market", &correlation_id),
            ));
        }

        log_operation("register_market", &correlation_id, self.markets.insert_market(market))
            .await
            .app_err(Self::context("register_market", &correlation_id))
    }

    pub async fn market(&self, market_id: &str) -> AppResult<Market> {
        let correlation_id = CorrelationId::new();
        log_operation("market", &correlation_id, self.resolution.market(market_id))
            .await
            .app_err(Self::context("market", &correlation_id))
    }

    pub async fn initiate_resolution(&self, market_id: &str) -> AppResult<ResolutionReport> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "initiate_resolution",
            &correlation_id,
            self.resolution.initiate_resolution(market_id),
        )
        .await
        .app_err(Self::context("initiate_resolution", &correlation_id))
    }

    pub async fn fulfill_resolution(
        &self,
        market_id: &str,
        outcome_code: u8,
        confidence: i64,
    ) -> AppResult<ResolutionReport> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "fulfill_resolution",
            &correlation_id,
            self.resolution
                .fulfill_resolution(market_id, outcome_code, confidence),
        )
        .await
        .app_err(Self::context("fulfill_resolution", &correlation_id))
    }

    pub async fn retry_resolution(&self, market_id: &str) -> AppResult<ResolutionReport> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "retry_resolution",
            &correlation_id,
            self.resolution.retry_resolution(market_id),
        )
        .await
        .app_err(Self::context("retry_resolution", &correlation_id))
    }

    pub async fn cancel_market(&self, market_id: &str, reason: &str) -> AppResult<Market> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "cancel_market",
            &correlation_id,
            self.resolution.cancel_market(market_id, reason),
        )
        .await
        .app_err(Self::context("cancel_market", &correlation_id))
    }

    pub async fn retry_insurance(&self, market_id: &str) -> AppResult<ResolutionReport> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "retry_insurance",
            &correlation_id,
            self.resolution.retry_insurance(market_id),
        )
        .await
        .app_err(Self::context("retry_insurance", &correlation_id))
    }

    pub async fn stuck_markets(&self) -> AppResult<Vec<Market>> {
        let correlation_id = CorrelationId::new();
        log_operation("stuck_markets", &correlation_id, self.resolution.stuck_markets())
            .await
            .app_err(Self::context("stuck_markets", &correlation_id))
    }

    /// File a dispute; `proposed_outcome` is an optional wire code (1/2/3)
    pub async fn file_dispute(
        &self,
        market_id: &str,
        challenger: &str,
        reason: &str,
        proposed_outcome: Option<u8>,
    ) -> AppResult<Dispute> {
        let correlation_id = CorrelationId::new();

        let proposed = match proposed_outcome {
            None => None,
            Some(code) => Some(Outcome::from_code(code).ok_or_else(|| {
                AppError::validation(
                    "proposed_outcome",
                    "proposed outcome must be 1, 2 or 3",
                    Self::context("file_dispute", &correlation_id),
                )
            })?),
        };

        log_operation(
            "file_dispute",
            &correlation_id,
            self.disputes
                .file_dispute_with_outcome(market_id, challenger, reason, proposed),
        )
        .await
        .app_err(Self::context("file_dispute", &correlation_id))
    }

    pub async fn cast_vote(
        &self,
        dispute_id: &str,
        voter: &str,
        supports_challenger: bool,
        weight: Decimal,
    ) -> AppResult<Dispute> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "cast_vote",
            &correlation_id,
            self.disputes
                .cast_vote(dispute_id, voter, supports_challenger, weight),
        )
        .await
        .app_err(Self::context("cast_vote", &correlation_id))
    }

    pub async fn finalize_dispute(&self, dispute_id: &str) -> AppResult<DisputeSettlement> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "finalize_dispute",
            &correlation_id,
            self.disputes.finalize_dispute(dispute_id),
        )
        .await
        .app_err(Self::context("finalize_dispute", &correlation_id))
    }

    pub async fn dispute(&self, dispute_id: &str) -> AppResult<Dispute> {
        let correlation_id = CorrelationId::new();
        log_operation("dispute", &correlation_id, self.disputes.dispute(dispute_id))
            .await
            .app_err(Self::context("dispute", &correlation_id))
    }

    pub async fn disputes_for_market(&self, market_id: &str) -> AppResult<Vec<Dispute>> {
        let correlation_id = CorrelationId::new();
        log_operation(
            "disputes_for_market",
            &correlation_id,
            self.disputes.disputes_for_market(market_id),
        )
        .await
        .app_err(Self::context("disputes_for_market", &correlation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoterSettings;
    use crate::insurance::RecordingInsurance;
    use crate::mock_voters::MockVoter;
    use crate::typed_errors::ErrorKind;
    use crate::voters::LlmProvider;

    fn service_with(voters: Vec<MockVoter>) -> OracleService {
        let registry = voters
            .into_iter()
            .fold(VoterRegistry::new(), |r, v| r.register(Arc::new(v)));
        let store = InMemoryStore::new();
        OracleService::assemble(
            registry,
            &Config::default(),
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(CommunityPoll::new(0.8)),
            Arc::new(RecordingInsurance::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_resolve_market_returns_wire_codes() {
        let service = service_with(vec![
            MockVoter::new("groq", Outcome::No, 90),
            MockVoter::new("gemini", Outcome::No, 80),
            MockVoter::new("openai", Outcome::No, 85),
            MockVoter::new("anthropic", Outcome::No, 70),
            MockVoter::new("xai", Outcome::Yes, 60),
        ]);

        let response = service
            .resolve_market("Did the Lakers win the 2024 title?", None)
            .await
            .unwrap();

        assert_eq!(
            response,
            ResolveMarketResponse {
                outcome: 2,
                confidence: 80,
                agreeing_count: 4,
                total_voters: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let service = service_with(vec![]);

        let err = service.resolve_market("", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingField);

        let err = service.resolve_market("Will it snow?", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoVotersAvailable);
        assert!(err.kind.is_retryable());
        assert!(err.context.request_id.is_some());

        let err = service.market("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = service
            .file_dispute("nope", "alice", "wrong", Some(7))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_from_config_without_keys_has_no_voters() {
        let config = Config {
            voters: vec![
                VoterSettings::for_provider(LlmProvider::Groq),
                VoterSettings::for_provider(LlmProvider::Gemini),
            ],
            ..Config::default()
        };
        let insurance = RecordingInsurance::new();
        let (service, _local) = OracleService::from_config(&config, Arc::new(insurance.clone()));

        let err = service.resolve_market("Will it snow?", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoVotersAvailable);
        assert_eq!(err.context.metadata["disabled_voters"][0], "groq");

        let err = service.retry_insurance("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(insurance.activations().await.is_empty());
    }
}
