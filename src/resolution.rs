//! Market resolution state machine
//!
//! ```text
//! Active -> Resolving -> Resolved
//!                     -> Disputed -> Resolved   (dispute verdict)
//!                     -> Cancelled
//! Resolved -> Disputed                           (challenge within the dispute window)
//! ```
//!
//! Every transition is a compare-and-set against the market's version, so
//! only one caller wins a given transition. A market in `Resolving` is held by
//! at most one attempt at a time; the attempt's lease must expire before a
//! retry can take it over.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::community::{CommunityVerdict, CommunityVote};
use crate::config::ResolutionConfig;
use crate::consensus::{ConsensusCoordinator, ConsensusResult};
use crate::error::{ConsensusError, ResolutionError, StoreError};
use crate::insurance::InsuranceFallback;
use crate::market::{InsuranceStatus, Market, MarketKind, MarketStatus, ResolutionAttempt};
use crate::store::MarketStore;
use crate::types::{MarketOutcome, Outcome};

const MAX_CAS_ATTEMPTS: usize = 4;

/// Confidence recorded for outcomes settled by a dispute verdict
const DISPUTE_VERDICT_CONFIDENCE: u8 = 100;

/// What happened to the market after an outcome was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResolutionDecision {
    /// Market resolved with the outcome
    Finalized { outcome: Outcome, confidence: u8 },
    /// Confidence too low; market disputed and insurance activated
    InsuranceActivated { pending_outcome: Outcome, confidence: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub market: Market,
    pub decision: ResolutionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community: Option<CommunityVerdict>,
}

/// Sole writer of market status and outcome
pub struct ResolutionStateMachine {
    markets: Arc<dyn MarketStore>,
    coordinator: Arc<ConsensusCoordinator>,
    community: Arc<dyn CommunityVote>,
    insurance: Arc<dyn InsuranceFallback>,
    clock: Arc<dyn Clock>,
    config: ResolutionConfig,
}

impl ResolutionStateMachine {
    pub fn new(
        markets: Arc<dyn MarketStore>,
        coordinator: Arc<ConsensusCoordinator>,
        community: Arc<dyn CommunityVote>,
        insurance: Arc<dyn InsuranceFallback>,
        clock: Arc<dyn Clock>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            markets,
            coordinator,
            community,
            insurance,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    pub async fn market(&self, market_id: &str) -> Result<Market, ResolutionError> {
        Ok(self.markets.get_market(market_id).await?)
    }

    /// Markets left in `Resolving` with no live attempt
    pub async fn stuck_markets(&self) -> Result<Vec<Market>, ResolutionError> {
        let now = self.clock.now();
        let lease = self.config.attempt_lease;

        Ok(self
            .markets
            .markets_with_status(MarketStatus::Resolving)
            .await?
            .into_iter()
            .filter(|market| !market.attempt_in_flight(now, lease))
            .collect())
    }

    /// Move an active market past its resolution time into `Resolving` and
    /// determine its outcome
    pub async fn initiate_resolution(&self, market_id: &str) -> Result<ResolutionReport, ResolutionError> {
        let now = self.clock.now();
        let attempt = ResolutionAttempt::start(now);

        let market = self
            .update_market(market_id, |market| {
                if now < market.resolution_time {
                    return Err(ResolutionError::NotReady {
                        market_id: market.id.clone(),
                        resolution_time: market.resolution_time,
                    });
                }
                if market.status != MarketStatus::Active {
                    return Err(invalid_state(market, "initiate resolution"));
                }
                market.status = MarketStatus::Resolving;
                market.resolution_attempt = Some(attempt.clone());
                Ok(())
            })
            .await?;

        info!(
            market_id = %market.id,
            kind = ?market.kind,
            attempt_id = %attempt.id,
            "Resolution started"
        );

        self.determine_and_fulfill(market, attempt.id).await
    }

    /// Re-run outcome determination for a market stuck in `Resolving`
    ///
    /// Takes over the market only when no other attempt holds a live lease.
    pub async fn retry_resolution(&self, market_id: &str) -> Result<ResolutionReport, ResolutionError> {
        let now = self.clock.now();
        let lease = self.config.attempt_lease;
        let attempt = ResolutionAttempt::start(now);

        let market = self
            .update_market(market_id, |market| {
                if market.status != MarketStatus::Resolving {
                    return Err(invalid_state(market, "retry resolution"));
                }
                if let Some(current) = market
                    .resolution_attempt
                    .as_ref()
                    .filter(|current| !current.expired(now, lease))
                {
                    return Err(ResolutionError::AttemptInProgress {
                        market_id: market.id.clone(),
                        started_at: current.started_at,
                    });
                }
                market.resolution_attempt = Some(attempt.clone());
                Ok(())
            })
            .await?;

        info!(market_id = %market.id, attempt_id = %attempt.id, "Retrying resolution");
        self.determine_and_fulfill(market, attempt.id).await
    }

    /// Activate insurance again for a disputed market whose activation failed
    pub async fn retry_insurance(&self, market_id: &str) -> Result<ResolutionReport, ResolutionError> {
        let market = self.markets.get_market(market_id).await?;
        let pending_outcome = match (market.status, market.pending_outcome, market.insurance) {
            (MarketStatus::Disputed, Some(outcome), InsuranceStatus::Pending) => outcome,
            _ => return Err(invalid_state(&market, "retry insurance activation")),
        };
        let confidence = market.resolution_confidence.unwrap_or(0);

        info!(market_id = %market.id, outcome = %pending_outcome, "Retrying insurance activation");
        let market = self.activate_insurance(market, pending_outcome, confidence).await?;

        Ok(ResolutionReport {
            market,
            decision: ResolutionDecision::InsuranceActivated {
                pending_outcome,
                confidence,
            },
            consensus: None,
            community: None,
        })
    }

    /// Submit an outcome for a market in `Resolving`
    ///
    /// `outcome_code` is 1 (yes), 2 (no) or 3 (invalid); `confidence` is 0-100.
    pub async fn fulfill_resolution(
        &self,
        market_id: &str,
        outcome_code: u8,
        confidence: i64,
    ) -> Result<ResolutionReport, ResolutionError> {
        let market = self.markets.get_market(market_id).await?;
        if market.status == MarketStatus::Resolved {
            return Err(ResolutionError::AlreadyResolved(market.id));
        }

        let outcome =
            Outcome::from_code(outcome_code).ok_or(ResolutionError::InvalidOutcome(outcome_code))?;
        let confidence = u8::try_from(confidence)
            .ok()
            .filter(|c| *c <= 100)
            .ok_or(ResolutionError::InvalidConfidence(confidence))?;

        let (market, decision) = self.finalize(market_id, outcome, confidence, None).await?;

        Ok(ResolutionReport {
            market,
            decision,
            consensus: None,
            community: None,
        })
    }

    pub async fn cancel_market(&self, market_id: &str, reason: &str) -> Result<Market, ResolutionError> {
        let market = self
            .update_market(market_id, |market| match market.status {
                MarketStatus::Active | MarketStatus::Resolving => {
                    market.status = MarketStatus::Cancelled;
                    market.resolution_attempt = None;
                    market.cancel_reason = Some(reason.to_string());
                    Ok(())
                }
                _ => Err(invalid_state(market, "cancel")),
            })
            .await?;

        warn!(market_id = %market.id, reason = %reason, "Market cancelled");
        Ok(market)
    }

    /// Move a resolved market back to `Disputed`, holding its outcome as pending
    ///
    /// No-op for a market that is already disputed.
    pub async fn reopen_for_dispute(&self, market_id: &str) -> Result<Market, ResolutionError> {
        let market = self.markets.get_market(market_id).await?;
        if market.status == MarketStatus::Disputed {
            return Ok(market);
        }

        let market = self
            .update_market(market_id, |market| match market.status {
                MarketStatus::Resolved => {
                    market.status = MarketStatus::Disputed;
                    market.pending_outcome = market.outcome.as_outcome();
                    market.outcome = MarketOutcome::Unresolved;
                    market.resolved_at = None;
                    Ok(())
                }
                MarketStatus::Disputed => Ok(()),
                _ => Err(invalid_state(market, "reopen for dispute")),
            })
            .await?;

        info!(
            market_id = %market.id,
            pending_outcome = ?market.pending_outcome,
            "Resolution reopened for dispute"
        );
        Ok(market)
    }

    /// Resolve a disputed market with the outcome decided by its dispute
    ///
    /// Idempotent when the market already resolved to the same outcome.
    pub async fn apply_dispute_verdict(
        &self,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<Market, ResolutionError> {
        let market = self.markets.get_market(market_id).await?;
        if market.final_outcome() == Some(outcome) {
            return Ok(market);
        }

        let now = self.clock.now();
        let market = self
            .update_market(market_id, |market| match market.status {
                MarketStatus::Disputed => {
                    market.status = MarketStatus::Resolved;
                    market.outcome = outcome.into();
                    market.pending_outcome = None;
                    market.resolution_confidence = Some(DISPUTE_VERDICT_CONFIDENCE);
                    market.resolved_at = Some(now);
                    Ok(())
                }
                MarketStatus::Resolved => Err(ResolutionError::AlreadyResolved(market.id.clone())),
                _ => Err(invalid_state(market, "apply dispute verdict")),
            })
            .await?;

        info!(market_id = %market.id, outcome = %outcome, "Dispute verdict applied");
        Ok(market)
    }

    async fn determine_and_fulfill(
        &self,
        market: Market,
        attempt_id: Uuid,
    ) -> Result<ResolutionReport, ResolutionError> {
        let determined = match market.kind {
            MarketKind::Binary | MarketKind::Conditional => self
                .coordinator
                .resolve(
                    &market.question,
                    market.context.as_deref(),
                    self.config.required_agreement,
                )
                .await
                .map(|result| (result.outcome, result.confidence, Some(result), None))
                .map_err(|e| resolution_failed(&market.id, e)),
            MarketKind::Subjective => self
                .community
                .determine(&market)
                .await
                .map(|verdict| (verdict.outcome, verdict.confidence, None, Some(verdict)))
                .map_err(|e| {
                    warn!(market_id = %market.id, error = %e, "Community vote failed");
                    ResolutionError::ResolutionFailed {
                        market_id: market.id.clone(),
                        reason: e.to_string(),
                        failures: Vec::new(),
                    }
                }),
        };

        let (outcome, confidence, consensus, community) = match determined {
            Ok(determined) => determined,
            Err(e) => {
                self.release_attempt(&market.id, attempt_id).await;
                return Err(e);
            }
        };

        let (market, decision) = self
            .finalize(&market.id, outcome, confidence, Some(attempt_id))
            .await?;

        Ok(ResolutionReport {
            market,
            decision,
            consensus,
            community,
        })
    }

    /// Drop the attempt's lease so the market shows up as stuck
    async fn release_attempt(&self, market_id: &str, attempt_id: Uuid) {
        let released = self
            .update_market(market_id, |market| {
                if market.resolution_attempt.as_ref().map(|a| a.id) == Some(attempt_id) {
                    market.resolution_attempt = None;
                }
                Ok(())
            })
            .await;

        if let Err(e) = released {
            warn!(market_id = %market_id, error = %e, "Failed to release resolution attempt");
        }
    }

    /// Apply the threshold rule to a `Resolving` market
    ///
    /// With `attempt` set, only the attempt holding the market may finalize it.
    async fn finalize(
        &self,
        market_id: &str,
        outcome: Outcome,
        confidence: u8,
        attempt: Option<Uuid>,
    ) -> Result<(Market, ResolutionDecision), ResolutionError> {
        let now = self.clock.now();
        let threshold = self.config.insurance_threshold;

        let market = self
            .update_market(market_id, |market| {
                match market.status {
                    MarketStatus::Resolving => {}
                    MarketStatus::Resolved => {
                        return Err(ResolutionError::AlreadyResolved(market.id.clone()))
                    }
                    status => {
                        error!(
                            market_id = %market.id,
                            status = %status,
                            "Finalization requested for market not in resolving state"
                        );
                        return Err(invalid_state(market, "fulfill resolution"));
                    }
                }

                if let Some(attempt_id) = attempt {
                    if market.resolution_attempt.as_ref().map(|a| a.id) != Some(attempt_id) {
                        return Err(ResolutionError::AttemptSuperseded(market.id.clone()));
                    }
                }

                market.resolution_attempt = None;
                market.resolution_confidence = Some(confidence);
                if confidence >= threshold {
                    market.status = MarketStatus::Resolved;
                    market.outcome = outcome.into();
                    market.pending_outcome = None;
                    market.resolved_at = Some(now);
                } else {
                    market.status = MarketStatus::Disputed;
                    market.outcome = MarketOutcome::Unresolved;
                    market.pending_outcome = Some(outcome);
                    market.insurance = InsuranceStatus::Pending;
                }
                Ok(())
            })
            .await?;

        if market.status == MarketStatus::Resolved {
            info!(
                market_id = %market.id,
                outcome = %outcome,
                confidence,
                "Market resolved"
            );
            return Ok((market, ResolutionDecision::Finalized { outcome, confidence }));
        }

        warn!(
            market_id = %market.id,
            outcome = %outcome,
            confidence,
            threshold,
            "Confidence below threshold, activating insurance"
        );

        let market = self.activate_insurance(market, outcome, confidence).await?;

        Ok((
            market,
            ResolutionDecision::InsuranceActivated {
                pending_outcome: outcome,
                confidence,
            },
        ))
    }

    /// Call the fallback and record the activation on the market
    async fn activate_insurance(
        &self,
        market: Market,
        outcome: Outcome,
        confidence: u8,
    ) -> Result<Market, ResolutionError> {
        if let Err(source) = self.insurance.activate(&market.id, outcome, confidence).await {
            error!(
                market_id = %market.id,
                error = %source,
                "Insurance activation failed; market left disputed with activation pending"
            );
            return Err(ResolutionError::InsuranceActivationFailed {
                market_id: market.id,
                source,
            });
        }

        self.update_market(&market.id, |market| {
            if market.insurance == InsuranceStatus::Pending {
                market.insurance = InsuranceStatus::Activated;
            }
            Ok(())
        })
        .await
        .map_err(|e| {
            error!(
                market_id = %market.id,
                error = %e,
                "Insurance activated but not recorded on market"
            );
            e
        })
    }

    /// Read, apply `transition`, write back with version check; retried on conflict
    async fn update_market<F>(&self, market_id: &str, mut transition: F) -> Result<Market, ResolutionError>
    where
        F: FnMut(&mut Market) -> Result<(), ResolutionError> + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut market = self.markets.get_market(market_id).await?;
            transition(&mut market)?;
            market.updated_at = self.clock.now();

            match self.markets.swap_market(market).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict(_)) => {
                    debug!(market_id = %market_id, attempt, "Market changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::VersionConflict(market_id.to_string()).into())
    }
}

fn invalid_state(market: &Market, operation: &'static str) -> ResolutionError {
    ResolutionError::InvalidState {
        market_id: market.id.clone(),
        status: market.status,
        operation,
    }
}

fn resolution_failed(market_id: &str, error: ConsensusError) -> ResolutionError {
    warn!(market_id = %market_id, error = %error, "Consensus failed, market left resolving");

    let failures = match &error {
        ConsensusError::NoVotersAvailable { failures, .. } => failures.clone(),
        _ => Vec::new(),
    };

    ResolutionError::ResolutionFailed {
        market_id: market_id.to_string(),
        reason: error.to_string(),
        failures,
    }
}
