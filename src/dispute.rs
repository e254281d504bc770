//! Dispute ledger
//!
//! Challenges against an automated resolution are settled by stake-weighted
//! voting. Each voter holds at most one ballot per dispute; re-voting replaces
//! the earlier ballot and both totals are always recomputed from the full
//! ballot set.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{add_std, Clock};
use crate::config::DisputePolicy;
use crate::error::{DisputeError, StoreError};
use crate::market::{Market, MarketStatus};
use crate::resolution::ResolutionStateMachine;
use crate::store::DisputeStore;
use crate::types::Outcome;

const MAX_CLOSE_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeVerdict {
    /// Challenger won; the market takes the proposed outcome
    Upheld,
    /// Challenger lost or tied; the challenged outcome stands
    Rejected,
    /// Too little stake participated; the challenged outcome stands
    NoQuorum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: String,
    pub supports_challenger: bool,
    pub weight: Decimal,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub market_id: String,
    pub challenger: String,
    pub reason: String,
    /// Automated outcome under challenge
    pub disputed_outcome: Outcome,
    pub proposed_outcome: Option<Outcome>,
    pub status: DisputeStatus,
    pub votes_for: Decimal,
    pub votes_against: Decimal,
    /// Latest ballot per voter
    pub ballots: BTreeMap<String, Ballot>,
    pub opened_at: DateTime<Utc>,
    pub voting_deadline: DateTime<Utc>,
    pub verdict: Option<DisputeVerdict>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.status == DisputeStatus::Open
    }

    pub fn total_weight(&self) -> Decimal {
        self.votes_for + self.votes_against
    }

    /// Replace the voter's ballot and recompute both totals
    pub fn record_ballot(&mut self, ballot: Ballot) {
        self.ballots.insert(ballot.voter.clone(), ballot);
        self.recompute_totals();
    }

    fn recompute_totals(&mut self) {
        let (votes_for, votes_against) =
            self.ballots
                .values()
                .fold((Decimal::ZERO, Decimal::ZERO), |(yes, no), ballot| {
                    if ballot.supports_challenger {
                        (yes + ballot.weight, no)
                    } else {
                        (yes, no + ballot.weight)
                    }
                });
        self.votes_for = votes_for;
        self.votes_against = votes_against;
    }
}

/// Result of closing a dispute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisputeSettlement {
    pub dispute: Dispute,
    pub market: Market,
    pub verdict: DisputeVerdict,
    pub final_outcome: Outcome,
}

/// Owns dispute tallies; asks the state machine to apply verdicts
pub struct DisputeLedger {
    disputes: Arc<dyn DisputeStore>,
    resolution: Arc<ResolutionStateMachine>,
    clock: Arc<dyn Clock>,
    policy: DisputePolicy,
}

impl DisputeLedger {
    pub fn new(
        disputes: Arc<dyn DisputeStore>,
        resolution: Arc<ResolutionStateMachine>,
        clock: Arc<dyn Clock>,
        policy: DisputePolicy,
    ) -> Self {
        Self {
            disputes,
            resolution,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &DisputePolicy {
        &self.policy
    }

    pub async fn file_dispute(
        &self,
        market_id: &str,
        challenger: &str,
        reason: &str,
    ) -> Result<Dispute, DisputeError> {
        self.file_dispute_with_outcome(market_id, challenger, reason, None)
            .await
    }

    /// Open a dispute, naming the outcome the challenger believes is correct
    pub async fn file_dispute_with_outcome(
        &self,
        market_id: &str,
        challenger: &str,
        reason: &str,
        proposed_outcome: Option<Outcome>,
    ) -> Result<Dispute, DisputeError> {
        if challenger.trim().is_empty() {
            return Err(DisputeError::MissingField("challenger"));
        }
        if reason.trim().is_empty() {
            return Err(DisputeError::MissingField("reason"));
        }

        let market = self.resolution.market(market_id).await?;
        let now = self.clock.now();
        let disputed_outcome = self.disputable_outcome(&market, now)?;

        if proposed_outcome == Some(disputed_outcome) {
            return Err(DisputeError::InvalidState {
                market_id: market.id,
                status: market.status,
                detail: format!("proposed outcome {} is the challenged outcome", disputed_outcome),
            });
        }

        if let Some(open) = self
            .disputes
            .disputes_for_market(market_id)
            .await?
            .into_iter()
            .find(Dispute::is_open)
        {
            return Err(DisputeError::DisputeAlreadyOpen {
                market_id: market_id.to_string(),
                dispute_id: open.id,
            });
        }

        if market.status == MarketStatus::Resolved {
            self.resolution.reopen_for_dispute(market_id).await?;
        }

        let dispute = Dispute {
            id: Uuid::new_v4().to_string(),
            market_id: market_id.to_string(),
            challenger: challenger.trim().to_string(),
            reason: reason.trim().to_string(),
            disputed_outcome,
            proposed_outcome,
            status: DisputeStatus::Open,
            votes_for: Decimal::ZERO,
            votes_against: Decimal::ZERO,
            ballots: BTreeMap::new(),
            opened_at: now,
            voting_deadline: add_std(now, self.policy.voting_period),
            verdict: None,
            closed_at: None,
        };

        let dispute = self
            .disputes
            .insert_dispute(dispute)
            .await
            .map_err(|e| match e {
                StoreError::OpenDisputeExists {
                    market_id,
                    dispute_id,
                } => DisputeError::DisputeAlreadyOpen {
                    market_id,
                    dispute_id,
                },
                other => other.into(),
            })?;

        info!(
            market_id = %dispute.market_id,
            dispute_id = %dispute.id,
            challenger = %dispute.challenger,
            disputed_outcome = %dispute.disputed_outcome,
            voting_deadline = %dispute.voting_deadline,
            "Dispute filed"
        );

        Ok(dispute)
    }

    /// Outcome a dispute against `market` would challenge
    fn disputable_outcome(&self, market: &Market, now: DateTime<Utc>) -> Result<Outcome, DisputeError> {
        let invalid = |detail: String| DisputeError::InvalidState {
            market_id: market.id.clone(),
            status: market.status,
            detail,
        };

        match market.status {
            MarketStatus::Disputed => market
                .pending_outcome
                .ok_or_else(|| invalid("no pending outcome recorded".to_string())),
            MarketStatus::Resolved => {
                let confidence = market.resolution_confidence.unwrap_or(100);
                if confidence >= self.policy.confidence_ceiling {
                    return Err(invalid(format!(
                        "resolution confidence {} is at or above {}",
                        confidence, self.policy.confidence_ceiling
                    )));
                }

                let resolved_at = market
                    .resolved_at
                    .ok_or_else(|| invalid("resolution time not recorded".to_string()))?;
                if now > add_std(resolved_at, self.policy.dispute_window) {
                    return Err(invalid("dispute window has closed".to_string()));
                }

                market
                    .outcome
                    .as_outcome()
                    .ok_or_else(|| invalid("no outcome recorded".to_string()))
            }
            _ => Err(invalid(
                "only resolved or disputed markets can be disputed".to_string(),
            )),
        }
    }

    /// Record a stake-weighted ballot, replacing the voter's previous one
    pub async fn cast_vote(
        &self,
        dispute_id: &str,
        voter: &str,
        supports_challenger: bool,
        weight: Decimal,
    ) -> Result<Dispute, DisputeError> {
        if weight <= Decimal::ZERO {
            return Err(DisputeError::InvalidWeight(weight));
        }
        if voter.trim().is_empty() {
            return Err(DisputeError::MissingField("voter"));
        }

        let dispute = self.disputes.get_dispute(dispute_id).await?;
        if !dispute.is_open() {
            return Err(DisputeError::DisputeClosed(dispute.id));
        }

        let now = self.clock.now();
        if now > dispute.voting_deadline {
            return Err(DisputeError::VotingClosed {
                dispute_id: dispute.id,
                deadline: dispute.voting_deadline,
            });
        }

        let ballot = Ballot {
            voter: voter.trim().to_string(),
            supports_challenger,
            weight,
            cast_at: now,
        };

        let dispute = self
            .disputes
            .upsert_ballot(dispute_id, ballot)
            .await
            .map_err(|e| match e {
                StoreError::DisputeClosed(id) => DisputeError::DisputeClosed(id),
                other => other.into(),
            })?;

        info!(
            dispute_id = %dispute.id,
            voter = %voter,
            supports_challenger,
            weight = %weight,
            votes_for = %dispute.votes_for,
            votes_against = %dispute.votes_against,
            "Dispute vote recorded"
        );

        Ok(dispute)
    }

    /// Close a dispute and resolve its market
    ///
    /// Requires the voting deadline to have passed unless the total stake
    /// already reaches the early-close weight. The verdict is re-decided if a
    /// ballot lands between reading the tally and closing the dispute.
    pub async fn finalize_dispute(&self, dispute_id: &str) -> Result<DisputeSettlement, DisputeError> {
        let (dispute, verdict, final_outcome) = self.close_on_current_tally(dispute_id).await?;
        let total = dispute.total_weight();

        let market = match self
            .resolution
            .apply_dispute_verdict(&dispute.market_id, final_outcome)
            .await
        {
            Ok(market) => market,
            Err(e) => {
                error!(
                    dispute_id = %dispute.id,
                    market_id = %dispute.market_id,
                    outcome = %final_outcome,
                    error = %e,
                    "Dispute closed but verdict not applied"
                );
                return Err(e.into());
            }
        };

        if verdict == DisputeVerdict::NoQuorum {
            warn!(
                dispute_id = %dispute.id,
                total_weight = %total,
                min_quorum_weight = %self.policy.min_quorum_weight,
                "Dispute closed without quorum"
            );
        }

        info!(
            dispute_id = %dispute.id,
            market_id = %market.id,
            verdict = ?verdict,
            outcome = %final_outcome,
            votes_for = %dispute.votes_for,
            votes_against = %dispute.votes_against,
            "Dispute finalized"
        );

        Ok(DisputeSettlement {
            dispute,
            market,
            verdict,
            final_outcome,
        })
    }

    async fn close_on_current_tally(
        &self,
        dispute_id: &str,
    ) -> Result<(Dispute, DisputeVerdict, Outcome), DisputeError> {
        for attempt in 1..=MAX_CLOSE_ATTEMPTS {
            let dispute = self.disputes.get_dispute(dispute_id).await?;
            let now = self.clock.now();
            let (verdict, final_outcome) = self.decide(&dispute, now)?;

            match self
                .disputes
                .close_dispute(
                    dispute_id,
                    (dispute.votes_for, dispute.votes_against),
                    verdict,
                    now,
                )
                .await
            {
                Ok(closed) => return Ok((closed, verdict, final_outcome)),
                Err(StoreError::TallyChanged(_)) => {
                    debug!(dispute_id = %dispute_id, attempt, "Dispute tally changed, re-deciding");
                }
                Err(StoreError::DisputeClosed(id)) => return Err(DisputeError::DisputeClosed(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::TallyChanged(dispute_id.to_string()).into())
    }

    /// Verdict and resulting outcome for the dispute's current tally
    fn decide(&self, dispute: &Dispute, now: DateTime<Utc>) -> Result<(DisputeVerdict, Outcome), DisputeError> {
        if !dispute.is_open() {
            return Err(DisputeError::DisputeClosed(dispute.id.clone()));
        }

        let total = dispute.total_weight();
        let early_close = self
            .policy
            .early_close_weight
            .map_or(false, |threshold| total >= threshold);

        if now <= dispute.voting_deadline && !early_close {
            return Err(DisputeError::VotingOpen {
                dispute_id: dispute.id.clone(),
                deadline: dispute.voting_deadline,
            });
        }

        Ok(if total < self.policy.min_quorum_weight {
            (DisputeVerdict::NoQuorum, dispute.disputed_outcome)
        } else if dispute.votes_for > dispute.votes_against {
            (
                DisputeVerdict::Upheld,
                dispute.proposed_outcome.unwrap_or(Outcome::Invalid),
            )
        } else {
            (DisputeVerdict::Rejected, dispute.disputed_outcome)
        })
    }

    pub async fn dispute(&self, dispute_id: &str) -> Result<Dispute, DisputeError> {
        Ok(self.disputes.get_dispute(dispute_id).await?)
    }

    pub async fn disputes_for_market(&self, market_id: &str) -> Result<Vec<Dispute>, DisputeError> {
        Ok(self.disputes.disputes_for_market(market_id).await?)
    }
}
