//! Community vote path for subjective markets

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::TallyMode;
use crate::consensus::tally;
use crate::error::CommunityError;
use crate::market::Market;
use crate::types::{Outcome, Vote};

/// Community-determined outcome, same shape as a consensus result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommunityVerdict {
    pub outcome: Outcome,
    pub confidence: u8,
    pub participants: usize,
}

#[async_trait]
pub trait CommunityVote: Send + Sync {
    async fn determine(&self, market: &Market) -> Result<CommunityVerdict, CommunityError>;
}

/// One ballot per participant per market, tallied with the consensus quorum rule
#[derive(Debug, Clone)]
pub struct CommunityPoll {
    ballots: Arc<RwLock<HashMap<String, BTreeMap<String, Outcome>>>>,
    required_agreement: f64,
}

impl CommunityPoll {
    pub fn new(required_agreement: f64) -> Self {
        Self {
            ballots: Arc::default(),
            required_agreement,
        }
    }

    /// Record a participant's choice, replacing any earlier one
    pub async fn cast(&self, market_id: &str, participant: &str, outcome: Outcome) {
        self.ballots
            .write()
            .await
            .entry(market_id.to_string())
            .or_default()
            .insert(participant.to_string(), outcome);
    }
}

#[async_trait]
impl CommunityVote for CommunityPoll {
    async fn determine(&self, market: &Market) -> Result<CommunityVerdict, CommunityError> {
        let votes: Vec<Vote> = self
            .ballots
            .read()
            .await
            .get(&market.id)
            .map(|ballots| {
                ballots
                    .iter()
                    .map(|(participant, outcome)| Vote::new(participant.clone(), *outcome, 100))
                    .collect()
            })
            .unwrap_or_default();

        if votes.is_empty() {
            return Err(CommunityError::NoBallots(market.id.clone()));
        }

        let counted = tally(&votes, self.required_agreement, TallyMode::Count);

        info!(
            market_id = %market.id,
            outcome = %counted.outcome,
            confidence = counted.confidence,
            participants = counted.total_voters,
            "Community vote tallied"
        );

        Ok(CommunityVerdict {
            outcome: counted.outcome,
            confidence: counted.confidence,
            participants: counted.total_voters,
        })
    }
}
