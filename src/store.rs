//! Persistence collaborators for markets and disputes

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::dispute::{Ballot, Dispute, DisputeStatus, DisputeVerdict};
use crate::error::StoreError;
use crate::market::{Market, MarketStatus};

/// Market persistence with optimistic concurrency
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn insert_market(&self, market: Market) -> Result<Market, StoreError>;

    async fn get_market(&self, market_id: &str) -> Result<Market, StoreError>;

    /// Compare-and-set write
    ///
    /// Succeeds only if the stored version still equals `market.version`;
    /// the returned copy carries the bumped version.
    async fn swap_market(&self, market: Market) -> Result<Market, StoreError>;

    async fn markets_with_status(&self, status: MarketStatus) -> Result<Vec<Market>, StoreError>;
}

#[async_trait]
pub trait DisputeStore: Send + Sync {
    /// Insert a new dispute; at most one open dispute per market
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, StoreError>;

    async fn get_dispute(&self, dispute_id: &str) -> Result<Dispute, StoreError>;

    async fn disputes_for_market(&self, market_id: &str) -> Result<Vec<Dispute>, StoreError>;

    /// Upsert a ballot on an open dispute and return the recomputed dispute
    async fn upsert_ballot(&self, dispute_id: &str, ballot: Ballot) -> Result<Dispute, StoreError>;

    /// Close an open dispute with a verdict decided on `expected_totals`
    ///
    /// Fails with [`StoreError::TallyChanged`] when the stored
    /// `(votes_for, votes_against)` no longer match.
    async fn close_dispute(
        &self,
        dispute_id: &str,
        expected_totals: (Decimal, Decimal),
        verdict: DisputeVerdict,
        closed_at: DateTime<Utc>,
    ) -> Result<Dispute, StoreError>;
}

/// In-memory store for tests and single-process deployments
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    markets: Arc<RwLock<HashMap<String, Market>>>,
    disputes: Arc<RwLock<HashMap<String, Dispute>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn insert_market(&self, mut market: Market) -> Result<Market, StoreError> {
        let mut markets = self.markets.write().await;
        if markets.contains_key(&market.id) {
            return Err(StoreError::Duplicate(market.id));
        }
        market.version = 1;
        markets.insert(market.id.clone(), market.clone());
        Ok(market)
    }

    async fn get_market(&self, market_id: &str) -> Result<Market, StoreError> {
        self.markets
            .read()
            .await
            .get(market_id)
            .cloned()
            .ok_or_else(|| StoreError::MarketNotFound(market_id.to_string()))
    }

    async fn swap_market(&self, mut market: Market) -> Result<Market, StoreError> {
        let mut markets = self.markets.write().await;
        let stored = markets
            .get_mut(&market.id)
            .ok_or_else(|| StoreError::MarketNotFound(market.id.clone()))?;

        if stored.version != market.version {
            return Err(StoreError::VersionConflict(market.id));
        }

        market.version += 1;
        *stored = market.clone();
        Ok(market)
    }

    async fn markets_with_status(&self, status: MarketStatus) -> Result<Vec<Market>, StoreError> {
        let mut markets: Vec<Market> = self
            .markets
            .read()
            .await
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        markets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(markets)
    }
}

#[async_trait]
impl DisputeStore for InMemoryStore {
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, StoreError> {
        let mut disputes = self.disputes.write().await;

        if disputes.contains_key(&dispute.id) {
            return Err(StoreError::Duplicate(dispute.id));
        }
        if let Some(open) = disputes
            .values()
            .find(|d| d.market_id == dispute.market_id && d.is_open())
        {
            return Err(StoreError::OpenDisputeExists {
                market_id: dispute.market_id,
                dispute_id: open.id.clone(),
            });
        }

        disputes.insert(dispute.id.clone(), dispute.clone());
        Ok(dispute)
    }

    async fn get_dispute(&self, dispute_id: &str) -> Result<Dispute, StoreError> {
        self.disputes
            .read()
            .await
            .get(dispute_id)
            .cloned()
            .ok_or_else(|| StoreError::DisputeNotFound(dispute_id.to_string()))
    }

    async fn disputes_for_market(&self, market_id: &str) -> Result<Vec<Dispute>, StoreError> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .read()
            .await
            .values()
            .filter(|d| d.market_id == market_id)
            .cloned()
            .collect();
        disputes.sort_by_key(|d| d.opened_at);
        Ok(disputes)
    }

    async fn upsert_ballot(&self, dispute_id: &str, ballot: Ballot) -> Result<Dispute, StoreError> {
        let mut disputes = self.disputes.write().await;
        let dispute = disputes
            .get_mut(dispute_id)
            .ok_or_else(|| StoreError::DisputeNotFound(dispute_id.to_string()))?;

        if !dispute.is_open() {
            return Err(StoreError::DisputeClosed(dispute_id.to_string()));
        }

        dispute.record_ballot(ballot);
        Ok(dispute.clone())
    }

    async fn close_dispute(
        &self,
        dispute_id: &str,
        expected_totals: (Decimal, Decimal),
        verdict: DisputeVerdict,
        closed_at: DateTime<Utc>,
    ) -> Result<Dispute, StoreError> {
        let mut disputes = self.disputes.write().await;
        let dispute = disputes
            .get_mut(dispute_id)
            .ok_or_else(|| StoreError::DisputeNotFound(dispute_id.to_string()))?;

        if !dispute.is_open() {
            return Err(StoreError::DisputeClosed(dispute_id.to_string()));
        }
        if (dispute.votes_for, dispute.votes_against) != expected_totals {
            return Err(StoreError::TallyChanged(dispute_id.to_string()));
        }

        dispute.status = DisputeStatus::Resolved;
        dispute.verdict = Some(verdict);
        dispute.closed_at = Some(closed_at);
        Ok(dispute.clone())
    }
}
