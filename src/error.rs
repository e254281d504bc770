//! Domain error types for voters, consensus, resolution and disputes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::market::MarketStatus;

/// Failure of a single voter adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum VoterError {
    #[error("voter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("voter timed out after {after_ms}ms")]
    AdapterTimeout { after_ms: u64 },

    #[error("malformed voter response: {0}")]
    AdapterMalformedResponse(String),
}

/// A recorded per-adapter failure, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoterFailure {
    pub voter_id: String,
    pub error: VoterError,
}

impl fmt::Display for VoterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.voter_id, self.error)
    }
}

fn join_failures(failures: &[VoterFailure]) -> String {
    if failures.is_empty() {
        return "no voters enabled".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("question text is required")]
    MissingQuestion,

    #[error("required agreement must be in (0, 1], got {0}")]
    InvalidAgreement(f64),

    #[error("no voters available ({})", join_failures(.failures))]
    NoVotersAvailable {
        failures: Vec<VoterFailure>,
        disabled: Vec<String>,
    },

    #[error("consensus invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("dispute {0} not found")]
    DisputeNotFound(String),

    #[error("record {0} already exists")]
    Duplicate(String),

    #[error("market {market_id} already has open dispute {dispute_id}")]
    OpenDisputeExists { market_id: String, dispute_id: String },

    #[error("dispute {0} is closed")]
    DisputeClosed(String),

    #[error("concurrent update of {0}")]
    VersionConflict(String),

    #[error("tally of dispute {0} changed before it could be closed")]
    TallyChanged(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InsuranceError {
    #[error("insurance fallback unavailable: {0}")]
    Unavailable(String),

    #[error("insurance activation rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommunityError {
    #[error("no community ballots recorded for market {0}")]
    NoBallots(String),

    #[error("community vote unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("market {market_id} cannot be resolved before {resolution_time}")]
    NotReady {
        market_id: String,
        resolution_time: DateTime<Utc>,
    },

    #[error("market {market_id} is {status}, cannot {operation}")]
    InvalidState {
        market_id: String,
        status: MarketStatus,
        operation: &'static str,
    },

    #[error("market {0} is already resolved")]
    AlreadyResolved(String),

    #[error("market {market_id} has a resolution attempt in flight since {started_at}")]
    AttemptInProgress {
        market_id: String,
        started_at: DateTime<Utc>,
    },

    #[error("resolution attempt on market {0} was taken over by another attempt")]
    AttemptSuperseded(String),

    #[error("invalid outcome code {0}, expected 1 (yes), 2 (no) or 3 (invalid)")]
    InvalidOutcome(u8),

    #[error("invalid confidence {0}, expected 0-100")]
    InvalidConfidence(i64),

    #[error("resolution of market {market_id} failed: {reason}")]
    ResolutionFailed {
        market_id: String,
        reason: String,
        failures: Vec<VoterFailure>,
    },

    #[error("insurance activation failed for market {market_id}: {source}")]
    InsuranceActivationFailed {
        market_id: String,
        #[source]
        source: InsuranceError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DisputeError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("market {market_id} is {status} and cannot be disputed: {detail}")]
    InvalidState {
        market_id: String,
        status: MarketStatus,
        detail: String,
    },

    #[error("market {market_id} already has open dispute {dispute_id}")]
    DisputeAlreadyOpen { market_id: String, dispute_id: String },

    #[error("vote weight must be positive, got {0}")]
    InvalidWeight(Decimal),

    #[error("dispute {0} is closed")]
    DisputeClosed(String),

    #[error("voting on dispute {dispute_id} ended at {deadline}")]
    VotingClosed {
        dispute_id: String,
        deadline: DateTime<Utc>,
    },

    #[error("voting on dispute {dispute_id} is open until {deadline}")]
    VotingOpen {
        dispute_id: String,
        deadline: DateTime<Utc>,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
