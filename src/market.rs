//! Market entity as seen by the resolution pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::add_std;
use crate::types::{MarketOutcome, Outcome};

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Resolving,
    Resolved,
    Disputed,
    Cancelled,
}

impl MarketStatus {
    /// No transition leaves a terminal status except a dispute reopening a resolution
    pub fn is_terminal(self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Cancelled)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketStatus::Active => "active",
            MarketStatus::Resolving => "resolving",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Disputed => "disputed",
            MarketStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How a market's outcome is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Binary,
    Conditional,
    /// Resolved by community vote instead of the voter consensus
    Subjective,
}

/// Lease held by the resolution attempt currently determining an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl ResolutionAttempt {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
        }
    }

    pub fn expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        now >= add_std(self.started_at, lease)
    }
}

/// Insurance backstop state of a low-confidence resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceStatus {
    #[default]
    NotRequired,
    /// Required but not yet confirmed by the fallback
    Pending,
    Activated,
}

/// Market record (fields relevant to resolution only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub context: Option<String>,
    pub kind: MarketKind,
    pub status: MarketStatus,
    pub resolution_time: DateTime<Utc>,
    /// Meaningful only while `status == Resolved`
    pub outcome: MarketOutcome,
    /// Automated outcome held back while the market is disputed
    pub pending_outcome: Option<Outcome>,
    pub resolution_confidence: Option<u8>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_attempt: Option<ResolutionAttempt>,
    #[serde(default)]
    pub insurance: InsuranceStatus,
    pub cancel_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-locking version, bumped by the store on every write
    pub version: u64,
}

impl Market {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        kind: MarketKind,
        resolution_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            context: None,
            kind,
            status: MarketStatus::Active,
            resolution_time,
            outcome: MarketOutcome::Unresolved,
            pending_outcome: None,
            resolution_confidence: None,
            resolved_at: None,
            resolution_attempt: None,
            insurance: InsuranceStatus::NotRequired,
            cancel_reason: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Whether a resolution attempt still holds an unexpired lease
    pub fn attempt_in_flight(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.resolution_attempt
            .as_ref()
            .map_or(false, |attempt| !attempt.expired(now, lease))
    }

    /// Final outcome, only once resolved
    pub fn final_outcome(&self) -> Option<Outcome> {
        if self.status == MarketStatus::Resolved {
            self.outcome.as_outcome()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attempt_lease_expiry() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let lease = Duration::from_secs(60);
        let mut market = Market::new("m-1", "Q?", MarketKind::Binary, start);
        assert!(!market.attempt_in_flight(start, lease));

        market.resolution_attempt = Some(ResolutionAttempt::start(start));
        assert!(market.attempt_in_flight(start + chrono::Duration::seconds(59), lease));
        assert!(!market.attempt_in_flight(start + chrono::Duration::seconds(60), lease));
    }
}
