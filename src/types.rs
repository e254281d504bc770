//! Core outcome and vote types shared by voters, consensus and resolution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome a voter (or the consensus) can settle on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    Invalid,
}

impl Outcome {
    /// Tally order. Also the order buckets are reported in.
    pub const ALL: [Outcome; 3] = [Outcome::Yes, Outcome::No, Outcome::Invalid];

    /// Wire code used at the inbound boundary (1=Yes, 2=No, 3=Invalid)
    pub fn code(self) -> u8 {
        match self {
            Outcome::Yes => 1,
            Outcome::No => 2,
            Outcome::Invalid => 3,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Outcome::Yes),
            2 => Some(Outcome::No),
            3 => Some(Outcome::Invalid),
            _ => None,
        }
    }

    pub(crate) fn bucket(self) -> usize {
        match self {
            Outcome::Yes => 0,
            Outcome::No => 1,
            Outcome::Invalid => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
            Outcome::Invalid => write!(f, "INVALID"),
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Outcome::Yes),
            "NO" => Ok(Outcome::No),
            "INVALID" => Ok(Outcome::Invalid),
            other => Err(format!("unknown outcome: {}", other)),
        }
    }
}

/// Final outcome recorded on a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketOutcome {
    #[default]
    Unresolved,
    Yes,
    No,
    Invalid,
}

impl MarketOutcome {
    pub fn as_outcome(self) -> Option<Outcome> {
        match self {
            MarketOutcome::Unresolved => None,
            MarketOutcome::Yes => Some(Outcome::Yes),
            MarketOutcome::No => Some(Outcome::No),
            MarketOutcome::Invalid => Some(Outcome::Invalid),
        }
    }
}

impl From<Outcome> for MarketOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Yes => MarketOutcome::Yes,
            Outcome::No => MarketOutcome::No,
            Outcome::Invalid => MarketOutcome::Invalid,
        }
    }
}

/// One voter's opinion for a single resolution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub source_id: String,
    pub outcome: Outcome,
    /// Self-reported certainty, 0-100
    pub confidence: u8,
}

impl Vote {
    pub fn new(source_id: impl Into<String>, outcome: Outcome, confidence: u8) -> Self {
        Self {
            source_id: source_id.into(),
            outcome,
            confidence: confidence.min(100),
        }
    }
}
