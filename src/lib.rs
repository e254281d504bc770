//! Prediction market resolution oracle
//!
//! Resolves market questions by consensus of independent LLM voters, drives
//! markets through their resolution lifecycle, and settles challenges with
//! stake-weighted dispute voting.

pub mod clock;
pub mod community;
pub mod config;
pub mod consensus;
pub mod dispute;
pub mod error;
pub mod insurance;
pub mod market;
pub mod mock_voters;
pub mod oracle_service;
pub mod resolution;
pub mod store;
pub mod tracing_logger;
pub mod typed_errors;
pub mod types;
pub mod voters;

pub use config::Config;
pub use consensus::{ConsensusCoordinator, ConsensusResult};
pub use dispute::{Dispute, DisputeLedger, DisputeVerdict};
pub use market::{InsuranceStatus, Market, MarketKind, MarketStatus};
pub use oracle_service::{OracleService, ResolveMarketResponse};
pub use resolution::{ResolutionDecision, ResolutionReport, ResolutionStateMachine};
pub use types::{MarketOutcome, Outcome, Vote};
