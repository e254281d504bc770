//! End-to-end dispute flows through the oracle service

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use oracle_consensus::clock::{Clock, ManualClock};
use oracle_consensus::community::CommunityPoll;
use oracle_consensus::config::{Config, DisputePolicy};
use oracle_consensus::dispute::Ballot;
use oracle_consensus::error::StoreError;
use oracle_consensus::insurance::RecordingInsurance;
use oracle_consensus::mock_voters::MockVoter;
use oracle_consensus::store::{DisputeStore, InMemoryStore, MarketStore};
use oracle_consensus::typed_errors::ErrorKind;
use oracle_consensus::voters::VoterRegistry;
use oracle_consensus::{
    Dispute, DisputeVerdict, Market, MarketKind, MarketOutcome, MarketStatus, OracleService,
    Outcome,
};

struct Fixture {
    service: OracleService,
    store: InMemoryStore,
    insurance: RecordingInsurance,
    clock: Arc<ManualClock>,
}

fn fixture(policy: DisputePolicy) -> Fixture {
    let store = InMemoryStore::new();
    let insurance = RecordingInsurance::new();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let config = Config {
        dispute: policy,
        ..Config::default()
    };

    let service = OracleService::assemble(
        VoterRegistry::new().register(Arc::new(MockVoter::new("groq", Outcome::Yes, 90))),
        &config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(CommunityPoll::new(0.8)),
        Arc::new(insurance.clone()),
        clock.clone(),
    );

    Fixture {
        service,
        store,
        insurance,
        clock,
    }
}

impl Fixture {
    async fn resolving_market(&self, id: &str) {
        let mut market = Market::new(
            id,
            "Did the launch happen before June?",
            MarketKind::Binary,
            self.clock.now() - Duration::hours(1),
        );
        market.status = MarketStatus::Resolving;
        self.store.insert_market(market).await.unwrap();
    }
}

fn stake(amount: i64) -> Decimal {
    Decimal::new(amount, 0)
}

#[tokio::test]
async fn test_low_confidence_dispute_rejected_keeps_automated_outcome() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("m-1").await;

    f.service.fulfill_resolution("m-1", 1, 70).await.unwrap();
    assert_eq!(f.insurance.activations().await.len(), 1);

    let dispute = f
        .service
        .file_dispute("m-1", "alice", "launch slipped to July", Some(2))
        .await
        .unwrap();
    assert_eq!(dispute.disputed_outcome, Outcome::Yes);
    assert_eq!(dispute.proposed_outcome, Some(Outcome::No));

    f.service.cast_vote(&dispute.id, "alice", true, stake(100)).await.unwrap();
    f.service.cast_vote(&dispute.id, "bob", false, stake(40)).await.unwrap();
    let updated = f.service.cast_vote(&dispute.id, "alice", true, stake(30)).await.unwrap();
    assert_eq!(updated.votes_for, stake(30));
    assert_eq!(updated.votes_against, stake(40));

    let err = f.service.finalize_dispute(&dispute.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::VotingOpen);

    f.clock.advance(Duration::hours(25));
    let settlement = f.service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::Rejected);
    assert_eq!(settlement.market.status, MarketStatus::Resolved);
    assert_eq!(settlement.market.outcome, MarketOutcome::Yes);

    let err = f
        .service
        .cast_vote(&dispute.id, "carol", true, stake(10))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_challenge_of_resolved_market_upheld_without_proposal_is_invalid() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("m-1").await;
    f.service.fulfill_resolution("m-1", 1, 85).await.unwrap();

    f.clock.advance(Duration::hours(12));
    let dispute = f
        .service
        .file_dispute("m-1", "alice", "question was ambiguous", None)
        .await
        .unwrap();

    let market = f.service.market("m-1").await.unwrap();
    assert_eq!(market.status, MarketStatus::Disputed);
    assert_eq!(market.outcome, MarketOutcome::Unresolved);
    assert_eq!(market.pending_outcome, Some(Outcome::Yes));

    f.service.cast_vote(&dispute.id, "alice", true, stake(100)).await.unwrap();
    f.service.cast_vote(&dispute.id, "bob", false, stake(50)).await.unwrap();

    f.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let settlement = f.service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::Upheld);
    assert_eq!(settlement.final_outcome, Outcome::Invalid);
    assert_eq!(settlement.market.outcome, MarketOutcome::Invalid);

    // Dispute verdicts are final
    let err = f
        .service
        .file_dispute("m-1", "bob", "try again", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_disputability_rules() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("confident").await;
    f.service.fulfill_resolution("confident", 2, 97).await.unwrap();
    f.resolving_market("stale").await;
    f.service.fulfill_resolution("stale", 2, 85).await.unwrap();
    f.service
        .register_market(Market::new(
            "active",
            "Will it rain tomorrow?",
            MarketKind::Binary,
            f.clock.now() + Duration::days(1),
        ))
        .await
        .unwrap();

    let err = f.service.file_dispute("confident", "alice", "wrong", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);

    let err = f.service.file_dispute("active", "alice", "wrong", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);

    let err = f.service.file_dispute("stale", "alice", "   ", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingField);

    f.clock.advance(Duration::hours(49));
    let err = f.service.file_dispute("stale", "alice", "wrong", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert_eq!(
        f.service.market("stale").await.unwrap().status,
        MarketStatus::Resolved
    );
}

#[tokio::test]
async fn test_one_open_dispute_per_market() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("m-1").await;
    f.service.fulfill_resolution("m-1", 2, 60).await.unwrap();

    let first = f.service.file_dispute("m-1", "alice", "wrong", None).await.unwrap();
    let err = f.service.file_dispute("m-1", "bob", "also wrong", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.context.metadata["dispute_id"], first.id.as_str());
}

#[tokio::test]
async fn test_vote_validation() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("m-1").await;
    f.service.fulfill_resolution("m-1", 1, 50).await.unwrap();
    let dispute = f.service.file_dispute("m-1", "alice", "wrong", None).await.unwrap();

    let err = f.service.cast_vote(&dispute.id, "bob", true, Decimal::ZERO).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    let err = f.service.cast_vote(&dispute.id, "bob", true, stake(-5)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    let err = f.service.cast_vote("missing", "bob", true, stake(5)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    f.clock.advance(Duration::hours(25));
    let err = f.service.cast_vote(&dispute.id, "bob", true, stake(5)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::VotingClosed);
}

#[tokio::test]
async fn test_tie_keeps_original_outcome() {
    let f = fixture(DisputePolicy::default());
    f.resolving_market("m-1").await;
    f.service.fulfill_resolution("m-1", 2, 65).await.unwrap();
    let dispute = f.service.file_dispute("m-1", "alice", "wrong", Some(1)).await.unwrap();

    f.service.cast_vote(&dispute.id, "alice", true, stake(75)).await.unwrap();
    f.service.cast_vote(&dispute.id, "bob", false, stake(75)).await.unwrap();

    f.clock.advance(Duration::days(2));
    let settlement = f.service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::Rejected);
    assert_eq!(settlement.market.outcome, MarketOutcome::No);
}

#[tokio::test]
async fn test_quorum_and_early_close() {
    let policy = DisputePolicy {
        min_quorum_weight: stake(1_000),
        early_close_weight: Some(stake(500)),
        ..DisputePolicy::default()
    };

    let f = fixture(policy.clone());
    f.resolving_market("thin").await;
    f.service.fulfill_resolution("thin", 1, 40).await.unwrap();
    let dispute = f.service.file_dispute("thin", "alice", "wrong", Some(2)).await.unwrap();
    f.service.cast_vote(&dispute.id, "alice", true, stake(100)).await.unwrap();

    f.clock.advance(Duration::hours(30));
    let settlement = f.service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::NoQuorum);
    assert_eq!(settlement.market.outcome, MarketOutcome::Yes);

    let f = fixture(policy);
    f.resolving_market("busy").await;
    f.service.fulfill_resolution("busy", 1, 40).await.unwrap();
    let dispute = f.service.file_dispute("busy", "alice", "wrong", Some(2)).await.unwrap();
    f.service.cast_vote(&dispute.id, "alice", true, stake(400)).await.unwrap();

    let err = f.service.finalize_dispute(&dispute.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::VotingOpen);

    f.service.cast_vote(&dispute.id, "bob", true, stake(700)).await.unwrap();
    let settlement = f.service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::Upheld);
    assert_eq!(settlement.market.outcome, MarketOutcome::No);

    let err = f.service.finalize_dispute(&dispute.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
}

/// Dispute store that records one more ballot right before the next close
struct LateBallotStore {
    inner: InMemoryStore,
    late_ballot: Mutex<Option<Ballot>>,
}

#[async_trait]
impl DisputeStore for LateBallotStore {
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, StoreError> {
        self.inner.insert_dispute(dispute).await
    }

    async fn get_dispute(&self, dispute_id: &str) -> Result<Dispute, StoreError> {
        self.inner.get_dispute(dispute_id).await
    }

    async fn disputes_for_market(&self, market_id: &str) -> Result<Vec<Dispute>, StoreError> {
        self.inner.disputes_for_market(market_id).await
    }

    async fn upsert_ballot(&self, dispute_id: &str, ballot: Ballot) -> Result<Dispute, StoreError> {
        self.inner.upsert_ballot(dispute_id, ballot).await
    }

    async fn close_dispute(
        &self,
        dispute_id: &str,
        expected_totals: (Decimal, Decimal),
        verdict: DisputeVerdict,
        closed_at: DateTime<Utc>,
    ) -> Result<Dispute, StoreError> {
        if let Some(ballot) = self.late_ballot.lock().await.take() {
            self.inner.upsert_ballot(dispute_id, ballot).await?;
        }
        self.inner
            .close_dispute(dispute_id, expected_totals, verdict, closed_at)
            .await
    }
}

#[tokio::test]
async fn test_ballot_landing_during_early_close_decides_verdict() {
    let store = InMemoryStore::new();
    let disputes = Arc::new(LateBallotStore {
        inner: store.clone(),
        late_ballot: Mutex::new(None),
    });
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let config = Config {
        dispute: DisputePolicy {
            early_close_weight: Some(stake(500)),
            ..DisputePolicy::default()
        },
        ..Config::default()
    };
    let service = OracleService::assemble(
        VoterRegistry::new(),
        &config,
        Arc::new(store.clone()),
        disputes.clone(),
        Arc::new(CommunityPoll::new(0.8)),
        Arc::new(RecordingInsurance::new()),
        clock.clone(),
    );

    let mut market = Market::new(
        "m-1",
        "Did the merger close in Q2?",
        MarketKind::Binary,
        clock.now() - Duration::hours(1),
    );
    market.status = MarketStatus::Resolving;
    store.insert_market(market).await.unwrap();
    service.fulfill_resolution("m-1", 2, 60).await.unwrap();

    let dispute = service.file_dispute("m-1", "alice", "deal collapsed", Some(1)).await.unwrap();
    service.cast_vote(&dispute.id, "alice", true, stake(600)).await.unwrap();

    *disputes.late_ballot.lock().await = Some(Ballot {
        voter: "bob".to_string(),
        supports_challenger: false,
        weight: stake(900),
        cast_at: clock.now(),
    });

    let settlement = service.finalize_dispute(&dispute.id).await.unwrap();
    assert_eq!(settlement.verdict, DisputeVerdict::Rejected);
    assert_eq!(settlement.dispute.verdict, Some(DisputeVerdict::Rejected));
    assert_eq!(settlement.dispute.votes_for, stake(600));
    assert_eq!(settlement.dispute.votes_against, stake(900));
    assert_eq!(settlement.final_outcome, Outcome::No);
    assert_eq!(settlement.market.outcome, MarketOutcome::No);
}
