//! Consensus coordinator
//!
//! Queries every configured voter in priority order, tallies the votes into
//! YES / NO / INVALID buckets and applies the quorum rule. A result is never
//! YES or NO unless its bucket strictly beats both others and its share of
//! the tally reaches the required agreement.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ConsensusConfig, DispatchMode, TallyMode};
use crate::error::{ConsensusError, VoterError, VoterFailure};
use crate::types::{Outcome, Vote};
use crate::voters::{VoterAdapter, VoterAvailability, VoterRegistry, VoterSlot};

const AGREEMENT_EPSILON: f64 = 1e-9;

/// Aggregated result of one resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub outcome: Outcome,
    /// Winning bucket's share of the tally, 0-100
    pub confidence: u8,
    pub agreeing_count: usize,
    pub total_voters: usize,
    /// Collected votes in priority order
    pub votes: Vec<Vote>,
    pub failures: Vec<VoterFailure>,
    /// Disabled voters, never counted
    pub skipped: Vec<String>,
}

/// Counted votes before diagnostics are attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub outcome: Outcome,
    pub confidence: u8,
    pub agreeing_count: usize,
    pub total_voters: usize,
}

/// Tally votes and apply the quorum rule
///
/// In [`TallyMode::Count`] every vote weighs one; in
/// [`TallyMode::ConfidenceWeighted`] a bucket weighs the sum of its voters'
/// confidences. `agreeing_count` is always a number of voters.
pub fn tally(votes: &[Vote], required_agreement: f64, mode: TallyMode) -> Tally {
    let mut counts = [0usize; 3];
    let mut weights = [0u64; 3];

    for vote in votes {
        let bucket = vote.outcome.bucket();
        counts[bucket] += 1;
        weights[bucket] += match mode {
            TallyMode::Count => 1,
            TallyMode::ConfidenceWeighted => u64::from(vote.confidence),
        };
    }

    let total_weight: u64 = weights.iter().sum();
    let max_weight = weights.iter().copied().max().unwrap_or(0);
    let leaders: Vec<usize> = (0..3).filter(|&b| weights[b] == max_weight).collect();
    let agreeing_count = leaders.iter().map(|&b| counts[b]).max().unwrap_or(0);

    if total_weight == 0 {
        return Tally {
            outcome: Outcome::Invalid,
            confidence: 0,
            agreeing_count,
            total_voters: votes.len(),
        };
    }

    let confidence = (100.0 * max_weight as f64 / total_weight as f64).round() as u8;

    let outcome = match leaders.as_slice() {
        [winner] if (confidence as f64) + AGREEMENT_EPSILON >= required_agreement * 100.0 => {
            Outcome::ALL[*winner]
        }
        _ => Outcome::Invalid,
    };

    Tally {
        outcome,
        confidence,
        agreeing_count,
        total_voters: votes.len(),
    }
}

#[derive(Debug, Default)]
struct Collected {
    votes: Vec<Vote>,
    failures: Vec<VoterFailure>,
    skipped: Vec<String>,
}

enum SlotResult {
    Skipped,
    Answered(Result<Vote, VoterError>),
}

/// Combines independent voters into a single outcome
pub struct ConsensusCoordinator {
    registry: VoterRegistry,
    config: ConsensusConfig,
}

impl ConsensusCoordinator {
    pub fn new(registry: VoterRegistry, config: ConsensusConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &VoterRegistry {
        &self.registry
    }

    /// Resolve a question with the configured voters
    ///
    /// Fails with [`ConsensusError::NoVotersAvailable`] only when no voter
    /// returned a vote.
    pub async fn resolve(
        &self,
        question: &str,
        context: Option<&str>,
        required_agreement: f64,
    ) -> Result<ConsensusResult, ConsensusError> {
        if question.trim().is_empty() {
            return Err(ConsensusError::MissingQuestion);
        }
        if !(required_agreement > 0.0 && required_agreement <= 1.0) {
            return Err(ConsensusError::InvalidAgreement(required_agreement));
        }

        let deadline = self.config.overall_deadline.map(|d| Instant::now() + d);

        let collected = match self.config.dispatch {
            DispatchMode::Sequential => self.collect_sequential(question, context, deadline).await,
            DispatchMode::Parallel => self.collect_parallel(question, context, deadline).await,
        };

        if collected.votes.is_empty() {
            warn!(
                failures = collected.failures.len(),
                disabled = collected.skipped.len(),
                "No voter returned a vote"
            );
            return Err(ConsensusError::NoVotersAvailable {
                failures: collected.failures,
                disabled: collected.skipped,
            });
        }

        let counted = tally(&collected.votes, required_agreement, self.config.tally);

        if counted.agreeing_count > counted.total_voters {
            error!(
                agreeing_count = counted.agreeing_count,
                total_voters = counted.total_voters,
                "Consensus tally exceeded voter count"
            );
            return Err(ConsensusError::InvariantViolation(format!(
                "agreeing_count {} exceeds total_voters {}",
                counted.agreeing_count, counted.total_voters
            )));
        }

        info!(
            outcome = %counted.outcome,
            confidence = counted.confidence,
            agreeing_count = counted.agreeing_count,
            total_voters = counted.total_voters,
            failures = collected.failures.len(),
            "Consensus reached"
        );

        Ok(ConsensusResult {
            outcome: counted.outcome,
            confidence: counted.confidence,
            agreeing_count: counted.agreeing_count,
            total_voters: counted.total_voters,
            votes: collected.votes,
            failures: collected.failures,
            skipped: collected.skipped,
        })
    }

    async fn collect_sequential(
        &self,
        question: &str,
        context: Option<&str>,
        deadline: Option<Instant>,
    ) -> Collected {
        let mut collected = Collected::default();

        for slot in self.registry.slots() {
            let result = match &slot.availability {
                VoterAvailability::Disabled { .. } => SlotResult::Skipped,
                VoterAvailability::Enabled(adapter) => {
                    let budget = self.call_budget(deadline);
                    SlotResult::Answered(self.call(adapter, question, context, budget).await)
                }
            };
            record(&mut collected, slot, result);
        }

        collected
    }

    async fn collect_parallel(
        &self,
        question: &str,
        context: Option<&str>,
        deadline: Option<Instant>,
    ) -> Collected {
        let budget = self.call_budget(deadline);

        let calls = self.registry.slots().iter().map(|slot| async move {
            match &slot.availability {
                VoterAvailability::Disabled { .. } => SlotResult::Skipped,
                VoterAvailability::Enabled(adapter) => {
                    SlotResult::Answered(self.call(adapter, question, context, budget).await)
                }
            }
        });

        // join_all keeps input order, so results stay in priority order
        let results = join_all(calls).await;

        let mut collected = Collected::default();
        for (slot, result) in self.registry.slots().iter().zip(results) {
            record(&mut collected, slot, result);
        }
        collected
    }

    /// Per-call bound: the voter timeout, capped by what is left of the deadline
    fn call_budget(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.config.voter_timeout),
            None => self.config.voter_timeout,
        }
    }

    async fn call(
        &self,
        adapter: &Arc<dyn VoterAdapter>,
        question: &str,
        context: Option<&str>,
        budget: Duration,
    ) -> Result<Vote, VoterError> {
        let timed_out = VoterError::AdapterTimeout {
            after_ms: budget.as_millis() as u64,
        };

        if budget.is_zero() {
            return Err(timed_out);
        }

        match timeout(budget, adapter.vote(question, context)).await {
            Ok(Ok(vote)) if vote.confidence > 100 => Err(VoterError::AdapterMalformedResponse(
                format!("confidence out of range: {}", vote.confidence),
            )),
            Ok(result) => result,
            Err(_) => Err(timed_out),
        }
    }
}

fn record(collected: &mut Collected, slot: &VoterSlot, result: SlotResult) {
    match result {
        SlotResult::Skipped => {
            debug!(voter = %slot.id, "Skipping disabled voter");
            collected.skipped.push(slot.id.clone());
        }
        SlotResult::Answered(Ok(vote)) => {
            debug!(
                voter = %slot.id,
                outcome = %vote.outcome,
                confidence = vote.confidence,
                "Voter returned vote"
            );
            collected.votes.push(vote);
        }
        SlotResult::Answered(Err(e)) => {
            warn!(voter = %slot.id, error = %e, "Voter failed to return vote");
            collected.failures.push(VoterFailure {
                voter_id: slot.id.clone(),
                error: e,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_voters::MockVoter;

    fn votes(buckets: &[(Outcome, usize)]) -> Vec<Vote> {
        buckets.iter()
            .flat_map(|(outcome, n)| (0..*n).map(move |i| Vote::new(format!("v{}", i), *outcome, 90)))
            .collect()
    }

    fn registry_of(voters: Vec<MockVoter>) -> VoterRegistry {
        voters
            .into_iter()
            .fold(VoterRegistry::new(), |registry, voter| registry.register(Arc::new(voter)))
    }

    fn coordinator(voters: Vec<MockVoter>) -> ConsensusCoordinator {
        ConsensusCoordinator::new(registry_of(voters), ConsensusConfig::default())
    }

    #[test]
    fn test_majority_meets_agreement() {
        let result = tally(
            &votes(&[(Outcome::Yes, 3), (Outcome::No, 1), (Outcome::Invalid, 1)]),
            0.6,
            TallyMode::Count,
        );
        assert_eq!(
            result,
            Tally {
                outcome: Outcome::Yes,
                confidence: 60,
                agreeing_count: 3,
                total_voters: 5,
            }
        );
    }

    #[test]
    fn test_majority_below_agreement_is_invalid() {
        let result = tally(&votes(&[(Outcome::Yes, 3), (Outcome::No, 2)]), 0.8, TallyMode::Count);
        assert_eq!(result.outcome, Outcome::Invalid);
        assert_eq!(result.confidence, 60);
        assert_eq!(result.agreeing_count, 3);
    }

    #[test]
    fn test_tie_is_invalid() {
        let result = tally(&votes(&[(Outcome::Yes, 2), (Outcome::No, 2)]), 0.5, TallyMode::Count);
        assert_eq!(result.outcome, Outcome::Invalid);
        assert_eq!(result.confidence, 50);
    }

    #[test]
    fn test_quorum_invariant_holds_for_all_small_tallies() {
        for yes in 0..5 {
            for no in 0..5 {
                for invalid in 0..5 {
                    let votes = votes(&[(Outcome::Yes, yes), (Outcome::No, no), (Outcome::Invalid, invalid)]);
                    if votes.is_empty() {
                        continue;
                    }
                    for agreement in [0.34, 0.5, 0.6, 0.67, 0.8, 1.0] {
                        let result = tally(&votes, agreement, TallyMode::Count);
                        assert!(result.agreeing_count <= result.total_voters);
                        if result.outcome != Outcome::Invalid {
                            let counts = [yes, no, invalid];
                            let winner = counts[result.outcome.bucket()];
                            assert!(counts.iter().filter(|&&c| c == winner).count() == 1);
                            assert!(result.confidence as f64 + 1e-9 >= agreement * 100.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_confidence_weighted_tally() {
        let votes = vec![
            Vote::new("a", Outcome::Yes, 90),
            Vote::new("b", Outcome::Yes, 80),
            Vote::new("c", Outcome::No, 95),
            Vote::new("d", Outcome::No, 20),
        ];

        assert_eq!(tally(&votes, 0.5, TallyMode::Count).outcome, Outcome::Invalid);

        let weighted = tally(&votes, 0.5, TallyMode::ConfidenceWeighted);
        assert_eq!(weighted.outcome, Outcome::Yes);
        assert_eq!(weighted.confidence, 60);
        assert_eq!(weighted.agreeing_count, 2);
        assert_eq!(weighted.total_voters, 4);
    }

    #[test]
    fn test_zero_weight_is_invalid() {
        let votes = vec![Vote::new("a", Outcome::Yes, 0), Vote::new("b", Outcome::No, 0)];
        let result = tally(&votes, 0.5, TallyMode::ConfidenceWeighted);
        assert_eq!(result.outcome, Outcome::Invalid);
        assert_eq!(result.confidence, 0);
    }

    #[tokio::test]
    async fn test_resolve_collects_every_voter() {
        let voters = vec![
            MockVoter::new("groq", Outcome::Yes, 95),
            MockVoter::new("gemini", Outcome::Yes, 90),
            MockVoter::new("openai", Outcome::Yes, 85),
        ];
        let handles = voters.clone();
        let coordinator = coordinator(voters);

        let result = coordinator.resolve("Did BTC close above $100k?", None, 0.8).await.unwrap();

        assert_eq!(result.outcome, Outcome::Yes);
        assert_eq!(result.confidence, 100);
        assert_eq!(result.agreeing_count, 3);
        assert_eq!(result.total_voters, 3);
        // no early exit once agreement is reached
        assert!(handles.iter().all(|v| v.calls() == 1));
    }

    #[tokio::test]
    async fn test_disabled_and_failing_voters_are_excluded() {
        let registry = VoterRegistry::new()
            .register(Arc::new(MockVoter::failing(
                "groq",
                VoterError::AdapterUnavailable("HTTP 503".to_string()),
            )))
            .register_disabled("gemini", "missing GEMINI_API_KEY")
            .register(Arc::new(MockVoter::new("openai", Outcome::No, 88)))
            .register(Arc::new(MockVoter::replying("anthropic", "I cannot say.")));

        let coordinator = ConsensusCoordinator::new(registry, ConsensusConfig::default());
        let result = coordinator.resolve("Will it rain?", Some("Paris"), 0.8).await.unwrap();

        assert_eq!(result.outcome, Outcome::No);
        assert_eq!(result.total_voters, 1);
        assert_eq!(result.skipped, vec!["gemini".to_string()]);
        let failed: Vec<_> = result.failures.iter().map(|f| f.voter_id.as_str()).collect();
        assert_eq!(failed, vec!["groq", "anthropic"]);
    }

    #[tokio::test]
    async fn test_no_voters_available() {
        let registry = VoterRegistry::new()
            .register_disabled("groq", "missing GROQ_API_KEY")
            .register(Arc::new(MockVoter::failing(
                "openai",
                VoterError::AdapterUnavailable("credentials rejected (HTTP 401)".to_string()),
            )));
        let coordinator = ConsensusCoordinator::new(registry, ConsensusConfig::default());

        match coordinator.resolve("Will it rain?", None, 0.8).await {
            Err(ConsensusError::NoVotersAvailable { failures, disabled }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].voter_id, "openai");
                assert_eq!(disabled, vec!["groq".to_string()]);
            }
            other => panic!("expected NoVotersAvailable, got {:?}", other),
        }

        let empty = ConsensusCoordinator::new(VoterRegistry::new(), ConsensusConfig::default());
        assert!(matches!(
            empty.resolve("Will it rain?", None, 0.8).await,
            Err(ConsensusError::NoVotersAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_caller_errors() {
        let coordinator = coordinator(vec![MockVoter::new("groq", Outcome::Yes, 90)]);

        assert_eq!(
            coordinator.resolve("   ", None, 0.8).await,
            Err(ConsensusError::MissingQuestion)
        );
        assert_eq!(
            coordinator.resolve("q?", None, 0.0).await,
            Err(ConsensusError::InvalidAgreement(0.0))
        );
        assert_eq!(
            coordinator.resolve("q?", None, 1.5).await,
            Err(ConsensusError::InvalidAgreement(1.5))
        );
    }

    #[tokio::test]
    async fn test_slow_voter_times_out() {
        let registry = registry_of(vec![
            MockVoter::new("groq", Outcome::Yes, 90).with_delay(Duration::from_millis(500)),
            MockVoter::new("openai", Outcome::No, 90),
        ]);
        let config = ConsensusConfig {
            voter_timeout: Duration::from_millis(50),
            ..ConsensusConfig::default()
        };
        let coordinator = ConsensusCoordinator::new(registry, config);

        let result = coordinator.resolve("q?", None, 1.0).await.unwrap();
        assert_eq!(result.outcome, Outcome::No);
        assert_eq!(
            result.failures[0].error,
            VoterError::AdapterTimeout { after_ms: 50 }
        );
    }

    #[tokio::test]
    async fn test_overall_deadline_keeps_earlier_votes() {
        let registry = registry_of(vec![
            MockVoter::new("groq", Outcome::Yes, 90).with_delay(Duration::from_millis(20)),
            MockVoter::new("gemini", Outcome::Yes, 90).with_delay(Duration::from_millis(1_000)),
            MockVoter::new("openai", Outcome::Yes, 90),
        ]);
        let config = ConsensusConfig {
            overall_deadline: Some(Duration::from_millis(300)),
            ..ConsensusConfig::default()
        };
        let coordinator = ConsensusCoordinator::new(registry, config);

        let result = coordinator.resolve("q?", None, 0.8).await.unwrap();
        assert_eq!(result.total_voters, 1);
        assert_eq!(result.votes[0].source_id, "groq");
        assert_eq!(result.failures.len(), 2);
        assert!(result
            .failures
            .iter()
            .all(|f| matches!(f.error, VoterError::AdapterTimeout { .. })));
    }

    #[tokio::test]
    async fn test_parallel_dispatch_preserves_priority_order() {
        let registry = registry_of(vec![
            MockVoter::new("groq", Outcome::Yes, 90).with_delay(Duration::from_millis(60)),
            MockVoter::new("gemini", Outcome::No, 90).with_delay(Duration::from_millis(30)),
            MockVoter::new("openai", Outcome::Yes, 90),
        ]);
        let config = ConsensusConfig {
            dispatch: DispatchMode::Parallel,
            ..ConsensusConfig::default()
        };
        let coordinator = ConsensusCoordinator::new(registry, config);

        let result = coordinator.resolve("q?", None, 0.6).await.unwrap();
        let order: Vec<_> = result.votes.iter().map(|v| v.source_id.as_str()).collect();
        assert_eq!(order, vec!["groq", "gemini", "openai"]);
        assert_eq!(result.outcome, Outcome::Yes);
        assert_eq!(result.confidence, 67);
    }
}
