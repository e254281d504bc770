//! Scriptable voter adapters for tests and local runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::VoterError;
use crate::types::{Outcome, Vote};
use crate::voters::parsing::parse_vote_response;
use crate::voters::VoterAdapter;

#[derive(Debug, Clone)]
enum MockBehavior {
    Respond { outcome: Outcome, confidence: u8 },
    Fail(VoterError),
    /// Raw model text, run through the same parser as real voters
    Reply(String),
}

/// Mock voter with a fixed answer, optional delay and a call counter
#[derive(Debug, Clone)]
pub struct MockVoter {
    id: String,
    behavior: Arc<RwLock<MockBehavior>>,
    response_delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockVoter {
    pub fn new(id: impl Into<String>, outcome: Outcome, confidence: u8) -> Self {
        Self::with_behavior(id, MockBehavior::Respond { outcome, confidence })
    }

    pub fn failing(id: impl Into<String>, error: VoterError) -> Self {
        Self::with_behavior(id, MockBehavior::Fail(error))
    }

    pub fn replying(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_behavior(id, MockBehavior::Reply(text.into()))
    }

    fn with_behavior(id: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            id: id.into(),
            behavior: Arc::new(RwLock::new(behavior)),
            response_delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    pub async fn set_vote(&self, outcome: Outcome, confidence: u8) {
        *self.behavior.write().await = MockBehavior::Respond { outcome, confidence };
    }

    pub async fn set_failure(&self, error: VoterError) {
        *self.behavior.write().await = MockBehavior::Fail(error);
    }

    /// Number of `vote` calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoterAdapter for MockVoter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vote(&self, _question: &str, _context: Option<&str>) -> Result<Vote, VoterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.response_delay {
            tokio::time::sleep(delay).await;
        }

        match &*self.behavior.read().await {
            MockBehavior::Respond { outcome, confidence } => {
                Ok(Vote::new(self.id.clone(), *outcome, *confidence))
            }
            MockBehavior::Fail(error) => Err(error.clone()),
            MockBehavior::Reply(text) => parse_vote_response(&self.id, text),
        }
    }
}
