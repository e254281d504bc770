//! Voter adapters: independent opinion sources queried by the consensus coordinator

use async_trait::async_trait;

use crate::error::VoterError;
use crate::types::Vote;

pub mod llm;
pub mod parsing;
pub mod registry;

pub use llm::{LlmProvider, LlmVoter};
pub use registry::{VoterAvailability, VoterRegistry, VoterSlot};

/// A single external opinion source
///
/// Implementations perform at most one outbound call per `vote` and keep no
/// state shared with other adapters.
#[async_trait]
pub trait VoterAdapter: Send + Sync {
    /// Stable identifier, reported as the vote's `source_id`
    fn id(&self) -> &str;

    /// Ask the source to resolve `question`
    async fn vote(&self, question: &str, context: Option<&str>) -> Result<Vote, VoterError>;
}
