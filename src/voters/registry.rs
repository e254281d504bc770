//! Priority-ordered set of voter slots

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::llm::LlmVoter;
use super::VoterAdapter;
use crate::config::VoterSettings;

/// Whether a configured voter can be queried
#[derive(Clone)]
pub enum VoterAvailability {
    Enabled(Arc<dyn VoterAdapter>),
    Disabled { reason: String },
}

impl std::fmt::Debug for VoterAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoterAvailability::Enabled(adapter) => {
                f.debug_tuple("Enabled").field(&adapter.id()).finish()
            }
            VoterAvailability::Disabled { reason } => {
                f.debug_struct("Disabled").field("reason", reason).finish()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoterSlot {
    pub id: String,
    pub availability: VoterAvailability,
}

impl VoterSlot {
    pub fn is_enabled(&self) -> bool {
        matches!(self.availability, VoterAvailability::Enabled(_))
    }
}

/// Voters in fixed priority order, decided once at construction
#[derive(Debug, Clone, Default)]
pub struct VoterRegistry {
    slots: Vec<VoterSlot>,
}

impl VoterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an enabled voter at the lowest priority
    pub fn register(mut self, adapter: Arc<dyn VoterAdapter>) -> Self {
        self.slots.push(VoterSlot {
            id: adapter.id().to_string(),
            availability: VoterAvailability::Enabled(adapter),
        });
        self
    }

    pub fn register_disabled(mut self, id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.slots.push(VoterSlot {
            id: id.into(),
            availability: VoterAvailability::Disabled {
                reason: reason.into(),
            },
        });
        self
    }

    /// Build LLM voters from configuration
    ///
    /// Voters switched off or missing credentials become disabled slots.
    pub fn from_config(settings: &[VoterSettings], timeout: Duration) -> Self {
        let mut registry = Self::new();

        for voter in settings {
            if !voter.enabled {
                registry = registry.register_disabled(&voter.id, "disabled by configuration");
                continue;
            }

            registry = match LlmVoter::new(voter, timeout) {
                Ok(adapter) => {
                    info!(voter = %voter.id, model = %voter.model, "Voter enabled");
                    registry.register(Arc::new(adapter))
                }
                Err(e) => {
                    warn!(voter = %voter.id, error = %e, "Voter disabled");
                    registry.register_disabled(&voter.id, e.to_string())
                }
            };
        }

        registry
    }

    pub fn slots(&self) -> &[VoterSlot] {
        &self.slots
    }

    pub fn enabled_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_enabled()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
