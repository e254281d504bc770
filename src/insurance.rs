//! Insurance backstop for low-confidence resolutions

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::InsuranceError;
use crate::types::Outcome;

/// Outbound call made when an automated resolution is not confident enough
#[async_trait]
pub trait InsuranceFallback: Send + Sync {
    async fn activate(
        &self,
        market_id: &str,
        outcome: Outcome,
        confidence: u8,
    ) -> Result<(), InsuranceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsuranceActivation {
    pub market_id: String,
    pub outcome: Outcome,
    pub confidence: u8,
    pub activated_at: DateTime<Utc>,
}

/// In-process fallback that records activations; can be told to fail
#[derive(Debug, Clone, Default)]
pub struct RecordingInsurance {
    activations: Arc<RwLock<Vec<InsuranceActivation>>>,
    failure: Arc<RwLock<Option<InsuranceError>>>,
}

impl RecordingInsurance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: InsuranceError) -> Self {
        Self {
            activations: Arc::default(),
            failure: Arc::new(RwLock::new(Some(error))),
        }
    }

    pub async fn set_failure(&self, error: Option<InsuranceError>) {
        *self.failure.write().await = error;
    }

    pub async fn activations(&self) -> Vec<InsuranceActivation> {
        self.activations.read().await.clone()
    }
}

#[async_trait]
impl InsuranceFallback for RecordingInsurance {
    async fn activate(
        &self,
        market_id: &str,
        outcome: Outcome,
        confidence: u8,
    ) -> Result<(), InsuranceError> {
        if let Some(error) = self.failure.read().await.clone() {
            return Err(error);
        }

        self.activations.write().await.push(InsuranceActivation {
            market_id: market_id.to_string(),
            outcome,
            confidence,
            activated_at: Utc::now(),
        });

        info!(market_id = %market_id, outcome = %outcome, confidence, "Insurance activated");
        Ok(())
    }
}
