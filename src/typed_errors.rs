//! Typed error system with context and tracing
//!
//! Domain errors from the resolution pipeline are converted into [`AppError`]
//! at the inbound boundary. Each kind is classified as a caller error, an
//! upstream (retryable) error or an invariant violation.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::error::{
    CommunityError, ConsensusError, DisputeError, InsuranceError, ResolutionError, StoreError,
    VoterError,
};

/// Error context containing metadata about the error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub operation: String,
    pub request_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(service: &str, operation: &str) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            service: service.to_string(),
            operation: operation.to_string(),
            request_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Caller errors
    InvalidInput,
    MissingField,
    NotFound,
    NotReady,
    InvalidState,
    AlreadyResolved,
    Conflict,
    VotingOpen,
    VotingClosed,

    // Upstream errors
    NoVotersAvailable,
    ResolutionFailed,
    InsuranceUnavailable,
    Timeout,

    // Invariant violations
    InvariantViolation,

    // System errors
    StorageError,
    ConfigurationError,
}

/// Broad classification used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Caller,
    Upstream,
    Invariant,
    System,
}

impl ErrorKind {
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::InvalidInput
            | ErrorKind::MissingField
            | ErrorKind::NotFound
            | ErrorKind::NotReady
            | ErrorKind::InvalidState
            | ErrorKind::AlreadyResolved
            | ErrorKind::Conflict
            | ErrorKind::VotingOpen
            | ErrorKind::VotingClosed => ErrorClass::Caller,
            ErrorKind::NoVotersAvailable
            | ErrorKind::ResolutionFailed
            | ErrorKind::InsuranceUnavailable
            | ErrorKind::Timeout => ErrorClass::Upstream,
            ErrorKind::InvariantViolation => ErrorClass::Invariant,
            ErrorKind::StorageError | ErrorKind::ConfigurationError => ErrorClass::System,
        }
    }

    /// HTTP-equivalent status for the excluded transport layer
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::MissingField => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState
            | ErrorKind::AlreadyResolved
            | ErrorKind::Conflict
            | ErrorKind::VotingOpen
            | ErrorKind::VotingClosed => 409,
            ErrorKind::NotReady => 425,
            ErrorKind::NoVotersAvailable
            | ErrorKind::ResolutionFailed
            | ErrorKind::InsuranceUnavailable => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::InvariantViolation
            | ErrorKind::StorageError
            | ErrorKind::ConfigurationError => 500,
        }
    }

    /// Check if a caller-initiated retry can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoVotersAvailable
                | ErrorKind::ResolutionFailed
                | ErrorKind::InsuranceUnavailable
                | ErrorKind::Timeout
                | ErrorKind::StorageError
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Invalid input provided",
            ErrorKind::MissingField => "Required field missing",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::NotReady => "Market is not ready for resolution",
            ErrorKind::InvalidState => "Operation not allowed in current state",
            ErrorKind::AlreadyResolved => "Market already resolved",
            ErrorKind::Conflict => "Resource conflict",
            ErrorKind::VotingOpen => "Dispute voting still open",
            ErrorKind::VotingClosed => "Dispute voting closed",
            ErrorKind::NoVotersAvailable => "No voters available",
            ErrorKind::ResolutionFailed => "Resolution failed",
            ErrorKind::InsuranceUnavailable => "Insurance fallback unavailable",
            ErrorKind::Timeout => "Request timeout",
            ErrorKind::InvariantViolation => "Internal invariant violated",
            ErrorKind::StorageError => "Storage error",
            ErrorKind::ConfigurationError => "Configuration error",
        }
    }
}

/// Main application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub source: Option<String>,
}

impl AppError {
    /// Create new error with context
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let message = message.into();

        // Log error based on severity
        match kind.class() {
            ErrorClass::Invariant | ErrorClass::System => {
                error!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Critical error: {}", message
                );
            }
            ErrorClass::Upstream => {
                warn!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Upstream error: {}", message
                );
            }
            ErrorClass::Caller => {
                tracing::debug!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Caller error: {}", message
                );
            }
        }

        Self {
            kind,
            message,
            context,
            source: None,
        }
    }

    pub fn with_source(mut self, source: &dyn StdError) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.metadata.insert(key.to_string(), value);
        self
    }

    pub fn validation(field: &str, message: &str, context: ErrorContext) -> Self {
        Self::new(ErrorKind::InvalidInput, message, context)
            .with_metadata("field", serde_json::json!(field))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.user_message(), self.message)
    }
}

impl StdError for AppError {}

/// Error body for the excluded transport layer
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
    pub error_id: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.kind,
            message: err.message.clone(),
            error_id: err.context.error_id.clone(),
            retryable: err.kind.is_retryable(),
            timestamp: err.context.timestamp,
            metadata: err.context.metadata.clone(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Domain errors that know their [`ErrorKind`] and diagnostic metadata
pub trait DomainError: StdError {
    fn kind(&self) -> ErrorKind;

    fn metadata(&self) -> Vec<(&'static str, serde_json::Value)> {
        Vec::new()
    }
}

impl DomainError for VoterError {
    fn kind(&self) -> ErrorKind {
        match self {
            VoterError::AdapterTimeout { .. } => ErrorKind::Timeout,
            VoterError::AdapterUnavailable(_) | VoterError::AdapterMalformedResponse(_) => {
                ErrorKind::ResolutionFailed
            }
        }
    }
}

impl DomainError for ConsensusError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::MissingQuestion => ErrorKind::MissingField,
            ConsensusError::InvalidAgreement(_) => ErrorKind::InvalidInput,
            ConsensusError::NoVotersAvailable { .. } => ErrorKind::NoVotersAvailable,
            ConsensusError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    fn metadata(&self) -> Vec<(&'static str, serde_json::Value)> {
        match self {
            ConsensusError::NoVotersAvailable { failures, disabled } => vec![
                ("voter_failures", serde_json::json!(failures)),
                ("disabled_voters", serde_json::json!(disabled)),
            ],
            _ => Vec::new(),
        }
    }
}

impl DomainError for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::MarketNotFound(_) | StoreError::DisputeNotFound(_) => ErrorKind::NotFound,
            StoreError::Duplicate(_)
            | StoreError::OpenDisputeExists { .. }
            | StoreError::VersionConflict(_)
            | StoreError::TallyChanged(_) => ErrorKind::Conflict,
            StoreError::DisputeClosed(_) => ErrorKind::InvalidState,
            StoreError::Backend(_) => ErrorKind::StorageError,
        }
    }
}

impl DomainError for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigurationError
    }
}

impl DomainError for InsuranceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InsuranceUnavailable
    }
}

impl DomainError for CommunityError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ResolutionFailed
    }
}

impl DomainError for ResolutionError {
    fn kind(&self) -> ErrorKind {
        match self {
            ResolutionError::NotReady { .. } => ErrorKind::NotReady,
            ResolutionError::InvalidState { .. } => ErrorKind::InvalidState,
            ResolutionError::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            ResolutionError::AttemptInProgress { .. } | ResolutionError::AttemptSuperseded(_) => {
                ErrorKind::Conflict
            }
            ResolutionError::InvalidOutcome(_) | ResolutionError::InvalidConfidence(_) => {
                ErrorKind::InvalidInput
            }
            ResolutionError::ResolutionFailed { .. } => ErrorKind::ResolutionFailed,
            ResolutionError::InsuranceActivationFailed { .. } => ErrorKind::InsuranceUnavailable,
            ResolutionError::Store(e) => e.kind(),
        }
    }

    fn metadata(&self) -> Vec<(&'static str, serde_json::Value)> {
        match self {
            ResolutionError::NotReady {
                market_id,
                resolution_time,
            } => vec![
                ("market_id", serde_json::json!(market_id)),
                ("resolution_time", serde_json::json!(resolution_time)),
            ],
            ResolutionError::InvalidState {
                market_id, status, ..
            } => vec![
                ("market_id", serde_json::json!(market_id)),
                ("status", serde_json::json!(status)),
            ],
            ResolutionError::AttemptInProgress {
                market_id,
                started_at,
            } => vec![
                ("market_id", serde_json::json!(market_id)),
                ("attempt_started_at", serde_json::json!(started_at)),
            ],
            ResolutionError::ResolutionFailed {
                market_id,
                failures,
                ..
            } => vec![
                ("market_id", serde_json::json!(market_id)),
                ("voter_failures", serde_json::json!(failures)),
            ],
            ResolutionError::InsuranceActivationFailed { market_id, .. } => {
                vec![("market_id", serde_json::json!(market_id))]
            }
            _ => Vec::new(),
        }
    }
}

impl DomainError for DisputeError {
    fn kind(&self) -> ErrorKind {
        match self {
            DisputeError::MissingField(_) => ErrorKind::MissingField,
            DisputeError::InvalidWeight(_) => ErrorKind::InvalidInput,
            DisputeError::InvalidState { .. } | DisputeError::DisputeClosed(_) => {
                ErrorKind::InvalidState
            }
            DisputeError::DisputeAlreadyOpen { .. } => ErrorKind::Conflict,
            DisputeError::VotingClosed { .. } => ErrorKind::VotingClosed,
            DisputeError::VotingOpen { .. } => ErrorKind::VotingOpen,
            DisputeError::Resolution(e) => e.kind(),
            DisputeError::Store(e) => e.kind(),
        }
    }

    fn metadata(&self) -> Vec<(&'static str, serde_json::Value)> {
        match self {
            DisputeError::MissingField(field) => vec![("field", serde_json::json!(field))],
            DisputeError::DisputeAlreadyOpen { dispute_id, .. } => {
                vec![("dispute_id", serde_json::json!(dispute_id))]
            }
            DisputeError::VotingOpen { deadline, .. } | DisputeError::VotingClosed { deadline, .. } => {
                vec![("voting_deadline", serde_json::json!(deadline))]
            }
            DisputeError::Resolution(e) => e.metadata(),
            _ => Vec::new(),
        }
    }
}

/// Extension trait for converting domain results
pub trait ErrorExt<T> {
    fn app_err(self, context: ErrorContext) -> AppResult<T>;
}

impl<T, E: DomainError> ErrorExt<T> for Result<T, E> {
    fn app_err(self, context: ErrorContext) -> AppResult<T> {
        self.map_err(|e| {
            let context = e
                .metadata()
                .into_iter()
                .fold(context, |ctx, (key, value)| ctx.with_metadata(key, value));
            AppError::new(e.kind(), e.to_string(), context).with_source(&e)
        })
    }
}
