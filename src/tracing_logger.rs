//! Logging with tracing and correlation IDs

use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Correlation ID for tracing one inbound call through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from existing ID
    pub fn from_string(id: String) -> Self {
        Self(id)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Initialize global tracing subscriber
///
/// `RUST_LOG` wins over `default_level` when set. Safe to call more than once;
/// later calls are ignored.
pub fn init_subscriber(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        info!("Tracing logger initialized");
    }
}

/// Run an operation and log its duration and result
pub async fn log_operation<F, T, E>(
    operation: &str,
    correlation_id: &CorrelationId,
    future: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = future.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(
            correlation_id = %correlation_id,
            operation = %operation,
            duration_ms,
            "Operation completed"
        ),
        Err(e) => warn!(
            correlation_id = %correlation_id,
            operation = %operation,
            duration_ms,
            error = %e,
            "Operation failed"
        ),
    }

    result
}
