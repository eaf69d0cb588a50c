//! Error types for route_check
//!
//! A discrepancy between the stores is not an error: it is reported through
//! [`crate::CheckOutcome`]. The variants here abort the current cycle.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors carry the failing operation and stage

use std::time::Duration;
use thiserror::Error;

use crate::reconciler::CheckStage;

/// Errors that can occur while running a check cycle
#[derive(Debug, Error)]
pub enum RouteCheckError {
    /// Redis client error surfaced without further context
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A table scan or subscription against a store failed
    /// NIST: SC-8 - Database communication errors
    #[error("Store operation failed: {operation}: {message}")]
    Store { operation: String, message: String },

    /// The watchdog deadline elapsed before the cycle finished
    /// NIST: SI-4 - Bounded monitoring cycle
    #[error("Check cycle timed out after {}s during {stage}", timeout.as_secs())]
    Timeout { stage: CheckStage, timeout: Duration },

    /// The cycle was cancelled (shutdown requested or deadline signalled)
    #[error("Check cycle cancelled during {stage}")]
    Cancelled { stage: CheckStage },

    /// Configuration error
    /// NIST: CM-6 - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A key or address could not be parsed into a route key
    /// NIST: SI-10 - Information input validation
    #[error("Invalid route key: {0}")]
    InvalidKey(String),

    /// The routing daemon could not be queried
    #[error("Control-plane query failed: {0}")]
    ControlPlane(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouteCheckError {
    /// Creates a store error for the named operation.
    pub fn store(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for route_check operations
pub type Result<T> = std::result::Result<T, RouteCheckError>;
