//! Error types for the courier notification pipeline.

use thiserror::Error;

/// Result type alias for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

/// Unified error type for all courier components.
///
/// The HTTP layer in `courier-gateway` is the only place where these kinds
/// are translated into status codes; everything below it passes the kind
/// through unchanged.
#[derive(Error, Debug)]
pub enum CourierError {
    // ─────────────────────────────────────────────────────────────────────────
    // Submission Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Missing template data: {0}")]
    MissingTemplateData(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Upstream Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circuit breaker open for {service}")]
    CircuitOpen { service: String },

    #[error("Upstream {service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("Upstream {service} rejected the internal credentials")]
    Unauthorized { service: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Broker Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Malformed message on {queue}: {reason}")]
    MalformedMessage { queue: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        status_code: Option<u16>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Infrastructure Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Idempotency backend error: {0}")]
    Idempotency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Shorthand for a provider error without an HTTP status.
    pub fn provider(message: impl Into<String>) -> Self {
        CourierError::Provider {
            message: message.into(),
            status_code: None,
        }
    }

    /// Whether this error counts toward a circuit breaker's failure budget.
    ///
    /// Only connection-class failures trip a breaker; well-formed error
    /// responses from an upstream do not.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, CourierError::UpstreamUnavailable { .. })
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}

impl From<figment::Error> for CourierError {
    fn from(err: figment::Error) -> Self {
        CourierError::Configuration(err.to_string())
    }
}
