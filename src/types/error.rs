//! Error types for multirootca
//!
//! Every per-request failure maps to an HTTP status and a stable numeric code
//! that travels in the response envelope. Codes are `category + reason`:
//! the thousands digit names the category, the rest the reason.

use hyper::StatusCode;

/// Main error type for CA operations
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported key type for root '{label}': {algorithm}")]
    UnsupportedKeyType { label: String, algorithm: String },

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid certificate request: {0}")]
    InvalidCsr(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Audit persistence failed: {0}")]
    Persistence(String),

    #[error("Server busy: {0}")]
    Overloaded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnknownLabel(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::InvalidCsr(_) => StatusCode::BAD_REQUEST,
            Self::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            Self::SigningFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Persistence never fails a request; the status only matters if
            // the error is surfaced on its own.
            Self::Persistence(_) => StatusCode::OK,
            Self::Config(_)
            | Self::UnsupportedKeyType { .. }
            | Self::Bind { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code reported in the response envelope
    pub fn code(&self) -> u32 {
        match self {
            Self::Config(_) => 1000,
            Self::Bind { .. } => 1100,
            Self::UnsupportedKeyType { .. } => 2100,
            Self::PolicyViolation(_) => 5300,
            Self::UnknownLabel(_) => 5400,
            Self::SigningFailure(_) => 6000,
            Self::Unauthorized(_) => 7100,
            Self::MalformedRequest(_) => 7200,
            Self::MethodNotAllowed(_) => 7300,
            Self::Internal(_) => 7400,
            Self::Overloaded(_) => 7500,
            Self::Persistence(_) => 8000,
            Self::InvalidCsr(_) => 9200,
        }
    }

    /// Short machine-readable kind, used in logs and denial audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::UnsupportedKeyType { .. } => "unsupported_key_type",
            Self::Bind { .. } => "server_bind_failure",
            Self::MalformedRequest(_) => "malformed_request",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::UnknownLabel(_) => "unknown_label",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidCsr(_) => "invalid_csr",
            Self::PolicyViolation(_) => "policy_violation",
            Self::SigningFailure(_) => "signing_failure",
            Self::Persistence(_) => "persistence_failure",
            Self::Overloaded(_) => "overloaded",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for CaError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CaError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedRequest(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for CaError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML error: {}", err))
    }
}

impl From<hyper::Error> for CaError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for CaError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type alias for CA operations
pub type Result<T> = std::result::Result<T, CaError>;
