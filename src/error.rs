use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the Clepsydra cluster-time service
#[derive(Debug)]
pub enum ClepsydraError {
    /// Configuration or CLI argument errors
    Config(String),

    /// An incoming time is too far ahead of this node's wall clock
    DriftExceeded {
        component: &'static str,
        new_time_secs: u32,
        wall_clock_secs: u64,
    },

    /// An incoming time lies beyond the maximum representable value
    MaxValueExceeded { component: &'static str },

    /// A gossiped field had the wrong shape on the wire
    BadValue { field: &'static str, detail: String },

    /// A signed time needs verification but no validator is installed
    CannotVerifyAndSign(String),

    /// A proof did not match the key it claims to be made with
    ProofMismatch { key_id: u64 },

    /// Signing failed or was cancelled
    Signing(String),

    /// The clock has been disabled and rejects advances
    ClockDisabled,
}

impl fmt::Display for ClepsydraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClepsydraError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ClepsydraError::DriftExceeded {
                component,
                new_time_secs,
                wall_clock_secs,
            } => write!(
                f,
                "New {}, {}, is too far from this node's wall clock time, {}",
                component, new_time_secs, wall_clock_secs
            ),
            ClepsydraError::MaxValueExceeded { component } => {
                write!(f, "{} cannot be advanced beyond its maximum value", component)
            }
            ClepsydraError::BadValue { field, detail } => {
                write!(f, "Bad value for {}: {}", field, detail)
            }
            ClepsydraError::CannotVerifyAndSign(msg) => {
                write!(f, "Cannot verify and sign cluster time: {}", msg)
            }
            ClepsydraError::ProofMismatch { key_id } => {
                write!(f, "Time proof does not match key {}", key_id)
            }
            ClepsydraError::Signing(msg) => write!(f, "Signing error: {}", msg),
            ClepsydraError::ClockDisabled => {
                write!(f, "Vector clock is disabled and rejects advances")
            }
        }
    }
}

impl std::error::Error for ClepsydraError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, ClepsydraError>;

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for ClepsydraError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl ClepsydraError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClepsydraError::Config(_) => StatusCode::BAD_REQUEST,
            ClepsydraError::DriftExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ClepsydraError::MaxValueExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ClepsydraError::BadValue { .. } => StatusCode::BAD_REQUEST,
            ClepsydraError::CannotVerifyAndSign(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClepsydraError::ProofMismatch { .. } => StatusCode::UNAUTHORIZED,
            ClepsydraError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ClepsydraError::ClockDisabled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            ClepsydraError::Config(_) => "configuration_error",
            ClepsydraError::DriftExceeded { .. } => "cluster_time_fails_rate_limiter",
            ClepsydraError::MaxValueExceeded { .. } => "cluster_time_max_value_exceeded",
            ClepsydraError::BadValue { .. } => "bad_value",
            ClepsydraError::CannotVerifyAndSign(_) => "cannot_verify_and_sign",
            ClepsydraError::ProofMismatch { .. } => "time_proof_mismatch",
            ClepsydraError::Signing(_) => "signing_error",
            ClepsydraError::ClockDisabled => "clock_disabled",
        }
    }
}
