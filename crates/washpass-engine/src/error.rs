//! # Engine Error Types
//!
//! One error type for every engine operation, classified by [`ErrorKind`].
//!
//! ## Error Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Business rules │  │   Persistence   │  │     Upstream            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  CoreError      │  │  DbError        │  │  GatewayError           │ │
//! │  │  (kind varies)  │  │  NotFound       │  │  → UpstreamFailure      │ │
//! │  │                 │  │  Unique→Conflict│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Configuration  │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  InvalidConfig  │  │  TokenExhausted │                              │
//! │  │  ConfigLoad     │  │  Render, ...    │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use washpass_core::{CoreError, ErrorKind, ValidationError};
use washpass_db::DbError;

use crate::barcode::RenderError;
use crate::gateway::GatewayError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule violation. The message is safe to show to users.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Persistence failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The payment gateway could not be reached or answered garbage.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Barcode image could not be produced on an explicit regeneration.
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Every freshly minted token collided with an existing one.
    #[error("Could not mint a unique barcode after {0} attempts")]
    TokenExhausted(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Classification in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(e) => e.kind(),
            EngineError::Db(e) => e.kind(),
            EngineError::Gateway(_) => ErrorKind::UpstreamFailure,
            EngineError::Render(_)
            | EngineError::InvalidConfig(_)
            | EngineError::ConfigLoadFailed(_)
            | EngineError::TokenExhausted(_)
            | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The business error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Db(DbError::from(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("payload serialization failed: {}", err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use washpass_core::EntitlementStatus;

    #[test]
    fn test_kinds_follow_the_source() {
        let err: EngineError = CoreError::NoQuotaLeft.into();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err: EngineError = CoreError::ExpiredOrExhausted {
            status: EntitlementStatus::Expired,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.to_string(), "This package has expired");

        let err: EngineError = DbError::duplicate("payments.external_transaction_id", "x").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: EngineError = GatewayError::Status { status: 503 }.into();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

        let err: EngineError = DbError::Internal("disk".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_validation_error_is_validation_failure() {
        let err: EngineError = ValidationError::Required {
            field: "car_id".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(err.as_core().is_some());
    }
}
