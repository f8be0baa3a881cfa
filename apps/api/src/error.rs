//! HTTP error mapping.
//!
//! Every failure leaves the API as `{ "code": ..., "message": ... }` with a
//! status derived from the engine's [`ErrorKind`]:
//!
//! ```text
//! NotFound          → 404
//! InvalidState      → 422
//! ValidationFailure → 400
//! Conflict          → 409
//! UpstreamFailure   → 502
//! Internal          → 500   (message replaced, details only in the log)
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use washpass_core::{CoreError, ErrorKind};
use washpass_engine::EngineError;

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The upstream auth gateway did not forward a caller.
    #[error("Missing or empty x-user-id header")]
    Unauthenticated,

    /// Body, path or query could not be understood.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code. Business rules get their own code so a
    /// station can tell "expired" from "used up" without parsing text.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Engine(err) => match err.as_core() {
                Some(core) => core_code(core),
                None => kind_code(err.kind()),
            },
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::Internal => "Internal server error".to_string(),
                ErrorKind::UpstreamFailure if err.as_core().is_none() => {
                    "Payment gateway unavailable, try again later".to_string()
                }
                _ => err.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn core_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::EntitlementNotFound => "ENTITLEMENT_NOT_FOUND",
        CoreError::CarNotFound(_) => "CAR_NOT_FOUND",
        CoreError::PackageNotFound(_) => "PACKAGE_NOT_FOUND",
        CoreError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
        CoreError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
        CoreError::ReferralCodeNotFound => "REFERRAL_CODE_NOT_FOUND",
        CoreError::ExpiredOrExhausted { .. } => "ENTITLEMENT_UNUSABLE",
        CoreError::NoQuotaLeft => "NO_QUOTA_LEFT",
        CoreError::IncompatiblePackage { .. } => "INCOMPATIBLE_PACKAGE",
        CoreError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
        CoreError::GatewayVerificationFailed { .. } => "GATEWAY_VERIFICATION_FAILED",
        CoreError::UncorrelatedConfirmation => "UNCORRELATED_CONFIRMATION",
        CoreError::PaymentAlreadyFailed => "PAYMENT_ALREADY_FAILED",
        CoreError::PaymentReferenceConflict => "PAYMENT_REFERENCE_CONFLICT",
        CoreError::SelfReferral => "SELF_REFERRAL",
        CoreError::AlreadyReferred => "ALREADY_REFERRED",
        CoreError::Validation(_) => "VALIDATION_FAILED",
    }
}

fn kind_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "NOT_FOUND",
        ErrorKind::InvalidState => "INVALID_STATE",
        ErrorKind::ValidationFailure => "VALIDATION_FAILED",
        ErrorKind::Conflict => "CONFLICT",
        ErrorKind::UpstreamFailure => "UPSTREAM_FAILURE",
        ErrorKind::Internal => "INTERNAL",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use washpass_core::EntitlementStatus;
    use washpass_db::DbError;
    use washpass_engine::GatewayError;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(EngineError, StatusCode)> = vec![
            (CoreError::EntitlementNotFound.into(), StatusCode::NOT_FOUND),
            (CoreError::NoQuotaLeft.into(), StatusCode::UNPROCESSABLE_ENTITY),
            (
                CoreError::ExpiredOrExhausted {
                    status: EntitlementStatus::Expired,
                }
                .into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CoreError::AmountMismatch {
                    expected: 100,
                    actual: 90,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (CoreError::AlreadyReferred.into(), StatusCode::CONFLICT),
            (CoreError::PaymentReferenceConflict.into(), StatusCode::CONFLICT),
            (
                GatewayError::Transport("timeout".to_string()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                DbError::QueryFailed("disk I/O".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_internal_details_stay_private() {
        let err = ApiError::from(EngineError::from(DbError::QueryFailed(
            "no such table: entitlements".to_string(),
        )));
        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::from(EngineError::from(GatewayError::Transport(
            "https://gateway.test/v1/checkouts?entityId=secret".to_string(),
        )));
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_business_codes() {
        let err = ApiError::from(EngineError::from(CoreError::NoQuotaLeft));
        assert_eq!(err.code(), "NO_QUOTA_LEFT");
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }
}
