//! # Error Types
//!
//! Domain-specific error types for washpass-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  washpass-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorKind        - Taxonomy shared by every layer                 │
//! │                                                                         │
//! │  washpass-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  washpass-engine errors                                                │
//! │  └── EngineError      - Core + Db + Gateway, classified by ErrorKind   │
//! │                                                                         │
//! │  HTTP errors (apps/api)                                                │
//! │  └── ApiError         - What clients see (serialized)                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → ApiError → Client   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Display strings here are shown verbatim to customers and station
//! operators. Every variant has exactly one [`ErrorKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CarClass, EntitlementStatus};

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification used to pick a propagation policy and a status code.
///
/// ```text
/// NotFound           entity absent
/// InvalidState       expired / exhausted / wrong status for the transition
/// ValidationFailure  input constraint violated (car/package mismatch, ...)
/// Conflict           uniqueness violation that is not an idempotent replay
/// UpstreamFailure    gateway unreachable or unverifiable
/// Internal           persistence failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    ValidationFailure,
    Conflict,
    UpstreamFailure,
    Internal,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. Their `Display` output is
/// what a customer or station operator reads, so it never carries internal
/// state beyond what the caller already supplied.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No entitlement is bound to the scanned barcode.
    #[error("No wash package matches this barcode")]
    EntitlementNotFound,

    /// The car is unknown or not owned by the caller.
    #[error("Car not found: {0}")]
    CarNotFound(String),

    /// The package is not in the catalog.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// No payment record with this id.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// No account with this id.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Referral code does not belong to any account.
    #[error("Referral code is not valid")]
    ReferralCodeNotFound,

    /// The entitlement is no longer active.
    ///
    /// ## When This Occurs
    /// ```text
    /// Scan barcode
    ///      │
    ///      ▼
    /// Lazy expiry check: expires_at <= now → status flips to Expired
    ///      │
    ///      ▼
    /// ExpiredOrExhausted { status: Expired }
    ///      │
    ///      ▼
    /// Station shows: "This package has expired"
    /// ```
    #[error("{}", expired_or_exhausted_message(*status))]
    ExpiredOrExhausted { status: EntitlementStatus },

    /// The entitlement is active but has no units left.
    #[error("No washes left in this package")]
    NoQuotaLeft,

    /// The package requires a different car class.
    #[error("Package is for {required} cars, this car is {actual}")]
    IncompatiblePackage { required: CarClass, actual: CarClass },

    /// The amount paid does not match the package price.
    #[error("Amount {actual} does not match package price {expected}")]
    AmountMismatch { expected: i64, actual: i64 },

    /// The gateway's server-to-server status check did not confirm success.
    #[error("Payment was not confirmed by the gateway (result code {code})")]
    GatewayVerificationFailed { code: String },

    /// A gateway confirmation arrived for a transaction we never started.
    #[error("Payment confirmation does not match a known checkout")]
    UncorrelatedConfirmation,

    /// A terminal reference was replayed with a different payer, package,
    /// car, amount or method.
    #[error("This payment reference was already used for a different purchase")]
    PaymentReferenceConflict,

    /// The payment record was already marked failed.
    #[error("Payment has already failed and cannot be completed")]
    PaymentAlreadyFailed,

    /// Users cannot refer themselves.
    #[error("You cannot use your own referral code")]
    SelfReferral,

    /// The account was already referred by someone.
    #[error("A referral code has already been applied to this account")]
    AlreadyReferred,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

fn expired_or_exhausted_message(status: EntitlementStatus) -> &'static str {
    match status {
        EntitlementStatus::Expired => "This package has expired",
        EntitlementStatus::Exhausted => "All washes in this package have been used",
        EntitlementStatus::Active => "This package cannot be used right now",
    }
}

impl CoreError {
    /// Classifies the error for propagation and transport mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::EntitlementNotFound
            | CoreError::CarNotFound(_)
            | CoreError::PackageNotFound(_)
            | CoreError::PaymentNotFound(_)
            | CoreError::AccountNotFound(_)
            | CoreError::ReferralCodeNotFound => ErrorKind::NotFound,

            CoreError::ExpiredOrExhausted { .. }
            | CoreError::NoQuotaLeft
            | CoreError::PaymentAlreadyFailed => ErrorKind::InvalidState,

            CoreError::IncompatiblePackage { .. }
            | CoreError::AmountMismatch { .. }
            | CoreError::UncorrelatedConfirmation
            | CoreError::SelfReferral
            | CoreError::Validation(_) => ErrorKind::ValidationFailure,

            CoreError::AlreadyReferred | CoreError::PaymentReferenceConflict => {
                ErrorKind::Conflict
            }

            CoreError::GatewayVerificationFailed { .. } => ErrorKind::UpstreamFailure,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Malformed input, caught before anything is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: String },

    /// e.g. a barcode token that is not 32 hex characters
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
