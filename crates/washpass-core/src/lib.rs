//! # washpass-core: Pure Business Logic for WashPass
//!
//! This crate is the **heart** of the WashPass loyalty platform. It holds the
//! rules that decide whether a wash package may be bought, redeemed or
//! topped up, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WashPass Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               Mobile app / Station scanner                      │   │
//! │  │    Buy package ──► Show QR ──► Scan at station ──► Feedback     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP (apps/api)                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    washpass-engine                              │   │
//! │  │    reconcile, redeem, reward, scheduled reminders              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ washpass-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ lifecycle │  │   money   │  │ validation│  │   │
//! │  │   │Entitlement│  │ redeem?   │  │   Money   │  │  car/pkg  │  │   │
//! │  │   │ Referral  │  │ expiry    │  │           │  │  tokens   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    washpass-db (Database Layer)                 │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (Entitlement, PaymentRecord, Referral, ...)
//! - [`lifecycle`] - Entitlement status transitions and redemption checks
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types and the error taxonomy
//! - [`validation`] - Input and compatibility rules
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use washpass_core::lifecycle::expiry_from;
//!
//! let now = Utc::now();
//! let expires_at = expiry_from(now, 30);
//! assert_eq!((expires_at - now).num_days(), 30);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lifecycle;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Bonus wash units granted to each side of a referral.
///
/// ## Business Reason
/// Both the inviter and the invitee receive the same top-up when the
/// invitee completes their first purchase.
pub const REFERRAL_BONUS_UNITS: i64 = 2;

/// Validity of a reward entitlement created for an inviter who has no
/// active package to top up.
pub const REFERRAL_REWARD_VALIDITY_DAYS: i64 = 30;

/// Catalog id of the package that reward entitlements point at.
///
/// Seeded by the initial migration so the foreign key always resolves.
pub const REFERRAL_REWARD_PACKAGE_ID: &str = "referral-reward";

/// Random bytes per barcode token (128 bits of entropy).
pub const BARCODE_TOKEN_BYTES: usize = 16;

/// Length of a hex encoded barcode token.
pub const BARCODE_TOKEN_LEN: usize = BARCODE_TOKEN_BYTES * 2;

/// Random bytes per referral code (12 hex characters).
pub const REFERRAL_CODE_BYTES: usize = 6;
