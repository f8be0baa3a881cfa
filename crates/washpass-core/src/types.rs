//! # Domain Types
//!
//! Core domain types used throughout WashPass.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │PackageDefinition │   │   Entitlement    │   │  PaymentRecord   │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ id               │◄──│ source_package_id│   │ package_id       │    │
//! │  │ wash_units       │   │ barcode_token    │◄──│ entitlement_id   │    │
//! │  │ validity_days    │   │ quota_remaining  │   │ external_txn_id  │    │
//! │  │ required class   │   │ expires_at       │   │ status           │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! │                                  ▲                                      │
//! │  ┌──────────────────┐   ┌────────┴─────────┐   ┌──────────────────┐    │
//! │  │     Account      │   │    WashEvent     │   │     Referral     │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ referral_code    │   │ station_id       │   │ inviter_user_id  │    │
//! │  │ referred_by      │   │ operator_id      │   │ invitee_user_id  │    │
//! │  │ purchase_count   │   │ quota_after      │   │ pending/rewarded │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are UUID v4 strings. The barcode token is the only secondary
//! key that leaves the system, so it is the only one with a uniqueness rule
//! outside the primary keys.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Car Class
// =============================================================================

/// Size class of a car. Packages may be restricted to one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CarClass {
    Small,
    Medium,
    Large,
}

impl CarClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarClass::Small => "small",
            CarClass::Medium => "medium",
            CarClass::Large => "large",
        }
    }
}

impl fmt::Display for CarClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Package Definition
// =============================================================================

/// Immutable catalog entry describing what a purchase grants.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PackageDefinition {
    pub id: String,

    /// Display name ("Gold - 10 washes").
    pub name: String,

    /// Wash units granted per purchase. Always > 0.
    pub wash_units: i64,

    /// Days from purchase until the entitlement expires. Always > 0.
    pub validity_days: i64,

    /// When set, only cars of this class may be bound to the package.
    pub required_car_class: Option<CarClass>,

    /// Catalog price in the smallest currency unit.
    pub price_cents: i64,
}

impl PackageDefinition {
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Car
// =============================================================================

/// Registry view of a car, as the engine needs it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Car {
    pub id: String,
    pub owner_user_id: String,
    pub car_class: CarClass,
}

// =============================================================================
// Entitlement
// =============================================================================

/// Lifecycle status of an entitlement.
///
/// ```text
///            redeem (quota → 0)
///   Active ───────────────────────► Exhausted
///     │
///     │ lazy expiry (now ≥ expires_at)
///     ▼
///   Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Active,
    Expired,
    Exhausted,
}

impl EntitlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementStatus::Active => "active",
            EntitlementStatus::Expired => "expired",
            EntitlementStatus::Exhausted => "exhausted",
        }
    }
}

/// A purchased, redeemable wash quota (the "user package").
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Entitlement {
    pub id: String,
    pub owner_user_id: String,
    pub source_package_id: String,

    /// Car the entitlement is bound to. `None` only for referral rewards.
    pub car_ref: Option<String>,

    /// Redemption credential. Unique and never changes.
    pub barcode_token: String,

    /// Scannable image as a data URL. `None` when rendering failed.
    pub barcode_image: Option<String>,

    pub quota_remaining: i64,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    pub status: EntitlementStatus,

    /// Incremented on every mutation.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Per-owner roll-up of entitlements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct EntitlementStats {
    pub total: i64,
    pub active: i64,
    pub expired: i64,
    pub exhausted: i64,
    /// Units left across active entitlements only.
    pub washes_remaining: i64,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Card on a station terminal.
    Card,
    /// Cash at the counter.
    Cash,
    /// Hosted checkout at the payment gateway.
    Gateway,
}

/// One purchase attempt.
///
/// `status` moves pending → completed or pending → failed exactly once.
/// `external_transaction_id` is the idempotency key for gateway confirmations.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentRecord {
    pub id: String,
    pub payer_user_id: String,
    pub package_id: String,
    pub car_ref: Option<String>,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_transaction_id: Option<String>,

    /// Set when the payment completes.
    pub entitlement_id: Option<String>,
    pub failure_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Account & Referral
// =============================================================================

/// The engine's slice of a user account.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Account {
    pub id: String,
    pub referral_code: Option<String>,

    /// Inviter's account id, set at most once.
    pub referred_by: Option<String>,

    /// Completed purchases. Maintained in the entitlement-creation transaction.
    pub purchase_count: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Rewarded,
}

/// Link between an inviter and an invitee. Rewarded at most once.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Referral {
    pub id: String,
    pub inviter_user_id: String,
    pub invitee_user_id: String,
    pub status: ReferralStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub rewarded_at: Option<DateTime<Utc>>,
}

/// Referrals seen from one account.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferralSummary {
    pub referral_code: Option<String>,
    /// Referrals where this account is the inviter.
    pub sent: Vec<Referral>,
    /// The referral that brought this account in, if any.
    pub received: Option<Referral>,
}

// =============================================================================
// Redemption
// =============================================================================

/// Who is scanning: the physical station and the operator at it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StationContext {
    pub station_id: String,
    pub operator_id: String,
}

/// Record of one consumed wash unit.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct WashEvent {
    pub id: String,
    pub entitlement_id: String,
    pub owner_user_id: String,
    pub package_id: String,
    pub station_id: String,
    pub operator_id: String,

    /// Units left on the entitlement right after this wash.
    pub quota_after: i64,
    #[ts(as = "String")]
    pub redeemed_at: DateTime<Utc>,
}

/// What the station sees after a successful scan.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RedemptionResult {
    pub wash_event_id: String,
    pub entitlement_id: String,
    pub owner_user_id: String,
    pub quota_remaining: i64,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    pub status: EntitlementStatus,
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Feedback,
    Reminder,
    Referral,
    Purchase,
    General,
}

/// A message handed to the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NotificationDraft {
    pub user_id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub related_entity_id: Option<String>,
}

/// A notification as recorded by the built-in sink.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub related_entity_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Scheduled Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Ask the owner of a wash event for feedback.
    FeedbackReminder,
    /// Re-run a referral reward whose synchronous attempt failed.
    ReferralRewardRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// A durable timer row processed by the task worker.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ScheduledTask {
    pub id: String,
    pub kind: TaskKind,
    /// JSON document, shape depends on `kind`.
    pub payload: String,
    #[ts(as = "String")]
    pub due_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Payload of a [`TaskKind::FeedbackReminder`] task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackReminderPayload {
    pub user_id: String,
    pub wash_event_id: String,
}

/// Payload of a [`TaskKind::ReferralRewardRetry`] task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRewardPayload {
    pub invitee_user_id: String,
    pub entitlement_id: String,
}
