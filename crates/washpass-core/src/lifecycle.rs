//! # Entitlement Lifecycle
//!
//! Pure rules for how an entitlement moves between statuses.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Redemption decision                                 │
//! │                                                                         │
//! │  status == exhausted ──────────────────────► NoQuotaLeft               │
//! │  status == expired ────────────────────────► ExpiredOrExhausted        │
//! │         │                                                               │
//! │  now >= expires_at ──► flip to Expired ────► ExpiredOrExhausted        │
//! │         │                                                               │
//! │  quota_remaining <= 0 ──► flip to Exhausted ► NoQuotaLeft              │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  consume one unit (conditional UPDATE, quota_remaining > 0)            │
//! │         │                                                               │
//! │  quota after == 0 ──► Exhausted, otherwise stays Active                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The persistence layer applies these decisions with conditional updates;
//! this module only decides.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::{Entitlement, EntitlementStatus};

/// Expiry timestamp for an entitlement created at `now`.
pub fn expiry_from(now: DateTime<Utc>, validity_days: i64) -> DateTime<Utc> {
    now + Duration::days(validity_days)
}

/// An entitlement is expired from the instant `now` reaches `expires_at`.
#[inline]
pub fn is_expired_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// What the stored status should be at `now`.
///
/// Only active records can lazily expire; exhausted records keep their status
/// even after their expiry passes.
pub fn effective_status(entitlement: &Entitlement, now: DateTime<Utc>) -> EntitlementStatus {
    match entitlement.status {
        EntitlementStatus::Active if is_expired_at(entitlement.expires_at, now) => {
            EntitlementStatus::Expired
        }
        status => status,
    }
}

/// True when the stored record needs the lazy expiry flip.
pub fn needs_expiry_flip(entitlement: &Entitlement, now: DateTime<Utc>) -> bool {
    entitlement.status == EntitlementStatus::Active
        && effective_status(entitlement, now) == EntitlementStatus::Expired
}

/// Outcome of checking whether one unit may be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemCheck {
    /// Proceed to the conditional decrement.
    Consume,
    /// The record is active but empty: flip it to exhausted, then reject.
    FlipExhausted,
}

/// Decides whether a redemption may proceed.
///
/// Callers must apply lazy expiry before calling this, so an expired active
/// record arrives here with status `Expired`. As a guard the expiry is
/// re-checked anyway.
///
/// An exhausted record reports [`CoreError::NoQuotaLeft`], the same error a
/// scan gets when it loses the race for the last unit.
pub fn check_redeemable(entitlement: &Entitlement, now: DateTime<Utc>) -> CoreResult<RedeemCheck> {
    match effective_status(entitlement, now) {
        EntitlementStatus::Active => {}
        EntitlementStatus::Exhausted => return Err(CoreError::NoQuotaLeft),
        status => return Err(CoreError::ExpiredOrExhausted { status }),
    }
    if entitlement.quota_remaining <= 0 {
        return Ok(RedeemCheck::FlipExhausted);
    }
    Ok(RedeemCheck::Consume)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entitlement(quota: i64, status: EntitlementStatus, expires_in_days: i64) -> Entitlement {
        let now = Utc::now();
        Entitlement {
            id: "ent-1".to_string(),
            owner_user_id: "user-1".to_string(),
            source_package_id: "pkg-1".to_string(),
            car_ref: Some("car-1".to_string()),
            barcode_token: "a".repeat(32),
            barcode_image: None,
            quota_remaining: quota,
            expires_at: now + Duration::days(expires_in_days),
            status,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(is_expired_at(now, now));
        assert!(!is_expired_at(now + Duration::seconds(1), now));
        assert!(is_expired_at(now - Duration::seconds(1), now));
    }

    #[test]
    fn test_active_in_date_can_consume() {
        let ent = entitlement(3, EntitlementStatus::Active, 10);
        assert_eq!(
            check_redeemable(&ent, Utc::now()).unwrap(),
            RedeemCheck::Consume
        );
    }

    #[test]
    fn test_past_expiry_rejected_as_expired() {
        let ent = entitlement(3, EntitlementStatus::Active, -1);
        assert!(needs_expiry_flip(&ent, Utc::now()));
        let err = check_redeemable(&ent, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ExpiredOrExhausted {
                status: EntitlementStatus::Expired
            }
        ));
    }

    #[test]
    fn test_exhausted_rejected() {
        let ent = entitlement(0, EntitlementStatus::Exhausted, 10);
        let err = check_redeemable(&ent, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::NoQuotaLeft));
    }

    #[test]
    fn test_active_with_zero_quota_flips_exhausted() {
        let ent = entitlement(0, EntitlementStatus::Active, 10);
        assert_eq!(
            check_redeemable(&ent, Utc::now()).unwrap(),
            RedeemCheck::FlipExhausted
        );
    }

    #[test]
    fn test_exhausted_never_becomes_expired() {
        let ent = entitlement(0, EntitlementStatus::Exhausted, -5);
        assert_eq!(
            effective_status(&ent, Utc::now()),
            EntitlementStatus::Exhausted
        );
        assert!(!needs_expiry_flip(&ent, Utc::now()));
    }
}
