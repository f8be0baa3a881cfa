//! # Repository Module
//!
//! Database repository implementations for WashPass.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two kinds of repository methods                      │
//! │                                                                         │
//! │  Pool methods          find_by_token(&self, token)                     │
//! │  ───────────────       run on any pooled connection                    │
//! │                                                                         │
//! │  Transaction methods   consume_unit_in(&self, conn, id, now)           │
//! │  ───────────────────   run on the caller's open transaction            │
//! │                                                                         │
//! │  Every state change that guards an invariant is a single conditional   │
//! │  UPDATE whose WHERE clause encodes the allowed transition:             │
//! │                                                                         │
//! │    UPDATE ... SET status = 'rewarded'                                  │
//! │    WHERE id = ? AND status = 'pending'     ← rows_affected is 0 or 1   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`EntitlementRepository`](entitlement::EntitlementRepository) - Quotas, tokens, lazy expiry
//! - [`PaymentRepository`](payment::PaymentRepository) - Payment records, insert-if-absent
//! - [`AccountRepository`](account::AccountRepository) - Referral codes, purchase counter
//! - [`ReferralRepository`](referral::ReferralRepository) - Referral links and the reward guard
//! - [`WashEventRepository`](wash::WashEventRepository) - Redemption history
//! - [`CatalogRepository`](catalog::CatalogRepository) - Packages and cars
//! - [`NotificationRepository`](notification::NotificationRepository) - Notification log
//! - [`TaskRepository`](task::TaskRepository) - Durable scheduled tasks

pub mod account;
pub mod catalog;
pub mod entitlement;
pub mod notification;
pub mod payment;
pub mod referral;
pub mod task;
pub mod wash;

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the repository tests.

    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;
    use washpass_core::{Car, CarClass, Entitlement, EntitlementStatus, PackageDefinition};

    use crate::{Database, DbConfig};

    pub async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub async fn seed_basics(db: &Database) -> (PackageDefinition, Car) {
        let package = PackageDefinition {
            id: "pkg-gold".to_string(),
            name: "Gold".to_string(),
            wash_units: 5,
            validity_days: 30,
            required_car_class: None,
            price_cents: 12000,
        };
        db.catalog().upsert_package(&package).await.unwrap();
        db.accounts().ensure("user-1", Utc::now()).await.unwrap();

        let car = Car {
            id: "car-1".to_string(),
            owner_user_id: "user-1".to_string(),
            car_class: CarClass::Medium,
        };
        db.catalog().register_car(&car).await.unwrap();
        (package, car)
    }

    pub fn entitlement(owner: &str, quota: i64, expires_at: DateTime<Utc>) -> Entitlement {
        let now = Utc::now();
        Entitlement {
            id: Uuid::new_v4().to_string(),
            owner_user_id: owner.to_string(),
            source_package_id: "pkg-gold".to_string(),
            car_ref: Some("car-1".to_string()),
            barcode_token: Uuid::new_v4().simple().to_string(),
            barcode_image: None,
            quota_remaining: quota,
            expires_at,
            status: EntitlementStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_days(days: i64) -> DateTime<Utc> {
        Utc::now() + Duration::days(days)
    }
}
