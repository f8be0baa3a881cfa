//! # Entitlement Store
//!
//! Creation and lookup of entitlements, with lazy expiry on every read.
//!
//! ## Lazy Expiry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  read ──► status = active AND now >= expires_at ?                       │
//! │               │                                                         │
//! │            no │        yes                                              │
//! │               │         │                                               │
//! │               │         ▼                                               │
//! │               │   UPDATE ... SET status = 'expired'                    │
//! │               │   WHERE id = ? AND status = 'active'                   │
//! │               │     AND expires_at <= ?now                             │
//! │               │         │                                               │
//! │               │         ▼                                               │
//! │               │   re-read the row                                      │
//! │               ▼         ▼                                               │
//! │            return the record as it is now                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No sweeper is needed: a record that was never swept is still rejected the
//! moment somebody looks at it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use washpass_core::lifecycle::{expiry_from, needs_expiry_flip};
use washpass_core::validation::{normalize_barcode, validate_package_definition};
use washpass_core::{CoreError, Entitlement, EntitlementStats, EntitlementStatus, PackageDefinition};
use washpass_db::{Database, DbError, SqliteConnection};

use crate::barcode::BarcodeIssuer;
use crate::error::EngineResult;

#[derive(Clone)]
pub struct EntitlementStore {
    db: Database,
    issuer: BarcodeIssuer,
}

impl EntitlementStore {
    pub fn new(db: Database, issuer: BarcodeIssuer) -> Self {
        EntitlementStore { db, issuer }
    }

    pub fn issuer(&self) -> &BarcodeIssuer {
        &self.issuer
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Creates an active entitlement for `package` on the caller's
    /// transaction: full quota, expiry `validity_days` from `now`, fresh
    /// token. The owner's account row must exist.
    ///
    /// The image is not rendered here; call [`attach_image`](Self::attach_image)
    /// after commit.
    pub async fn create_in(
        &self,
        conn: &mut SqliteConnection,
        owner_user_id: &str,
        package: &PackageDefinition,
        car_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<Entitlement> {
        validate_package_definition(package)?;
        let token = self.issuer.mint_token_in(&mut *conn).await?;

        let entitlement = Entitlement {
            id: Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.to_string(),
            source_package_id: package.id.clone(),
            car_ref: car_ref.map(str::to_string),
            barcode_token: token,
            barcode_image: None,
            quota_remaining: package.wash_units,
            expires_at: expiry_from(now, package.validity_days),
            status: EntitlementStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.db.entitlements().insert_in(&mut *conn, &entitlement).await?;

        info!(
            entitlement_id = %entitlement.id,
            owner = %owner_user_id,
            package_id = %package.id,
            quota = entitlement.quota_remaining,
            "Entitlement created"
        );
        Ok(entitlement)
    }

    /// Creates an entitlement in its own transaction and renders its image.
    pub async fn create(
        &self,
        owner_user_id: &str,
        package: &PackageDefinition,
        car_ref: Option<&str>,
    ) -> EngineResult<Entitlement> {
        let now = Utc::now();
        self.db.accounts().ensure(owner_user_id, now).await?;

        let mut tx = self.db.begin().await?;
        let entitlement = self.create_in(&mut tx, owner_user_id, package, car_ref, now).await?;
        tx.commit().await?;

        Ok(self.attach_image(entitlement).await)
    }

    /// Renders and stores the barcode image. Failures leave the image empty.
    pub async fn attach_image(&self, mut entitlement: Entitlement) -> Entitlement {
        let Some(image) = self.issuer.render_image(&entitlement.barcode_token).await else {
            return entitlement;
        };

        match self
            .db
            .entitlements()
            .set_barcode_image(&entitlement.id, Some(&image), Utc::now())
            .await
        {
            Ok(_) => {
                entitlement.barcode_image = Some(image);
                entitlement.version += 1;
            }
            Err(e) => {
                warn!(entitlement_id = %entitlement.id, error = %e, "Failed to store barcode image");
            }
        }
        entitlement
    }

    /// Re-renders the image from the immutable token.
    pub async fn regenerate_barcode_image(
        &self,
        owner_user_id: &str,
        entitlement_id: &str,
    ) -> EngineResult<Entitlement> {
        let entitlement = self.find_by_id(entitlement_id).await?;
        if entitlement.owner_user_id != owner_user_id {
            return Err(DbError::not_found("Entitlement", entitlement_id).into());
        }

        let image = self
            .issuer
            .try_render_image(&entitlement.barcode_token)
            .await?;
        self.db
            .entitlements()
            .set_barcode_image(&entitlement.id, Some(&image), Utc::now())
            .await?;

        info!(entitlement_id = %entitlement.id, "Barcode image regenerated");
        self.find_by_id(entitlement_id).await
    }

    // =========================================================================
    // Lookups (all apply lazy expiry)
    // =========================================================================

    /// Looks up an entitlement by scanned barcode.
    pub async fn find_by_token(&self, raw_token: &str) -> EngineResult<Entitlement> {
        let token = normalize_barcode(raw_token)?;
        let entitlement = self
            .db
            .entitlements()
            .find_by_token(&token)
            .await?
            .ok_or(CoreError::EntitlementNotFound)?;

        self.apply_lazy_expiry(entitlement, Utc::now()).await
    }

    pub async fn find_by_id(&self, entitlement_id: &str) -> EngineResult<Entitlement> {
        let entitlement = self
            .db
            .entitlements()
            .find_by_id(entitlement_id)
            .await?
            .ok_or_else(|| DbError::not_found("Entitlement", entitlement_id))?;

        self.apply_lazy_expiry(entitlement, Utc::now()).await
    }

    /// Active, in-date entitlements of an owner, newest first.
    pub async fn find_active_by_owner(&self, owner_user_id: &str) -> EngineResult<Vec<Entitlement>> {
        let now = Utc::now();
        self.expire_due_for_owner(owner_user_id, now).await?;
        Ok(self
            .db
            .entitlements()
            .find_active_by_owner(owner_user_id, now)
            .await?)
    }

    /// Every entitlement an owner has ever had.
    pub async fn count_by_owner(&self, owner_user_id: &str) -> EngineResult<i64> {
        Ok(self.db.entitlements().count_by_owner(owner_user_id).await?)
    }

    /// Every entitlement of an owner, newest first.
    pub async fn list_all(&self, owner_user_id: &str) -> EngineResult<Vec<Entitlement>> {
        self.expire_due_for_owner(owner_user_id, Utc::now()).await?;
        Ok(self.db.entitlements().list_by_owner(owner_user_id).await?)
    }

    pub async fn stats(&self, owner_user_id: &str) -> EngineResult<EntitlementStats> {
        self.expire_due_for_owner(owner_user_id, Utc::now()).await?;
        Ok(self.db.entitlements().stats_by_owner(owner_user_id).await?)
    }

    async fn apply_lazy_expiry(
        &self,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> EngineResult<Entitlement> {
        if !needs_expiry_flip(&entitlement, now) {
            return Ok(entitlement);
        }

        let repo = self.db.entitlements();
        if repo.expire_if_due(&entitlement.id, now).await? {
            info!(entitlement_id = %entitlement.id, expires_at = %entitlement.expires_at, "Entitlement expired");
        }

        // Re-read: another request may have changed it in between
        let current = repo
            .find_by_id(&entitlement.id)
            .await?
            .ok_or_else(|| DbError::not_found("Entitlement", entitlement.id.clone()))?;
        Ok(current)
    }

    async fn expire_due_for_owner(&self, owner_user_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let flipped = self
            .db
            .entitlements()
            .expire_due_for_owner(owner_user_id, now)
            .await?;
        if flipped > 0 {
            info!(owner = %owner_user_id, count = flipped, "Entitlements expired");
        }
        Ok(())
    }
}
