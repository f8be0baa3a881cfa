//! # Entitlement Repository
//!
//! Persistence for purchased wash quotas.
//!
//! ## Conditional Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume_unit_in: one statement, no read-modify-write                   │
//! │                                                                         │
//! │  UPDATE entitlements SET                                               │
//! │      quota_remaining = quota_remaining - 1,                            │
//! │      status = CASE WHEN quota_remaining - 1 <= 0                       │
//! │                    THEN 'exhausted' ELSE status END,                   │
//! │      version = version + 1                                             │
//! │  WHERE id = ?                                                          │
//! │    AND status = 'active'                                               │
//! │    AND quota_remaining > 0        ← the compare in compare-and-swap    │
//! │    AND expires_at > ?now                                               │
//! │  RETURNING *                                                           │
//! │                                                                         │
//! │  Two scanners racing on quota = 1:                                     │
//! │    A: UPDATE ... → 1 row  (quota 1 → 0, exhausted)                    │
//! │    B: UPDATE ... → 0 rows (quota_remaining > 0 is false)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use washpass_core::{Entitlement, EntitlementStats};

/// Repository for entitlement database operations.
#[derive(Debug, Clone)]
pub struct EntitlementRepository {
    pool: SqlitePool,
}

impl EntitlementRepository {
    /// Creates a new EntitlementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntitlementRepository { pool }
    }

    // =========================================================================
    // Transaction methods
    // =========================================================================

    /// Inserts a new entitlement on the caller's transaction.
    pub async fn insert_in(&self, conn: &mut SqliteConnection, ent: &Entitlement) -> DbResult<()> {
        debug!(entitlement_id = %ent.id, owner = %ent.owner_user_id, "Inserting entitlement");

        sqlx::query(
            r#"
            INSERT INTO entitlements (
                id, owner_user_id, source_package_id, car_ref,
                barcode_token, barcode_image, quota_remaining, expires_at,
                status, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&ent.id)
        .bind(&ent.owner_user_id)
        .bind(&ent.source_package_id)
        .bind(&ent.car_ref)
        .bind(&ent.barcode_token)
        .bind(&ent.barcode_image)
        .bind(ent.quota_remaining)
        .bind(ent.expires_at)
        .bind(ent.status)
        .bind(ent.version)
        .bind(ent.created_at)
        .bind(ent.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// True when `token` is already bound to an entitlement.
    pub async fn token_exists_in(&self, conn: &mut SqliteConnection, token: &str) -> DbResult<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entitlements WHERE barcode_token = ?1)")
                .bind(token)
                .fetch_one(&mut *conn)
                .await?;
        Ok(exists != 0)
    }

    /// Reads an entitlement on the caller's transaction.
    pub async fn find_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Entitlement>> {
        let ent = sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(ent)
    }

    /// Consumes exactly one unit if the entitlement is active, in date and
    /// not empty. Returns the updated row, or `None` when the condition did
    /// not hold (the caller re-reads to find out why).
    pub async fn consume_unit_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Entitlement>> {
        let ent = sqlx::query_as::<_, Entitlement>(
            r#"
            UPDATE entitlements SET
                quota_remaining = quota_remaining - 1,
                status = CASE WHEN quota_remaining - 1 <= 0 THEN 'exhausted' ELSE status END,
                version = version + 1,
                updated_at = ?2
            WHERE id = ?1
              AND status = 'active'
              AND quota_remaining > 0
              AND expires_at > ?2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(ent)
    }

    /// Adds bonus units to an active, in-date entitlement without touching
    /// its status or expiry. Returns `false` if it is no longer usable.
    pub async fn add_units_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        units: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements SET
                quota_remaining = quota_remaining + ?2,
                version = version + 1,
                updated_at = ?3
            WHERE id = ?1 AND status = 'active' AND expires_at > ?3
            "#,
        )
        .bind(id)
        .bind(units)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// The owner's most recently created entitlement that is active and in
    /// date at `now`.
    pub async fn most_recent_active_in(
        &self,
        conn: &mut SqliteConnection,
        owner_user_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Entitlement>> {
        let ent = sqlx::query_as::<_, Entitlement>(
            r#"
            SELECT * FROM entitlements
            WHERE owner_user_id = ?1 AND status = 'active' AND expires_at > ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(owner_user_id)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(ent)
    }

    // =========================================================================
    // Pool methods
    // =========================================================================

    /// Gets an entitlement by id.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Entitlement>> {
        let ent = sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ent)
    }

    /// Gets an entitlement by its barcode token.
    pub async fn find_by_token(&self, token: &str) -> DbResult<Option<Entitlement>> {
        let ent = sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE barcode_token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ent)
    }

    /// Lazy expiry for one record: flips active → expired when
    /// `expires_at <= now`. Returns `true` if this call flipped it.
    pub async fn expire_if_due(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements SET
                status = 'expired',
                version = version + 1,
                updated_at = ?2
            WHERE id = ?1 AND status = 'active' AND expires_at <= ?2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Lazy expiry for every active record of an owner. Returns the number
    /// of records flipped.
    pub async fn expire_due_for_owner(&self, owner_user_id: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements SET
                status = 'expired',
                version = version + 1,
                updated_at = ?2
            WHERE owner_user_id = ?1 AND status = 'active' AND expires_at <= ?2
            "#,
        )
        .bind(owner_user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Flips an active record with no units left to exhausted.
    pub async fn mark_exhausted(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements SET
                status = 'exhausted',
                version = version + 1,
                updated_at = ?2
            WHERE id = ?1 AND status = 'active' AND quota_remaining <= 0
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Active, in-date entitlements of an owner, newest first.
    pub async fn find_active_by_owner(
        &self,
        owner_user_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Entitlement>> {
        let ents = sqlx::query_as::<_, Entitlement>(
            r#"
            SELECT * FROM entitlements
            WHERE owner_user_id = ?1 AND status = 'active' AND expires_at > ?2
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(owner_user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ents)
    }

    /// Every entitlement of an owner, newest first.
    pub async fn list_by_owner(&self, owner_user_id: &str) -> DbResult<Vec<Entitlement>> {
        let ents = sqlx::query_as::<_, Entitlement>(
            r#"
            SELECT * FROM entitlements
            WHERE owner_user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ents)
    }

    /// Number of entitlements an owner has ever had.
    pub async fn count_by_owner(&self, owner_user_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entitlements WHERE owner_user_id = ?1")
                .bind(owner_user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Per-status counts for an owner. Callers apply lazy expiry first.
    pub async fn stats_by_owner(&self, owner_user_id: &str) -> DbResult<EntitlementStats> {
        let stats = sqlx::query_as::<_, EntitlementStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN status = 'expired' THEN 1 ELSE 0 END), 0) AS expired,
                COALESCE(SUM(CASE WHEN status = 'exhausted' THEN 1 ELSE 0 END), 0) AS exhausted,
                COALESCE(SUM(CASE WHEN status = 'active' THEN quota_remaining ELSE 0 END), 0)
                    AS washes_remaining
            FROM entitlements
            WHERE owner_user_id = ?1
            "#,
        )
        .bind(owner_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    /// Stores a (re)rendered barcode image. The token itself never changes.
    pub async fn set_barcode_image(
        &self,
        id: &str,
        image: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements SET
                barcode_image = ?2,
                version = version + 1,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(image)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
