//! # Payment Repository
//!
//! Payment records and their one-way status transitions.
//!
//! ```text
//!              complete_in (CAS)
//!   pending ─────────────────────► completed   (entitlement_id linked)
//!      │
//!      │ mark_failed (CAS)
//!      ▼
//!   failed
//! ```
//!
//! `insert_if_absent` relies on the UNIQUE index on
//! `external_transaction_id`: concurrent duplicate deliveries race on the
//! index, exactly one INSERT wins, the rest see `false`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use washpass_core::PaymentRecord;

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Inserts a payment record unless one with the same external
    /// transaction id exists. Returns `true` if this call inserted it.
    ///
    /// Records without an external id always insert.
    pub async fn insert_if_absent(&self, payment: &PaymentRecord) -> DbResult<bool> {
        debug!(
            payment_id = %payment.id,
            external_id = ?payment.external_transaction_id,
            "Inserting payment"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, payer_user_id, package_id, car_ref, amount_cents, method,
                status, external_transaction_id, entitlement_id, failure_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (external_transaction_id) DO NOTHING
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.payer_user_id)
        .bind(&payment.package_id)
        .bind(&payment.car_ref)
        .bind(payment.amount_cents)
        .bind(payment.method)
        .bind(payment.status)
        .bind(&payment.external_transaction_id)
        .bind(&payment.entitlement_id)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Gets a payment by id.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<PaymentRecord>> {
        let payment = sqlx::query_as::<_, PaymentRecord>("SELECT * FROM payments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Gets a payment by its gateway transaction id.
    pub async fn find_by_external_id(&self, external_id: &str) -> DbResult<Option<PaymentRecord>> {
        let payment = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE external_transaction_id = ?1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    /// Payments made by a user, newest first.
    pub async fn list_by_payer(&self, payer_user_id: &str) -> DbResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE payer_user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )
        .bind(payer_user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// pending → completed. Returns `true` if this call made the transition.
    ///
    /// Intended as the first statement of the purchase transaction.
    pub async fn complete_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'completed', updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Links a completed payment to the entitlement it produced.
    pub async fn link_entitlement_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        entitlement_id: &str,
    ) -> DbResult<()> {
        sqlx::query("UPDATE payments SET entitlement_id = ?2 WHERE id = ?1")
            .bind(id)
            .bind(entitlement_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// pending → failed with a reason. Returns `true` if this call made the
    /// transition.
    pub async fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'failed', failure_reason = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
