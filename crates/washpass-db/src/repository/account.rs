//! # Account Repository
//!
//! The engine's slice of user accounts: referral code, referral link and the
//! explicit purchase counter used to detect a first purchase.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use washpass_core::Account;

/// Repository for account database operations.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    /// Creates the account row if it does not exist yet.
    ///
    /// Accounts are owned by the authentication service; this row only
    /// carries what the engine needs and is created on first contact.
    pub async fn ensure(&self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, referral_code, referred_by, purchase_count, created_at)
            VALUES (?1, NULL, NULL, 0, ?2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Gets an account by id.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    /// Reads an account on the caller's transaction.
    pub async fn find_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(account)
    }

    /// Resolves a referral code to its account.
    pub async fn find_by_referral_code(&self, code: &str) -> DbResult<Option<Account>> {
        let account =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE referral_code = ?1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(account)
    }

    /// Assigns a referral code unless the account already has one.
    ///
    /// Returns `false` when a code was already set. A collision with another
    /// account's code surfaces as `DbError::UniqueViolation`.
    pub async fn set_referral_code_if_absent(&self, id: &str, code: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET referral_code = ?2 WHERE id = ?1 AND referral_code IS NULL",
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Sets `referred_by` only if it is still unset. Returns `true` if this
    /// call set it.
    pub async fn set_referred_by_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        inviter_id: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET referred_by = ?2 WHERE id = ?1 AND referred_by IS NULL",
        )
        .bind(id)
        .bind(inviter_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Increments the purchase counter and returns the new value.
    ///
    /// Runs inside the entitlement-creation transaction, so two concurrent
    /// first purchases serialize on it and exactly one observes `1`.
    pub async fn increment_purchase_count_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            UPDATE accounts SET purchase_count = purchase_count + 1
            WHERE id = ?1
            RETURNING purchase_count
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        debug!(account_id = %id, purchase_count = count, "Purchase counted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_db;
    use crate::DbError;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let db = test_db().await;
        let repo = db.accounts();

        repo.ensure("user-1", Utc::now()).await.unwrap();
        repo.ensure("user-1", Utc::now()).await.unwrap();

        let account = repo.find_by_id("user-1").await.unwrap().unwrap();
        assert_eq!(account.purchase_count, 0);
        assert!(account.referral_code.is_none());
    }

    #[tokio::test]
    async fn test_purchase_counter() {
        let db = test_db().await;
        let repo = db.accounts();
        repo.ensure("user-1", Utc::now()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(repo.increment_purchase_count_in(&mut tx, "user-1").await.unwrap(), 1);
        assert_eq!(repo.increment_purchase_count_in(&mut tx, "user-1").await.unwrap(), 2);
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = repo.increment_purchase_count_in(&mut tx, "nobody").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_referral_code_and_link() {
        let db = test_db().await;
        let repo = db.accounts();
        repo.ensure("alice", Utc::now()).await.unwrap();
        repo.ensure("bob", Utc::now()).await.unwrap();

        assert!(repo.set_referral_code_if_absent("alice", "a1b2c3d4e5f6").await.unwrap());
        assert!(!repo.set_referral_code_if_absent("alice", "ffffffffffff").await.unwrap());

        let err = repo
            .set_referral_code_if_absent("bob", "a1b2c3d4e5f6")
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("accounts.referral_code"));

        let inviter = repo.find_by_referral_code("a1b2c3d4e5f6").await.unwrap().unwrap();
        assert_eq!(inviter.id, "alice");

        let mut tx = db.begin().await.unwrap();
        assert!(repo.set_referred_by_in(&mut tx, "bob", "alice").await.unwrap());
        assert!(!repo.set_referred_by_in(&mut tx, "bob", "alice").await.unwrap());
        tx.commit().await.unwrap();

        let bob = repo.find_by_id("bob").await.unwrap().unwrap();
        assert_eq!(bob.referred_by.as_deref(), Some("alice"));
    }
}
