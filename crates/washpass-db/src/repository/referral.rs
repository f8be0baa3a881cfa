//! # Referral Repository
//!
//! Referral links and the `pending → rewarded` guard.
//!
//! ## The Reward Guard
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Duplicate gateway callback → maybe_reward runs twice                   │
//! │                                                                         │
//! │  Call 1: BEGIN; UPDATE referrals SET status='rewarded'                 │
//! │          WHERE id=? AND status='pending'  → 1 row → grant bonuses      │
//! │          COMMIT                                                         │
//! │                                                                         │
//! │  Call 2: BEGIN; UPDATE ... WHERE status='pending' → 0 rows → ROLLBACK  │
//! │                                                                         │
//! │  The guard is the FIRST write of the reward transaction, so the        │
//! │  bonuses and the flag commit together or not at all.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use washpass_core::Referral;

/// Repository for referral database operations.
#[derive(Debug, Clone)]
pub struct ReferralRepository {
    pool: SqlitePool,
}

impl ReferralRepository {
    /// Creates a new ReferralRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReferralRepository { pool }
    }

    /// Inserts a referral on the caller's transaction.
    ///
    /// `invitee_user_id` is unique: an account can be referred once.
    pub async fn insert_in(&self, conn: &mut SqliteConnection, referral: &Referral) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO referrals (id, inviter_user_id, invitee_user_id, status, created_at, rewarded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&referral.id)
        .bind(&referral.inviter_user_id)
        .bind(&referral.invitee_user_id)
        .bind(referral.status)
        .bind(referral.created_at)
        .bind(referral.rewarded_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// The pending referral of an invitee, if any.
    pub async fn find_pending_by_invitee(&self, invitee_user_id: &str) -> DbResult<Option<Referral>> {
        let referral = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE invitee_user_id = ?1 AND status = 'pending'",
        )
        .bind(invitee_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(referral)
    }

    /// The referral that brought `invitee_user_id` in, whatever its status.
    pub async fn find_by_invitee(&self, invitee_user_id: &str) -> DbResult<Option<Referral>> {
        let referral =
            sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE invitee_user_id = ?1")
                .bind(invitee_user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(referral)
    }

    /// Referrals sent by an inviter, newest first.
    pub async fn list_by_inviter(&self, inviter_user_id: &str) -> DbResult<Vec<Referral>> {
        let referrals = sqlx::query_as::<_, Referral>(
            r#"
            SELECT * FROM referrals
            WHERE inviter_user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(inviter_user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(referrals)
    }

    /// pending → rewarded. Returns `true` only for the call that made the
    /// transition.
    pub async fn mark_rewarded_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE referrals SET status = 'rewarded', rewarded_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_db;
    use washpass_core::ReferralStatus;

    fn referral(inviter: &str, invitee: &str) -> Referral {
        Referral {
            id: format!("ref-{invitee}"),
            inviter_user_id: inviter.to_string(),
            invitee_user_id: invitee.to_string(),
            status: ReferralStatus::Pending,
            created_at: Utc::now(),
            rewarded_at: None,
        }
    }

    #[tokio::test]
    async fn test_reward_guard_flips_once() {
        let db = test_db().await;
        db.accounts().ensure("alice", Utc::now()).await.unwrap();
        db.accounts().ensure("bob", Utc::now()).await.unwrap();
        let repo = db.referrals();

        let mut tx = db.begin().await.unwrap();
        repo.insert_in(&mut tx, &referral("alice", "bob")).await.unwrap();
        tx.commit().await.unwrap();

        let pending = repo.find_pending_by_invitee("bob").await.unwrap().unwrap();

        let mut tx = db.begin().await.unwrap();
        assert!(repo.mark_rewarded_in(&mut tx, &pending.id, Utc::now()).await.unwrap());
        assert!(!repo.mark_rewarded_in(&mut tx, &pending.id, Utc::now()).await.unwrap());
        tx.commit().await.unwrap();

        assert!(repo.find_pending_by_invitee("bob").await.unwrap().is_none());
        let stored = repo.find_by_invitee("bob").await.unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::Rewarded);
        assert!(stored.rewarded_at.is_some());
        assert_eq!(repo.list_by_inviter("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invitee_can_only_be_referred_once() {
        let db = test_db().await;
        for id in ["alice", "carol", "bob"] {
            db.accounts().ensure(id, Utc::now()).await.unwrap();
        }
        let repo = db.referrals();

        let mut tx = db.begin().await.unwrap();
        repo.insert_in(&mut tx, &referral("alice", "bob")).await.unwrap();
        let mut second = referral("carol", "bob");
        second.id = "ref-other".to_string();
        let err = repo.insert_in(&mut tx, &second).await.unwrap_err();
        assert!(err.is_unique_violation_on("referrals.invitee_user_id"));
    }
}
