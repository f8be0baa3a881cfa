//! # Wash Event Repository
//!
//! One row per consumed wash unit, written in the same transaction as the
//! decrement.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use washpass_core::WashEvent;

/// Repository for wash event database operations.
#[derive(Debug, Clone)]
pub struct WashEventRepository {
    pool: SqlitePool,
}

impl WashEventRepository {
    /// Creates a new WashEventRepository.
    pub fn new(pool: SqlitePool) -> Self {
        WashEventRepository { pool }
    }

    pub async fn insert_in(&self, conn: &mut SqliteConnection, event: &WashEvent) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wash_events (
                id, entitlement_id, owner_user_id, package_id,
                station_id, operator_id, quota_after, redeemed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&event.id)
        .bind(&event.entitlement_id)
        .bind(&event.owner_user_id)
        .bind(&event.package_id)
        .bind(&event.station_id)
        .bind(&event.operator_id)
        .bind(event.quota_after)
        .bind(event.redeemed_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<WashEvent>> {
        let event = sqlx::query_as::<_, WashEvent>("SELECT * FROM wash_events WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// A user's washes, newest first.
    pub async fn list_by_owner(&self, owner_user_id: &str, limit: u32) -> DbResult<Vec<WashEvent>> {
        let events = sqlx::query_as::<_, WashEvent>(
            r#"
            SELECT * FROM wash_events
            WHERE owner_user_id = ?1
            ORDER BY redeemed_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(owner_user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Washes performed at a station, newest first.
    pub async fn list_by_station(&self, station_id: &str, limit: u32) -> DbResult<Vec<WashEvent>> {
        let events = sqlx::query_as::<_, WashEvent>(
            r#"
            SELECT * FROM wash_events
            WHERE station_id = ?1
            ORDER BY redeemed_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(station_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn count_by_entitlement(&self, entitlement_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM wash_events WHERE entitlement_id = ?1")
                .bind(entitlement_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{entitlement, in_days, seed_basics, test_db};
    use chrono::Utc;

    #[tokio::test]
    async fn test_history_by_owner_and_station() {
        let db = test_db().await;
        seed_basics(&db).await;
        let ent = entitlement("user-1", 5, in_days(30));

        let mut tx = db.begin().await.unwrap();
        db.entitlements().insert_in(&mut tx, &ent).await.unwrap();
        for (i, station) in ["station-a", "station-b", "station-a"].iter().enumerate() {
            let event = WashEvent {
                id: format!("wash-{i}"),
                entitlement_id: ent.id.clone(),
                owner_user_id: "user-1".to_string(),
                package_id: "pkg-gold".to_string(),
                station_id: station.to_string(),
                operator_id: "op-1".to_string(),
                quota_after: 4 - i as i64,
                redeemed_at: Utc::now(),
            };
            db.washes().insert_in(&mut tx, &event).await.unwrap();
        }
        tx.commit().await.unwrap();

        let repo = db.washes();
        assert_eq!(repo.list_by_owner("user-1", 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_by_owner("user-1", 2).await.unwrap().len(), 2);
        assert_eq!(repo.list_by_station("station-a", 10).await.unwrap().len(), 2);
        assert_eq!(repo.count_by_entitlement(&ent.id).await.unwrap(), 3);
        assert!(repo.find_by_id("wash-1").await.unwrap().is_some());
    }
}
