//! # Notification Repository
//!
//! Append-only log written by the built-in notification sink.

use sqlx::SqlitePool;

use crate::error::DbResult;
use washpass_core::Notification;

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        NotificationRepository { pool }
    }

    pub async fn insert(&self, notification: &Notification) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, message, related_entity_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind)
        .bind(&notification.message)
        .bind(&notification.related_entity_id)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A user's notifications, newest first.
    pub async fn list_by_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }
}
