//! # Notification Sink
//!
//! Fire-and-forget delivery of user notifications. Delivery mechanics (push,
//! SMS) live behind [`NotificationSink`]; the engine never waits on them for
//! a purchase or a scan, and a failed delivery is logged, not propagated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use washpass_core::{Notification, NotificationDraft};
use washpass_db::{DbError, NotificationRepository};

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

impl From<DbError> for NotifyError {
    fn from(err: DbError) -> Self {
        NotifyError(err.to_string())
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, draft: NotificationDraft) -> Result<(), NotifyError>;
}

/// Built-in sink: appends to the `notifications` table, from which the
/// delivery service picks messages up.
#[derive(Debug, Clone)]
pub struct DbNotificationSink {
    notifications: NotificationRepository,
}

impl DbNotificationSink {
    pub fn new(notifications: NotificationRepository) -> Self {
        DbNotificationSink { notifications }
    }
}

#[async_trait]
impl NotificationSink for DbNotificationSink {
    async fn notify(&self, draft: NotificationDraft) -> Result<(), NotifyError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: draft.user_id,
            kind: draft.kind,
            message: draft.message,
            related_entity_id: draft.related_entity_id,
            created_at: Utc::now(),
        };
        self.notifications.insert(&notification).await?;
        Ok(())
    }
}

/// Handle the engine components share to reach the sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Notifier { sink }
    }

    /// Sends in the background. Never fails the caller.
    pub fn send(&self, draft: NotificationDraft) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let user_id = draft.user_id.clone();
            let kind = draft.kind;
            match sink.notify(draft).await {
                Ok(()) => debug!(user_id = %user_id, ?kind, "Notification sent"),
                Err(e) => warn!(user_id = %user_id, ?kind, error = %e, "Notification failed"),
            }
        });
    }

    /// Sends and reports the outcome. Used by the task worker, which retries.
    pub async fn deliver(&self, draft: NotificationDraft) -> Result<(), NotifyError> {
        self.sink.notify(draft).await
    }
}
