//! # Redemption Engine
//!
//! Consumes exactly one wash unit per scan.
//!
//! ## Scan Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  scan(token, station)                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  find_by_token (lazy expiry) ─────────── absent ──► NotFound           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  check_redeemable ──── expired ──► ExpiredOrExhausted                  │
//! │       │           ──── exhausted ──► NoQuotaLeft                       │
//! │       │           ──── active, quota 0 ──► flip exhausted, NoQuotaLeft │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │    consume_unit_in  (UPDATE ... WHERE quota_remaining > 0)             │
//! │       │  0 rows ──► ROLLBACK, re-read, classify                        │
//! │       ▼                                                                 │
//! │    insert wash event                                                   │
//! │    schedule feedback reminder (durable timer row)                      │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Redemption is not idempotent by token: every successful call consumes a
//! unit. Callers deliver a scan at most once per physical wash.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use washpass_core::lifecycle::{check_redeemable, RedeemCheck};
use washpass_core::validation::validate_identifier;
use washpass_core::{
    CoreError, Entitlement, FeedbackReminderPayload, RedemptionResult, StationContext, TaskKind,
    WashEvent,
};
use washpass_db::{Database, SqliteConnection};

use crate::barcode::token_prefix;
use crate::config::RemindersConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::EntitlementStore;

#[derive(Clone)]
pub struct RedemptionEngine {
    db: Database,
    store: EntitlementStore,
    reminders: RemindersConfig,
}

impl RedemptionEngine {
    pub fn new(db: Database, store: EntitlementStore, reminders: RemindersConfig) -> Self {
        RedemptionEngine {
            db,
            store,
            reminders,
        }
    }

    /// Redeems one unit from the entitlement bound to `raw_token`.
    pub async fn redeem(
        &self,
        raw_token: &str,
        context: &StationContext,
    ) -> EngineResult<RedemptionResult> {
        let station_id = validate_identifier("station_id", &context.station_id)?;
        let operator_id = validate_identifier("operator_id", &context.operator_id)?;

        let entitlement = self.store.find_by_token(raw_token).await?;
        let now = Utc::now();

        debug!(
            entitlement_id = %entitlement.id,
            token_prefix = %token_prefix(&entitlement.barcode_token),
            station_id = %station_id,
            "Redeeming"
        );

        if check_redeemable(&entitlement, now)? == RedeemCheck::FlipExhausted {
            self.flip_exhausted(&entitlement, now).await;
            return Err(CoreError::NoQuotaLeft.into());
        }

        let mut tx = self.db.begin().await?;

        let Some(updated) = self
            .db
            .entitlements()
            .consume_unit_in(&mut tx, &entitlement.id, now)
            .await?
        else {
            tx.rollback().await?;
            return Err(self.classify_lost_race(&entitlement.id, now).await);
        };

        let event = WashEvent {
            id: Uuid::new_v4().to_string(),
            entitlement_id: updated.id.clone(),
            owner_user_id: updated.owner_user_id.clone(),
            package_id: updated.source_package_id.clone(),
            station_id,
            operator_id,
            quota_after: updated.quota_remaining,
            redeemed_at: now,
        };
        self.db.washes().insert_in(&mut tx, &event).await?;
        self.schedule_feedback_reminder_in(&mut tx, &event).await?;
        tx.commit().await?;

        info!(
            entitlement_id = %updated.id,
            wash_event_id = %event.id,
            station_id = %event.station_id,
            quota_remaining = updated.quota_remaining,
            status = updated.status.as_str(),
            "Wash redeemed"
        );

        Ok(RedemptionResult {
            wash_event_id: event.id,
            entitlement_id: updated.id,
            owner_user_id: updated.owner_user_id,
            quota_remaining: updated.quota_remaining,
            expires_at: updated.expires_at,
            status: updated.status,
        })
    }

    /// The conditional decrement matched no row: somebody else took the last
    /// unit, or the record expired in between. Re-read and report why.
    async fn classify_lost_race(&self, entitlement_id: &str, now: DateTime<Utc>) -> EngineError {
        let current = match self.store.find_by_id(entitlement_id).await {
            Ok(current) => current,
            Err(e) => return e,
        };

        match check_redeemable(&current, now) {
            Err(e) => e.into(),
            Ok(RedeemCheck::FlipExhausted) => {
                self.flip_exhausted(&current, now).await;
                CoreError::NoQuotaLeft.into()
            }
            // Still redeemable on re-read; the caller may scan again
            Ok(RedeemCheck::Consume) => CoreError::NoQuotaLeft.into(),
        }
    }

    async fn flip_exhausted(&self, entitlement: &Entitlement, now: DateTime<Utc>) {
        match self.db.entitlements().mark_exhausted(&entitlement.id, now).await {
            Ok(true) => info!(entitlement_id = %entitlement.id, "Empty entitlement marked exhausted"),
            Ok(false) => {}
            Err(e) => warn!(entitlement_id = %entitlement.id, error = %e, "Failed to mark entitlement exhausted"),
        }
    }

    /// The reminder commits or rolls back together with the wash event.
    async fn schedule_feedback_reminder_in(
        &self,
        conn: &mut SqliteConnection,
        event: &WashEvent,
    ) -> EngineResult<()> {
        if !self.reminders.feedback_enabled {
            return Ok(());
        }

        let payload = FeedbackReminderPayload {
            user_id: event.owner_user_id.clone(),
            wash_event_id: event.id.clone(),
        };
        let due_at = event.redeemed_at + self.reminders.feedback_delay();
        self.db
            .tasks()
            .schedule_in(conn, TaskKind::FeedbackReminder, &payload, due_at)
            .await?;
        Ok(())
    }
}
