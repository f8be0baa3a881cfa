//! # Task Worker
//!
//! Processes the `scheduled_tasks` table: deferred side effects that must
//! survive a restart.
//!
//! ## Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  startup: requeue_running()   (rows a crashed process left behind)     │
//! │                                                                         │
//! │  every poll_interval:                                                  │
//! │    claim_due(now, batch_size)        pending → running, attempts += 1  │
//! │         │                                                               │
//! │         ▼                                                               │
//! │    ┌──────────────────────┬────────────────────────────────┐           │
//! │    │ feedback_reminder    │ notifier.deliver(feedback)     │           │
//! │    │ referral_reward_retry│ referrals.maybe_reward(...)    │           │
//! │    └──────────────────────┴────────────────────────────────┘           │
//! │         │                                                               │
//! │         ├── ok ──────────────────────────► done                        │
//! │         ├── bad payload ─────────────────► failed                      │
//! │         ├── error, attempts < max ───────► pending (due += backoff)    │
//! │         └── error, attempts >= max ──────► failed                      │
//! │                                                                         │
//! │  BACKOFF: base * 2^(attempts-1), capped at max_backoff                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use washpass_core::{
    FeedbackReminderPayload, NotificationDraft, NotificationKind, ReferralRewardPayload,
    ScheduledTask, TaskKind,
};
use washpass_db::Database;

use crate::config::WorkerConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::referral::ReferralCoordinator;

// =============================================================================
// Task Errors
// =============================================================================

/// Why one task execution did not finish.
#[derive(Debug)]
enum TaskFailure {
    /// The payload can never be processed; retrying is pointless.
    Permanent(String),
    Retryable(String),
}

// =============================================================================
// Worker
// =============================================================================

pub struct TaskWorker {
    db: Database,
    referrals: ReferralCoordinator,
    notifier: Notifier,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running worker.
#[derive(Clone)]
pub struct TaskWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskWorkerHandle {
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::Internal("Worker shutdown channel closed".into()))
    }
}

impl TaskWorker {
    pub fn new(
        db: Database,
        referrals: ReferralCoordinator,
        notifier: Notifier,
        config: WorkerConfig,
    ) -> (Self, TaskWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = TaskWorker {
            db,
            referrals,
            notifier,
            config,
            shutdown_rx,
        };

        (worker, TaskWorkerHandle { shutdown_tx })
    }

    /// Runs the poll loop until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Task worker starting");

        match self.db.tasks().requeue_running(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Requeued tasks left running by a previous process"),
            Err(e) => error!(error = %e, "Failed to requeue running tasks"),
        }

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(error = %e, "Failed to process scheduled tasks");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Task worker shutting down");
                    break;
                }
            }
        }

        info!("Task worker stopped");
    }

    /// Claims and executes every task due at `now`. Returns how many ran.
    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let tasks = self.db.tasks().claim_due(now, self.config.batch_size).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        debug!(count = tasks.len(), "Processing scheduled tasks");

        for task in &tasks {
            let outcome = self.execute(task).await;
            self.settle(task, outcome, now).await?;
        }

        Ok(tasks.len())
    }

    async fn execute(&self, task: &ScheduledTask) -> Result<(), TaskFailure> {
        match task.kind {
            TaskKind::FeedbackReminder => {
                let payload: FeedbackReminderPayload = decode(&task.payload)?;
                self.notifier
                    .deliver(NotificationDraft {
                        user_id: payload.user_id,
                        kind: NotificationKind::Feedback,
                        message: "How was your wash? Tell us about it.".to_string(),
                        related_entity_id: Some(payload.wash_event_id),
                    })
                    .await
                    .map_err(|e| TaskFailure::Retryable(e.to_string()))
            }
            TaskKind::ReferralRewardRetry => {
                let payload: ReferralRewardPayload = decode(&task.payload)?;
                let outcome = self
                    .referrals
                    .maybe_reward(&payload.invitee_user_id, &payload.entitlement_id)
                    .await
                    .map_err(|e| TaskFailure::Retryable(e.to_string()))?;
                debug!(task_id = %task.id, ?outcome, "Referral reward retry finished");
                Ok(())
            }
        }
    }

    async fn settle(
        &self,
        task: &ScheduledTask,
        outcome: Result<(), TaskFailure>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let repo = self.db.tasks();

        match outcome {
            Ok(()) => {
                repo.mark_done(&task.id, now).await?;
                debug!(task_id = %task.id, kind = ?task.kind, "Task done");
            }
            Err(TaskFailure::Permanent(reason)) => {
                repo.mark_failed(&task.id, &reason, now).await?;
                error!(task_id = %task.id, kind = ?task.kind, reason = %reason, "Task payload rejected");
            }
            Err(TaskFailure::Retryable(reason)) if task.attempts >= self.config.max_attempts => {
                repo.mark_failed(&task.id, &reason, now).await?;
                error!(
                    task_id = %task.id,
                    kind = ?task.kind,
                    attempts = task.attempts,
                    reason = %reason,
                    "Task failed permanently"
                );
            }
            Err(TaskFailure::Retryable(reason)) => {
                let next_due_at = now + self.config.backoff(task.attempts);
                repo.reschedule(&task.id, &reason, next_due_at, now).await?;
                warn!(
                    task_id = %task.id,
                    kind = ?task.kind,
                    attempts = task.attempts,
                    next_due_at = %next_due_at,
                    reason = %reason,
                    "Task failed, rescheduled"
                );
            }
        }
        Ok(())
    }
}

fn decode<P: serde::de::DeserializeOwned>(payload: &str) -> Result<P, TaskFailure> {
    serde_json::from_str(payload).map_err(|e| TaskFailure::Permanent(format!("invalid payload: {}", e)))
}
