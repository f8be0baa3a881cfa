//! # Scheduled Task Repository
//!
//! Durable timers: a row per deferred side effect, processed by the engine's
//! task worker.
//!
//! ## Task Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  schedule() / schedule_in(tx)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────┐  claim_due (due_at <= now)   ┌─────────┐                  │
//! │  │ pending │ ───────────────────────────► │ running │                  │
//! │  └─────────┘   attempts += 1              └────┬────┘                  │
//! │       ▲                                        │                        │
//! │       │  reschedule (backoff)                  ├──► done                │
//! │       └────────────────────────────────────────┤                        │
//! │                                                └──► failed (max tries) │
//! │                                                                         │
//! │  Process crash while running?                                          │
//! │  requeue_running() at startup puts the row back to pending.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `claim_due` is one `UPDATE ... RETURNING` statement, so two workers
//! polling the same database never claim the same row.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use washpass_core::{ScheduledTask, TaskKind, TaskStatus};

/// Repository for scheduled task operations.
#[derive(Debug, Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    /// Creates a new TaskRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TaskRepository { pool }
    }

    /// Persists a timer that fires at `due_at`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = FeedbackReminderPayload { user_id, wash_event_id };
    /// repo.schedule(TaskKind::FeedbackReminder, &payload, now + delay).await?;
    /// ```
    pub async fn schedule<P: Serialize>(
        &self,
        kind: TaskKind,
        payload: &P,
        due_at: DateTime<Utc>,
    ) -> DbResult<ScheduledTask> {
        let mut conn = self.pool.acquire().await?;
        self.schedule_in(&mut conn, kind, payload, due_at).await
    }

    /// [`schedule`](Self::schedule) on the caller's transaction, so the timer
    /// exists exactly when the change that needs it commits.
    pub async fn schedule_in<P: Serialize>(
        &self,
        conn: &mut SqliteConnection,
        kind: TaskKind,
        payload: &P,
        due_at: DateTime<Utc>,
    ) -> DbResult<ScheduledTask> {
        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            kind,
            payload: serde_json::to_string(payload)?,
            due_at,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        debug!(task_id = %task.id, kind = ?kind, due_at = %due_at, "Scheduling task");

        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (
                id, kind, payload, due_at, status, attempts, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&task.id)
        .bind(task.kind)
        .bind(&task.payload)
        .bind(task.due_at)
        .bind(task.status)
        .bind(task.attempts)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(task)
    }

    /// Atomically claims up to `limit` due tasks (pending → running) and
    /// counts the attempt.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> DbResult<Vec<ScheduledTask>> {
        let tasks = sqlx::query_as::<_, ScheduledTask>(
            r#"
            UPDATE scheduled_tasks SET
                status = 'running',
                attempts = attempts + 1,
                updated_at = ?1
            WHERE id IN (
                SELECT id FROM scheduled_tasks
                WHERE status = 'pending' AND due_at <= ?1
                ORDER BY due_at ASC
                LIMIT ?2
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// Marks a running task as done.
    pub async fn mark_done(&self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE scheduled_tasks SET status = 'done', last_error = NULL, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts a failed attempt back in the queue for `next_due_at`.
    pub async fn reschedule(
        &self,
        id: &str,
        error: &str,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                status = 'pending',
                last_error = ?2,
                due_at = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_due_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Gives up on a task.
    pub async fn mark_failed(&self, id: &str, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE scheduled_tasks SET status = 'failed', last_error = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns rows left `running` by a previous process to `pending`.
    pub async fn requeue_running(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<ScheduledTask>> {
        let task = sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    /// Tasks of one kind, oldest due first.
    pub async fn list_by_kind(&self, kind: TaskKind) -> DbResult<Vec<ScheduledTask>> {
        let tasks = sqlx::query_as::<_, ScheduledTask>(
            "SELECT * FROM scheduled_tasks WHERE kind = ?1 ORDER BY due_at ASC, rowid ASC",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_tasks WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
