//! # SQLite Pool
//!
//! Opens the WashPass database and hands out repositories.
//!
//! ## Connection Setup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  file database                      :memory: (tests)                    │
//! │  ─────────────                      ────────────────                    │
//! │  journal_mode = WAL                 journal_mode = MEMORY               │
//! │  synchronous  = NORMAL              exactly one connection, never       │
//! │  foreign_keys = ON                  recycled (the data lives in it)     │
//! │  busy_timeout = DbConfig            foreign_keys = ON                   │
//! │        │                                   │                            │
//! │        └───────────────┬───────────────────┘                            │
//! │                        ▼                                                │
//! │              embedded migrations                                        │
//! │                        ▼                                                │
//! │   Database { pool }  ──► entitlements() payments() accounts() ...       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transactions
//! SQLite allows one writer at a time. A deferred transaction that reads
//! first and writes later can fail with `SQLITE_BUSY` instead of waiting,
//! so every transaction in this workspace begins with its guarding
//! conditional UPDATE. That statement takes the write lock (or waits for it)
//! before anything is read.
//!
//! Code holding a transaction must only use the `*_in(&mut conn)` repository
//! methods. The in-memory pool has a single connection, so asking the pool
//! for a second one while a transaction is open would wait forever.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::account::AccountRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::entitlement::EntitlementRepository;
use crate::repository::notification::NotificationRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::referral::ReferralRepository;
use crate::repository::task::TaskRepository;
use crate::repository::wash::WashEventRepository;

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/washpass/washpass.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Pool size. Default 5; forced to 1 for `:memory:`.
    pub max_connections: u32,

    /// Connections opened eagerly. Default 1.
    pub min_connections: u32,

    /// How long a request waits for a free pooled connection.
    pub acquire_timeout: Duration,

    /// Idle file connections are closed after this long.
    pub idle_timeout: Duration,

    /// How long a writer waits for the lock before failing.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Apply embedded migrations when opening. Default true.
    pub run_migrations: bool,
}

impl DbConfig {
    /// File-backed configuration with production defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// How long a writer waits for SQLite's write lock.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Private in-memory database for tests.
    ///
    /// The pool holds exactly one connection for its whole life; the
    /// database disappears with it.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// True for the `:memory:` configuration.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the WashPass database.
///
/// Cheap to clone: every clone shares the same pool.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./washpass.db")).await?;
///
/// let ent = db.entitlements().find_by_token(&token).await?;
///
/// let mut tx = db.begin().await?;
/// db.entitlements().consume_unit_in(&mut tx, &ent.id, now).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database and migrates it.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening WashPass database"
        );

        let in_memory = config.is_in_memory();

        let base_options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Memory)
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        let connect_options = base_options
            // cars → accounts, wash_events → entitlements, ...
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        debug!(in_memory, "Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout);

        // Recycling the only in-memory connection would drop the database.
        pool_options = if in_memory {
            pool_options.idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.idle_timeout(Some(config.idle_timeout))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool ready");

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies pending embedded migrations. Safe to call repeatedly.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction.
    ///
    /// The first statement executed on it should be a write; see the module
    /// docs.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Returns the entitlement repository.
    pub fn entitlements(&self) -> EntitlementRepository {
        EntitlementRepository::new(self.pool.clone())
    }

    /// Returns the payment repository.
    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Returns the account repository.
    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    /// Returns the referral repository.
    pub fn referrals(&self) -> ReferralRepository {
        ReferralRepository::new(self.pool.clone())
    }

    /// Returns the wash event repository.
    pub fn washes(&self) -> WashEventRepository {
        WashEventRepository::new(self.pool.clone())
    }

    /// Returns the package/car catalog repository.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    /// Returns the notification log repository.
    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository::new(self.pool.clone())
    }

    /// Returns the scheduled task repository.
    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        info!("Closing WashPass database");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DbConfig::in_memory();
        assert!(config.is_in_memory());

        let db = Database::new(config).await.unwrap();
        assert!(db.health_check().await);

        // Reward package is seeded by the initial migration
        let reward = db
            .catalog()
            .find_package(washpass_core::REFERRAL_REWARD_PACKAGE_ID)
            .await
            .unwrap();
        assert!(reward.is_some());
    }

    #[tokio::test]
    async fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("washpass.db");

        let db = Database::new(DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/washpass-test.db")
            .max_connections(10)
            .busy_timeout(Duration::from_secs(1))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert!(!config.run_migrations);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.is_in_memory());
    }
}
