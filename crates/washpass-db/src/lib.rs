//! # washpass-db: Database Layer for WashPass
//!
//! This crate provides database access for the WashPass engine.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WashPass Data Flow                               │
//! │                                                                         │
//! │  washpass-engine (redeem, reconcile, reward)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  washpass-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ Entitlement    │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Payment        │   │ 001_initial  │  │   │
//! │  │   │ begin()       │    │ Account        │   │  _schema.sql │  │   │
//! │  │   │               │    │ Referral, Wash │   │              │  │   │
//! │  │   │               │    │ Catalog, Task  │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Database`] owns the pool; each table group has its repository under
//! [`repository`], reached through an accessor such as
//! [`Database::entitlements`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use washpass_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./washpass.db")).await?;
//! let active = db.entitlements().find_active_by_owner("user-1", Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::account::AccountRepository;
pub use repository::catalog::CatalogRepository;
pub use repository::entitlement::EntitlementRepository;
pub use repository::notification::NotificationRepository;
pub use repository::payment::PaymentRepository;
pub use repository::referral::ReferralRepository;
pub use repository::task::TaskRepository;
pub use repository::wash::WashEventRepository;

/// Connection type the `*_in` repository methods run on.
///
/// A `&mut Transaction<'_, Sqlite>` coerces to `&mut SqliteConnection`.
pub use sqlx::SqliteConnection;
