//! # washpass-engine: Package Redemption & Reward Engine
//!
//! Every rule that touches money or wash quota lives here: turning confirmed
//! payments into entitlements, consuming one unit per scan, and paying out
//! referral bonuses exactly once.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          WashPass (service)                             │
//! │                                                                         │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │ PaymentReconciler  │  │ RedemptionEngine   │  │ Referral         │  │
//! │  │                    │  │                    │  │ Coordinator      │  │
//! │  │ local + gateway    │  │ conditional        │  │ pending→rewarded │  │
//! │  │ idempotent by txn  │  │ decrement + event  │  │ CAS, bonus units │  │
//! │  └─────────┬──────────┘  └─────────┬──────────┘  └────────┬─────────┘  │
//! │            └───────────────────────┼──────────────────────┘            │
//! │                                    ▼                                    │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │ EntitlementStore   │  │ BarcodeIssuer      │  │ TaskWorker       │  │
//! │  │ lazy expiry        │  │ OS RNG tokens      │  │ durable timers,  │  │
//! │  │                    │  │ QR/SVG images      │  │ backoff retries  │  │
//! │  └────────────────────┘  └────────────────────┘  └──────────────────┘  │
//! │                                                                         │
//! │  PORTS (async traits):                                                 │
//! │  PaymentGateway · BarcodeRenderer · NotificationSink ·                 │
//! │  CarRegistry · PackageCatalog                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `WashPass` facade and collaborator wiring
//! - [`reconciler`] - Payment → entitlement, local and gateway paths
//! - [`redemption`] - Scan → one consumed unit
//! - [`referral`] - Referral codes, enrollment and rewards
//! - [`store`] - Entitlement creation and lookups
//! - [`barcode`] - Token minting and image rendering
//! - [`gateway`] - Payment gateway port and HTTP adapter
//! - [`notify`] - Notification sink port
//! - [`collaborators`] - Car registry and package catalog ports
//! - [`worker`] - Scheduled task processing
//! - [`config`] - `WashpassConfig` loading and validation
//! - [`error`] - Engine error type
//!
//! ## Usage
//!
//! ```rust,ignore
//! use washpass_engine::{WashPass, WashpassConfig};
//!
//! let config = WashpassConfig::load(None)?;
//! let service = WashPass::with_defaults(db, config)?;
//!
//! let (worker, worker_handle) = service.worker();
//! tokio::spawn(worker.run());
//!
//! let result = service.scan(&token, &StationContext { station_id, operator_id }).await?;
//! println!("{} washes left", result.quota_remaining);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod barcode;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod reconciler;
pub mod redemption;
pub mod referral;
pub mod service;
pub mod store;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use barcode::{BarcodeIssuer, BarcodeRenderer, QrSvgRenderer, RenderError, TokenSource};
pub use collaborators::{CarRegistry, PackageCatalog, SqliteCarRegistry, SqlitePackageCatalog};
pub use config::{
    DatabaseConfig, GatewayConfig, RemindersConfig, RewardsConfig, ServerConfig, WashpassConfig,
    WorkerConfig,
};
pub use error::{EngineError, EngineResult};
pub use gateway::{CheckoutDraft, GatewayError, GatewayVerification, HttpGateway, PaymentGateway};
pub use notify::{DbNotificationSink, NotificationSink, Notifier, NotifyError};
pub use reconciler::{
    CheckoutRequest, CheckoutSession, GatewayConfirmation, LocalPayment, PaymentReconciler,
    PurchaseOutcome,
};
pub use redemption::RedemptionEngine;
pub use referral::{BonusGrant, ReferralCoordinator, RewardOutcome};
pub use service::{Collaborators, WashPass};
pub use store::EntitlementStore;
pub use worker::{TaskWorker, TaskWorkerHandle};
