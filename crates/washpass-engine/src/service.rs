//! # WashPass Service
//!
//! The one object a caller needs: wires the store, issuer, reconciler,
//! redemption engine and referral coordinator over a shared database and
//! exposes the public operations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WashPass                                                               │
//! │    purchase / begin_checkout / confirm_gateway_payment ──► Reconciler   │
//! │    scan ──────────────────────────────────────────────► Redemption    │
//! │    list_* / stats / regenerate_barcode_image ─────────► Store         │
//! │    referral_code / accept_referral / referral_status ─► Coordinator   │
//! │    worker() ──────────────────────────────────────────► TaskWorker    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use washpass_core::validation::validate_identifier;
use washpass_core::{
    CoreError, Entitlement, EntitlementStats, PackageDefinition, RedemptionResult, Referral,
    ReferralSummary, StationContext, WashEvent,
};
use washpass_db::Database;

use crate::barcode::{BarcodeIssuer, BarcodeRenderer, QrSvgRenderer};
use crate::collaborators::{CarRegistry, PackageCatalog, SqliteCarRegistry, SqlitePackageCatalog};
use crate::config::WashpassConfig;
use crate::error::EngineResult;
use crate::gateway::{HttpGateway, PaymentGateway};
use crate::notify::{DbNotificationSink, NotificationSink, Notifier};
use crate::reconciler::{
    CheckoutRequest, CheckoutSession, GatewayConfirmation, LocalPayment, PaymentReconciler,
    PurchaseOutcome,
};
use crate::redemption::RedemptionEngine;
use crate::referral::ReferralCoordinator;
use crate::store::EntitlementStore;
use crate::worker::{TaskWorker, TaskWorkerHandle};

/// Ports the engine talks to. [`Collaborators::sqlite`] reads everything
/// from the local database.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub renderer: Arc<dyn BarcodeRenderer>,
    pub sink: Arc<dyn NotificationSink>,
    pub cars: Arc<dyn CarRegistry>,
    pub catalog: Arc<dyn PackageCatalog>,
}

impl Collaborators {
    /// The production wiring: HTTP gateway, QR renderer, and the SQLite
    /// notification log, car registry and catalog.
    pub fn sqlite(db: &Database, config: &WashpassConfig) -> EngineResult<Self> {
        Ok(Collaborators {
            gateway: Arc::new(HttpGateway::new(&config.gateway)?),
            renderer: Arc::new(QrSvgRenderer::new()),
            sink: Arc::new(DbNotificationSink::new(db.notifications())),
            cars: Arc::new(SqliteCarRegistry::new(db.catalog())),
            catalog: Arc::new(SqlitePackageCatalog::new(db.catalog())),
        })
    }
}

#[derive(Clone)]
pub struct WashPass {
    db: Database,
    config: WashpassConfig,
    store: EntitlementStore,
    redemption: RedemptionEngine,
    reconciler: PaymentReconciler,
    referrals: ReferralCoordinator,
    notifier: Notifier,
    catalog: Arc<dyn PackageCatalog>,
}

impl WashPass {
    pub fn new(db: Database, config: WashpassConfig, ports: Collaborators) -> Self {
        let notifier = Notifier::new(ports.sink);
        let issuer = BarcodeIssuer::new(db.entitlements(), ports.renderer);
        let store = EntitlementStore::new(db.clone(), issuer);

        let referrals = ReferralCoordinator::new(
            db.clone(),
            store.clone(),
            notifier.clone(),
            config.rewards.clone(),
        );
        let redemption = RedemptionEngine::new(db.clone(), store.clone(), config.reminders.clone());
        let reconciler = PaymentReconciler::new(
            db.clone(),
            store.clone(),
            referrals.clone(),
            ports.cars,
            Arc::clone(&ports.catalog),
            ports.gateway,
            config.gateway.clone(),
            notifier.clone(),
        );

        WashPass {
            db,
            config,
            store,
            redemption,
            reconciler,
            referrals,
            notifier,
            catalog: ports.catalog,
        }
    }

    /// Builds the service with the production collaborators.
    pub fn with_defaults(db: Database, config: WashpassConfig) -> EngineResult<Self> {
        let ports = Collaborators::sqlite(&db, &config)?;
        Ok(Self::new(db, config, ports))
    }

    /// A task worker over the same database and collaborators.
    pub fn worker(&self) -> (TaskWorker, TaskWorkerHandle) {
        TaskWorker::new(
            self.db.clone(),
            self.referrals.clone(),
            self.notifier.clone(),
            self.config.worker.clone(),
        )
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    pub fn config(&self) -> &WashpassConfig {
        &self.config
    }

    pub async fn health_check(&self) -> bool {
        self.db.health_check().await
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Card or cash purchase.
    pub async fn purchase(&self, payment: LocalPayment) -> EngineResult<PurchaseOutcome> {
        self.reconciler.reconcile_local(payment).await
    }

    pub async fn begin_checkout(&self, request: CheckoutRequest) -> EngineResult<CheckoutSession> {
        self.reconciler.begin_checkout(request).await
    }

    pub async fn confirm_gateway_payment(
        &self,
        confirmation: GatewayConfirmation,
    ) -> EngineResult<PurchaseOutcome> {
        self.reconciler.reconcile_external(confirmation).await
    }

    // =========================================================================
    // Redemption
    // =========================================================================

    pub async fn scan(
        &self,
        raw_token: &str,
        station: &StationContext,
    ) -> EngineResult<RedemptionResult> {
        self.redemption.redeem(raw_token, station).await
    }

    pub async fn wash_history(&self, user_id: &str, limit: u32) -> EngineResult<Vec<WashEvent>> {
        let user_id = validate_identifier("user_id", user_id)?;
        Ok(self.db.washes().list_by_owner(&user_id, limit).await?)
    }

    pub async fn station_history(&self, station_id: &str, limit: u32) -> EngineResult<Vec<WashEvent>> {
        let station_id = validate_identifier("station_id", station_id)?;
        Ok(self.db.washes().list_by_station(&station_id, limit).await?)
    }

    // =========================================================================
    // Entitlements
    // =========================================================================

    pub async fn list_active(&self, user_id: &str) -> EngineResult<Vec<Entitlement>> {
        let user_id = validate_identifier("user_id", user_id)?;
        self.store.find_active_by_owner(&user_id).await
    }

    pub async fn list_all(&self, user_id: &str) -> EngineResult<Vec<Entitlement>> {
        let user_id = validate_identifier("user_id", user_id)?;
        self.store.list_all(&user_id).await
    }

    pub async fn stats(&self, user_id: &str) -> EngineResult<EntitlementStats> {
        let user_id = validate_identifier("user_id", user_id)?;
        self.store.stats(&user_id).await
    }

    pub async fn regenerate_barcode_image(
        &self,
        user_id: &str,
        entitlement_id: &str,
    ) -> EngineResult<Entitlement> {
        let user_id = validate_identifier("user_id", user_id)?;
        let entitlement_id = validate_identifier("entitlement_id", entitlement_id)?;
        self.store.regenerate_barcode_image(&user_id, &entitlement_id).await
    }

    pub async fn find_package(&self, package_id: &str) -> EngineResult<PackageDefinition> {
        let package_id = validate_identifier("package_id", package_id)?;
        self.catalog
            .find_package(&package_id)
            .await?
            .ok_or_else(|| CoreError::PackageNotFound(package_id).into())
    }

    // =========================================================================
    // Referrals
    // =========================================================================

    pub async fn referral_code(&self, user_id: &str) -> EngineResult<String> {
        self.referrals.referral_code(user_id).await
    }

    pub async fn accept_referral(&self, user_id: &str, code: &str) -> EngineResult<Referral> {
        self.referrals.accept_referral(user_id, code).await
    }

    pub async fn referral_status(&self, user_id: &str) -> EngineResult<ReferralSummary> {
        self.referrals.referral_status(user_id).await
    }
}
