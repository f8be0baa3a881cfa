//! Shared fixtures for the engine integration tests: fake ports and a
//! seeded in-memory database.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use washpass_core::{
    Car, CarClass, NotificationDraft, NotificationKind, PackageDefinition, PaymentMethod,
    StationContext,
};
use washpass_db::{Database, DbConfig};
use washpass_engine::{
    BarcodeRenderer, CheckoutDraft, Collaborators, DbNotificationSink, GatewayError,
    GatewayVerification, LocalPayment, NotificationSink, NotifyError, PaymentGateway,
    PurchaseOutcome, QrSvgRenderer, RenderError, SqliteCarRegistry, SqlitePackageCatalog,
    WashPass, WashpassConfig,
};

pub const GOLD: &str = "gold";
pub const GOLD_PRICE: i64 = 12_000;
pub const SUV_ONLY: &str = "suv-only";

// =============================================================================
// Fake Gateway
// =============================================================================

/// Gateway double. Checkout ids are `chk-1`, `chk-2`, ...; the verification
/// answer is whatever the test set last.
pub struct FakeGateway {
    next_checkout: AtomicU32,
    verification: Mutex<Option<GatewayVerification>>,
    drafts: Mutex<Vec<CheckoutDraft>>,
    verify_calls: AtomicU32,
}

impl FakeGateway {
    pub fn new() -> Self {
        FakeGateway {
            next_checkout: AtomicU32::new(1),
            verification: Mutex::new(Some(GatewayVerification {
                result_code: "000.100.110".to_string(),
                description: Some("Request successfully processed".to_string()),
                amount_cents: None,
            })),
            drafts: Mutex::new(Vec::new()),
            verify_calls: AtomicU32::new(0),
        }
    }

    pub fn answer(&self, code: &str, amount_cents: Option<i64>) {
        *self.verification.lock().unwrap() = Some(GatewayVerification {
            result_code: code.to_string(),
            description: None,
            amount_cents,
        });
    }

    /// Every verification call fails at the transport level.
    pub fn go_offline(&self) {
        *self.verification.lock().unwrap() = None;
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn drafts(&self) -> Vec<CheckoutDraft> {
        self.drafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn prepare_checkout(&self, draft: &CheckoutDraft) -> Result<String, GatewayError> {
        self.drafts.lock().unwrap().push(draft.clone());
        let n = self.next_checkout.fetch_add(1, Ordering::SeqCst);
        Ok(format!("chk-{}", n))
    }

    async fn verify(&self, _transaction_id: &str) -> Result<GatewayVerification, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verification
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::Transport("connection refused".to_string()))
    }
}

// =============================================================================
// Fake Renderer & Sink
// =============================================================================

pub struct FailingRenderer;

#[async_trait]
impl BarcodeRenderer for FailingRenderer {
    async fn render(&self, _token: &str) -> Result<String, RenderError> {
        Err(RenderError("renderer unavailable".to_string()))
    }
}

/// Records every draft, optionally failing instead.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<NotificationDraft>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn sent(&self) -> Vec<NotificationDraft> {
        self.sent.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<NotificationDraft> {
        self.sent().into_iter().filter(|d| d.kind == kind).collect()
    }

    /// Background sends land a little later; poll until `n` of `kind` arrived.
    pub async fn wait_for(&self, kind: NotificationKind, n: usize) -> Vec<NotificationDraft> {
        for _ in 0..200 {
            let found = self.of_kind(kind);
            if found.len() >= n {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.of_kind(kind)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, draft: NotificationDraft) -> Result<(), NotifyError> {
        if *self.failing.lock().unwrap() {
            return Err(NotifyError("push provider down".to_string()));
        }
        self.sent.lock().unwrap().push(draft);
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub service: WashPass,
    pub db: Database,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
}

pub async fn harness() -> Harness {
    harness_with(WashpassConfig::default(), Arc::new(QrSvgRenderer::new())).await
}

pub async fn harness_with(config: WashpassConfig, renderer: Arc<dyn BarcodeRenderer>) -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    seed_catalog(&db).await;
    build(db, config, renderer)
}

pub fn build(db: Database, config: WashpassConfig, renderer: Arc<dyn BarcodeRenderer>) -> Harness {
    let gateway = Arc::new(FakeGateway::new());
    let sink = Arc::new(RecordingSink::default());

    let ports = Collaborators {
        gateway: gateway.clone(),
        renderer,
        sink: sink.clone(),
        cars: Arc::new(SqliteCarRegistry::new(db.catalog())),
        catalog: Arc::new(SqlitePackageCatalog::new(db.catalog())),
    };
    let service = WashPass::new(db.clone(), config, ports);

    Harness {
        service,
        db,
        gateway,
        sink,
    }
}

/// Same wiring but notifications go to the database log.
pub fn build_with_db_sink(db: Database, config: WashpassConfig) -> WashPass {
    let ports = Collaborators {
        gateway: Arc::new(FakeGateway::new()),
        renderer: Arc::new(QrSvgRenderer::new()),
        sink: Arc::new(DbNotificationSink::new(db.notifications())),
        cars: Arc::new(SqliteCarRegistry::new(db.catalog())),
        catalog: Arc::new(SqlitePackageCatalog::new(db.catalog())),
    };
    WashPass::new(db, config, ports)
}

pub async fn seed_catalog(db: &Database) {
    let catalog = db.catalog();
    catalog
        .upsert_package(&PackageDefinition {
            id: GOLD.to_string(),
            name: "Gold".to_string(),
            wash_units: 5,
            validity_days: 30,
            required_car_class: None,
            price_cents: GOLD_PRICE,
        })
        .await
        .unwrap();
    catalog
        .upsert_package(&PackageDefinition {
            id: SUV_ONLY.to_string(),
            name: "SUV Deluxe".to_string(),
            wash_units: 3,
            validity_days: 60,
            required_car_class: Some(CarClass::Large),
            price_cents: 15_000,
        })
        .await
        .unwrap();
}

/// Creates the account and one medium car `car-{user}`.
pub async fn add_user(db: &Database, user_id: &str) -> String {
    db.accounts().ensure(user_id, Utc::now()).await.unwrap();
    let car_id = format!("car-{}", user_id);
    db.catalog()
        .register_car(&Car {
            id: car_id.clone(),
            owner_user_id: user_id.to_string(),
            car_class: CarClass::Medium,
        })
        .await
        .unwrap();
    car_id
}

pub fn card_payment(user_id: &str, package_id: &str, amount_cents: i64) -> LocalPayment {
    LocalPayment {
        user_id: user_id.to_string(),
        package_id: package_id.to_string(),
        car_id: format!("car-{}", user_id),
        amount_cents,
        method: PaymentMethod::Card,
        external_reference: None,
    }
}

/// Card purchase of the gold package for a user created by [`add_user`].
pub async fn buy_gold(service: &WashPass, user_id: &str) -> PurchaseOutcome {
    service
        .purchase(card_payment(user_id, GOLD, GOLD_PRICE))
        .await
        .unwrap()
}

pub fn station() -> StationContext {
    StationContext {
        station_id: "station-riyadh-01".to_string(),
        operator_id: "operator-7".to_string(),
    }
}
