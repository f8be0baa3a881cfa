mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use washpass_core::{
    Car, CarClass, CoreError, ErrorKind, NotificationKind, PackageDefinition, PaymentMethod,
    PaymentRecord, PaymentStatus, ValidationError,
};
use washpass_engine::{
    CarRegistry, CheckoutRequest, Collaborators, EngineError, EngineResult, GatewayConfirmation,
    LocalPayment, PackageCatalog, QrSvgRenderer, WashPass, WashpassConfig,
};

fn checkout(user_id: &str, package_id: &str) -> CheckoutRequest {
    CheckoutRequest {
        user_id: user_id.to_string(),
        package_id: package_id.to_string(),
        car_id: format!("car-{}", user_id),
    }
}

fn confirmation(transaction_id: &str) -> GatewayConfirmation {
    GatewayConfirmation {
        transaction_id: transaction_id.to_string(),
        resource_path: Some(format!("/v1/checkouts/{}/payment", transaction_id)),
    }
}

// =============================================================================
// Local payments
// =============================================================================

#[tokio::test]
async fn test_card_purchase_creates_entitlement() {
    let h = harness().await;
    let car_id = add_user(&h.db, "alice").await;

    let outcome = buy_gold(&h.service, "alice").await;
    assert!(!outcome.duplicate);

    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
    assert_eq!(outcome.payment.method, PaymentMethod::Card);
    assert_eq!(outcome.payment.entitlement_id.as_deref(), Some(outcome.entitlement.id.as_str()));

    let entitlement = &outcome.entitlement;
    assert_eq!(entitlement.owner_user_id, "alice");
    assert_eq!(entitlement.source_package_id, GOLD);
    assert_eq!(entitlement.car_ref.as_deref(), Some(car_id.as_str()));
    assert_eq!(entitlement.quota_remaining, 5);
    let validity = entitlement.expires_at - entitlement.created_at;
    assert_eq!(validity.num_days(), 30);

    let stored = h.db.payments().find_by_id(&outcome.payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);

    let account = h.db.accounts().find_by_id("alice").await.unwrap().unwrap();
    assert_eq!(account.purchase_count, 1);

    let sent = h.sink.wait_for(NotificationKind::Purchase, 1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].related_entity_id.as_deref(), Some(outcome.entitlement.id.as_str()));
}

#[tokio::test]
async fn test_purchase_counts_accumulate() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    buy_gold(&h.service, "alice").await;
    buy_gold(&h.service, "alice").await;

    let account = h.db.accounts().find_by_id("alice").await.unwrap().unwrap();
    assert_eq!(account.purchase_count, 2);
    assert_eq!(h.service.list_active("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_wrong_amount_is_rejected() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let err = h
        .service
        .purchase(card_payment("alice", GOLD, GOLD_PRICE - 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::AmountMismatch { .. })));
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);

    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 0);
    assert!(h.db.payments().list_by_payer("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_incompatible_car_class_is_rejected() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let err = h
        .service
        .purchase(card_payment("alice", SUV_ONLY, 15_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::IncompatiblePackage { .. })));
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_package_and_car() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    add_user(&h.db, "bob").await;

    let err = h
        .service
        .purchase(card_payment("alice", "diamond", GOLD_PRICE))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PackageNotFound(_))));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Bob's car does not belong to alice
    let mut payment = card_payment("alice", GOLD, GOLD_PRICE);
    payment.car_id = "car-bob".to_string();
    let err = h.service.purchase(payment).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::CarNotFound(_))));
}

#[tokio::test]
async fn test_local_path_refuses_gateway_method() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let mut payment = card_payment("alice", GOLD, GOLD_PRICE);
    payment.method = PaymentMethod::Gateway;
    let err = h.service.purchase(payment).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Core(CoreError::Validation(ValidationError::NotAllowed { .. }))
    ));
}

#[tokio::test]
async fn test_terminal_reference_is_idempotent() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let mut payment = card_payment("alice", GOLD, GOLD_PRICE);
    payment.external_reference = Some("pos-778812".to_string());

    let first = h.service.purchase(payment.clone()).await.unwrap();
    let second = h.service.purchase(payment).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.payment.id, second.payment.id);
    assert_eq!(first.entitlement.id, second.entitlement.id);
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 1);
    assert_eq!(h.db.payments().list_by_payer("alice").await.unwrap().len(), 1);

    let account = h.db.accounts().find_by_id("alice").await.unwrap().unwrap();
    assert_eq!(account.purchase_count, 1);
}

fn with_reference(mut payment: LocalPayment, reference: &str) -> LocalPayment {
    payment.external_reference = Some(reference.to_string());
    payment
}

#[tokio::test]
async fn test_reference_reused_by_another_payer_conflicts() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    add_user(&h.db, "mallory").await;

    let alice = h
        .service
        .purchase(with_reference(card_payment("alice", GOLD, GOLD_PRICE), "pos-1001"))
        .await
        .unwrap();

    let err = h
        .service
        .purchase(with_reference(card_payment("mallory", GOLD, GOLD_PRICE), "pos-1001"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PaymentReferenceConflict)));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(h.service.store().count_by_owner("mallory").await.unwrap(), 0);
    assert!(h.db.payments().list_by_payer("mallory").await.unwrap().is_empty());
    let kept = h.service.store().find_by_id(&alice.entitlement.id).await.unwrap();
    assert_eq!(kept.owner_user_id, "alice");
    assert_eq!(kept.quota_remaining, 5);
}

#[tokio::test]
async fn test_reference_reused_with_different_terms_conflicts() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    h.service
        .purchase(with_reference(card_payment("alice", GOLD, GOLD_PRICE), "pos-2002"))
        .await
        .unwrap();

    let mut as_cash = with_reference(card_payment("alice", GOLD, GOLD_PRICE), "pos-2002");
    as_cash.method = PaymentMethod::Cash;
    let err = h.service.purchase(as_cash).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PaymentReferenceConflict)));

    // A gateway checkout id is not a terminal reference
    let session = h
        .service
        .begin_checkout(CheckoutRequest {
            user_id: "alice".to_string(),
            package_id: GOLD.to_string(),
            car_id: "car-alice".to_string(),
        })
        .await
        .unwrap();
    let err = h
        .service
        .purchase(with_reference(card_payment("alice", GOLD, GOLD_PRICE), &session.checkout_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PaymentReferenceConflict)));
    let pending = h.db.payments().find_by_id(&session.payment_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);

    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn test_pending_reference_completes_against_recorded_package() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    // Recorded by a delivery that never reached completion
    let now = Utc::now();
    let recorded = PaymentRecord {
        id: "pay-recorded".to_string(),
        payer_user_id: "alice".to_string(),
        package_id: GOLD.to_string(),
        car_ref: Some("car-alice".to_string()),
        amount_cents: GOLD_PRICE,
        method: PaymentMethod::Card,
        status: PaymentStatus::Pending,
        external_transaction_id: Some("pos-3003".to_string()),
        entitlement_id: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    };
    assert!(h.db.payments().insert_if_absent(&recorded).await.unwrap());

    let outcome = h
        .service
        .purchase(with_reference(card_payment("alice", GOLD, GOLD_PRICE), "pos-3003"))
        .await
        .unwrap();
    assert!(!outcome.duplicate);
    assert_eq!(outcome.payment.id, "pay-recorded");
    assert_eq!(outcome.entitlement.source_package_id, GOLD);
    assert_eq!(outcome.entitlement.quota_remaining, 5);
}

// =============================================================================
// Externally owned catalog
// =============================================================================

/// Car registry and catalog that live outside the local database.
struct RemoteCollaborators;

#[async_trait]
impl PackageCatalog for RemoteCollaborators {
    async fn find_package(&self, package_id: &str) -> EngineResult<Option<PackageDefinition>> {
        Ok((package_id == "remote-pkg").then(|| PackageDefinition {
            id: "remote-pkg".to_string(),
            name: "Remote Trio".to_string(),
            wash_units: 3,
            validity_days: 14,
            required_car_class: None,
            price_cents: 500,
        }))
    }
}

#[async_trait]
impl CarRegistry for RemoteCollaborators {
    async fn find_owned_car(&self, user_id: &str, car_id: &str) -> EngineResult<Option<Car>> {
        Ok((user_id == "alice" && car_id == "remote-car").then(|| Car {
            id: "remote-car".to_string(),
            owner_user_id: "alice".to_string(),
            car_class: CarClass::Small,
        }))
    }
}

#[tokio::test]
async fn test_purchase_through_external_catalog_and_registry() {
    let db = washpass_db::Database::new(washpass_db::DbConfig::in_memory())
        .await
        .unwrap();
    let remote = Arc::new(RemoteCollaborators);
    let service = WashPass::new(
        db.clone(),
        WashpassConfig::default(),
        Collaborators {
            gateway: Arc::new(FakeGateway::new()),
            renderer: Arc::new(QrSvgRenderer::new()),
            sink: Arc::new(RecordingSink::default()),
            cars: remote.clone(),
            catalog: remote,
        },
    );

    let outcome = service
        .purchase(LocalPayment {
            user_id: "alice".to_string(),
            package_id: "remote-pkg".to_string(),
            car_id: "remote-car".to_string(),
            amount_cents: 500,
            method: PaymentMethod::Card,
            external_reference: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.entitlement.source_package_id, "remote-pkg");
    assert_eq!(outcome.entitlement.car_ref.as_deref(), Some("remote-car"));
    assert_eq!(outcome.entitlement.quota_remaining, 3);

    let result = service.scan(&outcome.entitlement.barcode_token, &station()).await.unwrap();
    assert_eq!(result.quota_remaining, 2);
}

// =============================================================================
// Gateway payments
// =============================================================================

#[tokio::test]
async fn test_checkout_then_confirmation() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let session = h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();
    assert_eq!(session.checkout_id, "chk-1");
    assert_eq!(session.amount_cents, GOLD_PRICE);
    assert_eq!(session.currency, "SAR");
    assert_eq!(h.gateway.drafts()[0].amount.cents(), GOLD_PRICE);
    assert_eq!(h.gateway.drafts()[0].merchant_reference, session.payment_id);

    let pending = h.db.payments().find_by_id(&session.payment_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert_eq!(pending.method, PaymentMethod::Gateway);
    assert_eq!(pending.external_transaction_id.as_deref(), Some("chk-1"));

    h.gateway.answer("000.000.000", Some(GOLD_PRICE));
    let outcome = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap();
    assert!(!outcome.duplicate);
    assert_eq!(outcome.payment.id, session.payment_id);
    assert_eq!(outcome.entitlement.owner_user_id, "alice");
    assert_eq!(outcome.entitlement.quota_remaining, 5);
}

#[tokio::test]
async fn test_duplicate_confirmation_returns_first_result() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();

    let first = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap();
    let second = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.entitlement.id, second.entitlement.id);
    assert_eq!(first.payment.id, second.payment.id);
    assert_eq!(h.gateway.verify_calls(), 1);
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 1);
    assert_eq!(h.db.payments().list_by_payer("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_confirmations() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();

    let (a, b) = tokio::join!(
        h.service.confirm_gateway_payment(confirmation("chk-1")),
        h.service.confirm_gateway_payment(confirmation("chk-1")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.entitlement.id, b.entitlement.id);
    assert_eq!([a.duplicate, b.duplicate].iter().filter(|d| !**d).count(), 1);
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_code_fails_payment() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let session = h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();

    h.gateway.answer("800.100.151", None);
    let err = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap_err();
    match &err {
        EngineError::Core(CoreError::GatewayVerificationFailed { code }) => {
            assert_eq!(code, "800.100.151")
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let payment = h.db.payments().find_by_id(&session.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.failure_reason.unwrap().contains("800.100.151"));
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 0);

    // A later success report cannot revive it
    h.gateway.answer("000.000.000", None);
    let err = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PaymentAlreadyFailed)));
}

#[tokio::test]
async fn test_charged_amount_must_match() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let session = h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();

    h.gateway.answer("000.000.000", Some(100));
    let err = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::GatewayVerificationFailed { .. })));

    let payment = h.db.payments().find_by_id(&session.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_uncorrelated_confirmation_is_rejected() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let err = h
        .service
        .confirm_gateway_payment(confirmation("chk-never-issued"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::UncorrelatedConfirmation)));
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(h.gateway.verify_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_gateway_leaves_payment_pending() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let session = h.service.begin_checkout(checkout("alice", GOLD)).await.unwrap();

    h.gateway.go_offline();
    let err = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

    let payment = h.db.payments().find_by_id(&session.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    h.gateway.answer("000.100.110", Some(GOLD_PRICE));
    let outcome = h.service.confirm_gateway_payment(confirmation("chk-1")).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_checkout_validates_before_calling_gateway() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let err = h.service.begin_checkout(checkout("alice", SUV_ONLY)).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::IncompatiblePackage { .. })));
    assert!(h.gateway.drafts().is_empty());
}

#[tokio::test]
async fn test_builtin_sink_logs_purchase_notification() {
    let db = washpass_db::Database::new(washpass_db::DbConfig::in_memory())
        .await
        .unwrap();
    seed_catalog(&db).await;
    add_user(&db, "alice").await;
    let service = build_with_db_sink(db.clone(), washpass_engine::WashpassConfig::default());

    let outcome = buy_gold(&service, "alice").await;

    let mut logged = Vec::new();
    for _ in 0..200 {
        logged = db.notifications().list_by_user("alice", 10).await.unwrap();
        if !logged.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].kind, NotificationKind::Purchase);
    assert_eq!(logged[0].related_entity_id.as_deref(), Some(outcome.entitlement.id.as_str()));
}
