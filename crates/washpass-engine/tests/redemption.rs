mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use washpass_core::{CoreError, EntitlementStatus, ErrorKind, StationContext, TaskKind};
use washpass_engine::{EngineError, QrSvgRenderer, WashpassConfig};

#[tokio::test]
async fn test_five_unit_package_redeems_five_times() {
    let h = harness().await;
    add_user(&h.db, "alice").await;

    let outcome = buy_gold(&h.service, "alice").await;
    assert_eq!(outcome.entitlement.quota_remaining, 5);
    assert_eq!(outcome.entitlement.status, EntitlementStatus::Active);

    let token = outcome.entitlement.barcode_token.clone();
    for expected in (0..5).rev() {
        let result = h.service.scan(&token, &station()).await.unwrap();
        assert_eq!(result.quota_remaining, expected);
        assert_eq!(result.owner_user_id, "alice");
    }

    let entitlement = h.service.store().find_by_id(&outcome.entitlement.id).await.unwrap();
    assert_eq!(entitlement.quota_remaining, 0);
    assert_eq!(entitlement.status, EntitlementStatus::Exhausted);

    let err = h.service.scan(&token, &station()).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::NoQuotaLeft)));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let washes = h.db.washes().count_by_entitlement(&outcome.entitlement.id).await.unwrap();
    assert_eq!(washes, 5);
    assert!(h.service.list_active("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_unit_flips_status_in_result() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;
    let token = outcome.entitlement.barcode_token;

    for _ in 0..4 {
        let result = h.service.scan(&token, &station()).await.unwrap();
        assert_eq!(result.status, EntitlementStatus::Active);
    }
    let last = h.service.scan(&token, &station()).await.unwrap();
    assert_eq!(last.quota_remaining, 0);
    assert_eq!(last.status, EntitlementStatus::Exhausted);
}

#[tokio::test]
async fn test_expired_entitlement_flips_on_scan() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let gold = h.db.catalog().find_package(GOLD).await.unwrap().unwrap();

    // Created 31 days ago with 30 days validity; nobody swept it
    let mut tx = h.db.begin().await.unwrap();
    let stale = h
        .service
        .store()
        .create_in(&mut tx, "alice", &gold, None, Utc::now() - Duration::days(31))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let raw = h.db.entitlements().find_by_id(&stale.id).await.unwrap().unwrap();
    assert_eq!(raw.status, EntitlementStatus::Active);

    let err = h.service.scan(&stale.barcode_token, &station()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Core(CoreError::ExpiredOrExhausted {
            status: EntitlementStatus::Expired
        })
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let after = h.db.entitlements().find_by_id(&stale.id).await.unwrap().unwrap();
    assert_eq!(after.status, EntitlementStatus::Expired);
    assert_eq!(after.quota_remaining, 5);
    assert_eq!(h.db.washes().count_by_entitlement(&stale.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let h = harness().await;

    let err = h
        .service
        .scan("00000000000000000000000000000000", &station())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::EntitlementNotFound)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_scan_normalizes_token() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    let typed = format!("  {}\n", outcome.entitlement.barcode_token.to_uppercase());
    let result = h.service.scan(&typed, &station()).await.unwrap();
    assert_eq!(result.entitlement_id, outcome.entitlement.id);
}

#[tokio::test]
async fn test_scan_requires_station_context() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    let context = StationContext {
        station_id: "   ".to_string(),
        operator_id: "operator-7".to_string(),
    };
    let err = h
        .service
        .scan(&outcome.entitlement.barcode_token, &context)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);

    let entitlement = h.service.store().find_by_id(&outcome.entitlement.id).await.unwrap();
    assert_eq!(entitlement.quota_remaining, 5);
}

#[tokio::test]
async fn test_scan_records_wash_event_and_history() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    let result = h
        .service
        .scan(&outcome.entitlement.barcode_token, &station())
        .await
        .unwrap();

    let event = h.db.washes().find_by_id(&result.wash_event_id).await.unwrap().unwrap();
    assert_eq!(event.entitlement_id, outcome.entitlement.id);
    assert_eq!(event.station_id, "station-riyadh-01");
    assert_eq!(event.operator_id, "operator-7");
    assert_eq!(event.quota_after, 4);
    assert_eq!(event.package_id, GOLD);

    let history = h.service.wash_history("alice", 20).await.unwrap();
    assert_eq!(history.len(), 1);
    let at_station = h.service.station_history("station-riyadh-01", 20).await.unwrap();
    assert_eq!(at_station.len(), 1);
    assert!(h.service.station_history("station-other", 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_schedules_feedback_reminder() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    let result = h
        .service
        .scan(&outcome.entitlement.barcode_token, &station())
        .await
        .unwrap();

    let tasks = h.db.tasks().list_by_kind(TaskKind::FeedbackReminder).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].payload.contains(&result.wash_event_id));

    let event = h.db.washes().find_by_id(&result.wash_event_id).await.unwrap().unwrap();
    let delay = tasks[0].due_at - event.redeemed_at;
    assert!((delay - Duration::seconds(1800)).num_milliseconds().abs() < 1000);
}

#[tokio::test]
async fn test_one_reminder_per_committed_wash() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;
    let token = &outcome.entitlement.barcode_token;

    let mut wash_ids = Vec::new();
    for _ in 0..5 {
        wash_ids.push(h.service.scan(token, &station()).await.unwrap().wash_event_id);
    }
    assert!(h.service.scan(token, &station()).await.is_err());

    let tasks = h.db.tasks().list_by_kind(TaskKind::FeedbackReminder).await.unwrap();
    assert_eq!(tasks.len(), 5);
    for wash_id in &wash_ids {
        assert_eq!(tasks.iter().filter(|t| t.payload.contains(wash_id.as_str())).count(), 1);
    }
}

#[tokio::test]
async fn test_reminders_can_be_disabled() {
    let mut config = WashpassConfig::default();
    config.reminders.feedback_enabled = false;
    let h = harness_with(config, Arc::new(QrSvgRenderer::new())).await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    h.service
        .scan(&outcome.entitlement.barcode_token, &station())
        .await
        .unwrap();

    let tasks = h.db.tasks().list_by_kind(TaskKind::FeedbackReminder).await.unwrap();
    assert!(tasks.is_empty());
}

// =============================================================================
// Barcode images
// =============================================================================

#[tokio::test]
async fn test_purchase_renders_barcode_image() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let outcome = buy_gold(&h.service, "alice").await;

    assert_eq!(outcome.entitlement.barcode_token.len(), 32);
    let image = outcome.entitlement.barcode_image.unwrap();
    assert!(image.starts_with("data:image/svg+xml;base64,"));
}

#[tokio::test]
async fn test_render_failure_keeps_entitlement_usable() {
    let h = harness_with(WashpassConfig::default(), Arc::new(FailingRenderer)).await;
    add_user(&h.db, "alice").await;

    let outcome = buy_gold(&h.service, "alice").await;
    assert!(outcome.entitlement.barcode_image.is_none());

    // The token alone is enough to redeem
    let result = h
        .service
        .scan(&outcome.entitlement.barcode_token, &station())
        .await
        .unwrap();
    assert_eq!(result.quota_remaining, 4);

    let err = h
        .service
        .regenerate_barcode_image("alice", &outcome.entitlement.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Render(_)));

    // Renderer is back: regenerate from the unchanged token
    let healthy = build(h.db.clone(), WashpassConfig::default(), Arc::new(QrSvgRenderer::new()));
    let regenerated = healthy
        .service
        .regenerate_barcode_image("alice", &outcome.entitlement.id)
        .await
        .unwrap();
    assert_eq!(regenerated.barcode_token, outcome.entitlement.barcode_token);
    assert!(regenerated.barcode_image.is_some());
}

#[tokio::test]
async fn test_regenerate_rejects_other_owner() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    add_user(&h.db, "bob").await;
    let outcome = buy_gold(&h.service, "alice").await;

    let err = h
        .service
        .regenerate_barcode_image("bob", &outcome.entitlement.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_queries_apply_lazy_expiry() {
    let h = harness().await;
    add_user(&h.db, "alice").await;
    let gold = h.db.catalog().find_package(GOLD).await.unwrap().unwrap();

    let current = buy_gold(&h.service, "alice").await;

    let mut tx = h.db.begin().await.unwrap();
    let stale = h
        .service
        .store()
        .create_in(&mut tx, "alice", &gold, None, Utc::now() - Duration::days(40))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let active = h.service.list_active("alice").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, current.entitlement.id);

    let all = h.service.list_all("alice").await.unwrap();
    assert_eq!(all.len(), 2);
    let stale_now = all.iter().find(|e| e.id == stale.id).unwrap();
    assert_eq!(stale_now.status, EntitlementStatus::Expired);

    let stats = h.service.stats("alice").await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.exhausted, 0);
    assert_eq!(stats.washes_remaining, 5);

    assert_eq!(h.service.store().count_by_owner("alice").await.unwrap(), 2);
}
