//! # Payment Reconciler
//!
//! Turns a confirmed payment into exactly one entitlement.
//!
//! ## Two Entry Points, One Completion
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  reconcile_local (card / cash)      reconcile_external (gateway)       │
//! │       │                                  │                              │
//! │  validate car + package + amount    payment row by checkout id         │
//! │  insert pending payment             (unknown id → Uncorrelated)        │
//! │  (insert-if-absent on external ref; server-to-server verification      │
//! │   a reused ref must match payer,                                       │
//! │   package, car, amount, method)                                        │
//! │       │                             (code not allowed → failed)        │
//! │       └──────────────┬───────────────────┘                              │
//! │                      ▼                                                  │
//! │  BEGIN                                                                  │
//! │    payment pending → completed   (CAS, first write)                    │
//! │         │ 0 rows ──► ROLLBACK ──► return existing result (duplicate)   │
//! │         ▼                                                               │
//! │    mint token + insert entitlement                                     │
//! │    link payment → entitlement                                          │
//! │    purchase_count += 1  (RETURNING)                                    │
//! │    first purchase of a referred account → referral_reward_retry task   │
//! │  COMMIT                                                                 │
//! │         │                                                               │
//! │         ├──► render barcode image (failure leaves it empty)            │
//! │         ├──► task scheduled ? maybe_reward now, task marked done       │
//! │         │       (failure leaves the task to the worker)                │
//! │         └──► purchase notification (fire-and-forget)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A duplicate confirmation is not an error: it returns the first result
//! with `duplicate = true`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use washpass_core::validation::{check_car_compatibility, check_payment_amount, validate_identifier};
use washpass_core::{
    Car, CoreError, Entitlement, NotificationDraft, NotificationKind, PackageDefinition,
    PaymentMethod, PaymentRecord, PaymentStatus, ReferralRewardPayload, TaskKind, ValidationError,
};
use washpass_db::{Database, DbError, SqliteConnection};

use crate::collaborators::{CarRegistry, PackageCatalog};
use crate::config::GatewayConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{CheckoutDraft, PaymentGateway};
use crate::notify::Notifier;
use crate::referral::ReferralCoordinator;
use crate::store::EntitlementStore;

/// How long the synchronous reward attempt has before the task worker
/// picks up the same reward.
const REWARD_TASK_GRACE_SECS: i64 = 60;

// =============================================================================
// Requests & Results
// =============================================================================

/// A payment taken at the counter or on a station terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPayment {
    pub user_id: String,
    pub package_id: String,
    pub car_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    /// Terminal reference. When present, a repeat is answered with the
    /// first result.
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub package_id: String,
    pub car_id: String,
}

/// What the app needs to open the hosted payment page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub payment_id: String,
    pub checkout_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Inbound confirmation. Everything except the id is an untrusted hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfirmation {
    pub transaction_id: String,
    #[serde(default)]
    pub resource_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub payment: PaymentRecord,
    pub entitlement: Entitlement,
    /// True when this call replayed an already completed payment.
    pub duplicate: bool,
}

// =============================================================================
// Reconciler
// =============================================================================

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Database,
    store: EntitlementStore,
    referrals: ReferralCoordinator,
    cars: Arc<dyn CarRegistry>,
    catalog: Arc<dyn PackageCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_config: GatewayConfig,
    notifier: Notifier,
}

impl PaymentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        store: EntitlementStore,
        referrals: ReferralCoordinator,
        cars: Arc<dyn CarRegistry>,
        catalog: Arc<dyn PackageCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: GatewayConfig,
        notifier: Notifier,
    ) -> Self {
        PaymentReconciler {
            db,
            store,
            referrals,
            cars,
            catalog,
            gateway,
            gateway_config,
            notifier,
        }
    }

    // =========================================================================
    // Local payments
    // =========================================================================

    /// Completes a payment collected locally and creates its entitlement.
    pub async fn reconcile_local(&self, input: LocalPayment) -> EngineResult<PurchaseOutcome> {
        if input.method == PaymentMethod::Gateway {
            return Err(ValidationError::NotAllowed {
                field: "method".to_string(),
                allowed: vec!["card".to_string(), "cash".to_string()],
            }
            .into());
        }

        let user_id = validate_identifier("user_id", &input.user_id)?;
        let (package, car) = self
            .validate_purchase(&user_id, &input.package_id, &input.car_id)
            .await?;
        check_payment_amount(&package, input.amount_cents)?;

        let external_reference = input
            .external_reference
            .as_deref()
            .map(|r| validate_identifier("external_reference", r))
            .transpose()?;

        if let Some(reference) = external_reference.as_deref() {
            if let Some(existing) = self.db.payments().find_by_external_id(reference).await? {
                debug!(payment_id = %existing.id, "Local payment reference seen before");
                ensure_same_purchase(&existing, &user_id, &package.id, &car.id, &input)?;
                return self.resume(existing).await;
            }
        }

        let now = Utc::now();
        self.db.accounts().ensure(&user_id, now).await?;

        let payment = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            payer_user_id: user_id,
            package_id: package.id.clone(),
            car_ref: Some(car.id.clone()),
            amount_cents: input.amount_cents,
            method: input.method,
            status: PaymentStatus::Pending,
            external_transaction_id: external_reference.clone(),
            entitlement_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        if !self.db.payments().insert_if_absent(&payment).await? {
            // Lost the insert race to a concurrent delivery of the same reference
            let reference = external_reference.unwrap_or_default();
            let existing = self
                .db
                .payments()
                .find_by_external_id(&reference)
                .await?
                .ok_or_else(|| DbError::not_found("Payment", reference.clone()))?;
            ensure_same_purchase(&existing, &payment.payer_user_id, &package.id, &car.id, &input)?;
            return self.resume(existing).await;
        }

        self.complete(payment, &package).await
    }

    // =========================================================================
    // Gateway payments
    // =========================================================================

    /// Prepares a gateway checkout and records the pending payment that a
    /// later confirmation must correlate with.
    pub async fn begin_checkout(&self, request: CheckoutRequest) -> EngineResult<CheckoutSession> {
        let user_id = validate_identifier("user_id", &request.user_id)?;
        let (package, car) = self
            .validate_purchase(&user_id, &request.package_id, &request.car_id)
            .await?;

        let payment_id = Uuid::new_v4().to_string();
        let checkout_id = self
            .gateway
            .prepare_checkout(&CheckoutDraft {
                amount: package.price(),
                merchant_reference: payment_id.clone(),
            })
            .await?;

        let now = Utc::now();
        self.db.accounts().ensure(&user_id, now).await?;

        let payment = PaymentRecord {
            id: payment_id,
            payer_user_id: user_id,
            package_id: package.id.clone(),
            car_ref: Some(car.id.clone()),
            amount_cents: package.price_cents,
            method: PaymentMethod::Gateway,
            status: PaymentStatus::Pending,
            external_transaction_id: Some(checkout_id.clone()),
            entitlement_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        if !self.db.payments().insert_if_absent(&payment).await? {
            return Err(DbError::duplicate("payments.external_transaction_id", checkout_id).into());
        }

        info!(payment_id = %payment.id, checkout_id = %checkout_id, amount = %package.price(), "Checkout started");

        Ok(CheckoutSession {
            payment_id: payment.id,
            checkout_id,
            amount_cents: payment.amount_cents,
            currency: self.gateway_config.currency.clone(),
        })
    }

    /// Verifies a gateway confirmation with the gateway itself and completes
    /// the correlated payment.
    pub async fn reconcile_external(
        &self,
        confirmation: GatewayConfirmation,
    ) -> EngineResult<PurchaseOutcome> {
        let transaction_id = validate_identifier("transaction_id", &confirmation.transaction_id)?;
        if let Some(hint) = confirmation.resource_path.as_deref() {
            debug!(transaction_id = %transaction_id, resource_path = %hint, "Ignoring inbound status hint");
        }

        let payment = self
            .db
            .payments()
            .find_by_external_id(&transaction_id)
            .await?
            .ok_or(CoreError::UncorrelatedConfirmation)?;

        match payment.status {
            PaymentStatus::Completed => return self.settled(&payment.id).await,
            PaymentStatus::Failed => return Err(CoreError::PaymentAlreadyFailed.into()),
            PaymentStatus::Pending => {}
        }

        let verification = match self.gateway.verify(&transaction_id).await {
            Ok(verification) => verification,
            Err(e) => {
                // The payment stays pending so a later confirmation can verify again
                warn!(payment_id = %payment.id, error = %e, "Gateway verification call failed");
                return Err(e.into());
            }
        };

        if !self.gateway_config.is_success_code(&verification.result_code) {
            let reason = format!(
                "gateway result code {}{}",
                verification.result_code,
                verification
                    .description
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            );
            return Err(self.fail(&payment, &reason, &verification.result_code).await);
        }

        if let Some(charged) = verification.amount_cents {
            if charged != payment.amount_cents {
                let reason = format!(
                    "gateway charged {} but {} was expected",
                    charged, payment.amount_cents
                );
                return Err(self.fail(&payment, &reason, &verification.result_code).await);
            }
        }

        let package = self.package_of(&payment).await?;
        self.complete(payment, &package).await
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    async fn validate_purchase(
        &self,
        user_id: &str,
        package_id: &str,
        car_id: &str,
    ) -> EngineResult<(PackageDefinition, Car)> {
        let package_id = validate_identifier("package_id", package_id)?;
        let car_id = validate_identifier("car_id", car_id)?;

        let package = self
            .catalog
            .find_package(&package_id)
            .await?
            .ok_or_else(|| CoreError::PackageNotFound(package_id.clone()))?;
        let car = self
            .cars
            .find_owned_car(user_id, &car_id)
            .await?
            .ok_or_else(|| CoreError::CarNotFound(car_id.clone()))?;

        check_car_compatibility(&package, &car)?;
        Ok((package, car))
    }

    /// The package a payment was recorded against.
    async fn package_of(&self, payment: &PaymentRecord) -> EngineResult<PackageDefinition> {
        self.catalog
            .find_package(&payment.package_id)
            .await?
            .ok_or_else(|| CoreError::PackageNotFound(payment.package_id.clone()).into())
    }

    /// Picks up a payment that already exists for an idempotency key.
    async fn resume(&self, existing: PaymentRecord) -> EngineResult<PurchaseOutcome> {
        match existing.status {
            PaymentStatus::Completed => self.settled(&existing.id).await,
            PaymentStatus::Failed => Err(CoreError::PaymentAlreadyFailed.into()),
            PaymentStatus::Pending => {
                let package = self.package_of(&existing).await?;
                self.complete(existing, &package).await
            }
        }
    }

    async fn fail(&self, payment: &PaymentRecord, reason: &str, code: &str) -> EngineError {
        match self.db.payments().mark_failed(&payment.id, reason, Utc::now()).await {
            Ok(_) => warn!(payment_id = %payment.id, reason = %reason, "Payment failed verification"),
            Err(e) => error!(payment_id = %payment.id, error = %e, "Failed to mark payment failed"),
        }
        CoreError::GatewayVerificationFailed {
            code: code.to_string(),
        }
        .into()
    }

    /// The completion transaction shared by both entry points.
    async fn complete(
        &self,
        mut payment: PaymentRecord,
        package: &PackageDefinition,
    ) -> EngineResult<PurchaseOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !self.db.payments().complete_in(&mut tx, &payment.id, now).await? {
            tx.rollback().await?;
            debug!(payment_id = %payment.id, "Payment settled concurrently");
            return self.settled(&payment.id).await;
        }

        let entitlement = self
            .store
            .create_in(
                &mut tx,
                &payment.payer_user_id,
                package,
                payment.car_ref.as_deref(),
                now,
            )
            .await?;
        self.db
            .payments()
            .link_entitlement_in(&mut tx, &payment.id, &entitlement.id)
            .await?;
        let purchase_count = self
            .db
            .accounts()
            .increment_purchase_count_in(&mut tx, &payment.payer_user_id)
            .await?;
        let reward_task = if purchase_count == 1 {
            self.schedule_reward_in(&mut tx, &payment.payer_user_id, &entitlement.id, now)
                .await?
        } else {
            None
        };

        tx.commit().await?;

        payment.status = PaymentStatus::Completed;
        payment.entitlement_id = Some(entitlement.id.clone());
        payment.updated_at = now;

        info!(
            payment_id = %payment.id,
            entitlement_id = %entitlement.id,
            payer = %payment.payer_user_id,
            purchase_count,
            "Payment completed"
        );

        let entitlement = self.store.attach_image(entitlement).await;

        if let Some(task_id) = reward_task {
            self.reward_first_purchase(&payment.payer_user_id, &entitlement.id, &task_id)
                .await;
        }

        self.notifier.send(NotificationDraft {
            user_id: payment.payer_user_id.clone(),
            kind: NotificationKind::Purchase,
            message: format!(
                "Your {} is ready: {} washes",
                package.name, package.wash_units
            ),
            related_entity_id: Some(entitlement.id.clone()),
        });

        // The reward step may have topped this entitlement up
        let entitlement = self
            .db
            .entitlements()
            .find_by_id(&entitlement.id)
            .await?
            .unwrap_or(entitlement);

        Ok(PurchaseOutcome {
            payment,
            entitlement,
            duplicate: false,
        })
    }

    /// Records the reward of a referred account's first purchase as a task
    /// on the completion transaction. Returns the task id, or `None` when the
    /// account has no inviter.
    async fn schedule_reward_in(
        &self,
        conn: &mut SqliteConnection,
        payer_user_id: &str,
        entitlement_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<String>> {
        let referred = self
            .db
            .accounts()
            .find_by_id_in(&mut *conn, payer_user_id)
            .await?
            .is_some_and(|account| account.referred_by.is_some());
        if !referred {
            return Ok(None);
        }

        let payload = ReferralRewardPayload {
            invitee_user_id: payer_user_id.to_string(),
            entitlement_id: entitlement_id.to_string(),
        };
        let task = self
            .db
            .tasks()
            .schedule_in(
                conn,
                TaskKind::ReferralRewardRetry,
                &payload,
                now + Duration::seconds(REWARD_TASK_GRACE_SECS),
            )
            .await?;
        Ok(Some(task.id))
    }

    /// Runs the referral reward right away. A failure never fails the
    /// purchase; the committed task retries it.
    async fn reward_first_purchase(&self, payer_user_id: &str, entitlement_id: &str, task_id: &str) {
        match self.referrals.maybe_reward(payer_user_id, entitlement_id).await {
            Ok(outcome) => {
                debug!(payer = %payer_user_id, ?outcome, "Referral reward step finished");
                if let Err(e) = self.db.tasks().mark_done(task_id, Utc::now()).await {
                    warn!(task_id = %task_id, error = %e, "Failed to close referral reward task");
                }
            }
            Err(e) => {
                warn!(payer = %payer_user_id, task_id = %task_id, error = %e, "Referral reward failed, left to the task worker");
            }
        }
    }

    /// The result of a payment that is already settled.
    async fn settled(&self, payment_id: &str) -> EngineResult<PurchaseOutcome> {
        let payment = self
            .db
            .payments()
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| CoreError::PaymentNotFound(payment_id.to_string()))?;

        match payment.status {
            PaymentStatus::Completed => {
                let entitlement_id = payment.entitlement_id.clone().ok_or_else(|| {
                    EngineError::Internal(format!("completed payment {} has no entitlement", payment.id))
                })?;
                let entitlement = self.store.find_by_id(&entitlement_id).await?;
                info!(payment_id = %payment.id, entitlement_id = %entitlement.id, "Duplicate confirmation answered with existing result");
                Ok(PurchaseOutcome {
                    payment,
                    entitlement,
                    duplicate: true,
                })
            }
            PaymentStatus::Failed => Err(CoreError::PaymentAlreadyFailed.into()),
            PaymentStatus::Pending => Err(EngineError::Internal(format!(
                "payment {} is still pending after completion",
                payment.id
            ))),
        }
    }
}

/// A reused terminal reference must describe the purchase it was first
/// recorded for; anything else is a conflict, never a replay.
fn ensure_same_purchase(
    existing: &PaymentRecord,
    user_id: &str,
    package_id: &str,
    car_id: &str,
    input: &LocalPayment,
) -> EngineResult<()> {
    let same = existing.payer_user_id == user_id
        && existing.package_id == package_id
        && existing.car_ref.as_deref() == Some(car_id)
        && existing.amount_cents == input.amount_cents
        && existing.method == input.method;

    if same {
        return Ok(());
    }
    warn!(
        payment_id = %existing.id,
        caller = %user_id,
        "Payment reference reused for a different purchase"
    );
    Err(CoreError::PaymentReferenceConflict.into())
}
