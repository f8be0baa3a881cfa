//! Route handlers. Each one is a thin translation between JSON and a single
//! [`WashPass`] operation.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use washpass_core::{
    CoreError, Entitlement, EntitlementStats, Money, PackageDefinition, PaymentMethod,
    PaymentStatus, RedemptionResult, Referral, ReferralSummary, StationContext, ValidationError, WashEvent,
};
use washpass_engine::{
    CheckoutRequest, CheckoutSession, EngineError, GatewayConfirmation, LocalPayment,
    PurchaseOutcome, WashPass,
};

use crate::error::{ApiError, ApiResult};
use crate::extract::{Body, Caller};

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 100;

// =============================================================================
// Request Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub package_id: String,
    pub car_id: String,
    /// Decimal amount as shown to the customer, e.g. `"120.00"`.
    pub amount: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub package_id: String,
    pub car_id: String,
}

/// Gateway redirect parameters, accepted under either naming.
#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    #[serde(alias = "id")]
    pub transaction_id: String,
    #[serde(default, alias = "resourcePath")]
    pub resource_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub barcode: String,
    pub station_id: String,
    pub operator_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptReferralBody {
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

impl HistoryParams {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
}

/// What an unauthenticated gateway redirect may learn. The barcode is only
/// served to its owner through `/v1/entitlements`.
#[derive(Debug, Serialize)]
pub struct ConfirmationReceipt {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub entitlement_id: Option<String>,
    pub duplicate: bool,
}

impl From<PurchaseOutcome> for ConfirmationReceipt {
    fn from(outcome: PurchaseOutcome) -> Self {
        ConfirmationReceipt {
            payment_id: outcome.payment.id,
            status: outcome.payment.status,
            entitlement_id: Some(outcome.entitlement.id),
            duplicate: outcome.duplicate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReferralCodeResponse {
    pub referral_code: String,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health(State(service): State<WashPass>) -> impl IntoResponse {
    let database = service.health_check().await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
    };
    (status, Json(body))
}

pub async fn get_package(
    State(service): State<WashPass>,
    Path(package_id): Path<String>,
) -> ApiResult<Json<PackageDefinition>> {
    Ok(Json(service.find_package(&package_id).await?))
}

pub async fn purchase(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
    Body(body): Body<PurchaseBody>,
) -> ApiResult<(StatusCode, Json<PurchaseOutcome>)> {
    let amount = Money::parse_decimal(&body.amount).ok_or_else(|| {
        EngineError::from(CoreError::Validation(ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: "expected a decimal amount such as 120.00".to_string(),
        }))
    })?;

    let outcome = service
        .purchase(LocalPayment {
            user_id,
            package_id: body.package_id,
            car_id: body.car_id,
            amount_cents: amount.cents(),
            method: body.method,
            external_reference: body.external_reference,
        })
        .await?;

    Ok((created_unless_duplicate(&outcome), Json(outcome)))
}

pub async fn begin_checkout(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
    Body(body): Body<CheckoutBody>,
) -> ApiResult<(StatusCode, Json<CheckoutSession>)> {
    let session = service
        .begin_checkout(CheckoutRequest {
            user_id,
            package_id: body.package_id,
            car_id: body.car_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Called by the gateway redirect, so there is no caller header; the
/// transaction id is the only correlation. Answers with a receipt, never the
/// entitlement itself.
pub async fn confirm_gateway_payment(
    State(service): State<WashPass>,
    Body(body): Body<ConfirmBody>,
) -> ApiResult<(StatusCode, Json<ConfirmationReceipt>)> {
    let outcome = service
        .confirm_gateway_payment(GatewayConfirmation {
            transaction_id: body.transaction_id,
            resource_path: body.resource_path,
        })
        .await?;
    let status = created_unless_duplicate(&outcome);
    Ok((status, Json(ConfirmationReceipt::from(outcome))))
}

pub async fn scan(
    State(service): State<WashPass>,
    Body(body): Body<ScanBody>,
) -> ApiResult<Json<RedemptionResult>> {
    let station = StationContext {
        station_id: body.station_id,
        operator_id: body.operator_id,
    };
    let result = service.scan(&body.barcode, &station).await?;
    info!(
        station_id = %station.station_id,
        wash_event_id = %result.wash_event_id,
        "Wash redeemed"
    );
    Ok(Json(result))
}

pub async fn list_entitlements(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
) -> ApiResult<Json<Vec<Entitlement>>> {
    Ok(Json(service.list_all(&user_id).await?))
}

pub async fn list_active_entitlements(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
) -> ApiResult<Json<Vec<Entitlement>>> {
    Ok(Json(service.list_active(&user_id).await?))
}

pub async fn entitlement_stats(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
) -> ApiResult<Json<EntitlementStats>> {
    Ok(Json(service.stats(&user_id).await?))
}

pub async fn regenerate_barcode(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
    Path(entitlement_id): Path<String>,
) -> ApiResult<Json<Entitlement>> {
    Ok(Json(
        service
            .regenerate_barcode_image(&user_id, &entitlement_id)
            .await?,
    ))
}

pub async fn wash_history(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<Vec<WashEvent>>> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    Ok(Json(service.wash_history(&user_id, params.limit()).await?))
}

pub async fn station_history(
    State(service): State<WashPass>,
    Path(station_id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<Vec<WashEvent>>> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    Ok(Json(
        service.station_history(&station_id, params.limit()).await?,
    ))
}

pub async fn referral_code(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
) -> ApiResult<Json<ReferralCodeResponse>> {
    let referral_code = service.referral_code(&user_id).await?;
    Ok(Json(ReferralCodeResponse { referral_code }))
}

pub async fn accept_referral(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
    Body(body): Body<AcceptReferralBody>,
) -> ApiResult<(StatusCode, Json<Referral>)> {
    let referral = service.accept_referral(&user_id, &body.code).await?;
    Ok((StatusCode::CREATED, Json(referral)))
}

pub async fn referral_status(
    State(service): State<WashPass>,
    Caller(user_id): Caller,
) -> ApiResult<Json<ReferralSummary>> {
    Ok(Json(service.referral_status(&user_id).await?))
}

fn created_unless_duplicate(outcome: &PurchaseOutcome) -> StatusCode {
    if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}
