//! # WashPass API
//!
//! HTTP surface over the WashPass engine.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           WashPass API                                  │
//! │                                                                         │
//! │  Mobile app ──► auth gateway ──(x-user-id)──► /v1/...  ──┐              │
//! │  Station    ──────────────────────────────► /v1/scans ──┼─► WashPass   │
//! │  Gateway    ─────────────────► /v1/payments/gateway/confirm ┘   engine  │
//! │                                                                         │
//! │  Errors leave as { code, message } with a status per ErrorKind          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod extract;
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use washpass_engine::WashPass;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use extract::{Caller, USER_ID_HEADER};

/// Builds the full router over a ready service.
pub fn router(service: WashPass) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/v1/packages/{id}", get(routes::get_package))
        .route("/v1/purchases", post(routes::purchase))
        .route("/v1/checkouts", post(routes::begin_checkout))
        .route(
            "/v1/payments/gateway/confirm",
            post(routes::confirm_gateway_payment),
        )
        .route("/v1/scans", post(routes::scan))
        .route("/v1/entitlements", get(routes::list_entitlements))
        .route("/v1/entitlements/active", get(routes::list_active_entitlements))
        .route("/v1/entitlements/stats", get(routes::entitlement_stats))
        .route(
            "/v1/entitlements/{id}/barcode",
            post(routes::regenerate_barcode),
        )
        .route("/v1/washes", get(routes::wash_history))
        .route("/v1/stations/{id}/washes", get(routes::station_history))
        .route("/v1/referrals", get(routes::referral_status))
        .route("/v1/referrals/code", get(routes::referral_code))
        .route("/v1/referrals/accept", post(routes::accept_referral))
        .with_state(service)
}
