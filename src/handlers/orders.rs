//! E-transfer order placement.

use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::services::checkout::CheckoutRequest;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

/// POST /api/v1/orders
///
/// Places an e-transfer order: totals are recomputed server-side, the order
/// is persisted immediately, fulfillment runs synchronously, and the order
/// number comes back for the bank-transfer instructions screen.
pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    enforce_rate_limit(&state, "checkout", &headers)?;

    let response = state
        .services
        .checkout
        .place_etransfer_order(&headers, payload)
        .await?;

    Ok(Json(response))
}
