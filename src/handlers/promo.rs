//! Promo code verification, rate-limited against brute-force probing.

use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct VerifyPromoRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPromoResponse {
    pub ok: bool,
    pub discount: Decimal,
}

/// POST /api/v1/promo/verify
pub async fn verify_promo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyPromoRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    enforce_rate_limit(&state, "promo", &headers)?;

    let discount = state.services.promotions.verify_code(&payload.code).await?;

    Ok(Json(VerifyPromoResponse { ok: true, discount }))
}
