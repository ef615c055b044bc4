//! Card-payment gateway endpoints: session creation and the inbound
//! asynchronous postback.

use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::rate_limiter::extract_client_ip;
use crate::services::checkout::CheckoutRequest;
use crate::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;

/// POST /api/v1/payments/gateway/create
///
/// Validates and persists a pending card order, then returns the encrypted
/// hosted-payment redirect URL. Safe to retry with an idempotency key: the
/// cached redirect comes back verbatim.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    enforce_rate_limit(&state, "checkout", &headers)?;

    let response = state
        .services
        .checkout
        .create_gateway_session(&headers, payload)
        .await?;

    Ok(Json(response))
}

/// POST /api/v1/payments/gateway/postback
///
/// Inbound server-to-server payment confirmation. The gateway expects the
/// XML acknowledgment envelope on HTTP 200 regardless of outcome; success
/// or failure travels in the `stat` attribute.
pub async fn postback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let source_ip = extract_client_ip(&headers);

    let xml = state
        .services
        .checkout
        .process_postback(&body, &headers, source_ip.as_deref())
        .await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
}
