//! Admin dashboard surface: a shared secret is exchanged for an HMAC-signed
//! `timestamp.signature` session cookie, recomputed and verified on every
//! dashboard request.

use crate::errors::ServiceError;
use crate::models::{PromoCode, StockUpdate};
use crate::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const SESSION_COOKIE: &str = "admin_session";

/// Tolerated clock skew for a token timestamp slightly in the future.
const CLOCK_SKEW_SECS: i64 = 60;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_session))
        .route("/orders", get(list_orders))
        .route("/stock", put(update_stock))
        .route("/promos", get(list_promos).post(upsert_promo))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub secret: String,
}

/// POST /api/v1/admin/session
async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state
        .config
        .admin_dashboard_secret
        .as_deref()
        .ok_or_else(|| ServiceError::Unauthorized("Admin dashboard is disabled".to_string()))?;

    if !constant_time_eq(payload.secret.as_bytes(), secret.as_bytes()) {
        warn!("admin session request with wrong secret");
        return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = sign_session(Utc::now().timestamp(), secret);
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE, token, state.config.admin_session_ttl_seconds
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    ))
}

/// GET /api/v1/admin/orders
async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    ensure_admin(&headers, &state)?;
    let orders = state.services.orders.list_orders().await?;
    Ok(Json(json!({ "ok": true, "orders": orders })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    pub updates: Vec<StockUpdate>,
}

/// PUT /api/v1/admin/stock
async fn update_stock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ensure_admin(&headers, &state)?;
    state.services.catalog.write_stock(&payload.updates).await?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/v1/admin/promos
async fn list_promos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    ensure_admin(&headers, &state)?;
    let promos = state.services.promotions.list_codes().await?;
    Ok(Json(json!({ "ok": true, "promos": promos })))
}

/// POST /api/v1/admin/promos
async fn upsert_promo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(promo): Json<PromoCode>,
) -> Result<impl IntoResponse, ServiceError> {
    ensure_admin(&headers, &state)?;
    state.services.promotions.upsert_code(&promo).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Verifies the signed session cookie on a dashboard request.
fn ensure_admin(headers: &HeaderMap, state: &AppState) -> Result<(), ServiceError> {
    let secret = state
        .config
        .admin_dashboard_secret
        .as_deref()
        .ok_or_else(|| ServiceError::Unauthorized("Admin dashboard is disabled".to_string()))?;

    let token = session_cookie(headers)
        .ok_or_else(|| ServiceError::Unauthorized("Missing admin session".to_string()))?;

    if verify_session(&token, secret, state.config.admin_session_ttl_seconds as i64) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "Invalid or expired admin session".to_string(),
        ))
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(SESSION_COOKIE) {
            return parts.next().map(str::to_string);
        }
    }
    None
}

fn sign_session(timestamp: i64, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    format!("{}.{}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn verify_session(token: &str, secret: &str, ttl_secs: i64) -> bool {
    let Some((timestamp_str, signature)) = token.split_once('.') else {
        return false;
    };
    let Ok(timestamp) = timestamp_str.parse::<i64>() else {
        return false;
    };

    let age = Utc::now().timestamp() - timestamp;
    if age > ttl_secs || age < -CLOCK_SKEW_SECS {
        return false;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(timestamp_str.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
