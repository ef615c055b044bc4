//! Storefront API Library
//!
//! Checkout and payment-confirmation backend for a direct-to-consumer
//! peptide storefront: authoritative pricing, stock validation, idempotent
//! order creation, the hosted card-gateway redirect/postback protocol, and
//! the durable order/retry data model.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod idempotency;
pub mod migrator;
pub mod models;
pub mod rate_limiter;
pub mod services;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub idempotency: Arc<idempotency::IdempotencyStore>,
    pub rate_limiter: Arc<rate_limiter::RateLimiter>,
}

/// Builds the full application router over a prepared state. Shared by the
/// binary and the integration-test harness.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", handlers::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
