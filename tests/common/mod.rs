//! Test harness: application state over an in-memory SQLite database with
//! in-memory collaborators, driven through the real router.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_api::{
    build_router,
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig},
    handlers::AppServices,
    idempotency::IdempotencyStore,
    models::{CatalogProduct, PromoCode},
    rate_limiter::RateLimiter,
    services::{
        catalog::InMemoryCatalog, mailer::RecordingMailer, tasks::RecordingTaskTracker,
    },
    AppState,
};
use tower::ServiceExt;

pub const GATEWAY_IP: &str = "198.51.100.24";
pub const POSTBACK_SECRET: &str = "postback-test-secret";

/// Helper harness for spinning up an application backed by in-memory state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub catalog: Arc<InMemoryCatalog>,
    pub mailer: Arc<RecordingMailer>,
    pub tracker: Arc<RecordingTaskTracker>,
}

impl TestApp {
    /// Construct a new test application with the default test configuration.
    pub async fn new() -> Self {
        Self::with_config(Self::default_config()).await
    }

    /// Test configuration with the gateway fully configured.
    pub fn default_config() -> AppConfig {
        let mut cfg = AppConfig::for_tests("sqlite::memory:");
        cfg.gateway.site_id = Some("PS-STORE-01".to_string());
        cfg.gateway.encryption_key = Some("test-gateway-encryption-key".to_string());
        cfg.gateway.postback_hmac_secret = Some(POSTBACK_SECRET.to_string());
        cfg.gateway.allowed_callback_ips = GATEWAY_IP.to_string();
        cfg.admin_dashboard_secret = Some("admin-dashboard-test-secret".to_string());
        cfg.admin_email = Some("admin@shop.example".to_string());
        cfg
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let db = establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("in-memory sqlite");
        run_migrations(&db).await.expect("migrations");
        let db = Arc::new(db);

        let catalog = Arc::new(InMemoryCatalog::new());
        let mailer = Arc::new(RecordingMailer::new());
        let tracker = Arc::new(RecordingTaskTracker::new());
        let idempotency = Arc::new(IdempotencyStore::new(cfg.idempotency_ttl()));

        let services = AppServices::new(
            db.clone(),
            catalog.clone(),
            mailer.clone(),
            tracker.clone(),
            idempotency.clone(),
            &cfg,
        );

        let state = AppState {
            db,
            config: cfg,
            services,
            idempotency,
            rate_limiter: Arc::new(RateLimiter::new()),
        };

        Self {
            router: build_router(state.clone()),
            state,
            catalog,
            mailer,
            tracker,
        }
    }

    /// Seeds one active catalog product.
    pub fn seed_product(&self, id: i64, slug: &str, price: Decimal, stock: i64) {
        self.catalog.add_product(CatalogProduct {
            id,
            slug: slug.to_string(),
            name: slug.to_string(),
            price,
            stock,
            status: "active".to_string(),
        });
    }

    pub fn seed_promo(&self, code: &str, percent: Decimal, active: bool) {
        self.catalog.set_promos(vec![PromoCode {
            code: code.to_string(),
            percent,
            active,
        }]);
    }

    /// Sends a request through the router with optional JSON body and extra
    /// headers.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json_body) => builder
                .header("content-type", "application/json")
                .body(Body::from(json_body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    /// Sends a raw-body postback with the given headers.
    pub async fn post_raw(&self, path: &str, body: Vec<u8>, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 response")
}

/// A complete, valid checkout payload for one line of product 1.
pub fn checkout_payload(quantity: i64, client_total: &str) -> Value {
    json!({
        "first_name": "Ada",
        "last_name": "Hill",
        "email": "ada@example.com",
        "billing_address": {
            "street": "12 Water St",
            "city": "Vancouver",
            "province": "BC",
            "postal_code": "V6B 1A1",
            "country": "CA"
        },
        "shipping_method": "express",
        "items": [{ "product_id": 1, "quantity": quantity }],
        "client_total": client_total
    })
}

/// HMAC-SHA256 hex signature the way the gateway signs postbacks.
pub fn sign_postback(body: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
