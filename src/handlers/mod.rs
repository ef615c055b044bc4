pub mod admin;
pub mod gateway;
pub mod health;
pub mod orders;
pub mod promo;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::idempotency::IdempotencyStore;
use crate::rate_limiter::extract_client_ip;
use crate::services::catalog::CatalogClient;
use crate::services::checkout::CheckoutService;
use crate::services::fulfillment::FulfillmentService;
use crate::services::gateway::GatewayAdapter;
use crate::services::mailer::MailSender;
use crate::services::orders::OrderStore;
use crate::services::promotions::PromotionService;
use crate::services::tasks::TaskTracker;
use crate::AppState;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Aggregated services used by the HTTP handlers, wired once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderStore>,
    pub checkout: Arc<CheckoutService>,
    pub promotions: Arc<PromotionService>,
    pub catalog: Arc<dyn CatalogClient>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        catalog: Arc<dyn CatalogClient>,
        mailer: Arc<dyn MailSender>,
        tracker: Arc<dyn TaskTracker>,
        idempotency: Arc<IdempotencyStore>,
        config: &AppConfig,
    ) -> Self {
        let orders = Arc::new(OrderStore::new(db));
        let fulfillment = Arc::new(FulfillmentService::new(
            orders.clone(),
            catalog.clone(),
            mailer,
            tracker,
            config.admin_email.clone(),
            config.low_stock_threshold,
            Duration::from_secs(config.low_stock_alert_cooldown_seconds),
        ));
        let gateway = Arc::new(GatewayAdapter::new(config.gateway.clone()));
        let checkout = Arc::new(CheckoutService::new(
            orders.clone(),
            catalog.clone(),
            fulfillment,
            gateway,
            idempotency,
        ));
        let promotions = Arc::new(PromotionService::new(catalog.clone()));

        Self {
            orders,
            checkout,
            promotions,
            catalog,
        }
    }
}

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::place_order))
        .route("/payments/gateway/create", post(gateway::create_session))
        .route("/payments/gateway/postback", post(gateway::postback))
        .route("/promo/verify", post(promo::verify_promo))
        .nest("/admin", admin::admin_routes())
}

/// Endpoint-scoped per-IP rate limiting; requests without a resolvable IP
/// pass (fail-open, see the rate limiter module).
pub fn enforce_rate_limit(
    state: &AppState,
    scope: &'static str,
    headers: &HeaderMap,
) -> Result<(), ServiceError> {
    let max = match scope {
        "promo" => state.config.rate_limit_promo_attempts,
        _ => state.config.rate_limit_checkout_attempts,
    };

    let ip = extract_client_ip(headers);
    let result = state
        .rate_limiter
        .check(scope, ip.as_deref(), max, state.config.rate_limit_window());

    if !result.allowed {
        warn!(scope, ip = ?ip, "rate limit exceeded");
        return Err(ServiceError::RateLimitExceeded);
    }
    Ok(())
}
