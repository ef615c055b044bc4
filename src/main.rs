use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let outbound_timeout = Duration::from_secs(cfg.outbound_timeout_secs);

    // External collaborators behind their narrow interfaces.
    let catalog: Arc<dyn api::services::catalog::CatalogClient> = match &cfg.catalog_base_url {
        Some(base_url) => Arc::new(api::services::catalog::HttpCatalogClient::new(
            base_url.clone(),
            outbound_timeout,
        )?),
        None => {
            warn!("catalog_base_url not configured; using an empty in-memory catalog");
            Arc::new(api::services::catalog::InMemoryCatalog::new())
        }
    };

    let mailer: Arc<dyn api::services::mailer::MailSender> = Arc::new(
        api::services::mailer::HttpMailRelay::new(&cfg.mail, outbound_timeout)?,
    );

    let tracker: Arc<dyn api::services::tasks::TaskTracker> = match &cfg.task_tracker_url {
        Some(url) => Arc::new(api::services::tasks::HttpTaskTracker::new(
            url.clone(),
            outbound_timeout,
        )?),
        None => Arc::new(api::services::tasks::NoopTaskTracker),
    };

    // Shared in-memory stores, constructed once and injected.
    let idempotency = Arc::new(api::idempotency::IdempotencyStore::new(
        cfg.idempotency_ttl(),
    ));
    let rate_limiter = Arc::new(api::rate_limiter::RateLimiter::new());

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        catalog,
        mailer,
        tracker,
        idempotency.clone(),
        &cfg,
    );

    // One-time legacy flat-file bootstrap, only while the store is empty.
    if let Some(legacy_path) = &cfg.legacy_orders_path {
        match services
            .orders
            .import_legacy_orders(Path::new(legacy_path))
            .await
        {
            Ok(0) => {}
            Ok(count) => info!(count, "imported legacy order list"),
            Err(e) => warn!("legacy order import failed: {}", e),
        }
    }

    if !cfg.gateway.card_payments_enabled() {
        warn!("gateway site id/encryption key not configured; card payments disabled");
    }

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        services,
        idempotency,
        rate_limiter,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.is_development() {
        info!("Using permissive CORS (development environment)");
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS");
        return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into());
    };

    let app = api::build_router(app_state).layer(cors_layer);

    // Bind and serve
    let addr = SocketAddr::new(cfg.host.parse()?, cfg.port);
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
