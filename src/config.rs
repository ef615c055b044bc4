use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CHECKOUT_ATTEMPTS_PER_WINDOW: u32 = 10;
const DEFAULT_PROMO_ATTEMPTS_PER_WINDOW: u32 = 20;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;
const DEFAULT_LOW_STOCK_COOLDOWN_SECS: u64 = 3600;
const DEFAULT_ADMIN_SESSION_TTL_SECS: u64 = 12 * 3600;
const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 10;

/// Hosted payment gateway configuration.
///
/// The cipher parameters themselves (AES-256-CBC, PBKDF2-SHA256, iteration
/// count) are fixed constants in the gateway adapter because they must match
/// the gateway's documented contract; only deployment identity lives here.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Externally-known hosted payment page base URL
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Merchant site identifier issued by the gateway
    #[serde(default)]
    pub site_id: Option<String>,

    /// Shared key for redirect-URL encryption; card payments are disabled
    /// while unset
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// URL the gateway posts payment confirmations back to
    #[serde(default)]
    pub postback_url: Option<String>,

    /// Comma-separated allow-list of gateway egress addresses
    #[serde(default = "default_gateway_callback_ips")]
    pub allowed_callback_ips: String,

    /// HMAC secret for inbound postback signatures; verification is skipped
    /// (with a warning) while unset
    #[serde(default)]
    pub postback_hmac_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            site_id: None,
            encryption_key: None,
            postback_url: None,
            allowed_callback_ips: default_gateway_callback_ips(),
            postback_hmac_secret: None,
        }
    }
}

impl GatewayConfig {
    pub fn allowed_ips(&self) -> Vec<String> {
        self.allowed_callback_ips
            .split(',')
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    /// Card payments need both a merchant id and an encryption key.
    pub fn card_payments_enabled(&self) -> bool {
        self.site_id.is_some() && self.encryption_key.is_some()
    }
}

/// Notification category for outbound mail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailCategory {
    Contact,
    Order,
    LowStock,
}

/// Resolved, immutable mail settings for one notification category.
#[derive(Clone, Debug)]
pub struct MailSettings {
    pub relay_url: String,
    pub from_address: String,
    pub api_token: Option<String>,
}

/// Raw mail configuration: a generic relay plus per-category overrides.
///
/// Call [`MailConfig::resolve`] exactly once per category instead of
/// re-deriving fallbacks at every call site.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default)]
    pub contact_relay_url: Option<String>,
    #[serde(default)]
    pub contact_from_address: Option<String>,
    #[serde(default)]
    pub contact_api_token: Option<String>,

    #[serde(default)]
    pub order_relay_url: Option<String>,
    #[serde(default)]
    pub order_from_address: Option<String>,
    #[serde(default)]
    pub order_api_token: Option<String>,

    #[serde(default)]
    pub low_stock_relay_url: Option<String>,
    #[serde(default)]
    pub low_stock_from_address: Option<String>,
    #[serde(default)]
    pub low_stock_api_token: Option<String>,
}

impl MailConfig {
    /// Resolves the settings for a category, falling back to the generic
    /// relay. `None` means the category is unconfigured and sends are
    /// recorded as skipped rather than attempted.
    pub fn resolve(&self, category: MailCategory) -> Option<MailSettings> {
        let (url, from, token) = match category {
            MailCategory::Contact => (
                self.contact_relay_url.as_ref(),
                self.contact_from_address.as_ref(),
                self.contact_api_token.as_ref(),
            ),
            MailCategory::Order => (
                self.order_relay_url.as_ref(),
                self.order_from_address.as_ref(),
                self.order_api_token.as_ref(),
            ),
            MailCategory::LowStock => (
                self.low_stock_relay_url.as_ref(),
                self.low_stock_from_address.as_ref(),
                self.low_stock_api_token.as_ref(),
            ),
        };

        let relay_url = url.or(self.relay_url.as_ref())?.clone();
        let from_address = from.or(self.from_address.as_ref())?.clone();
        let api_token = token.or(self.api_token.as_ref()).cloned();

        Some(MailSettings {
            relay_url,
            from_address,
            api_token,
        })
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (the durable order store)
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Legacy flat-file order list ingested once when the store is empty
    #[serde(default)]
    pub legacy_orders_path: Option<String>,

    /// Catalog service base URL; an empty in-memory catalog is used while
    /// unset (development only)
    #[serde(default)]
    pub catalog_base_url: Option<String>,

    /// Per-call timeout for outbound catalog/mail/tracker requests (seconds)
    #[serde(default = "default_outbound_timeout_secs")]
    pub outbound_timeout_secs: u64,

    /// Task-tracker webhook URL for order/stock notifications
    #[serde(default)]
    pub task_tracker_url: Option<String>,

    /// Rate limiting: checkout attempts per window per IP
    #[serde(default = "default_checkout_attempts")]
    pub rate_limit_checkout_attempts: u32,

    /// Rate limiting: promo-verification attempts per window per IP
    #[serde(default = "default_promo_attempts")]
    pub rate_limit_promo_attempts: u32,

    /// Rate limiting: window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_seconds: u64,

    /// Idempotency cache entry TTL (seconds)
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_seconds: u64,

    /// Inventory level at or below which a restock alert fires
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,

    /// Minimum interval between low-stock alerts (seconds)
    #[serde(default = "default_low_stock_cooldown_secs")]
    pub low_stock_alert_cooldown_seconds: u64,

    /// Recipient for admin order/low-stock notifications
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Shared secret exchanged for a signed admin dashboard session cookie
    #[serde(default)]
    pub admin_dashboard_secret: Option<String>,

    /// Admin session cookie validity window (seconds)
    #[serde(default = "default_admin_session_ttl_secs")]
    pub admin_session_ttl_seconds: u64,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound mail configuration
    #[serde(default)]
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn idempotency_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn rate_limit_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rate_limit_window_seconds)
    }

    /// Constraints the `validator` derive cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), String> {
        if let Some(key) = &self.gateway.encryption_key {
            if key.len() < 16 {
                return Err("gateway.encryption_key must be at least 16 characters".into());
            }
        }
        if let Some(secret) = &self.admin_dashboard_secret {
            if secret.len() < 16 {
                return Err("admin_dashboard_secret must be at least 16 characters".into());
            }
        }
        if self.low_stock_threshold < 0 {
            return Err("low_stock_threshold must not be negative".into());
        }
        if self.rate_limit_window_seconds == 0 {
            return Err("rate_limit_window_seconds must be at least 1".into());
        }
        Ok(())
    }

    /// Minimal configuration for tests and tooling.
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            legacy_orders_path: None,
            catalog_base_url: None,
            outbound_timeout_secs: default_outbound_timeout_secs(),
            task_tracker_url: None,
            rate_limit_checkout_attempts: default_checkout_attempts(),
            rate_limit_promo_attempts: default_promo_attempts(),
            rate_limit_window_seconds: default_rate_limit_window_secs(),
            idempotency_ttl_seconds: default_idempotency_ttl_secs(),
            low_stock_threshold: default_low_stock_threshold(),
            low_stock_alert_cooldown_seconds: default_low_stock_cooldown_secs(),
            admin_email: None,
            admin_dashboard_secret: None,
            admin_session_ttl_seconds: default_admin_session_ttl_secs(),
            gateway: GatewayConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Configuration constraint violated: {0}")]
    Constraint(String),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_gateway_base_url() -> String {
    "https://secure.cardpay-gateway.example/hosted/pay".to_string()
}

fn default_gateway_callback_ips() -> String {
    // The gateway's documented single egress address.
    "198.51.100.24".to_string()
}

fn default_checkout_attempts() -> u32 {
    DEFAULT_CHECKOUT_ATTEMPTS_PER_WINDOW
}

fn default_promo_attempts() -> u32 {
    DEFAULT_PROMO_ATTEMPTS_PER_WINDOW
}

fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_idempotency_ttl_secs() -> u64 {
    DEFAULT_IDEMPOTENCY_TTL_SECS
}

fn default_low_stock_threshold() -> i64 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_low_stock_cooldown_secs() -> u64 {
    DEFAULT_LOW_STOCK_COOLDOWN_SECS
}

fn default_admin_session_ttl_secs() -> u64 {
    DEFAULT_ADMIN_SESSION_TTL_SECS
}

fn default_outbound_timeout_secs() -> u64 {
    DEFAULT_OUTBOUND_TIMEOUT_SECS
}

/// Initializes the tracing subscriber from configuration.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads configuration from files and `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint violated: {}", e);
        AppConfigError::Constraint(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_category_falls_back_to_generic_relay() {
        let mail = MailConfig {
            relay_url: Some("https://mail.example/send".into()),
            from_address: Some("orders@shop.example".into()),
            low_stock_from_address: Some("alerts@shop.example".into()),
            ..Default::default()
        };

        let order = mail.resolve(MailCategory::Order).expect("order settings");
        assert_eq!(order.relay_url, "https://mail.example/send");
        assert_eq!(order.from_address, "orders@shop.example");

        // Category override wins for the overridden field only.
        let low = mail.resolve(MailCategory::LowStock).expect("low stock");
        assert_eq!(low.from_address, "alerts@shop.example");
        assert_eq!(low.relay_url, "https://mail.example/send");
    }

    #[test]
    fn unconfigured_mail_resolves_to_none() {
        let mail = MailConfig::default();
        assert!(mail.resolve(MailCategory::Order).is_none());
        assert!(mail.resolve(MailCategory::Contact).is_none());
    }

    #[test]
    fn gateway_allowed_ips_parses_comma_list() {
        let gateway = GatewayConfig {
            allowed_callback_ips: "198.51.100.24, 203.0.113.9".into(),
            ..Default::default()
        };
        assert_eq!(gateway.allowed_ips(), vec!["198.51.100.24", "203.0.113.9"]);
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let mut cfg = AppConfig::for_tests("sqlite::memory:");
        cfg.gateway.encryption_key = Some("short".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.gateway.encryption_key = Some("a-sufficiently-long-key".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }
}
