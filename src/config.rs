use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.paystack.co";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CURRENCY: &str = "GHS";

/// Payment gateway (Paystack) configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Secret API key; also keys the webhook HMAC when no dedicated webhook
    /// secret is configured.
    #[validate(length(min = 1))]
    pub secret_key: String,

    /// Publishable key handed to clients.
    #[serde(default)]
    pub public_key: Option<String>,

    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Where the gateway redirects the payer after checkout.
    #[validate(length(min = 1))]
    pub callback_url: String,

    /// Shared secret for inbound webhook signatures. Falls back to
    /// `secret_key` when unset, matching the gateway's default scheme.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Single operating currency for every charge.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Outbound call timeout in seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn webhook_secret(&self) -> &str {
        self.webhook_secret.as_deref().unwrap_or(&self.secret_key)
    }
}

/// Fixed prices for the non-order products, in the operating currency.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    pub premium_listing: Decimal,
    pub bundle_package: Decimal,
    pub hostel_booking: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            premium_listing: Decimal::new(25000, 2),
            bundle_package: Decimal::new(60000, 2),
            hostel_booking: Decimal::new(35000, 2),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub pricing: PricingConfig,
}

impl AppConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

/// Loads configuration from `config/{default,<env>}.toml` plus `APP__`
/// environment overrides, then validates it.
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
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("campus_market_api={level},tower_http=debug");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_config() -> GatewayConfig {
        GatewayConfig {
            secret_key: "sk_test_secret".to_string(),
            public_key: None,
            base_url: default_gateway_base_url(),
            callback_url: "https://app.example.com/payment/callback".to_string(),
            webhook_secret: None,
            currency: default_currency(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }

    #[test]
    fn webhook_secret_falls_back_to_secret_key() {
        let mut gateway = gateway_config();
        assert_eq!(gateway.webhook_secret(), "sk_test_secret");

        gateway.webhook_secret = Some("whsec_dedicated".to_string());
        assert_eq!(gateway.webhook_secret(), "whsec_dedicated");
    }

    #[test]
    fn default_pricing_matches_published_rates() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.premium_listing, Decimal::new(25000, 2));
        assert_eq!(pricing.bundle_package, Decimal::new(60000, 2));
        assert_eq!(pricing.hostel_booking, Decimal::new(35000, 2));
    }
}
