use std::env;
use std::time::Duration;

use crate::webhook;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_DB_PATH: &str = "./kiosk-pay.db";
const DEFAULT_RATE_LIMIT_RPM: u64 = 120;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5000;
/// AES-256 key length; shorter passphrases are refused.
const MIN_PASSPHRASE_LEN: usize = 32;

#[derive(Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,
    /// SQLite database path (orders, settlements, credentials)
    pub db_path: String,
    /// Vault passphrase; the first 32 bytes are the AES key
    pub vault_passphrase: Vec<u8>,
    /// Bearer token for /admin routes (None = admin disabled)
    pub admin_token: Option<String>,
    /// Bearer token for /metrics (None = forbidden unless public_metrics)
    pub metrics_token: Option<String>,
    /// Serve /metrics without a token when no token is set
    pub public_metrics: bool,
    /// Outbound settlement webhook targets (HTTPS only)
    pub webhook_urls: Vec<String>,
    /// Root secret for webhook signatures
    pub webhook_secret: Option<String>,
    /// CORS allowed origins for the admin dashboard
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute per IP
    pub rate_limit_rpm: u64,
    /// Bound on every storage call
    pub storage_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("vault_passphrase", &"[REDACTED]")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .field("webhook_urls", &self.webhook_urls)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("storage_timeout", &self.storage_timeout)
            .finish()
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Required: vault passphrase
        let vault_passphrase = var("VAULT_PASSPHRASE")
            .ok_or(ConfigError::MissingRequired("VAULT_PASSPHRASE"))?
            .into_bytes();
        if vault_passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(ConfigError::WeakPassphrase(vault_passphrase.len()));
        }

        let port = match var("PORT") {
            Some(p) => p.parse().map_err(|_| ConfigError::InvalidNumber("PORT", p))?,
            None => DEFAULT_PORT,
        };

        let db_path = var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let admin_token = var("ADMIN_TOKEN");
        let metrics_token = var("METRICS_TOKEN");
        let public_metrics = var("KIOSK_PUBLIC_METRICS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        // Optional: webhook URLs, HTTPS only
        let webhook_urls = list(var("WEBHOOK_URLS"));
        webhook::validate_webhook_urls(&webhook_urls).map_err(ConfigError::InvalidUrl)?;
        let webhook_secret = var("WEBHOOK_SECRET");

        let allowed_origins = list(var("ALLOWED_ORIGINS"));
        if allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::InvalidUrl(
                "wildcard CORS origin '*' is not allowed for admin endpoints".to_string(),
            ));
        }

        let rate_limit_rpm = match var("RATE_LIMIT_RPM") {
            Some(r) => r
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("RATE_LIMIT_RPM", r))?,
            None => DEFAULT_RATE_LIMIT_RPM,
        };

        let storage_timeout_ms: u64 = match var("STORAGE_TIMEOUT_MS") {
            Some(t) => t
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidNumber("STORAGE_TIMEOUT_MS", t))?,
            None => DEFAULT_STORAGE_TIMEOUT_MS,
        };

        if admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set; /admin routes are disabled");
        }
        if metrics_token.is_none() && !public_metrics {
            tracing::warn!(
                "METRICS_TOKEN not set; /metrics is forbidden unless KIOSK_PUBLIC_METRICS=true"
            );
        }
        if !webhook_urls.is_empty() && webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set; settlement webhooks will be unsigned");
        }

        Ok(Self {
            port,
            db_path,
            vault_passphrase,
            admin_token,
            metrics_token,
            public_metrics,
            webhook_urls,
            webhook_secret,
            allowed_origins,
            rate_limit_rpm,
            storage_timeout: Duration::from_millis(storage_timeout_ms),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("VAULT_PASSPHRASE is too short ({0} bytes, minimum 32)")]
    WeakPassphrase(usize),

    #[error("invalid number for {0}: {1}")]
    InvalidNumber(&'static str, String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
