//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Where the ledger lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process maps; nothing survives a restart.
    Memory,
    /// Local `RocksDB` directory (`DATA_DIR`).
    RocksDb,
    /// PostgreSQL (`DATABASE_URL`).
    Postgres,
}

impl StorageBackend {
    /// Canonical lowercase name, as accepted by `STORAGE_BACKEND`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::RocksDb => "rocksdb",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: postgres).
    pub storage_backend: StorageBackend,

    /// Path to `RocksDB` data directory (default: "/data/fusion-ledger").
    pub data_dir: String,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// Upper bound on pooled PostgreSQL connections.
    pub database_max_connections: u32,

    /// Identity provider base URL; JWKS is fetched from
    /// `{auth_issuer}/.well-known/jwks.json` and `iss` must match it.
    pub auth_issuer: String,

    /// Expected JWT audience (default: "authenticated").
    pub auth_audience: String,

    /// Shared HS256 secret. When set, tokens are validated with it instead of JWKS.
    pub auth_jwt_secret: Option<String>,

    /// Service API key for the fusion workflow.
    pub service_api_key: Option<String>,

    /// Admin API key for reconciliation and adjustments.
    pub admin_api_key: Option<String>,

    /// Stripe webhook signing secret. Unset rejects every webhook.
    pub stripe_webhook_secret: Option<String>,

    /// Maximum age of a signed webhook, in seconds.
    pub stripe_signature_tolerance_seconds: i64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Interval of the background reconciliation pass; 0 disables it.
    pub reconcile_interval_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            storage_backend: std::env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|s| {
                    s.parse()
                        .map_err(|e: String| tracing::warn!(error = %e, "Ignoring STORAGE_BACKEND"))
                        .ok()
                })
                .unwrap_or(defaults.storage_backend),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            auth_issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_webhook_secret: load_stripe_webhook_secret(),
            stripe_signature_tolerance_seconds: env_parse("STRIPE_SIGNATURE_TOLERANCE_SECONDS")
                .unwrap_or(defaults.stripe_signature_tolerance_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            reconcile_interval_seconds: env_parse("RECONCILE_INTERVAL_SECONDS")
                .unwrap_or(defaults.reconcile_interval_seconds),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Load the Stripe webhook secret from file or environment.
fn load_stripe_webhook_secret() -> Option<String> {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(Path::new(path)) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            if secrets.webhook_secret.is_some() {
                return secrets.webhook_secret;
            }
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    std::env::var("STRIPE_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            storage_backend: StorageBackend::Postgres,
            data_dir: "/data/fusion-ledger".into(),
            database_url: None,
            database_max_connections: 10,
            auth_issuer: "http://localhost:9999/auth/v1".into(),
            auth_audience: "authenticated".into(),
            auth_jwt_secret: None,
            service_api_key: None,
            admin_api_key: None,
            stripe_webhook_secret: None,
            stripe_signature_tolerance_seconds: crate::stripe::DEFAULT_TOLERANCE_SECONDS,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            reconcile_interval_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_names() {
        assert_eq!("memory".parse(), Ok(StorageBackend::Memory));
        assert_eq!("RocksDB".parse(), Ok(StorageBackend::RocksDb));
        assert_eq!(" postgres ".parse(), Ok(StorageBackend::Postgres));
        assert!("sqlite".parse::<StorageBackend>().is_err());

        for backend in [StorageBackend::Memory, StorageBackend::RocksDb, StorageBackend::Postgres] {
            assert_eq!(backend.as_str().parse(), Ok(backend));
        }
    }

    #[test]
    fn defaults_fail_closed() {
        let config = ServiceConfig::default();
        assert_eq!(
            config.stripe_signature_tolerance_seconds,
            crate::stripe::DEFAULT_TOLERANCE_SECONDS
        );
        assert!(config.stripe_webhook_secret.is_none());
        assert!(config.admin_api_key.is_none());
    }

    #[test]
    fn origins_are_trimmed() {
        assert_eq!(
            parse_origins("https://pokefusion.app, http://localhost:3000,"),
            vec!["https://pokefusion.app", "http://localhost:3000"]
        );
    }

    #[test]
    fn secrets_file_is_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stripe.json");
        std::fs::write(&path, r#"{"webhook_secret": "whsec_test"}"#).unwrap();

        let secrets: StripeSecrets = load_secrets_file(&path).unwrap();
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whsec_test"));

        std::fs::write(&path, "not json").unwrap();
        assert!(load_secrets_file::<StripeSecrets>(&path).is_err());
    }
}
