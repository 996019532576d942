//! Environment-derived core configuration.
//!
//! All variables are optional with sensible defaults; invalid values fall
//! back with a logged warning rather than failing startup.

use kari_memory::{AdapterTimeouts, ReconcilerConfig};
use kari_router::RouterConfig;

/// Full-text index connection settings.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Index host
    pub host: String,
    /// Index port, default 9200
    pub port: u16,
    /// Index name, default `kari_memory`
    pub index: String,
    /// Optional basic-auth user
    pub user: Option<String>,
    /// Optional basic-auth password
    pub password: Option<String>,
}

/// Authoritative store connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Store host
    pub host: String,
    /// Store port, default 5432
    pub port: u16,
    /// Database name, default `kari`
    pub db: String,
    /// Database user, default `kari`
    pub user: String,
    /// Optional password
    pub password: Option<String>,
}

/// Assembled configuration for [`crate::Core`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Cache/buffer backend URL (`REDIS_URL`)
    pub redis_url: Option<String>,
    /// Full-text index settings (`ELASTIC_*`); absent without a host
    pub elastic: Option<ElasticConfig>,
    /// Analytics store path (`DUCKDB_PATH`)
    pub duckdb_path: Option<String>,
    /// Authoritative store settings (`POSTGRES_*`); absent without a host
    pub postgres: Option<PostgresConfig>,
    /// Reconciler timing and drain limits
    pub reconciler: ReconcilerConfig,
    /// Per-adapter operation deadlines
    pub adapter_timeouts: AdapterTimeouts,
    /// Router tuning
    pub router: RouterConfig,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_port(name: &str, default: u16) -> u16 {
    match env_string(name) {
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                tracing::warn!(
                    env_var = name,
                    value = %raw,
                    default,
                    "invalid port value; using default"
                );
                default
            }
        },
        None => default,
    }
}

impl CoreConfig {
    /// Read the recognized environment variables.
    pub fn from_env() -> Self {
        let elastic = env_string("ELASTIC_HOST").map(|host| ElasticConfig {
            host,
            port: env_port("ELASTIC_PORT", 9200),
            index: env_string("ELASTIC_INDEX").unwrap_or_else(|| "kari_memory".to_string()),
            user: env_string("ELASTIC_USER"),
            password: env_string("ELASTIC_PASSWORD"),
        });
        let postgres = env_string("POSTGRES_HOST").map(|host| PostgresConfig {
            host,
            port: env_port("POSTGRES_PORT", 5432),
            db: env_string("POSTGRES_DB").unwrap_or_else(|| "kari".to_string()),
            user: env_string("POSTGRES_USER").unwrap_or_else(|| "kari".to_string()),
            password: env_string("POSTGRES_PASSWORD"),
        });
        Self {
            redis_url: env_string("REDIS_URL"),
            elastic,
            duckdb_path: env_string("DUCKDB_PATH"),
            postgres,
            reconciler: ReconcilerConfig::default(),
            adapter_timeouts: AdapterTimeouts::default(),
            router: RouterConfig::default(),
        }
    }
}
