//! Configuration for the ledger service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration
///
/// Loaded from a TOML file or from environment variables. Unknown keys
/// are ignored so configs can be shared with the surrounding service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Server configuration
    pub server: ServerConfig,
}

/// Which storage backend a resolver constructs ledgers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// Embedded RocksDB, one database per ledger under `storage.dir`
    Embedded,

    /// PostgreSQL, one schema per ledger on a shared pool
    Relational,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub driver: StorageDriver,

    /// Directory for embedded databases
    pub dir: PathBuf,

    /// Embedded backend settings
    pub embedded: EmbeddedConfig,

    /// Relational backend settings
    pub relational: RelationalConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::Embedded,
            dir: PathBuf::from("./data"),
            embedded: EmbeddedConfig::default(),
            relational: RelationalConfig::default(),
        }
    }
}

/// Embedded backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Base name for per-ledger database paths
    pub db_name: String,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            db_name: "ledger".to_string(),
        }
    }
}

/// Relational backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// PostgreSQL connection URI
    pub conn_string: String,

    /// Pool size shared across ledgers
    pub max_connections: u32,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            conn_string: "postgresql://localhost:5432/ledger".to_string(),
            max_connections: 10,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP settings, consumed by the router that mounts on the resolver
    pub http: HttpConfig,
}

/// HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address for the HTTP API
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3068".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Load defaults with environment variable overrides.
    pub fn from_env() -> crate::Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Config::default();

        if let Ok(driver) = std::env::var("LEDGERD_STORAGE_DRIVER") {
            config.storage.driver = match driver.as_str() {
                "embedded" => StorageDriver::Embedded,
                "relational" => StorageDriver::Relational,
                other => {
                    return Err(crate::Error::Config(format!(
                        "unknown storage driver: {other:?}"
                    )))
                }
            };
        }

        if let Ok(dir) = std::env::var("LEDGERD_STORAGE_DIR") {
            config.storage.dir = PathBuf::from(dir);
        }

        if let Ok(name) = std::env::var("LEDGERD_EMBEDDED_DB_NAME") {
            config.storage.embedded.db_name = name;
        }

        if let Ok(conn) = std::env::var("LEDGERD_CONN_STRING") {
            config.storage.relational.conn_string = conn;
        }

        if let Ok(addr) = std::env::var("LEDGERD_HTTP_ADDR") {
            config.server.http.bind_address = addr;
        }

        Ok(config)
    }
}
