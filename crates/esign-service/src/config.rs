//! Configuration for esignd

use esign_core::{EngineConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Signing engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Enable permissive CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Postgres when a database url is configured, memory otherwise.
    #[default]
    Auto,
    Memory,
    Postgres,
}

/// Envelope persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Auto,
            database_url: None,
            max_connections: default_pool_size(),
        }
    }
}

impl StorageConfig {
    /// Resolve the backend choice into a store configuration.
    pub fn resolve(&self) -> Result<StoreConfig, String> {
        let url = self
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        match (self.backend, url) {
            (StorageBackend::Memory, _) | (StorageBackend::Auto, None) => Ok(StoreConfig::memory()),
            (StorageBackend::Postgres, None) => {
                Err("storage.backend=postgres requires storage.database_url".to_string())
            }
            (StorageBackend::Postgres | StorageBackend::Auto, Some(url)) => {
                Ok(StoreConfig::postgres(url, self.max_connections))
            }
        }
    }
}

/// Document storage and signed URL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Directory holding original and sealed documents
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,

    /// Externally reachable base URL used in signed document links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Secret the document URL signing key is derived from. When unset a
    /// random per-process secret is used and links die with the process.
    #[serde(default)]
    pub url_secret: Option<String>,

    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            public_base_url: default_public_base_url(),
            url_secret: None,
            url_ttl_secs: default_url_ttl(),
        }
    }
}

/// Shortest accepted document URL secret.
pub const MIN_URL_SECRET_LEN: usize = 32;

impl DocumentsConfig {
    /// The configured URL secret, `None` when unset or blank.
    pub fn checked_url_secret(&self) -> Result<Option<&str>, String> {
        match self.url_secret.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(secret) if secret.len() < MIN_URL_SECRET_LEN => Err(format!(
                "documents.url_secret must be at least {} characters",
                MIN_URL_SECRET_LEN
            )),
            Some(secret) => Ok(Some(secret)),
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Base of the signing links placed in invitations
    #[serde(default = "default_sign_base_url")]
    pub sign_base_url: String,

    /// Deliver messages by POSTing them here; log them when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            sign_base_url: default_sign_base_url(),
            webhook_url: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_pool_size() -> u32 {
    5
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("data/documents")
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_url_ttl() -> u64 {
    900
}

fn default_sign_base_url() -> String {
    "http://127.0.0.1:8080/sign".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Layer defaults, an optional file and `ESIGN_*` environment variables.
    ///
    /// Nested keys use a double underscore: `ESIGN_STORAGE__DATABASE_URL`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ESIGN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Memory storage, documents under `root`, everything else default.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..StorageConfig::default()
            },
            documents: DocumentsConfig {
                root: root.into(),
                ..DocumentsConfig::default()
            },
            ..Self::default()
        }
    }
}
