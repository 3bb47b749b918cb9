use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Which backend serves property rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Rest,
}

/// Service configuration, read from `NEST_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    pub backend: BackendKind,
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub jwt_secret: String,
    /// JSON seed for the memory backend
    pub seed_path: Option<String>,
    /// Upstream tile URL template containing `{z}`, `{x}` and `{y}`
    pub tile_upstream_url: Option<String>,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Load `.env` if present, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_builder(Config::builder().add_source(Environment::with_prefix("NEST")))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder
            .set_default("bind_addr", "127.0.0.1:8080")?
            .set_default("backend", "memory")?
            .set_default("jwt_secret", DEV_JWT_SECRET)?
            .set_default("cache_ttl_secs", 30)?
            .set_default("request_timeout_secs", 30)?
            .build()?
            .try_deserialize()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            backend: BackendKind::Memory,
            backend_url: None,
            backend_api_key: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            seed_path: None,
            tile_upstream_url: None,
            cache_ttl_secs: 30,
            request_timeout_secs: 30,
        }
    }
}
