pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use memory::InMemoryStore;
pub use rest::RestStore;
pub use traits::PropertyStore;
pub use types::{ClaimOutcome, IntentUpdate, SeedData};

use crate::config::{AppConfig, BackendKind};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the backend selected in configuration
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn PropertyStore>> {
    let store: Arc<dyn PropertyStore> = match config.backend {
        BackendKind::Memory => match &config.seed_path {
            Some(path) => Arc::new(InMemoryStore::load_seed(path).await?),
            None => Arc::new(InMemoryStore::new()),
        },
        BackendKind::Rest => {
            let url = config
                .backend_url
                .as_deref()
                .context("backend_url is required for the rest backend")?;
            Arc::new(RestStore::new(
                url,
                config.backend_api_key.as_deref(),
                Duration::from_secs(config.request_timeout_secs),
            )?)
        }
    };

    info!("Using {} backend", store.backend_name());
    Ok(store)
}
