use crate::models::{Anchor, ConversationThread, PropertyRecord};
use crate::spatial::{BoundingBox, Located};
use crate::store::traits::PropertyStore;
use crate::store::types::{ClaimOutcome, IntentUpdate, SeedData};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Row written to the claims table on every successful claim
#[derive(Debug, Clone)]
pub struct ClaimRow {
    pub property_id: String,
    pub user_id: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

/// In-process backend used for local development and tests.
/// Rows keep insertion order, which is the order viewport queries return.
#[derive(Default)]
pub struct InMemoryStore {
    properties: RwLock<Vec<PropertyRecord>>,
    anchors: RwLock<Vec<Anchor>>,
    threads: RwLock<Vec<ConversationThread>>,
    claims: RwLock<Vec<ClaimRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        Self {
            properties: RwLock::new(seed.properties),
            anchors: RwLock::new(seed.anchors),
            threads: RwLock::new(seed.threads),
            claims: RwLock::new(Vec::new()),
        }
    }

    /// Load a JSON seed file
    pub async fn load_seed(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;

        info!(
            "Loaded seed: {} properties, {} anchors, {} threads",
            seed.properties.len(),
            seed.anchors.len(),
            seed.threads.len()
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn claim_rows(&self) -> Vec<ClaimRow> {
        self.claims.read().await.clone()
    }
}

#[async_trait]
impl PropertyStore for InMemoryStore {
    async fn properties_in_bbox(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>> {
        let properties = self.properties.read().await;
        Ok(properties
            .iter()
            .filter(|p| bbox.contains(p.coordinate()))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn property_by_id(&self, id: &str) -> Result<Option<PropertyRecord>> {
        let properties = self.properties.read().await;
        Ok(properties.iter().find(|p| p.id == id).cloned())
    }

    async fn properties_by_ids(&self, ids: &[String]) -> Result<Vec<PropertyRecord>> {
        let properties = self.properties.read().await;
        Ok(properties
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn claim_property(&self, id: &str, user_id: &str) -> Result<ClaimOutcome> {
        let mut properties = self.properties.write().await;
        let Some(property) = properties.iter_mut().find(|p| p.id == id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        if property.is_claimed_by(user_id) {
            return Ok(ClaimOutcome::AlreadyMine(property.clone()));
        }
        if property.is_claimed == Some(true) {
            return Ok(ClaimOutcome::ClaimedByOther);
        }

        property.is_claimed = Some(true);
        property.claimed_by_user_id = Some(user_id.to_string());
        let claimed = property.clone();
        drop(properties);

        self.claims.write().await.push(ClaimRow {
            property_id: id.to_string(),
            user_id: user_id.to_string(),
            status: "claimed",
            created_at: Utc::now(),
        });
        debug!("Recorded claim of {} by {}", id, user_id);

        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn update_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> Result<Option<PropertyRecord>> {
        let mut properties = self.properties.write().await;
        Ok(properties.iter_mut().find(|p| p.id == id).map(|property| {
            update.apply_to(&mut property.intent);
            property.clone()
        }))
    }

    async fn anchors_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Anchor>> {
        let anchors = self.anchors.read().await;
        Ok(anchors
            .iter()
            .filter(|a| bbox.contains(a.coordinate()))
            .cloned()
            .collect())
    }

    async fn threads_for_user(&self, user_id: &str) -> Result<Vec<ConversationThread>> {
        let threads = self.threads.read().await;
        Ok(threads
            .iter()
            .filter(|t| t.role_of(user_id).is_some())
            .cloned()
            .collect())
    }

    async fn insert_thread(&self, thread: &ConversationThread) -> Result<()> {
        self.threads.write().await.push(thread.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
