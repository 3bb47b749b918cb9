use crate::models::{Anchor, ConversationThread, PropertyRecord};
use crate::spatial::BoundingBox;
use crate::store::types::{ClaimOutcome, IntentUpdate};
use anyhow::Result;
use async_trait::async_trait;

/// Common trait for every property backend.
/// Row-level authorization is not assumed: callers decide who may claim or
/// update before invoking the write methods.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Properties inside `bbox`, in stable backend order, at most `limit` rows
    async fn properties_in_bbox(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>>;

    async fn property_by_id(&self, id: &str) -> Result<Option<PropertyRecord>>;

    /// Properties for the given ids; unknown ids are skipped
    async fn properties_by_ids(&self, ids: &[String]) -> Result<Vec<PropertyRecord>>;

    /// Claim `id` for `user_id` unless someone else already holds it
    async fn claim_property(&self, id: &str, user_id: &str) -> Result<ClaimOutcome>;

    /// Apply the present fields of `update`; `None` when the property is unknown
    async fn update_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> Result<Option<PropertyRecord>>;

    async fn anchors_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Anchor>>;

    /// Every thread the user participates in, any role
    async fn threads_for_user(&self, user_id: &str) -> Result<Vec<ConversationThread>>;

    async fn insert_thread(&self, thread: &ConversationThread) -> Result<()>;

    /// Get the name of the backend
    fn backend_name(&self) -> &'static str;
}
