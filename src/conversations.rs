use crate::error::{AppError, Result};
use crate::models::{CollapsedThread, ConversationGroup, ConversationThread, Inbox};
use crate::status::can_start_conversation;
use crate::store::PropertyStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// `(property_id, counterparty_user_id)`; `None` if `user_id` is not a participant
pub fn dedupe_key<'a>(
    thread: &'a ConversationThread,
    user_id: &str,
) -> Option<(&'a str, &'a str)> {
    let counterparty = thread.counterparty_of(user_id)?;
    Some((thread.property_id.as_str(), counterparty))
}

/// Build the inbox for `user_id` from every thread they take part in.
///
/// Only the most recently updated thread per dedupe key is shown; the others
/// are listed in [`Inbox::collapsed`] and left untouched in storage. Groups
/// carry no status until [`ConversationService::inbox`] stamps them.
pub fn group_by_property(mut threads: Vec<ConversationThread>, user_id: &str) -> Inbox {
    threads.retain(|t| t.role_of(user_id).is_some());
    threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut kept_by_key: HashMap<(String, String), String> = HashMap::new();
    let mut kept = Vec::with_capacity(threads.len());
    let mut collapsed = Vec::new();

    for thread in threads {
        let Some((property_id, counterparty)) = dedupe_key(&thread, user_id) else {
            continue;
        };
        let key = (property_id.to_string(), counterparty.to_string());

        match kept_by_key.get(&key) {
            Some(kept_id) => collapsed.push(CollapsedThread {
                thread_id: thread.id.clone(),
                kept_thread_id: kept_id.clone(),
                property_id: key.0,
                counterparty_user_id: key.1,
            }),
            None => {
                kept_by_key.insert(key, thread.id.clone());
                kept.push(thread);
            }
        }
    }

    if !collapsed.is_empty() {
        let ids: Vec<&str> = collapsed.iter().map(|c| c.thread_id.as_str()).collect();
        debug!(
            "Collapsed {} duplicate thread(s) for user {}: {:?}",
            collapsed.len(),
            user_id,
            ids
        );
    }

    let mut groups: Vec<ConversationGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for thread in kept {
        let slot = *index.entry(thread.property_id.clone()).or_insert_with(|| {
            groups.push(ConversationGroup {
                property_id: thread.property_id.clone(),
                status: None,
                display_label: None,
                threads: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].threads.push(thread);
    }

    for group in &mut groups {
        group
            .threads
            .sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    }
    groups.sort_by(|a, b| {
        b.latest_activity()
            .cmp(&a.latest_activity())
            .then_with(|| a.property_id.cmp(&b.property_id))
    });

    Inbox { groups, collapsed }
}

/// Inbox reads and thread creation on top of a [`PropertyStore`]
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn PropertyStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }

    pub async fn inbox(&self, user_id: &str) -> Result<Inbox> {
        let threads = self
            .store
            .threads_for_user(user_id)
            .await
            .map_err(AppError::backend)?;
        let mut inbox = group_by_property(threads, user_id);

        let ids: Vec<String> = inbox.groups.iter().map(|g| g.property_id.clone()).collect();
        if ids.is_empty() {
            return Ok(inbox);
        }

        let properties: HashMap<String, _> = self
            .store
            .properties_by_ids(&ids)
            .await
            .map_err(AppError::backend)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for group in &mut inbox.groups {
            if let Some(property) = properties.get(&group.property_id) {
                group.status = property.status().for_display();
                group.display_label = property.display_label.clone();
            }
        }
        Ok(inbox)
    }

    /// Open a thread between `viewer_id` and the claimer of `property_id`.
    ///
    /// Returns the thread and whether it was newly created. An existing thread
    /// with the same participants is returned instead of a duplicate.
    pub async fn start(
        &self,
        property_id: &str,
        viewer_id: &str,
    ) -> Result<(ConversationThread, bool)> {
        let property = self
            .store
            .property_by_id(property_id)
            .await
            .map_err(AppError::backend)?
            .ok_or_else(|| AppError::not_found("property", property_id))?;

        let status = property.status();
        let owner_id = match property.claimed_by_user_id.as_deref() {
            Some(owner) if can_start_conversation(status) => owner.to_string(),
            _ => {
                return Err(AppError::conflict(
                    "CONVERSATION_NOT_ALLOWED",
                    format!("property {property_id} is not accepting conversations ({status})"),
                ))
            }
        };
        if owner_id == viewer_id {
            return Err(AppError::validation(
                "SELF_CONVERSATION",
                "cannot start a conversation about your own property",
            ));
        }

        let existing = self
            .store
            .threads_for_user(viewer_id)
            .await
            .map_err(AppError::backend)?
            .into_iter()
            .filter(|t| {
                t.property_id == property_id
                    && t.owner_user_id == owner_id
                    && t.viewer_user_id == viewer_id
            })
            .max_by_key(|t| t.updated_at);
        if let Some(thread) = existing {
            debug!("Reusing thread {} for property {}", thread.id, property_id);
            return Ok((thread, false));
        }

        let now = Utc::now();
        let thread = ConversationThread {
            id: Uuid::new_v4().to_string(),
            property_id: property_id.to_string(),
            owner_user_id: owner_id,
            viewer_user_id: viewer_id.to_string(),
            created_at: now,
            updated_at: now,
            last_message_at: None,
            last_message_preview: None,
        };
        self.store
            .insert_thread(&thread)
            .await
            .map_err(AppError::backend)?;

        info!("Started thread {} on property {}", thread.id, property_id);
        Ok((thread, true))
    }
}
