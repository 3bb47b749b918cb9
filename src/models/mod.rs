use crate::spatial::{BoundingBox, Coordinate, Located};
use crate::status::{resolve_status, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner-declared intent flags layered on top of claim state.
///
/// Every flag is tri-state: `None` means the column is unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentFlags {
    #[serde(default)]
    pub soft_listing: Option<bool>,
    #[serde(default)]
    pub settled: Option<bool>,
    #[serde(default)]
    pub is_for_sale: Option<bool>,
    #[serde(default)]
    pub is_for_rent: Option<bool>,
}

/// One physical property as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub display_label: Option<String>,
    #[serde(default)]
    pub is_claimed: Option<bool>,
    /// Only set when `is_claimed == Some(true)`
    #[serde(default)]
    pub claimed_by_user_id: Option<String>,
    #[serde(flatten)]
    pub intent: IntentFlags,
}

impl PropertyRecord {
    pub fn status(&self) -> Status {
        resolve_status(self.is_claimed, &self.intent)
    }

    pub fn is_claimed_by(&self, user_id: &str) -> bool {
        self.is_claimed == Some(true) && self.claimed_by_user_id.as_deref() == Some(user_id)
    }
}

impl Located for PropertyRecord {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Outward-facing property payload.
///
/// Carries `is_mine` instead of the claimer's identifier, which never leaves
/// the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyView {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub display_label: Option<String>,
    #[serde(default)]
    pub is_claimed: Option<bool>,
    #[serde(flatten)]
    pub intent: IntentFlags,
    pub is_mine: bool,
    /// `null` while the claim state is unset
    pub status: Option<Status>,
}

impl PropertyView {
    pub fn from_record(record: PropertyRecord, current_user: Option<&str>) -> Self {
        let is_mine = match (current_user, record.claimed_by_user_id.as_deref()) {
            (Some(me), Some(owner)) => me == owner,
            _ => false,
        };
        let status = record.status().for_display();

        Self {
            id: record.id,
            lat: record.lat,
            lon: record.lon,
            postcode: record.postcode,
            street: record.street,
            house_number: record.house_number,
            display_label: record.display_label,
            is_claimed: record.is_claimed,
            intent: record.intent,
            is_mine,
            status,
        }
    }
}

impl Located for PropertyView {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Visible map region plus zoom level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportRequest {
    pub bbox: BoundingBox,
    pub zoom: u8,
}

impl ViewportRequest {
    pub fn new(bbox: BoundingBox, zoom: u8) -> Self {
        Self { bbox, zoom }
    }
}

/// Proximity category of a point of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorCategory {
    School,
    Transport,
    Amenity,
    Spirit,
}

/// Raw point of interest as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: String,
    pub name: String,
    /// Free-form type string, mapped to a category by lookup
    pub anchor_type: String,
    pub lat: f64,
    pub lon: f64,
}

impl Located for Anchor {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Anchor measured against one focused property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityAnchor {
    pub id: String,
    pub name: String,
    pub category: AnchorCategory,
    pub distance_meters: f64,
    pub walk_minutes: u32,
}

/// Role a participant plays in a conversation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Viewer,
}

/// A two-party thread about one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationThread {
    pub id: String,
    pub property_id: String,
    pub owner_user_id: String,
    pub viewer_user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl ConversationThread {
    pub fn role_of(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.owner_user_id == user_id {
            Some(ParticipantRole::Owner)
        } else if self.viewer_user_id == user_id {
            Some(ParticipantRole::Viewer)
        } else {
            None
        }
    }

    /// The participant playing the opposite role to `user_id`.
    pub fn counterparty_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            ParticipantRole::Owner => Some(&self.viewer_user_id),
            ParticipantRole::Viewer => Some(&self.owner_user_id),
        }
    }

    /// Last message time, or the thread's update time if it has no messages.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.updated_at)
    }
}

/// All of one user's visible threads about a single property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationGroup {
    pub property_id: String,
    /// Status chip; absent when the property could not be loaded
    pub status: Option<Status>,
    pub display_label: Option<String>,
    pub threads: Vec<ConversationThread>,
}

impl ConversationGroup {
    pub fn latest_activity(&self) -> Option<DateTime<Utc>> {
        self.threads.first().map(ConversationThread::last_activity)
    }
}

/// A thread hidden from the inbox because a fresher one shares its dedupe key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapsedThread {
    pub thread_id: String,
    pub kept_thread_id: String,
    pub property_id: String,
    pub counterparty_user_id: String,
}

/// Aggregated inbox for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub groups: Vec<ConversationGroup>,
    pub collapsed: Vec<CollapsedThread>,
}
