use crate::models::{Anchor, ConversationThread, IntentFlags, PropertyRecord};
use serde::{Deserialize, Serialize};

/// Partial update of a property's intent flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentUpdate {
    /// Open to talking
    #[serde(default)]
    pub soft_listing: Option<bool>,
    #[serde(default)]
    pub settled: Option<bool>,
    #[serde(default)]
    pub is_for_sale: Option<bool>,
    #[serde(default)]
    pub is_for_rent: Option<bool>,
}

impl Default for IntentUpdate {
    fn default() -> Self {
        Self {
            soft_listing: None,
            settled: None,
            is_for_sale: None,
            is_for_rent: None,
        }
    }
}

impl IntentUpdate {
    pub fn is_empty(&self) -> bool {
        self.soft_listing.is_none()
            && self.settled.is_none()
            && self.is_for_sale.is_none()
            && self.is_for_rent.is_none()
    }

    /// Overwrite the flags this update carries, leave the rest.
    pub fn apply_to(&self, flags: &mut IntentFlags) {
        if let Some(v) = self.soft_listing {
            flags.soft_listing = Some(v);
        }
        if let Some(v) = self.settled {
            flags.settled = Some(v);
        }
        if let Some(v) = self.is_for_sale {
            flags.is_for_sale = Some(v);
        }
        if let Some(v) = self.is_for_rent {
            flags.is_for_rent = Some(v);
        }
    }
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(PropertyRecord),
    /// The caller already holds the claim; nothing was written
    AlreadyMine(PropertyRecord),
    ClaimedByOther,
    NotFound,
}

/// Seed file for the in-memory backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub properties: Vec<PropertyRecord>,
    #[serde(default)]
    pub anchors: Vec<Anchor>,
    #[serde(default)]
    pub threads: Vec<ConversationThread>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_touches_only_present_fields() {
        let mut flags = IntentFlags {
            soft_listing: Some(true),
            settled: None,
            is_for_sale: Some(false),
            is_for_rent: None,
        };
        let update = IntentUpdate {
            is_for_sale: Some(true),
            ..IntentUpdate::default()
        };
        update.apply_to(&mut flags);

        assert_eq!(flags.soft_listing, Some(true));
        assert_eq!(flags.is_for_sale, Some(true));
        assert_eq!(flags.settled, None);
        assert!(!update.is_empty());
        assert!(IntentUpdate::default().is_empty());
    }
}
