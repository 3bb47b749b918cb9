use crate::models::IntentFlags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical display status of a property.
///
/// Derived on every read from the claim state and the owner's intent flags,
/// never stored. Every surface that shows a status (pin colour, chip, legend,
/// messaging eligibility) goes through [`resolve_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unclaimed,
    /// Claim state is unset. Internal only, never shown to end users.
    Unknown,
    ForSale,
    ForRent,
    OpenToTalking,
    Settled,
    OwnerNoStatus,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Unclaimed,
        Status::Unknown,
        Status::ForSale,
        Status::ForRent,
        Status::OpenToTalking,
        Status::Settled,
        Status::OwnerNoStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unclaimed => "unclaimed",
            Status::Unknown => "unknown",
            Status::ForSale => "for_sale",
            Status::ForRent => "for_rent",
            Status::OpenToTalking => "open_to_talking",
            Status::Settled => "settled",
            Status::OwnerNoStatus => "owner_no_status",
        }
    }

    /// Whether a new conversation may be opened against a property in this status.
    pub fn can_start_conversation(self) -> bool {
        matches!(
            self,
            Status::OpenToTalking | Status::ForSale | Status::ForRent
        )
    }

    /// Whether the status may be rendered to end users.
    pub fn is_displayable(self) -> bool {
        self != Status::Unknown
    }

    /// The status as sent to clients; `None` when it is internal only
    pub fn for_display(self) -> Option<Status> {
        Some(self).filter(|s| s.is_displayable())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the display status for a property.
///
/// First match wins:
/// 1. not claimed → `unclaimed`
/// 2. claim state unset → `unknown`
/// 3. claimed: `for_sale`, then `for_rent`, then `open_to_talking`, then
///    `settled`, otherwise `owner_no_status`.
///
/// Market intent outranks `settled`. An older ordering put `settled` first;
/// the current ordering is product policy, so change it only with sign-off.
pub fn resolve_status(is_claimed: Option<bool>, flags: &IntentFlags) -> Status {
    match is_claimed {
        Some(false) => Status::Unclaimed,
        None => Status::Unknown,
        Some(true) => {
            if flags.is_for_sale == Some(true) {
                Status::ForSale
            } else if flags.is_for_rent == Some(true) {
                Status::ForRent
            } else if flags.soft_listing == Some(true) {
                Status::OpenToTalking
            } else if flags.settled == Some(true) {
                Status::Settled
            } else {
                Status::OwnerNoStatus
            }
        }
    }
}

/// Free-function form of [`Status::can_start_conversation`].
pub fn can_start_conversation(status: Status) -> bool {
    status.can_start_conversation()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRI: [Option<bool>; 3] = [None, Some(false), Some(true)];

    fn flags(
        soft_listing: Option<bool>,
        settled: Option<bool>,
        is_for_sale: Option<bool>,
        is_for_rent: Option<bool>,
    ) -> IntentFlags {
        IntentFlags {
            soft_listing,
            settled,
            is_for_sale,
            is_for_rent,
        }
    }

    // Precedence table written out independently of the implementation.
    fn expected(
        claimed: Option<bool>,
        soft: Option<bool>,
        settled: Option<bool>,
        sale: Option<bool>,
        rent: Option<bool>,
    ) -> Status {
        let yes = |v: Option<bool>| v == Some(true);
        match claimed {
            Some(false) => Status::Unclaimed,
            None => Status::Unknown,
            Some(true) if yes(sale) => Status::ForSale,
            Some(true) if yes(rent) => Status::ForRent,
            Some(true) if yes(soft) => Status::OpenToTalking,
            Some(true) if yes(settled) => Status::Settled,
            Some(true) => Status::OwnerNoStatus,
        }
    }

    #[test]
    fn every_input_combination_matches_precedence_table() {
        let mut seen = std::collections::HashSet::new();
        for claimed in TRI {
            for soft in TRI {
                for settled in TRI {
                    for sale in TRI {
                        for rent in TRI {
                            let got =
                                resolve_status(claimed, &flags(soft, settled, sale, rent));
                            assert_eq!(
                                got,
                                expected(claimed, soft, settled, sale, rent),
                                "claimed, soft, settled, sale, rent = {:?}",
                                (claimed, soft, settled, sale, rent)
                            );
                            seen.insert(got);
                        }
                    }
                }
            }
        }
        assert_eq!(seen.len(), Status::ALL.len());
    }

    #[test]
    fn market_intent_beats_settled() {
        let status = resolve_status(Some(true), &flags(None, Some(true), Some(true), None));
        assert_eq!(status, Status::ForSale);

        let status = resolve_status(Some(true), &flags(Some(true), Some(true), None, None));
        assert_eq!(status, Status::OpenToTalking);
    }

    #[test]
    fn unclaimed_ignores_intent_flags() {
        let all_set = flags(Some(true), Some(true), Some(true), Some(true));
        assert_eq!(resolve_status(Some(false), &all_set), Status::Unclaimed);
        assert_eq!(resolve_status(None, &all_set), Status::Unknown);
    }

    #[test]
    fn conversation_gate_allows_only_market_statuses() {
        for status in Status::ALL {
            let allowed = matches!(
                status,
                Status::OpenToTalking | Status::ForSale | Status::ForRent
            );
            assert_eq!(can_start_conversation(status), allowed, "{status}");
        }
    }

    #[test]
    fn only_unknown_is_withheld_from_display() {
        for status in Status::ALL {
            assert_eq!(status.is_displayable(), status != Status::Unknown);
            assert_eq!(status.for_display().is_some(), status.is_displayable());
        }
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&Status::OwnerNoStatus).unwrap();
        assert_eq!(json, "\"owner_no_status\"");
        for status in Status::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}
