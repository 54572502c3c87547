//! Presence reconciliation.
//!
//! Two sources describe whether the other participant is around: the live
//! record in the ephemeral presence store and the `lastSeen` timestamp
//! persisted on their profile. The live record wins whenever it carries
//! usable information.

use chrono::{DateTime, FixedOffset, Utc};

use duet_shared::{PresenceRecord, PresenceState};

/// Status shown in the conversation header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayStatus {
    Online,
    LastSeen(DateTime<Utc>),
    #[default]
    Offline,
}

/// Pure precedence function over both sources:
///
/// 1. live record says online: `Online`
/// 2. live record offline with a timestamp: `LastSeen` of that timestamp
/// 3. otherwise the persisted fallback, if any: `LastSeen`
/// 4. otherwise `Offline`
pub fn reconcile(
    presence: Option<&PresenceRecord>,
    fallback_last_seen: Option<DateTime<Utc>>,
) -> DisplayStatus {
    match presence {
        Some(record) if record.state == PresenceState::Online => DisplayStatus::Online,
        Some(PresenceRecord {
            last_changed_at: Some(at),
            ..
        }) => DisplayStatus::LastSeen(*at),
        _ => match fallback_last_seen {
            Some(at) => DisplayStatus::LastSeen(at),
            None => DisplayStatus::Offline,
        },
    }
}

impl DisplayStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    /// Human readable label, rendered in `offset`.
    pub fn label(&self, offset: &FixedOffset) -> String {
        match self {
            Self::Online => "Online".to_string(),
            Self::LastSeen(at) => format!(
                "Last seen {}",
                at.with_timezone(offset).format("%b %-d, %Y %-I:%M %p")
            ),
            Self::Offline => "Offline".to_string(),
        }
    }
}
