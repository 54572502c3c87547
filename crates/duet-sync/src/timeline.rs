//! Timeline derivation.
//!
//! Turns an ordered message list into display rows: calendar-date
//! separators, attribution relative to the viewer, formatted times of day.
//! The derivation is lazy and never mutates its input, so the same list can
//! be walked again after any snapshot change.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use duet_shared::constants::PENDING_TIME_PLACEHOLDER;
use duet_shared::{CurrentUser, Message, MessageContent, MessageId};

/// One renderable row of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    DateSeparator(NaiveDate),
    Message(MessageRow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: MessageId,
    pub sender_name: String,
    pub content: MessageContent,
    pub is_self: bool,
    /// Time of day, or a placeholder while the server timestamp is pending.
    pub time_label: String,
    pub pending: bool,
}

impl TimelineEntry {
    pub fn as_message(&self) -> Option<&MessageRow> {
        match self {
            Self::Message(row) => Some(row),
            Self::DateSeparator(_) => None,
        }
    }
}

/// Label for a date separator, e.g. "Fri Mar 01 2024".
pub fn separator_label(date: &NaiveDate) -> String {
    date.format("%a %b %d %Y").to_string()
}

/// Format a time of day in `offset`, e.g. "3:07 PM".
pub fn time_of_day(at: &DateTime<Utc>, offset: &FixedOffset) -> String {
    at.with_timezone(offset).format("%-I:%M %p").to_string()
}

/// Whether `message` was written by `viewer`.
///
/// Records carrying a sender id are matched on it. Older records only carry
/// the sender's display name.
pub fn is_own(message: &Message, viewer: &CurrentUser) -> bool {
    match &message.sender_id {
        Some(id) => *id == viewer.id,
        None => message.sender_name == viewer.display_name,
    }
}

/// Lazy walk over a message list yielding [`TimelineEntry`] values.
///
/// A separator precedes the first message and every message whose calendar
/// date (in the display offset) differs from the last resolved date. Pending
/// messages never open a new date and inherit the current one.
#[derive(Debug, Clone)]
pub struct Timeline<'a> {
    messages: std::slice::Iter<'a, Message>,
    viewer: &'a CurrentUser,
    offset: FixedOffset,
    current_date: Option<NaiveDate>,
    held: Option<&'a Message>,
}

pub fn build_timeline<'a>(
    messages: &'a [Message],
    viewer: &'a CurrentUser,
    offset: FixedOffset,
) -> Timeline<'a> {
    Timeline {
        messages: messages.iter(),
        viewer,
        offset,
        current_date: None,
        held: None,
    }
}

impl<'a> Timeline<'a> {
    fn row(&self, message: &Message) -> TimelineEntry {
        let time_label = match &message.created_at {
            Some(at) => time_of_day(at, &self.offset),
            None => PENDING_TIME_PLACEHOLDER.to_string(),
        };
        TimelineEntry::Message(MessageRow {
            id: message.id.clone(),
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            is_self: is_own(message, self.viewer),
            time_label,
            pending: message.is_pending(),
        })
    }
}

impl<'a> Iterator for Timeline<'a> {
    type Item = TimelineEntry;

    fn next(&mut self) -> Option<TimelineEntry> {
        if let Some(message) = self.held.take() {
            return Some(self.row(message));
        }

        let message = self.messages.next()?;
        if let Some(at) = &message.created_at {
            let date = at.with_timezone(&self.offset).date_naive();
            if self.current_date != Some(date) {
                self.current_date = Some(date);
                self.held = Some(message);
                return Some(TimelineEntry::DateSeparator(date));
            }
        }
        Some(self.row(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use duet_shared::{ClientMessageId, UserId};

    fn viewer() -> CurrentUser {
        CurrentUser::new("u1", "Ann")
    }

    fn message(id: &str, sender: Option<&str>, name: &str, at: Option<DateTime<Utc>>) -> Message {
        Message {
            id: MessageId(id.to_string()),
            sender_id: sender.map(UserId::new),
            sender_name: name.to_string(),
            content: MessageContent::Text(format!("text {id}")),
            created_at: at,
            client_id: None,
        }
    }

    fn day(d: u32, h: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap())
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn separators_before_first_message_of_each_day() {
        let messages = vec![
            message("a", Some("u1"), "Ann", day(1, 9)),
            message("b", Some("u2"), "Bob", day(1, 10)),
            message("c", Some("u1"), "Ann", day(2, 9)),
            message("d", Some("u2"), "Bob", day(2, 11)),
            message("e", Some("u2"), "Bob", day(2, 12)),
        ];
        let viewer = viewer();
        let entries: Vec<TimelineEntry> = build_timeline(&messages, &viewer, utc()).collect();

        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[0],
            TimelineEntry::DateSeparator(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(entries[1].as_message().unwrap().id.0, "a");
        assert_eq!(entries[2].as_message().unwrap().id.0, "b");
        assert_eq!(
            entries[3],
            TimelineEntry::DateSeparator(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap())
        );
        let ids: Vec<&str> = entries[4..]
            .iter()
            .map(|e| e.as_message().unwrap().id.0.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "d", "e"]);
    }

    #[test]
    fn attribution_prefers_sender_id() {
        let viewer = viewer();
        let messages = vec![
            message("a", Some("u1"), "Someone else", day(1, 9)),
            message("b", Some("u2"), "Ann", day(1, 9)),
            message("c", None, "Ann", day(1, 9)),
            message("d", None, "Bob", day(1, 9)),
        ];
        let own: Vec<bool> = build_timeline(&messages, &viewer, utc())
            .filter_map(|e| e.as_message().map(|row| row.is_self))
            .collect();
        assert_eq!(own, vec![true, false, true, false]);
    }

    #[test]
    fn pending_messages_use_placeholder_without_separator() {
        let viewer = viewer();
        let mut pending = message("p", Some("u1"), "Ann", None);
        pending.client_id = Some(ClientMessageId::new());
        let messages = vec![message("a", Some("u2"), "Bob", day(1, 15)), pending];

        let entries: Vec<TimelineEntry> = build_timeline(&messages, &viewer, utc()).collect();
        assert_eq!(entries.len(), 3);
        let first = entries[1].as_message().unwrap();
        assert_eq!(first.time_label, "3:00 PM");
        let last = entries[2].as_message().unwrap();
        assert!(last.pending);
        assert_eq!(last.time_label, "...");
    }

    #[test]
    fn pending_only_list_has_no_separator() {
        let viewer = viewer();
        let messages = vec![message("p", Some("u1"), "Ann", None)];
        let entries: Vec<TimelineEntry> = build_timeline(&messages, &viewer, utc()).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].as_message().is_some());
    }

    #[test]
    fn dates_follow_display_offset() {
        let viewer = viewer();
        // 23:00 UTC on Mar 1 is already Mar 2 two hours east.
        let messages = vec![
            message("a", Some("u1"), "Ann", day(1, 20)),
            message("b", Some("u1"), "Ann", day(1, 23)),
        ];
        let east = FixedOffset::east_opt(2 * 3600).unwrap();
        let separators = build_timeline(&messages, &viewer, east)
            .filter(|e| matches!(e, TimelineEntry::DateSeparator(_)))
            .count();
        assert_eq!(separators, 2);
        let separators = build_timeline(&messages, &viewer, utc())
            .filter(|e| matches!(e, TimelineEntry::DateSeparator(_)))
            .count();
        assert_eq!(separators, 1);
    }

    #[test]
    fn timeline_can_be_restarted() {
        let viewer = viewer();
        let messages = vec![message("a", Some("u1"), "Ann", day(1, 9))];
        let timeline = build_timeline(&messages, &viewer, utc());
        assert_eq!(timeline.clone().count(), 2);
        assert_eq!(timeline.count(), 2);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(separator_label(&day), "Fri Mar 01 2024");
    }
}
