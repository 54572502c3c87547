use duet_shared::{ConversationId, SessionError, Slice};

use crate::attachment::{AttachmentStatus, PreviewHandle};
use crate::presence::DisplayStatus;
use crate::timeline::TimelineEntry;

/// Header of the conversation view: who the other participant is and
/// whether they are around.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInfo {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub status: DisplayStatus,
    pub status_label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentView {
    pub status: AttachmentStatus,
    pub file_name: Option<String>,
    pub preview: Option<PreviewHandle>,
    pub can_commit: bool,
}

/// Everything a UI needs to draw one frame of the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderState {
    pub conversation: Option<ConversationId>,
    pub header: HeaderInfo,
    pub timeline: Vec<TimelineEntry>,
    pub other_typing: bool,
    pub last_message_preview: Option<String>,
    pub attachment: AttachmentView,
    pub draft: String,
    /// Slices currently degraded, with their latest error.
    pub slice_errors: Vec<(Slice, SessionError)>,
    /// Most recent failed action, until dismissed.
    pub last_error: Option<SessionError>,
}

impl RenderState {
    pub fn slice_error(&self, slice: Slice) -> Option<&SessionError> {
        self.slice_errors
            .iter()
            .find(|(s, _)| *s == slice)
            .map(|(_, e)| e)
    }

    /// Message rows only, skipping date separators.
    pub fn messages(&self) -> impl Iterator<Item = &crate::timeline::MessageRow> {
        self.timeline.iter().filter_map(TimelineEntry::as_message)
    }
}
