//! Session configuration loaded from environment variables.
//!
//! All settings have defaults so a session can start with zero
//! configuration.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use duet_shared::constants::{IMAGE_PREVIEW_TEXT, MAX_ATTACHMENT_SIZE, TYPING_DEBOUNCE_MS};

/// Conversation session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Quiet period after the last keystroke before typing membership is
    /// retracted.
    /// Env: `DUET_TYPING_DEBOUNCE_MS`
    /// Default: `2000`
    pub typing_debounce: Duration,

    /// Offset used for calendar dates, times of day and last-seen labels.
    /// Env: `DUET_UTC_OFFSET_MINUTES`
    /// Default: `0` (UTC)
    pub display_offset: FixedOffset,

    /// Largest file accepted as an attachment, in bytes.
    /// Env: `DUET_MAX_ATTACHMENT_BYTES`
    /// Default: 25 MiB
    pub max_attachment_size: usize,

    /// Conversation preview written when an image is sent.
    /// Env: `DUET_IMAGE_PREVIEW_TEXT`
    /// Default: `"📷 Image"`
    pub image_preview_text: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
            display_offset: Utc.fix(),
            max_attachment_size: MAX_ATTACHMENT_SIZE,
            image_preview_text: IMAGE_PREVIEW_TEXT.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("DUET_TYPING_DEBOUNCE_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.typing_debounce = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid DUET_TYPING_DEBOUNCE_MS, using default"),
            }
        }

        if let Some(val) = lookup("DUET_UTC_OFFSET_MINUTES") {
            match parse_offset_minutes(&val) {
                Some(offset) => config.display_offset = offset,
                None => {
                    tracing::warn!(value = %val, "Invalid DUET_UTC_OFFSET_MINUTES, using default")
                }
            }
        }

        if let Some(val) = lookup("DUET_MAX_ATTACHMENT_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_attachment_size = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid DUET_MAX_ATTACHMENT_BYTES, using default")
                }
            }
        }

        if let Some(val) = lookup("DUET_IMAGE_PREVIEW_TEXT") {
            if !val.trim().is_empty() {
                config.image_preview_text = val;
            }
        }

        config
    }
}

fn parse_offset_minutes(val: &str) -> Option<FixedOffset> {
    let minutes = val.trim().parse::<i32>().ok()?;
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}
