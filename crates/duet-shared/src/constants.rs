/// Application name
pub const APP_NAME: &str = "Duet";

/// Quiet period after the last keystroke before typing membership is retracted
pub const TYPING_DEBOUNCE_MS: u64 = 2000;

/// Conversation preview written when the last message is an image
pub const IMAGE_PREVIEW_TEXT: &str = "📷 Image";

/// Placeholder shown instead of a time of day while a message is in flight
pub const PENDING_TIME_PLACEHOLDER: &str = "...";

/// Maximum attachment size in bytes (25 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 25 * 1024 * 1024;

/// Field every message collection is ordered by
pub const MESSAGE_ORDER_FIELD: &str = "timestamp";

/// Document store collections
pub const CHATS_COLLECTION: &str = "chats";
pub const MESSAGES_COLLECTION: &str = "messages";
pub const USERS_COLLECTION: &str = "users";

/// Ephemeral presence key prefix
pub const STATUS_PREFIX: &str = "status";

/// Blob store prefixes
pub const CHAT_MEDIA_PREFIX: &str = "chat_media";
pub const PROFILE_IMAGES_PREFIX: &str = "profile_images";
