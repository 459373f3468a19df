use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum MediaKind {
    #[default]
    Attachment = 0,
    Avatar = 1,
    Header = 2,
    Emoji = 3,
}

impl MediaKind {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Attachment),
            1 => Some(Self::Avatar),
            2 => Some(Self::Header),
            3 => Some(Self::Emoji),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: i64,
    /// Account that owns the media (the author for status attachments).
    pub account_id: i64,
    pub status_id: Option<i64>,
    pub kind: MediaKind,
    pub remote_url: Option<String>,
    pub content_type: Option<String>,
    pub file_size: i64,
    pub storage_key: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
