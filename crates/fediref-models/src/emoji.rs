use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: i64,
    pub shortcode: String,
    /// `None` for emojis owned by this server.
    pub domain: Option<String>,
    pub uri: String,
    pub image_remote_url: Option<String>,
    pub image_attachment_id: Option<i64>,
    pub disabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Emoji {
    pub fn is_new(&self) -> bool {
        self.created_at.is_none()
    }

    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }
}
