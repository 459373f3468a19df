use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emoji::Emoji;
use crate::media::MediaAttachment;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: i64,
    pub uri: String,
    pub url: Option<String>,
    pub local: bool,
    pub account_id: i64,
    pub account_uri: String,
    pub boost_of_id: Option<i64>,
    pub boost_of_uri: Option<String>,
    pub in_reply_to_uri: Option<String>,
    pub content: Option<String>,
    pub content_warning: Option<String>,
    pub sensitive: bool,
    /// Locally chosen language, kept across remote refreshes.
    pub language: Option<String>,
    pub attachment_ids: Vec<i64>,
    #[serde(default)]
    pub attachments: Vec<MediaAttachment>,
    pub emoji_ids: Vec<i64>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Status {
    pub fn stub_from_uri(id: i64, uri: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn is_new(&self) -> bool {
        self.created_at.is_none()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    pub fn is_boost(&self) -> bool {
        self.boost_of_id.is_some() || self.boost_of_uri.is_some()
    }
}
