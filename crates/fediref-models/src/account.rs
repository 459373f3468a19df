use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emoji::Emoji;

/// Usernames reserved for a server's own service actor.
const INSTANCE_ACTOR_USERNAMES: &[&str] = &["instance.actor", "internal.fetch"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    /// `None` for accounts owned by this server.
    pub domain: Option<String>,
    pub uri: String,
    pub url: Option<String>,
    pub display_name: Option<String>,
    pub note: Option<String>,
    pub avatar_remote_url: Option<String>,
    pub avatar_media_attachment_id: Option<i64>,
    pub header_remote_url: Option<String>,
    pub header_media_attachment_id: Option<i64>,
    pub emoji_ids: Vec<i64>,
    /// Populated lazily from `emoji_ids`.
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    pub featured_collection_uri: Option<String>,
    /// Locally chosen posting language, never taken from remote data.
    pub language: Option<String>,
    /// Unset until the row has been written.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Bare model for a remote account met for the first time by URI.
    pub fn stub_from_uri(id: i64, uri: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    /// Bare model for a remote account met for the first time by handle.
    pub fn stub_from_handle(
        id: i64,
        username: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    pub fn is_new(&self) -> bool {
        self.created_at.is_none()
    }

    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    /// Whether this is a server's own service actor rather than a person.
    pub fn is_instance(&self) -> bool {
        if INSTANCE_ACTOR_USERNAMES.contains(&self.username.as_str()) {
            return true;
        }
        self.domain
            .as_deref()
            .is_some_and(|domain| domain.eq_ignore_ascii_case(&self.username))
    }

    /// `username@domain`, or just the username for local accounts.
    pub fn handle(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}@{}", self.username, domain),
            None => self.username.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_is_new_and_remote() {
        let stub = Account::stub_from_uri(1, "https://example.org/users/alice", "example.org");
        assert!(stub.is_new());
        assert!(!stub.is_local());
        assert!(!stub.is_suspended());
        assert!(stub.username.is_empty());
    }

    #[test]
    fn instance_actor_detection() {
        let mut acct = Account::stub_from_handle(1, "example.org", "example.org");
        assert!(acct.is_instance());
        acct.username = "internal.fetch".to_string();
        assert!(acct.is_instance());
        acct.username = "alice".to_string();
        assert!(!acct.is_instance());
    }

    #[test]
    fn handle_formats_local_and_remote() {
        let remote = Account::stub_from_handle(1, "alice", "example.org");
        assert_eq!(remote.handle(), "alice@example.org");
        let local = Account {
            username: "bob".to_string(),
            ..Default::default()
        };
        assert_eq!(local.handle(), "bob");
    }
}
