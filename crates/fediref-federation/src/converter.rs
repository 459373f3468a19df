use fediref_models::{Account, Emoji, MediaAttachment, MediaKind, Status, WireAccount, WireStatus};
use fediref_models::wire::WireEmoji;
use fediref_util::uri;

use crate::FederationError;

/// Maps typed remote objects onto storage models.
///
/// Converted models carry no id and no timestamps besides `created_at` from
/// `published`; the dereferencer decides identity and fetch times.
pub trait Converter: Send + Sync {
    /// `domain` overrides the host of the object id, e.g. after webfinger
    /// reports a different account domain.
    fn wire_to_account(
        &self,
        wire: &WireAccount,
        domain: Option<&str>,
    ) -> Result<Account, FederationError>;

    fn wire_to_status(&self, wire: &WireStatus) -> Result<Status, FederationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityStreamsConverter;

impl Converter for ActivityStreamsConverter {
    fn wire_to_account(
        &self,
        wire: &WireAccount,
        domain: Option<&str>,
    ) -> Result<Account, FederationError> {
        let username = wire
            .preferred_username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FederationError::malformed(&wire.id, "missing preferredUsername"))?;

        let domain = match domain {
            Some(domain) => domain.to_ascii_lowercase(),
            None => uri::host_of(&wire.id)
                .ok_or_else(|| FederationError::malformed(&wire.id, "id has no host"))?,
        };

        Ok(Account {
            username: username.to_string(),
            domain: Some(domain),
            uri: wire.id.clone(),
            url: wire.url.clone(),
            display_name: non_empty(wire.name.as_deref()),
            note: non_empty(wire.summary.as_deref()),
            avatar_remote_url: wire.icon.clone(),
            header_remote_url: wire.image.clone(),
            emojis: wire.emojis().map(emoji_stub).collect(),
            featured_collection_uri: wire.featured.clone(),
            created_at: wire.published,
            ..Default::default()
        })
    }

    fn wire_to_status(&self, wire: &WireStatus) -> Result<Status, FederationError> {
        let account_uri = wire
            .attributed_to
            .clone()
            .or_else(|| wire.actor.clone())
            .ok_or_else(|| FederationError::malformed(&wire.id, "missing attributedTo"))?;
        let boost_of_uri = if wire.is_announce() {
            Some(
                wire.object
                    .clone()
                    .ok_or_else(|| FederationError::malformed(&wire.id, "announce has no object"))?,
            )
        } else {
            None
        };

        let attachments = wire
            .attachment
            .iter()
            .filter_map(|attachment| {
                let url = attachment.url.clone()?;
                Some(MediaAttachment {
                    kind: MediaKind::Attachment,
                    remote_url: Some(url),
                    content_type: attachment.media_type.clone(),
                    description: non_empty(attachment.name.as_deref()),
                    ..Default::default()
                })
            })
            .collect();

        Ok(Status {
            uri: wire.id.clone(),
            url: wire.url.clone(),
            account_uri,
            boost_of_uri,
            in_reply_to_uri: wire.in_reply_to.clone(),
            content: wire.content.clone(),
            content_warning: non_empty(wire.summary.as_deref()),
            sensitive: wire.sensitive.unwrap_or(false),
            attachments,
            emojis: wire.emojis().map(emoji_stub).collect(),
            created_at: wire.published,
            ..Default::default()
        })
    }
}

fn emoji_stub(wire: &WireEmoji) -> Emoji {
    Emoji {
        shortcode: wire.shortcode().to_string(),
        domain: uri::host_of(&wire.id),
        uri: wire.id.clone(),
        image_remote_url: wire.icon.clone(),
        updated_at: wire.updated,
        ..Default::default()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fediref_models::wire::WireAttachment;
    use fediref_models::RemoteObject;
    use serde_json::json;

    fn alice() -> WireAccount {
        RemoteObject::from_value(json!({
            "id": "https://social.example.org/users/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "name": "Alice",
            "summary": "",
            "icon": "https://social.example.org/media/a.png",
            "tag": [{"type": "Emoji", "id": "https://social.example.org/emoji/1",
                     "name": ":blob:", "icon": "https://social.example.org/emoji/blob.png"}]
        }))
        .and_then(RemoteObject::into_account)
        .expect("decode")
    }

    #[test]
    fn account_domain_defaults_to_id_host() {
        let acct = ActivityStreamsConverter
            .wire_to_account(&alice(), None)
            .expect("convert");
        assert_eq!(acct.username, "alice");
        assert_eq!(acct.domain.as_deref(), Some("social.example.org"));
        assert_eq!(acct.display_name.as_deref(), Some("Alice"));
        assert_eq!(acct.note, None);
        assert_eq!(acct.emojis.len(), 1);
        assert_eq!(acct.emojis[0].shortcode, "blob");
        assert!(acct.emojis[0].is_new());
        assert!(acct.is_new());
    }

    #[test]
    fn account_domain_hint_wins() {
        let acct = ActivityStreamsConverter
            .wire_to_account(&alice(), Some("Example.org"))
            .expect("convert");
        assert_eq!(acct.domain.as_deref(), Some("example.org"));
    }

    #[test]
    fn account_without_username_is_malformed() {
        let mut wire = alice();
        wire.preferred_username = Some("  ".to_string());
        let err = ActivityStreamsConverter
            .wire_to_account(&wire, None)
            .expect_err("no username");
        assert!(err.is_malformed());
    }

    #[test]
    fn status_requires_author() {
        let mut wire = WireStatus {
            id: "https://social.example.org/notes/1".to_string(),
            kind: "Note".to_string(),
            content: Some("<p>hi</p>".to_string()),
            attachment: vec![
                WireAttachment {
                    media_type: Some("image/png".to_string()),
                    url: Some("https://social.example.org/media/1.png".to_string()),
                    name: Some("a cat".to_string()),
                },
                WireAttachment::default(),
            ],
            ..Default::default()
        };
        assert!(ActivityStreamsConverter
            .wire_to_status(&wire)
            .expect_err("no author")
            .is_malformed());

        wire.attributed_to = Some("https://social.example.org/users/alice".to_string());
        let status = ActivityStreamsConverter.wire_to_status(&wire).expect("convert");
        assert_eq!(status.account_uri, "https://social.example.org/users/alice");
        assert_eq!(status.attachments.len(), 1);
        assert_eq!(status.attachments[0].description.as_deref(), Some("a cat"));
        assert!(!status.local);
        assert!(!status.sensitive);
    }

    #[test]
    fn announce_records_boost_target() {
        let mut wire = WireStatus {
            id: "https://social.example.org/users/alice/statuses/2/activity".to_string(),
            kind: "Announce".to_string(),
            actor: Some("https://social.example.org/users/alice".to_string()),
            ..Default::default()
        };
        assert!(ActivityStreamsConverter
            .wire_to_status(&wire)
            .expect_err("no object")
            .is_malformed());

        wire.object = Some("https://elsewhere.example/notes/7".to_string());
        let status = ActivityStreamsConverter.wire_to_status(&wire).expect("convert");
        assert_eq!(status.account_uri, "https://social.example.org/users/alice");
        assert_eq!(status.boost_of_uri.as_deref(), Some("https://elsewhere.example/notes/7"));
        assert!(status.is_boost());
    }
}
