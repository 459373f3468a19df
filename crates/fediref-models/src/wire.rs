//! Typed view over the ActivityStreams objects the dereferencer consumes.
//!
//! Remote JSON is classified once by its `type` into [`RemoteObject`]; the
//! rest of the code works with the concrete variant and never inspects
//! untyped JSON again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const ACCOUNT_TYPES: &[&str] = &["Person", "Service", "Application", "Group", "Organization"];
const STATUS_TYPES: &[&str] = &[
    "Note", "Article", "Question", "Page", "Event", "Video", "Audio", "Image", "Announce",
];
const COLLECTION_TYPES: &[&str] = &[
    "Collection",
    "OrderedCollection",
    "CollectionPage",
    "OrderedCollectionPage",
];

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("object has no type")]
    MissingType,
    #[error("object has no id")]
    MissingId,
    #[error("unexpected object type {got}, wanted {expected}")]
    WrongType { expected: &'static str, got: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteObject {
    Account(WireAccount),
    Status(WireStatus),
    Collection(WireCollection),
}

impl RemoteObject {
    pub fn from_slice(body: &[u8]) -> Result<Self, WireError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, WireError> {
        let kind = object_type(&value).ok_or(WireError::MissingType)?.to_string();
        if value.get("id").and_then(Value::as_str).is_none() {
            return Err(WireError::MissingId);
        }
        if ACCOUNT_TYPES.contains(&kind.as_str()) {
            return Ok(Self::Account(serde_json::from_value(value)?));
        }
        if STATUS_TYPES.contains(&kind.as_str()) {
            return Ok(Self::Status(serde_json::from_value(value)?));
        }
        if COLLECTION_TYPES.contains(&kind.as_str()) {
            return Ok(Self::Collection(serde_json::from_value(value)?));
        }
        Err(WireError::WrongType {
            expected: "account, status or collection",
            got: kind,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Account(acct) => &acct.id,
            Self::Status(status) => &status.id,
            Self::Collection(collection) => &collection.id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Account(acct) => &acct.kind,
            Self::Status(status) => &status.kind,
            Self::Collection(collection) => &collection.kind,
        }
    }

    pub fn into_account(self) -> Result<WireAccount, WireError> {
        match self {
            Self::Account(acct) => Ok(acct),
            other => Err(WireError::WrongType {
                expected: "account",
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn into_status(self) -> Result<WireStatus, WireError> {
        match self {
            Self::Status(status) => Ok(status),
            other => Err(WireError::WrongType {
                expected: "status",
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn into_collection(self) -> Result<WireCollection, WireError> {
        match self {
            Self::Collection(collection) => Ok(collection),
            other => Err(WireError::WrongType {
                expected: "collection",
                got: other.kind().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAccount {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "optional_link")]
    pub url: Option<String>,
    /// Avatar image URL.
    #[serde(default, deserialize_with = "optional_link")]
    pub icon: Option<String>,
    /// Header image URL.
    #[serde(default, deserialize_with = "optional_link")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "lenient_many")]
    pub tag: Vec<WireTag>,
    #[serde(default, deserialize_with = "optional_link")]
    pub featured: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

impl WireAccount {
    pub fn emojis(&self) -> impl Iterator<Item = &WireEmoji> {
        self.tag.iter().filter_map(WireTag::as_emoji)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "optional_link")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "optional_link")]
    pub attributed_to: Option<String>,
    /// Set on `Announce` in place of `attributedTo`.
    #[serde(default, deserialize_with = "optional_link")]
    pub actor: Option<String>,
    /// Boosted status of an `Announce`, inline or by IRI.
    #[serde(default, deserialize_with = "optional_iri")]
    pub object: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sensitive: Option<bool>,
    #[serde(default, deserialize_with = "optional_link")]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_many")]
    pub attachment: Vec<WireAttachment>,
    #[serde(default, deserialize_with = "lenient_many")]
    pub tag: Vec<WireTag>,
}

impl WireStatus {
    pub fn is_announce(&self) -> bool {
        self.kind == "Announce"
    }

    pub fn emojis(&self) -> impl Iterator<Item = &WireEmoji> {
        self.tag.iter().filter_map(WireTag::as_emoji)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttachment {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default, deserialize_with = "optional_link")]
    pub url: Option<String>,
    /// Alt text.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireTag {
    Emoji(WireEmoji),
    Mention {
        #[serde(default, deserialize_with = "optional_link")]
        href: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Hashtag {
        #[serde(default, deserialize_with = "optional_link")]
        href: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl WireTag {
    pub fn as_emoji(&self) -> Option<&WireEmoji> {
        match self {
            Self::Emoji(emoji) => Some(emoji),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEmoji {
    pub id: String,
    /// Shortcode, usually wrapped in colons.
    pub name: String,
    #[serde(default, deserialize_with = "optional_link")]
    pub icon: Option<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl WireEmoji {
    pub fn shortcode(&self) -> &str {
        self.name.trim_matches(':')
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCollection {
    /// Embedded pages may omit their id.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default, alias = "orderedItems", deserialize_with = "lenient_many")]
    pub items: Vec<Value>,
    #[serde(default)]
    pub first: Option<PageRef>,
    #[serde(default, deserialize_with = "optional_link")]
    pub next: Option<String>,
}

impl WireCollection {
    /// IRIs of the items on this page, in order. Items without an id are skipped.
    pub fn item_iris(&self) -> Vec<String> {
        self.items.iter().filter_map(item_iri).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Iri(String),
    Page(Box<WireCollection>),
}

fn object_type(value: &Value) -> Option<&str> {
    match value.get("type")? {
        Value::String(kind) => Some(kind.as_str()),
        Value::Array(kinds) => kinds.iter().find_map(Value::as_str),
        _ => None,
    }
}

fn item_iri(value: &Value) -> Option<String> {
    match value {
        Value::String(iri) => Some(iri.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn link_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(link) => Some(link.clone()),
        Value::Array(links) => links.iter().find_map(link_from_value),
        Value::Object(map) => map
            .get("href")
            .or_else(|| map.get("url"))
            .or_else(|| map.get("id"))
            .and_then(link_from_value),
        _ => None,
    }
}

/// Accepts an IRI, a Link/Image object, or an array of either; keeps the first.
fn optional_link<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(link_from_value))
}

/// Like [`optional_link`] but an embedded object contributes its `id`.
fn optional_iri<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(entries)) => entries.iter().find_map(item_iri),
        Some(value) => item_iri(&value),
        None => None,
    })
}

/// Accepts a single value or an array; entries that fail to decode are dropped.
fn lenient_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let entries = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(single) => vec![single],
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_person_as_account() {
        let obj = RemoteObject::from_value(json!({
            "id": "https://example.org/users/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "url": "https://example.org/@alice",
            "icon": {"type": "Image", "url": "https://example.org/media/avatar.png"},
            "image": [{"type": "Image", "url": "https://example.org/media/header.png"}],
            "featured": "https://example.org/users/alice/collections/featured",
            "tag": [
                {"type": "Emoji", "id": "https://example.org/emoji/1", "name": ":blob:",
                 "icon": {"type": "Image", "url": "https://example.org/emoji/blob.png"}},
                {"type": "Hashtag", "name": "#rust"},
                {"type": "PropertyValue", "name": "x"},
                {"name": "untyped"}
            ]
        }))
        .expect("decode");
        let acct = obj.into_account().expect("account");
        assert_eq!(acct.preferred_username.as_deref(), Some("alice"));
        assert_eq!(acct.url.as_deref(), Some("https://example.org/@alice"));
        assert_eq!(acct.icon.as_deref(), Some("https://example.org/media/avatar.png"));
        assert_eq!(acct.image.as_deref(), Some("https://example.org/media/header.png"));
        let emojis: Vec<_> = acct.emojis().collect();
        assert_eq!(emojis.len(), 1);
        assert_eq!(emojis[0].shortcode(), "blob");
        assert_eq!(acct.tag.len(), 3);
    }

    #[test]
    fn wrong_variant_is_reported() {
        let obj = RemoteObject::from_value(json!({
            "id": "https://example.org/notes/1",
            "type": "Note",
            "attributedTo": "https://example.org/users/alice"
        }))
        .expect("decode");
        let err = obj.into_account().expect_err("note is not an account");
        assert!(matches!(err, WireError::WrongType { expected: "account", .. }));
    }

    #[test]
    fn unknown_type_and_missing_id_are_rejected() {
        let err = RemoteObject::from_value(json!({"id": "https://x/1", "type": "Tombstone"}))
            .expect_err("tombstone");
        assert!(matches!(err, WireError::WrongType { .. }));
        let err = RemoteObject::from_value(json!({"type": "Note"})).expect_err("no id");
        assert!(matches!(err, WireError::MissingId));
        let err = RemoteObject::from_slice(b"not json").expect_err("garbage");
        assert!(matches!(err, WireError::Json(_)));
    }

    #[test]
    fn announce_keeps_boosted_object_id() {
        let obj = RemoteObject::from_value(json!({
            "id": "https://example.org/users/alice/statuses/2/activity",
            "type": "Announce",
            "actor": "https://example.org/users/alice",
            "object": {
                "id": "https://elsewhere.example/notes/7",
                "type": "Note",
                "url": "https://elsewhere.example/@carol/7"
            }
        }))
        .expect("decode");
        let status = obj.into_status().expect("status");
        assert!(status.is_announce());
        assert_eq!(status.actor.as_deref(), Some("https://example.org/users/alice"));
        assert_eq!(status.object.as_deref(), Some("https://elsewhere.example/notes/7"));
        assert!(status.attributed_to.is_none());
    }

    #[test]
    fn collection_items_accept_iris_and_objects() {
        let obj = RemoteObject::from_value(json!({
            "id": "https://example.org/users/alice/collections/featured",
            "type": "OrderedCollection",
            "orderedItems": [
                "https://example.org/notes/1",
                {"id": "https://example.org/notes/2", "type": "Note"},
                {"type": "Note"}
            ]
        }))
        .expect("decode");
        let collection = obj.into_collection().expect("collection");
        assert_eq!(
            collection.item_iris(),
            vec![
                "https://example.org/notes/1".to_string(),
                "https://example.org/notes/2".to_string()
            ]
        );
    }

    #[test]
    fn collection_first_page_can_be_embedded_or_linked() {
        let linked: WireCollection = serde_json::from_value(json!({
            "id": "https://example.org/c",
            "type": "OrderedCollection",
            "first": "https://example.org/c?page=1"
        }))
        .expect("decode");
        assert_eq!(
            linked.first,
            Some(PageRef::Iri("https://example.org/c?page=1".to_string()))
        );

        let embedded: WireCollection = serde_json::from_value(json!({
            "id": "https://example.org/c",
            "type": "OrderedCollection",
            "first": {
                "type": "OrderedCollectionPage",
                "orderedItems": ["https://example.org/notes/9"],
                "next": "https://example.org/c?page=2"
            }
        }))
        .expect("decode");
        match embedded.first {
            Some(PageRef::Page(page)) => {
                assert_eq!(page.item_iris(), vec!["https://example.org/notes/9".to_string()]);
                assert_eq!(page.next.as_deref(), Some("https://example.org/c?page=2"));
            }
            other => panic!("expected embedded page, got {other:?}"),
        }
    }
}
