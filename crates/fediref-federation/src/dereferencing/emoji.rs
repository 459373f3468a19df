use std::collections::HashSet;

use chrono::Utc;
use fediref_models::{Emoji, MediaKind};
use fediref_util::uri;

use super::Dereferencer;
use crate::media::MediaInfo;
use crate::FederationError;

/// Persisted emojis for an entity after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct EmojiSync {
    pub emojis: Vec<Emoji>,
    /// The set of URIs differs from the stored one, so `emoji_ids` must be
    /// rewritten.
    pub changed: bool,
}

/// Set comparison by URI. Any difference means the set is replaced wholesale.
pub fn emojis_changed(maybe: &[Emoji], got: &[Emoji]) -> bool {
    if maybe.is_empty() && got.is_empty() {
        return false;
    }
    if maybe.len() != got.len() {
        return true;
    }
    let previous: HashSet<&str> = maybe.iter().map(|e| e.uri.as_str()).collect();
    let latest: HashSet<&str> = got.iter().map(|e| e.uri.as_str()).collect();
    previous.iter().any(|uri| !latest.contains(uri)) || latest.iter().any(|uri| !previous.contains(uri))
}

impl Dereferencer {
    /// Populate `got` (freshly converted stubs), refreshing images whose URL
    /// moved, and compare the result against `maybe` (previously stored).
    pub(crate) async fn reconcile_emojis(
        &self,
        requesting_user: &str,
        maybe: &[Emoji],
        got: Vec<Emoji>,
    ) -> EmojiSync {
        let changed = emojis_changed(maybe, &got);
        let mut emojis = self.populate_emojis(requesting_user, got).await;
        if !changed && emojis.len() != maybe.len() {
            emojis = maybe.to_vec();
        }
        EmojiSync { emojis, changed }
    }

    /// Resolve emoji stubs to stored emojis, creating or refreshing them.
    /// Failures drop the individual emoji and are logged.
    pub(crate) async fn populate_emojis(&self, requesting_user: &str, wanted: Vec<Emoji>) -> Vec<Emoji> {
        let mut out = Vec::with_capacity(wanted.len());
        let mut seen = HashSet::new();
        for stub in wanted {
            if !seen.insert(stub.uri.clone()) {
                continue;
            }
            match self.populate_emoji(requesting_user, stub).await {
                Ok(Some(emoji)) => out.push(emoji),
                Ok(None) => {}
                Err(e) => tracing::warn!("emoji: skipping emoji: {}", e),
            }
        }
        out
    }

    async fn populate_emoji(
        &self,
        requesting_user: &str,
        stub: Emoji,
    ) -> Result<Option<Emoji>, FederationError> {
        let Some(host) = uri::host_of(&stub.uri) else {
            return Err(FederationError::malformed(&stub.uri, "emoji uri has no host"));
        };
        let _guard = self.locks.lock(&stub.uri).await;

        match self.store.get_emoji_by_uri(&stub.uri).await {
            Ok(existing) => self.refresh_emoji(requesting_user, existing, stub).await.map(Some),
            Err(e) if e.is_not_found() => {
                if self.config.is_local_host(&host) {
                    tracing::debug!("emoji: unknown local emoji {}", stub.uri);
                    return Ok(None);
                }
                self.create_emoji(requesting_user, stub, host).await.map(Some)
            }
            Err(e) => Err(FederationError::from(e).context(format!("looking up emoji {}", stub.uri))),
        }
    }

    async fn refresh_emoji(
        &self,
        requesting_user: &str,
        mut existing: Emoji,
        stub: Emoji,
    ) -> Result<Emoji, FederationError> {
        if existing.is_local() || existing.disabled {
            return Ok(existing);
        }
        let Some(image_url) = stub.image_remote_url.clone() else {
            return Ok(existing);
        };
        if existing.image_remote_url.as_deref() == Some(image_url.as_str())
            && existing.image_attachment_id.is_some()
        {
            return Ok(existing);
        }

        match self.load_emoji_image(requesting_user, existing.id, &image_url).await {
            Ok(attachment_id) => {
                existing.shortcode = stub.shortcode;
                existing.image_remote_url = Some(image_url);
                existing.image_attachment_id = Some(attachment_id);
                existing.updated_at = Some(stub.updated_at.unwrap_or_else(Utc::now));
                self.store.update_emoji(&existing).await?;
            }
            Err(e) => {
                tracing::warn!("emoji: refreshing image of {} failed: {}", existing.uri, e);
            }
        }
        Ok(existing)
    }

    async fn create_emoji(
        &self,
        requesting_user: &str,
        stub: Emoji,
        host: String,
    ) -> Result<Emoji, FederationError> {
        let image_url = stub
            .image_remote_url
            .clone()
            .ok_or_else(|| FederationError::malformed(&stub.uri, "emoji has no image"))?;
        let now = Utc::now();
        let mut emoji = Emoji {
            id: self.new_id(),
            domain: Some(host),
            created_at: Some(now),
            updated_at: Some(stub.updated_at.unwrap_or(now)),
            ..stub
        };
        emoji.image_attachment_id =
            Some(self.load_emoji_image(requesting_user, emoji.id, &image_url).await?);

        match self.store.put_emoji(&emoji).await {
            Ok(()) => Ok(emoji),
            Err(e) if e.is_already_exists() => Ok(self.store.get_emoji_by_uri(&emoji.uri).await?),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_emoji_image(
        &self,
        requesting_user: &str,
        emoji_id: i64,
        image_url: &str,
    ) -> Result<i64, FederationError> {
        let info = MediaInfo {
            kind: MediaKind::Emoji,
            remote_url: image_url.to_string(),
            ..Default::default()
        };
        let attachment = self.load_remote_media(requesting_user, emoji_id, info).await?;
        Ok(attachment.id)
    }
}
