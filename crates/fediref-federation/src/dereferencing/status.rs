use chrono::Utc;
use fediref_db::statuses::STATUS_COLUMNS;
use fediref_models::{MediaAttachment, MediaKind, RemoteObject, Status, WireStatus};
use fediref_util::uri;
use futures_util::future::BoxFuture;

use super::{advance, matches_fetched, Dereferencer, Enriched};
use crate::freshness::{status_fresh, FreshnessWindow};
use crate::media::MediaInfo;
use crate::outcome::{Outcome, StatusOutcome};
use crate::{ErrorKind, FederationError};

impl Dereferencer {
    /// Look up a status by URI (or URL), dereferencing it and its author when
    /// unknown or stale. Failed refreshes of a stored status come back as
    /// [`Outcome::Degraded`].
    pub async fn get_status_by_uri(
        &self,
        requesting_user: &str,
        uri: &str,
    ) -> Result<StatusOutcome, FederationError> {
        let existing = match self.store.get_status_by_uri(uri).await {
            Ok(status) => Some(status),
            Err(e) if e.is_not_found() => match self.store.get_status_by_url(uri).await {
                Ok(status) => Some(status),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        let window = self.config.status_freshness;
        match existing {
            Some(mut status) => {
                if status_fresh(&status, window, Utc::now()) {
                    self.populate_status(&mut status).await;
                    return Ok(Outcome::Cached(status));
                }
                let fallback = status.clone();
                match self
                    .enrich_status_safely(requesting_user, status, None, window)
                    .await
                {
                    Ok(outcome) => Ok(outcome),
                    Err(error) => {
                        tracing::warn!(
                            "status: using stored {} after failed refresh: {}",
                            fallback.uri,
                            error
                        );
                        let mut entity = fallback;
                        self.populate_status(&mut entity).await;
                        Ok(Outcome::Degraded { entity, error })
                    }
                }
            }
            None => {
                let host = uri::host_of(uri)
                    .ok_or_else(|| FederationError::unretrievable(uri, "uri has no host"))?;
                if self.config.is_local_host(&host) {
                    return Err(FederationError::unretrievable(
                        uri,
                        "no local status with this uri",
                    ));
                }
                let stub = Status::stub_from_uri(self.new_id(), uri);
                self.enrich_status_safely(requesting_user, stub, None, window)
                    .await
            }
        }
    }

    pub async fn refresh_status(
        &self,
        requesting_user: &str,
        status: Status,
        wire: Option<WireStatus>,
        window: FreshnessWindow,
    ) -> Result<StatusOutcome, FederationError> {
        if status.local {
            return Ok(Outcome::Cached(status));
        }
        if wire.is_none() && status_fresh(&status, window, Utc::now()) {
            return Ok(Outcome::Cached(status));
        }
        self.enrich_status_safely(requesting_user, status, wire, window)
            .await
    }

    pub fn refresh_status_async(
        &self,
        requesting_user: &str,
        status: Status,
        wire: Option<WireStatus>,
        window: FreshnessWindow,
    ) {
        if status.local {
            return;
        }
        if wire.is_none() && status_fresh(&status, window, Utc::now()) {
            return;
        }
        let this = self.clone();
        let requesting_user = requesting_user.to_string();
        self.worker.enqueue(Box::pin(async move {
            let uri = status.uri.clone();
            if let Err(e) = this
                .refresh_status(&requesting_user, status, wire, window)
                .await
            {
                tracing::warn!("status: background refresh of {} failed: {}", uri, e);
            }
        }));
    }

    async fn populate_status(&self, status: &mut Status) {
        if status.emojis.len() == status.emoji_ids.len()
            && status.attachments.len() == status.attachment_ids.len()
        {
            return;
        }
        if let Err(e) = self.store.populate_status(status).await {
            tracing::warn!("status: populating {} failed: {}", status.uri, e);
        }
    }

    async fn enrich_status_safely(
        &self,
        requesting_user: &str,
        status: Status,
        wire: Option<WireStatus>,
        window: FreshnessWindow,
    ) -> Result<StatusOutcome, FederationError> {
        let key = status.uri.clone();
        let mut guard = self.locks.lock(&key).await;

        let mut base = status;
        match self.store.get_status_by_uri(&key).await {
            Ok(mut latest) => {
                if wire.is_none() && status_fresh(&latest, window, Utc::now()) {
                    guard.unlock();
                    self.populate_status(&mut latest).await;
                    return Ok(Outcome::Cached(latest));
                }
                base = latest;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let was_new = base.is_new();
        let result = self.enrich_status(requesting_user, &base, wire).await;
        guard.unlock();

        match result {
            Ok(Enriched::Written(mut entity, wire)) => {
                if entity.boost_of_uri.is_some() && entity.boost_of_id.is_none() {
                    self.link_boost_target(requesting_user, &mut entity).await;
                }
                Ok(Outcome::Updated { entity, wire })
            }
            Ok(Enriched::LostRace { uri }) => {
                tracing::debug!("status: {} was created concurrently, using stored row", uri);
                let mut winner = self.store.get_status_by_uri(&uri).await?;
                self.populate_status(&mut winner).await;
                Ok(Outcome::Cached(winner))
            }
            Err(error) if was_new => Err(error.context(format!("enriching new status {key}"))),
            Err(error) => match error.kind() {
                ErrorKind::Unretrievable => {
                    let entity = self.stamp_status_fetched(base).await;
                    Ok(Outcome::Degraded { entity, error })
                }
                ErrorKind::Malformed => {
                    self.stamp_status_fetched(base).await;
                    Err(error.context(format!("enriching status {key}")))
                }
                _ => Err(error.context(format!("enriching status {key}"))),
            },
        }
    }

    async fn stamp_status_fetched(&self, mut status: Status) -> Status {
        status.fetched_at = Some(advance(status.fetched_at, Utc::now()));
        if let Err(e) = self.store.update_status(&status, &["fetched_at"]).await {
            tracing::error!("status: recording fetch time of {} failed: {}", status.uri, e);
        }
        self.populate_status(&mut status).await;
        status
    }

    async fn enrich_status(
        &self,
        requesting_user: &str,
        status: &Status,
        wire: Option<WireStatus>,
    ) -> Result<Enriched<Status, WireStatus>, FederationError> {
        let transport = self.transports.transport_for(requesting_user)?;
        let mut status = status.clone();

        let target = self.parse_remote_uri(&status.uri)?;
        self.ensure_not_blocked(&target).await?;

        let (wire, fetched) = match wire {
            Some(wire) => (wire, target),
            None => {
                let resp = self.fetch(transport.as_ref(), &target).await?;
                if resp.final_uri != target {
                    self.ensure_not_blocked(&resp.final_uri).await?;
                    match self.store.get_status_by_uri(resp.final_uri.as_str()).await {
                        Ok(found) => status = found,
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                let wire = RemoteObject::from_slice(&resp.body)
                    .and_then(RemoteObject::into_status)
                    .map_err(|e| FederationError::malformed(resp.final_uri.as_str(), e))?;
                (wire, resp.final_uri)
            }
        };

        let mut latest = self.converter.wire_to_status(&wire)?;
        if !matches_fetched(&latest.uri, latest.url.as_deref(), &fetched) {
            return Err(FederationError::malformed(
                fetched.as_str(),
                format!("object id {} does not match the fetched uri", latest.uri),
            ));
        }
        if !uri::same_host(&latest.account_uri, &latest.uri) {
            return Err(FederationError::malformed(
                &latest.uri,
                format!("author {} is on another host", latest.account_uri),
            ));
        }

        let author = self
            .account_by_uri(requesting_user, &latest.account_uri)
            .await
            .map_err(|e| e.context(format!("resolving author of {}", latest.uri)))?
            .into_entity();

        let now = Utc::now();
        latest.id = status.id;
        latest.account_id = author.id;
        latest.fetched_at = Some(advance(status.fetched_at, now));
        if latest.boost_of_uri == status.boost_of_uri {
            latest.boost_of_id = status.boost_of_id;
        }
        latest.pinned_at = status.pinned_at;

        self.populate_status(&mut status).await;
        let wanted = std::mem::take(&mut latest.attachments);
        latest.attachments = self
            .fetch_status_attachments(requesting_user, &status, latest.id, author.id, wanted)
            .await;
        latest.attachment_ids = latest.attachments.iter().map(|a| a.id).collect();
        let attachments_changed = latest.attachment_ids != status.attachment_ids;

        let got = std::mem::take(&mut latest.emojis);
        let sync = self.reconcile_emojis(requesting_user, &status.emojis, got).await;
        let emojis_changed = sync.changed;
        latest.emoji_ids = if emojis_changed {
            sync.emojis.iter().map(|e| e.id).collect()
        } else {
            status.emoji_ids.clone()
        };
        latest.emojis = sync.emojis;

        if status.is_new() {
            latest.created_at = latest.created_at.or(latest.fetched_at);
            latest.updated_at = latest.fetched_at;
            match self.store.put_status(&latest).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    return Ok(Enriched::LostRace { uri: latest.uri });
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            latest.created_at = status.created_at.or(latest.created_at);
            latest.updated_at = Some(now);
            latest.language = status.language.clone();
            let columns: Vec<&str> = STATUS_COLUMNS
                .iter()
                .copied()
                .filter(|column| *column != "pinned_at")
                .filter(|column| emojis_changed || *column != "emoji_ids")
                .filter(|column| attachments_changed || *column != "attachment_ids")
                .collect();
            self.store.update_status(&latest, &columns).await?;
        }

        Ok(Enriched::Written(latest, wire))
    }

    /// Resolve the boosted status of `status` and record its id. Runs after
    /// the boost itself is stored and unlocked, so a cycle of boosts ends at
    /// an already stored row.
    async fn link_boost_target(&self, requesting_user: &str, status: &mut Status) {
        let Some(target) = status.boost_of_uri.clone() else {
            return;
        };
        if target == status.uri {
            tracing::warn!("status: {} boosts itself", status.uri);
            return;
        }
        match self
            .boosted_status(requesting_user.to_string(), target.clone())
            .await
        {
            Ok(outcome) => {
                status.boost_of_id = Some(outcome.entity().id);
                if let Err(e) = self.store.update_status(status, &["boost_of_id"]).await {
                    tracing::error!("status: recording boost target of {} failed: {}", status.uri, e);
                }
            }
            Err(e) => {
                tracing::warn!("status: resolving boost target {} of {} failed: {}", target, status.uri, e);
            }
        }
    }

    fn boosted_status(
        &self,
        requesting_user: String,
        uri: String,
    ) -> BoxFuture<'static, Result<StatusOutcome, FederationError>> {
        let this = self.clone();
        Box::pin(async move { this.get_status_by_uri(&requesting_user, &uri).await })
    }

    /// Reuse stored attachments whose remote URL is unchanged, download the
    /// rest. Attachments that fail to load are dropped and logged.
    async fn fetch_status_attachments(
        &self,
        requesting_user: &str,
        previous: &Status,
        status_id: i64,
        author_id: i64,
        wanted: Vec<MediaAttachment>,
    ) -> Vec<MediaAttachment> {
        let mut out = Vec::with_capacity(wanted.len());
        for stub in wanted {
            let Some(remote_url) = stub.remote_url.clone() else {
                continue;
            };
            if let Some(existing) = previous
                .attachments
                .iter()
                .find(|a| a.remote_url.as_deref() == Some(remote_url.as_str()))
            {
                out.push(existing.clone());
                continue;
            }
            let info = MediaInfo {
                kind: MediaKind::Attachment,
                remote_url: remote_url.clone(),
                status_id: Some(status_id),
                description: stub.description.clone(),
            };
            match self.load_remote_media(requesting_user, author_id, info).await {
                Ok(attachment) => out.push(attachment),
                Err(e) => {
                    tracing::warn!("status: fetching attachment {} failed: {}", remote_url, e);
                }
            }
        }
        out
    }
}
