use chrono::Utc;
use fediref_db::accounts::ACCOUNT_COLUMNS;
use fediref_models::{Account, MediaKind, RemoteObject, WireAccount};
use fediref_util::uri;
use url::Url;

use super::{advance, matches_fetched, Dereferencer, Enriched};
use crate::freshness::{account_fresh, FreshnessWindow};
use crate::media::MediaInfo;
use crate::outcome::{AccountOutcome, Outcome};
use crate::{ErrorKind, FederationError};

impl Dereferencer {
    /// Look up an account by URI (or profile URL), dereferencing it when it
    /// is unknown or stale.
    ///
    /// Unknown URIs on this server's own host are Unretrievable. When a
    /// refresh of a known account fails, the stored copy comes back as
    /// [`Outcome::Degraded`]. A successful remote update schedules a refresh of
    /// the account's featured collection.
    pub async fn get_account_by_uri(
        &self,
        requesting_user: &str,
        uri: &str,
    ) -> Result<AccountOutcome, FederationError> {
        let outcome = self.account_by_uri(requesting_user, uri).await?;
        self.schedule_featured(requesting_user, &outcome);
        Ok(outcome)
    }

    /// Look up an account by `username` and `domain`, fingering the domain
    /// when the account is unknown or stale. Local domains never leave the
    /// store.
    pub async fn get_account_by_username_domain(
        &self,
        requesting_user: &str,
        username: &str,
        domain: &str,
    ) -> Result<AccountOutcome, FederationError> {
        if domain.is_empty() || self.config.is_local_host(domain) {
            let mut account = self
                .store
                .get_account_by_username_domain(username, None)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        FederationError::unretrievable(username, "no local account with this username")
                    } else {
                        FederationError::from(e).context(format!("local account {username}"))
                    }
                })?;
            self.populate_account(&mut account).await;
            return Ok(Outcome::Cached(account));
        }

        let domain = domain.to_ascii_lowercase();
        let existing = match self
            .store
            .get_account_by_username_domain(username, Some(&domain))
            .await
        {
            Ok(account) => Some(account),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let outcome = match existing {
            Some(account) => self.refresh_existing_account(requesting_user, account).await?,
            None => {
                let stub = Account::stub_from_handle(self.new_id(), username, domain);
                self.enrich_account_safely(
                    requesting_user,
                    stub,
                    None,
                    self.config.account_freshness,
                )
                .await?
            }
        };
        self.schedule_featured(requesting_user, &outcome);
        Ok(outcome)
    }

    /// Bring `account` up to date. A supplied `wire` object (e.g. from an
    /// inbound Update) is used as-is without fetching, and skips the
    /// freshness check.
    pub async fn refresh_account(
        &self,
        requesting_user: &str,
        account: Account,
        wire: Option<WireAccount>,
        window: FreshnessWindow,
    ) -> Result<AccountOutcome, FederationError> {
        if account.is_local() {
            return Ok(Outcome::Cached(account));
        }
        if wire.is_none() && account_fresh(&account, window, Utc::now()) {
            return Ok(Outcome::Cached(account));
        }
        let outcome = self
            .enrich_account_safely(requesting_user, account, wire, window)
            .await?;
        self.schedule_featured(requesting_user, &outcome);
        Ok(outcome)
    }

    /// Queue [`Self::refresh_account`] on the worker. Fresh accounts are
    /// skipped before anything is queued.
    pub fn refresh_account_async(
        &self,
        requesting_user: &str,
        account: Account,
        wire: Option<WireAccount>,
        window: FreshnessWindow,
    ) {
        if account.is_local() {
            return;
        }
        if wire.is_none() && account_fresh(&account, window, Utc::now()) {
            return;
        }
        let this = self.clone();
        let requesting_user = requesting_user.to_string();
        self.worker.enqueue(Box::pin(async move {
            let uri = account.uri.clone();
            if let Err(e) = this
                .refresh_account(&requesting_user, account, wire, window)
                .await
            {
                tracing::warn!("account: background refresh of {} failed: {}", uri, e);
            }
        }));
    }

    /// By-URI resolution without the featured-collection cascade.
    pub(crate) async fn account_by_uri(
        &self,
        requesting_user: &str,
        uri: &str,
    ) -> Result<AccountOutcome, FederationError> {
        let existing = match self.store.get_account_by_uri(uri).await {
            Ok(account) => Some(account),
            Err(e) if e.is_not_found() => match self.store.get_account_by_url(uri).await {
                Ok(account) => Some(account),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(account) => self.refresh_existing_account(requesting_user, account).await,
            None => {
                let host = uri::host_of(uri)
                    .ok_or_else(|| FederationError::unretrievable(uri, "uri has no host"))?;
                if self.config.is_local_host(&host) {
                    return Err(FederationError::unretrievable(
                        uri,
                        "no local account with this uri",
                    ));
                }
                let stub = Account::stub_from_uri(self.new_id(), uri, host);
                self.enrich_account_safely(
                    requesting_user,
                    stub,
                    None,
                    self.config.account_freshness,
                )
                .await
            }
        }
    }

    /// Stored account: serve it if fresh, otherwise refresh it and fall back
    /// to the stored copy on any failure.
    async fn refresh_existing_account(
        &self,
        requesting_user: &str,
        mut account: Account,
    ) -> Result<AccountOutcome, FederationError> {
        let window = self.config.account_freshness;
        if account_fresh(&account, window, Utc::now()) {
            self.populate_account(&mut account).await;
            return Ok(Outcome::Cached(account));
        }
        let fallback = account.clone();
        match self
            .enrich_account_safely(requesting_user, account, None, window)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::warn!(
                    "account: using stored {} after failed refresh: {}",
                    fallback.uri,
                    error
                );
                let mut entity = fallback;
                self.populate_account(&mut entity).await;
                Ok(Outcome::Degraded { entity, error })
            }
        }
    }

    fn schedule_featured(&self, requesting_user: &str, outcome: &AccountOutcome) {
        if !outcome.is_updated() {
            return;
        }
        let account = outcome.entity();
        if account.featured_collection_uri.is_none() {
            return;
        }
        let uri = account.uri.clone();
        let task = self.dereference_account_featured(requesting_user.to_string(), account.clone());
        self.worker.enqueue(Box::pin(async move {
            if let Err(e) = task.await {
                tracing::warn!("featured: refreshing pinned statuses of {} failed: {}", uri, e);
            }
        }));
    }

    async fn populate_account(&self, account: &mut Account) {
        if account.emojis.len() == account.emoji_ids.len() {
            return;
        }
        if let Err(e) = self.store.populate_account(account).await {
            tracing::warn!("account: populating {} failed: {}", account.uri, e);
        }
    }

    /// Serialize enrichment per account and turn failures of known accounts
    /// into a bumped fetch time.
    async fn enrich_account_safely(
        &self,
        requesting_user: &str,
        account: Account,
        wire: Option<WireAccount>,
        window: FreshnessWindow,
    ) -> Result<AccountOutcome, FederationError> {
        if account.is_suspended() {
            return Ok(Outcome::Cached(account));
        }

        let key = if account.uri.is_empty() {
            uri::account_key(
                &self.config.protocol,
                account.domain.as_deref().unwrap_or_default(),
                &account.username,
            )
        } else {
            account.uri.clone()
        };
        let mut guard = self.locks.lock(&key).await;

        // The caller's copy may predate a suspension or a concurrent refresh.
        let mut base = account;
        if let Some(mut latest) = self.reload_account(&base).await? {
            let fresh = wire.is_none() && account_fresh(&latest, window, Utc::now());
            if latest.is_suspended() || fresh {
                guard.unlock();
                self.populate_account(&mut latest).await;
                return Ok(Outcome::Cached(latest));
            }
            base = latest;
        }

        let was_new = base.is_new();
        let result = self.enrich_account(requesting_user, &base, wire).await;
        guard.unlock();

        match result {
            Ok(Enriched::Written(entity, wire)) => Ok(Outcome::Updated { entity, wire }),
            Ok(Enriched::LostRace { uri }) => {
                tracing::debug!("account: {} was created concurrently, using stored row", uri);
                let mut winner = self.store.get_account_by_uri(&uri).await?;
                self.populate_account(&mut winner).await;
                Ok(Outcome::Cached(winner))
            }
            Err(error) if was_new => Err(error.context(format!("enriching new account {key}"))),
            Err(error) => match error.kind() {
                ErrorKind::Unretrievable => {
                    let entity = self.stamp_account_fetched(base).await;
                    Ok(Outcome::Degraded { entity, error })
                }
                ErrorKind::Malformed => {
                    self.stamp_account_fetched(base).await;
                    Err(error.context(format!("enriching account {key}")))
                }
                _ => Err(error.context(format!("enriching account {key}"))),
            },
        }
    }

    /// The latest stored row for `account`, if any.
    async fn reload_account(&self, account: &Account) -> Result<Option<Account>, FederationError> {
        let found = if !account.uri.is_empty() {
            self.store.get_account_by_uri(&account.uri).await
        } else {
            self.store
                .get_account_by_username_domain(&account.username, account.domain.as_deref())
                .await
        };
        match found {
            Ok(account) => Ok(Some(account)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a failed attempt so the account is not retried immediately.
    async fn stamp_account_fetched(&self, mut account: Account) -> Account {
        account.fetched_at = Some(advance(account.fetched_at, Utc::now()));
        if let Err(e) = self.store.update_account(&account, &["fetched_at"]).await {
            tracing::error!("account: recording fetch time of {} failed: {}", account.uri, e);
        }
        self.populate_account(&mut account).await;
        account
    }

    async fn enrich_account(
        &self,
        requesting_user: &str,
        account: &Account,
        wire: Option<WireAccount>,
    ) -> Result<Enriched<Account, WireAccount>, FederationError> {
        let transport = self.transports.transport_for(requesting_user)?;
        let mut account = account.clone();
        let mut rediscovered_by_finger = false;

        if !account.username.is_empty() {
            let domain = account.domain.clone().unwrap_or_default();
            self.ensure_domain_not_blocked(&domain).await?;
            match self.finger(transport.as_ref(), &account.username, &domain).await {
                Err(e) if account.uri.is_empty() => return Err(e),
                Err(e) => tracing::warn!(
                    "account: webfinger for {} failed, keeping stored uri: {}",
                    account.handle(),
                    e
                ),
                Ok(finger) => {
                    if !finger.domain.eq_ignore_ascii_case(&domain) {
                        match self
                            .store
                            .get_account_by_username_domain(&account.username, Some(&finger.domain))
                            .await
                        {
                            Ok(found) => {
                                tracing::info!(
                                    "account: {} is known as {}",
                                    account.handle(),
                                    found.handle()
                                );
                                account = found;
                                rediscovered_by_finger = true;
                            }
                            Err(e) if e.is_not_found() => {
                                account.domain = Some(finger.domain.clone());
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    if account.uri != finger.uri {
                        match self.store.get_account_by_uri(&finger.uri).await {
                            Ok(found) if found.id != account.id => {
                                tracing::info!(
                                    "account: {} resolves to known {}",
                                    account.handle(),
                                    finger.uri
                                );
                                account = found;
                                rediscovered_by_finger = true;
                            }
                            Ok(_) => {}
                            Err(e) if e.is_not_found() => {
                                if !account.uri.is_empty() {
                                    tracing::info!(
                                        "account: {} moved from {} to {}",
                                        account.handle(),
                                        account.uri,
                                        finger.uri
                                    );
                                }
                                account.uri = finger.uri;
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }

        let target = self.parse_remote_uri(&account.uri)?;
        self.ensure_not_blocked(&target).await?;

        let (wire, fetched) = match wire {
            Some(wire) => (wire, target),
            None => {
                let resp = self.fetch(transport.as_ref(), &target).await?;
                if resp.final_uri != target {
                    self.ensure_not_blocked(&resp.final_uri).await?;
                    match self.store.get_account_by_uri(resp.final_uri.as_str()).await {
                        Ok(found) => {
                            if rediscovered_by_finger && found.id != account.id {
                                tracing::warn!(
                                    "account: redirect to {} overrides webfinger match {}",
                                    resp.final_uri,
                                    account.uri
                                );
                            }
                            account = found;
                        }
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                let wire = RemoteObject::from_slice(&resp.body)
                    .and_then(RemoteObject::into_account)
                    .map_err(|e| FederationError::malformed(resp.final_uri.as_str(), e))?;
                (wire, resp.final_uri)
            }
        };

        let domain_hint = if account.username.is_empty() {
            None
        } else {
            account.domain.as_deref()
        };
        let mut latest = self.converter.wire_to_account(&wire, domain_hint)?;
        if !matches_fetched(&latest.uri, latest.url.as_deref(), &fetched) {
            return Err(FederationError::malformed(
                fetched.as_str(),
                format!("object id {} does not match the fetched uri", latest.uri),
            ));
        }

        if account.username.is_empty() {
            let id_host = uri::host_of(&wire.id)
                .ok_or_else(|| FederationError::malformed(&wire.id, "id has no host"))?;
            let finger = self
                .finger(transport.as_ref(), &latest.username, &id_host)
                .await?;
            latest.domain = Some(finger.domain.to_ascii_lowercase());
        }

        if latest.domain.as_deref().unwrap_or_default().is_empty() {
            return Err(FederationError::malformed(&latest.uri, "empty account domain"));
        }

        let now = Utc::now();
        latest.id = account.id;
        latest.fetched_at = Some(advance(account.fetched_at, now));

        self.fetch_account_image(requesting_user, &account, &mut latest, MediaKind::Avatar)
            .await;
        self.fetch_account_image(requesting_user, &account, &mut latest, MediaKind::Header)
            .await;

        if account.emojis.len() != account.emoji_ids.len() {
            self.populate_account(&mut account).await;
        }
        let got = std::mem::take(&mut latest.emojis);
        let sync = self.reconcile_emojis(requesting_user, &account.emojis, got).await;
        let emojis_changed = sync.changed;
        latest.emoji_ids = if emojis_changed {
            sync.emojis.iter().map(|e| e.id).collect()
        } else {
            account.emoji_ids.clone()
        };
        latest.emojis = sync.emojis;

        if account.is_new() {
            latest.created_at = latest.created_at.or(latest.fetched_at);
            latest.updated_at = latest.fetched_at;
            match self.store.put_account(&latest).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    return Ok(Enriched::LostRace { uri: latest.uri });
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            latest.created_at = account.created_at.or(latest.created_at);
            latest.updated_at = Some(now);
            latest.language = account.language.clone();
            let columns: Vec<&str> = ACCOUNT_COLUMNS
                .iter()
                .copied()
                .filter(|column| *column != "suspended_at")
                .filter(|column| emojis_changed || *column != "emoji_ids")
                .collect();
            self.store.update_account(&latest, &columns).await?;
        }

        Ok(Enriched::Written(latest, wire))
    }

    /// Resolve the avatar or header of `latest`, reusing the stored
    /// attachment when the remote URL has not changed. Failures are logged.
    async fn fetch_account_image(
        &self,
        requesting_user: &str,
        account: &Account,
        latest: &mut Account,
        kind: MediaKind,
    ) {
        let (remote_url, previous_url, previous_id) = match kind {
            MediaKind::Header => (
                latest.header_remote_url.clone(),
                account.header_remote_url.as_deref(),
                account.header_media_attachment_id,
            ),
            _ => (
                latest.avatar_remote_url.clone(),
                account.avatar_remote_url.as_deref(),
                account.avatar_media_attachment_id,
            ),
        };

        let attachment_id = match remote_url {
            None => None,
            Some(remote_url) => {
                self.resolve_image(requesting_user, latest.id, remote_url, previous_url, previous_id, kind)
                    .await
            }
        };
        match kind {
            MediaKind::Header => latest.header_media_attachment_id = attachment_id,
            _ => latest.avatar_media_attachment_id = attachment_id,
        }
    }

    async fn resolve_image(
        &self,
        requesting_user: &str,
        owner_id: i64,
        remote_url: String,
        previous_url: Option<&str>,
        previous_id: Option<i64>,
        kind: MediaKind,
    ) -> Option<i64> {
        if let (Some(previous_url), Some(previous_id)) = (previous_url, previous_id) {
            if previous_url == remote_url {
                match self.store.get_attachment(previous_id).await {
                    Ok(existing) if existing.remote_url.as_deref() == Some(remote_url.as_str()) => {
                        return Some(existing.id);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        tracing::warn!("account: loading attachment {} failed: {}", previous_id, e);
                    }
                }
            }
        }

        if Url::parse(&remote_url).is_err() {
            tracing::warn!("account: ignoring invalid media url {}", remote_url);
            return None;
        }
        let info = MediaInfo {
            kind,
            remote_url: remote_url.clone(),
            ..Default::default()
        };
        match self.load_remote_media(requesting_user, owner_id, info).await {
            Ok(attachment) => Some(attachment.id),
            Err(e) => {
                tracing::warn!("account: fetching {:?} {} failed: {}", kind, remote_url, e);
                None
            }
        }
    }
}
