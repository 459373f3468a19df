//! Fetching, validating and persisting remote accounts, statuses and their
//! media, emojis and featured collections.
//!
//! All public entry points are on [`Dereferencer`]. Enrichment of any one
//! resource is serialized through a per-URI lock, and the freshness check is
//! repeated after the lock is taken so that a burst of callers for the same
//! URI results in a single remote fetch.

mod account;
mod collection;
mod emoji;
mod featured;
mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fediref_db::DataStore;
use fediref_models::MediaAttachment;
use fediref_util::{snowflake, uri, KeyedLocks};
use futures_util::FutureExt;
use url::Url;

use crate::converter::Converter;
use crate::media::{DataFn, MediaInfo, MediaManager};
use crate::tracker::MediaTracker;
use crate::transport::{DereferenceResponse, Finger, Transport, TransportController, TransportError};
use crate::worker::AsyncWorker;
use crate::{FederationConfig, FederationError};

pub use collection::CollectionIter;
pub use emoji::{emojis_changed, EmojiSync};

#[derive(Clone)]
pub struct Dereferencer {
    config: Arc<FederationConfig>,
    store: Arc<dyn DataStore>,
    transports: Arc<dyn TransportController>,
    converter: Arc<dyn Converter>,
    media: Arc<dyn MediaManager>,
    worker: Arc<dyn AsyncWorker>,
    locks: KeyedLocks,
    media_tracker: MediaTracker,
}

/// Result of an enrichment pass run under the resource lock.
enum Enriched<T, W> {
    Written(T, W),
    /// Another writer inserted the same URI first.
    LostRace { uri: String },
}

impl Dereferencer {
    pub fn new(
        config: FederationConfig,
        store: Arc<dyn DataStore>,
        transports: Arc<dyn TransportController>,
        converter: Arc<dyn Converter>,
        media: Arc<dyn MediaManager>,
        worker: Arc<dyn AsyncWorker>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            transports,
            converter,
            media,
            worker,
            locks: KeyedLocks::new(),
            media_tracker: MediaTracker::new(),
        }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Resource locks currently held or awaited.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn media_tracker(&self) -> &MediaTracker {
        &self.media_tracker
    }

    fn new_id(&self) -> i64 {
        snowflake::generate(self.config.node_id)
    }

    /// Parse a stored URI that is about to be dereferenced.
    fn parse_remote_uri(&self, raw: &str) -> Result<Url, FederationError> {
        if !uri::is_dereferenceable(raw) {
            return Err(FederationError::unretrievable(
                raw,
                "uri is not an http(s) uri",
            ));
        }
        Url::parse(raw).map_err(|e| FederationError::unretrievable(raw, e))
    }

    async fn ensure_not_blocked(&self, target: &Url) -> Result<(), FederationError> {
        let host = target.host_str().unwrap_or_default();
        self.ensure_domain_not_blocked(host).await.inspect_err(|_| {
            tracing::info!("dereference: refusing {} from blocked domain", target);
        })
    }

    async fn ensure_domain_not_blocked(&self, domain: &str) -> Result<(), FederationError> {
        if self.store.is_domain_blocked(domain).await? {
            return Err(FederationError::Blocked(domain.to_ascii_lowercase()));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        target: &Url,
    ) -> Result<DereferenceResponse, FederationError> {
        tracing::debug!("dereference: fetching {}", target);
        match tokio::time::timeout(self.config.request_timeout, transport.dereference(target)).await
        {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(FederationError::from(e).context(format!("dereferencing {target}"))),
            Err(_) => Err(FederationError::from(TransportError::Timeout {
                uri: target.to_string(),
            })),
        }
    }

    async fn finger(
        &self,
        transport: &dyn Transport,
        username: &str,
        domain: &str,
    ) -> Result<Finger, FederationError> {
        tracing::debug!("dereference: fingering {}@{}", username, domain);
        let handle = format!("{username}@{domain}");
        match tokio::time::timeout(self.config.request_timeout, transport.finger(username, domain))
            .await
        {
            Ok(Ok(finger)) => Ok(finger),
            Ok(Err(e)) => Err(FederationError::unretrievable(handle, e)),
            Err(_) => Err(FederationError::from(TransportError::Timeout { uri: handle })),
        }
    }

    /// Download remote media once per URL, however many callers ask for it.
    async fn load_remote_media(
        &self,
        requesting_user: &str,
        owner_id: i64,
        info: MediaInfo,
    ) -> Result<MediaAttachment, FederationError> {
        let remote = info.remote_url.clone();
        let target = self.parse_remote_uri(&remote)?;
        self.ensure_not_blocked(&target).await?;
        let transport = self.transports.transport_for(requesting_user)?;
        let max_size = self.config.media_max_size;
        let media = self.media.clone();

        let load = self.media_tracker.load(&remote, move || {
            let data: DataFn = Box::new(move || {
                async move { transport.dereference_media(&target, max_size).await }.boxed()
            });
            media.pre_process_media(data, owner_id, info)
        });

        match tokio::time::timeout(self.config.media_timeout, load).await {
            Ok(Ok(attachment)) => Ok(attachment),
            Ok(Err(e)) => Err(FederationError::unretrievable(remote, e)),
            Err(_) => Err(FederationError::from(TransportError::Timeout { uri: remote })),
        }
    }
}

/// `FetchedAt` never moves backwards.
fn advance(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) if previous > now => previous,
        _ => now,
    }
}

/// Whether the object we got back is the one we asked for.
fn matches_fetched(uri: &str, url: Option<&str>, fetched: &Url) -> bool {
    uri == fetched.as_str() || url == Some(fetched.as_str())
}
