use std::collections::HashSet;

use chrono::Utc;
use fediref_models::Account;
use fediref_util::uri;
use futures_util::future::BoxFuture;

use super::{CollectionIter, Dereferencer};
use crate::FederationError;

impl Dereferencer {
    /// Sync the account's pinned statuses with its remote featured
    /// collection: pin newly listed statuses, unpin ones no longer listed.
    ///
    /// Returns a boxed future so it can be queued from inside account
    /// resolution.
    pub fn dereference_account_featured(
        &self,
        requesting_user: String,
        account: Account,
    ) -> BoxFuture<'static, Result<(), FederationError>> {
        let this = self.clone();
        Box::pin(async move { this.reconcile_featured(&requesting_user, &account).await })
    }

    async fn reconcile_featured(
        &self,
        requesting_user: &str,
        account: &Account,
    ) -> Result<(), FederationError> {
        let Some(featured_uri) = account.featured_collection_uri.as_deref() else {
            return Ok(());
        };
        if account.is_local() || account.is_suspended() {
            return Ok(());
        }

        let collection_uri = self.parse_remote_uri(featured_uri)?;
        self.ensure_not_blocked(&collection_uri).await?;
        let transport = self.transports.transport_for(requesting_user)?;

        // Snapshot before this pass pins anything new.
        let previously_pinned = self.store.get_account_pinned_statuses(account.id).await?;

        let mut items = CollectionIter::open(self, transport, collection_uri)
            .await
            .map_err(|e| e.context(format!("fetching featured collection of {}", account.uri)))?;

        let now = Utc::now();
        let mut observed: HashSet<String> = HashSet::new();
        while let Some(item) = items.next_item().await? {
            if !uri::same_host(&item, featured_uri) {
                tracing::warn!(
                    "featured: ignoring {} in collection {} on another host",
                    item,
                    featured_uri
                );
                continue;
            }
            observed.insert(item.clone());

            let mut status = match self.get_status_by_uri(requesting_user, &item).await {
                Ok(outcome) => outcome.into_entity(),
                Err(e) => {
                    tracing::warn!("featured: resolving {} failed: {}", item, e);
                    continue;
                }
            };
            observed.insert(status.uri.clone());

            if status.is_pinned() {
                continue;
            }
            if status.account_uri != account.uri {
                tracing::warn!(
                    "featured: {} belongs to {}, not {}",
                    status.uri,
                    status.account_uri,
                    account.uri
                );
                continue;
            }
            if status.is_boost() {
                continue;
            }

            status.pinned_at = Some(now);
            if let Err(e) = self.store.update_status(&status, &["pinned_at"]).await {
                tracing::error!("featured: pinning {} failed: {}", status.uri, e);
            }
        }

        for mut status in previously_pinned {
            if observed.contains(&status.uri) {
                continue;
            }
            status.pinned_at = None;
            if let Err(e) = self.store.update_status(&status, &["pinned_at"]).await {
                tracing::error!("featured: unpinning {} failed: {}", status.uri, e);
            }
        }
        Ok(())
    }
}
