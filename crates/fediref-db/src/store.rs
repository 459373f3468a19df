//! The data-access seam the dereferencer talks to.
//!
//! Lookups return [`DbError::NotFound`] rather than `Option` so callers can
//! tell "no row" apart from every other failure with a single match, and
//! inserts surface unique-key races as [`DbError::AlreadyExists`].

use std::time::Duration;

use async_trait::async_trait;
use fediref_models::{Account, Emoji, MediaAttachment, Status};

use crate::{accounts, attachments, domain_blocks, emojis, statuses, DbError, DbPool};

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_account_by_uri(&self, uri: &str) -> Result<Account, DbError>;
    async fn get_account_by_url(&self, url: &str) -> Result<Account, DbError>;
    /// `domain = None` selects local accounts.
    async fn get_account_by_username_domain(
        &self,
        username: &str,
        domain: Option<&str>,
    ) -> Result<Account, DbError>;
    async fn put_account(&self, account: &Account) -> Result<(), DbError>;
    /// Write the named columns; an empty list writes every column.
    async fn update_account(&self, account: &Account, columns: &[&str]) -> Result<(), DbError>;
    /// Fill `emojis` from `emoji_ids`. Missing emojis are skipped.
    async fn populate_account(&self, account: &mut Account) -> Result<(), DbError>;

    async fn get_status_by_uri(&self, uri: &str) -> Result<Status, DbError>;
    async fn get_status_by_url(&self, url: &str) -> Result<Status, DbError>;
    async fn put_status(&self, status: &Status) -> Result<(), DbError>;
    async fn update_status(&self, status: &Status, columns: &[&str]) -> Result<(), DbError>;
    /// Fill `emojis` and `attachments`. Missing rows are skipped.
    async fn populate_status(&self, status: &mut Status) -> Result<(), DbError>;
    async fn get_account_pinned_statuses(&self, account_id: i64) -> Result<Vec<Status>, DbError>;

    async fn get_emoji(&self, id: i64) -> Result<Emoji, DbError>;
    async fn get_emoji_by_uri(&self, uri: &str) -> Result<Emoji, DbError>;
    async fn put_emoji(&self, emoji: &Emoji) -> Result<(), DbError>;
    async fn update_emoji(&self, emoji: &Emoji) -> Result<(), DbError>;

    async fn get_attachment(&self, id: i64) -> Result<MediaAttachment, DbError>;
    async fn put_attachment(&self, media: &MediaAttachment) -> Result<(), DbError>;

    /// Whether `host` or one of its parent domains is blocked.
    async fn is_domain_blocked(&self, host: &str) -> Result<bool, DbError>;
    async fn put_domain_block(&self, domain: &str, reason: Option<&str>) -> Result<(), DbError>;
    /// Returns false when no block existed for `domain`.
    async fn delete_domain_block(&self, domain: &str) -> Result<bool, DbError>;
}

/// [`DataStore`] over an sqlx pool, with a short-lived domain block cache.
#[derive(Clone)]
pub struct SqlStore {
    pool: DbPool,
    blocked: moka::future::Cache<String, bool>,
}

impl SqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            blocked: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60))
                .build(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn found<T>(row: Option<T>) -> Result<T, DbError> {
    row.ok_or(DbError::NotFound)
}

#[async_trait]
impl DataStore for SqlStore {
    async fn get_account_by_uri(&self, uri: &str) -> Result<Account, DbError> {
        found(accounts::get_account_by_uri(&self.pool, uri).await?)
    }

    async fn get_account_by_url(&self, url: &str) -> Result<Account, DbError> {
        found(accounts::get_account_by_url(&self.pool, url).await?)
    }

    async fn get_account_by_username_domain(
        &self,
        username: &str,
        domain: Option<&str>,
    ) -> Result<Account, DbError> {
        found(accounts::get_account_by_username_domain(&self.pool, username, domain).await?)
    }

    async fn put_account(&self, account: &Account) -> Result<(), DbError> {
        accounts::insert_account(&self.pool, account).await
    }

    async fn update_account(&self, account: &Account, columns: &[&str]) -> Result<(), DbError> {
        accounts::update_account(&self.pool, account, columns).await
    }

    async fn populate_account(&self, account: &mut Account) -> Result<(), DbError> {
        let mut loaded = Vec::with_capacity(account.emoji_ids.len());
        for id in &account.emoji_ids {
            match emojis::get_emoji(&self.pool, *id).await? {
                Some(emoji) => loaded.push(emoji),
                None => tracing::warn!(
                    "populate: account {} references missing emoji {}",
                    account.uri,
                    id
                ),
            }
        }
        account.emojis = loaded;
        Ok(())
    }

    async fn get_status_by_uri(&self, uri: &str) -> Result<Status, DbError> {
        found(statuses::get_status_by_uri(&self.pool, uri).await?)
    }

    async fn get_status_by_url(&self, url: &str) -> Result<Status, DbError> {
        found(statuses::get_status_by_url(&self.pool, url).await?)
    }

    async fn put_status(&self, status: &Status) -> Result<(), DbError> {
        statuses::insert_status(&self.pool, status).await
    }

    async fn update_status(&self, status: &Status, columns: &[&str]) -> Result<(), DbError> {
        statuses::update_status(&self.pool, status, columns).await
    }

    async fn populate_status(&self, status: &mut Status) -> Result<(), DbError> {
        let mut loaded_emojis = Vec::with_capacity(status.emoji_ids.len());
        for id in &status.emoji_ids {
            match emojis::get_emoji(&self.pool, *id).await? {
                Some(emoji) => loaded_emojis.push(emoji),
                None => tracing::warn!(
                    "populate: status {} references missing emoji {}",
                    status.uri,
                    id
                ),
            }
        }
        let mut loaded_media = Vec::with_capacity(status.attachment_ids.len());
        for id in &status.attachment_ids {
            match attachments::get_attachment(&self.pool, *id).await? {
                Some(media) => loaded_media.push(media),
                None => tracing::warn!(
                    "populate: status {} references missing attachment {}",
                    status.uri,
                    id
                ),
            }
        }
        status.emojis = loaded_emojis;
        status.attachments = loaded_media;
        Ok(())
    }

    async fn get_account_pinned_statuses(&self, account_id: i64) -> Result<Vec<Status>, DbError> {
        statuses::get_pinned_statuses(&self.pool, account_id).await
    }

    async fn get_emoji(&self, id: i64) -> Result<Emoji, DbError> {
        found(emojis::get_emoji(&self.pool, id).await?)
    }

    async fn get_emoji_by_uri(&self, uri: &str) -> Result<Emoji, DbError> {
        found(emojis::get_emoji_by_uri(&self.pool, uri).await?)
    }

    async fn put_emoji(&self, emoji: &Emoji) -> Result<(), DbError> {
        emojis::insert_emoji(&self.pool, emoji).await
    }

    async fn update_emoji(&self, emoji: &Emoji) -> Result<(), DbError> {
        emojis::update_emoji_image(&self.pool, emoji).await
    }

    async fn get_attachment(&self, id: i64) -> Result<MediaAttachment, DbError> {
        found(attachments::get_attachment(&self.pool, id).await?)
    }

    async fn put_attachment(&self, media: &MediaAttachment) -> Result<(), DbError> {
        attachments::insert_attachment(&self.pool, media).await
    }

    async fn is_domain_blocked(&self, host: &str) -> Result<bool, DbError> {
        let host = host.to_ascii_lowercase();
        if let Some(blocked) = self.blocked.get(&host).await {
            return Ok(blocked);
        }
        let blocked = domain_blocks::is_domain_blocked(&self.pool, &host).await?;
        self.blocked.insert(host, blocked).await;
        Ok(blocked)
    }

    async fn put_domain_block(&self, domain: &str, reason: Option<&str>) -> Result<(), DbError> {
        domain_blocks::insert_domain_block(&self.pool, domain, reason).await?;
        self.blocked.invalidate_all();
        Ok(())
    }

    async fn delete_domain_block(&self, domain: &str) -> Result<bool, DbError> {
        let removed = domain_blocks::delete_domain_block(&self.pool, domain).await?;
        self.blocked.invalidate_all();
        Ok(removed)
    }
}
