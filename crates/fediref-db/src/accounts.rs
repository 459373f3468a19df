use fediref_models::Account;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::{
    datetime_from_millis, ids_from_db_text, ids_to_db_text, millis_from_datetime,
    update_set_clause, AnyQuery, DbError, DbPool,
};

/// Columns that may be named in a partial update.
pub const ACCOUNT_COLUMNS: &[&str] = &[
    "username",
    "domain",
    "uri",
    "url",
    "display_name",
    "note",
    "avatar_remote_url",
    "avatar_media_attachment_id",
    "header_remote_url",
    "header_media_attachment_id",
    "emoji_ids",
    "featured_collection_uri",
    "language",
    "created_at",
    "updated_at",
    "fetched_at",
    "suspended_at",
];

const SELECT_ACCOUNT: &str = "SELECT id, username, domain, uri, url, display_name, note,
        avatar_remote_url, avatar_media_attachment_id, header_remote_url,
        header_media_attachment_id, emoji_ids, featured_collection_uri, language,
        created_at, updated_at, fetched_at, suspended_at
     FROM accounts";

fn account_from_row(row: &AnyRow) -> Result<Account, sqlx::Error> {
    let emoji_ids: String = row.try_get("emoji_ids")?;
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        domain: row.try_get("domain")?,
        uri: row.try_get("uri")?,
        url: row.try_get("url")?,
        display_name: row.try_get("display_name")?,
        note: row.try_get("note")?,
        avatar_remote_url: row.try_get("avatar_remote_url")?,
        avatar_media_attachment_id: row.try_get("avatar_media_attachment_id")?,
        header_remote_url: row.try_get("header_remote_url")?,
        header_media_attachment_id: row.try_get("header_media_attachment_id")?,
        emoji_ids: ids_from_db_text(&emoji_ids)?,
        emojis: Vec::new(),
        featured_collection_uri: row.try_get("featured_collection_uri")?,
        language: row.try_get("language")?,
        created_at: datetime_from_millis(row.try_get("created_at")?),
        updated_at: datetime_from_millis(row.try_get("updated_at")?),
        fetched_at: datetime_from_millis(row.try_get("fetched_at")?),
        suspended_at: datetime_from_millis(row.try_get("suspended_at")?),
    })
}

async fn fetch_one_account(
    pool: &DbPool,
    filter: &str,
    binds: &[&str],
) -> Result<Option<Account>, DbError> {
    let sql = format!("{SELECT_ACCOUNT} WHERE {filter}");
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = query.bind(*value);
    }
    let row = query.fetch_optional(pool).await?;
    Ok(row.map(|r| account_from_row(&r)).transpose()?)
}

pub async fn get_account(pool: &DbPool, id: i64) -> Result<Option<Account>, DbError> {
    let sql = format!("{SELECT_ACCOUNT} WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.map(|r| account_from_row(&r)).transpose()?)
}

pub async fn get_account_by_uri(pool: &DbPool, uri: &str) -> Result<Option<Account>, DbError> {
    fetch_one_account(pool, "uri = $1", &[uri]).await
}

pub async fn get_account_by_url(pool: &DbPool, url: &str) -> Result<Option<Account>, DbError> {
    fetch_one_account(pool, "url = $1", &[url]).await
}

/// `domain = None` selects local accounts.
pub async fn get_account_by_username_domain(
    pool: &DbPool,
    username: &str,
    domain: Option<&str>,
) -> Result<Option<Account>, DbError> {
    match domain {
        Some(domain) => {
            fetch_one_account(
                pool,
                "LOWER(username) = LOWER($1) AND LOWER(domain) = LOWER($2)",
                &[username, domain],
            )
            .await
        }
        None => {
            fetch_one_account(pool, "LOWER(username) = LOWER($1) AND domain IS NULL", &[username])
                .await
        }
    }
}

pub async fn insert_account(pool: &DbPool, account: &Account) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO accounts (id, username, domain, uri, url, display_name, note,
            avatar_remote_url, avatar_media_attachment_id, header_remote_url,
            header_media_attachment_id, emoji_ids, featured_collection_uri, language,
            created_at, updated_at, fetched_at, suspended_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(account.id)
    .bind(account.username.as_str())
    .bind(account.domain.as_deref())
    .bind(account.uri.as_str())
    .bind(account.url.as_deref())
    .bind(account.display_name.as_deref())
    .bind(account.note.as_deref())
    .bind(account.avatar_remote_url.as_deref())
    .bind(account.avatar_media_attachment_id)
    .bind(account.header_remote_url.as_deref())
    .bind(account.header_media_attachment_id)
    .bind(ids_to_db_text(&account.emoji_ids))
    .bind(account.featured_collection_uri.as_deref())
    .bind(account.language.as_deref())
    .bind(millis_from_datetime(account.created_at))
    .bind(millis_from_datetime(account.updated_at))
    .bind(millis_from_datetime(account.fetched_at))
    .bind(millis_from_datetime(account.suspended_at))
    .execute(pool)
    .await?;
    Ok(())
}

/// Write the named columns of `account`; an empty list writes every column.
pub async fn update_account(
    pool: &DbPool,
    account: &Account,
    columns: &[&str],
) -> Result<(), DbError> {
    let columns = if columns.is_empty() {
        ACCOUNT_COLUMNS
    } else {
        columns
    };
    let sql = format!(
        "UPDATE accounts SET {} WHERE id = $1",
        update_set_clause(columns, ACCOUNT_COLUMNS)?
    );
    let mut query = sqlx::query(&sql).bind(account.id);
    for column in columns {
        query = bind_account_column(query, account, column);
    }
    let result = query.execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn bind_account_column<'q>(query: AnyQuery<'q>, account: &'q Account, column: &str) -> AnyQuery<'q> {
    match column {
        "username" => query.bind(account.username.as_str()),
        "domain" => query.bind(account.domain.as_deref()),
        "uri" => query.bind(account.uri.as_str()),
        "url" => query.bind(account.url.as_deref()),
        "display_name" => query.bind(account.display_name.as_deref()),
        "note" => query.bind(account.note.as_deref()),
        "avatar_remote_url" => query.bind(account.avatar_remote_url.as_deref()),
        "avatar_media_attachment_id" => query.bind(account.avatar_media_attachment_id),
        "header_remote_url" => query.bind(account.header_remote_url.as_deref()),
        "header_media_attachment_id" => query.bind(account.header_media_attachment_id),
        "emoji_ids" => query.bind(ids_to_db_text(&account.emoji_ids)),
        "featured_collection_uri" => query.bind(account.featured_collection_uri.as_deref()),
        "language" => query.bind(account.language.as_deref()),
        "created_at" => query.bind(millis_from_datetime(account.created_at)),
        "updated_at" => query.bind(millis_from_datetime(account.updated_at)),
        "fetched_at" => query.bind(millis_from_datetime(account.fetched_at)),
        "suspended_at" => query.bind(millis_from_datetime(account.suspended_at)),
        _ => query,
    }
}
