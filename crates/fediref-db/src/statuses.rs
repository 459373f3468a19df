use fediref_models::Status;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::{
    bool_from_any_row, datetime_from_millis, ids_from_db_text, ids_to_db_text,
    millis_from_datetime, update_set_clause, AnyQuery, DbError, DbPool,
};

pub const STATUS_COLUMNS: &[&str] = &[
    "uri",
    "url",
    "local",
    "account_id",
    "account_uri",
    "boost_of_id",
    "boost_of_uri",
    "in_reply_to_uri",
    "content",
    "content_warning",
    "sensitive",
    "language",
    "attachment_ids",
    "emoji_ids",
    "pinned_at",
    "created_at",
    "updated_at",
    "fetched_at",
];

const SELECT_STATUS: &str = "SELECT id, uri, url, local, account_id, account_uri, boost_of_id,
        boost_of_uri, in_reply_to_uri, content, content_warning, sensitive, language,
        attachment_ids, emoji_ids, pinned_at, created_at, updated_at, fetched_at
     FROM statuses";

fn status_from_row(row: &AnyRow) -> Result<Status, sqlx::Error> {
    let attachment_ids: String = row.try_get("attachment_ids")?;
    let emoji_ids: String = row.try_get("emoji_ids")?;
    Ok(Status {
        id: row.try_get("id")?,
        uri: row.try_get("uri")?,
        url: row.try_get("url")?,
        local: bool_from_any_row(row, "local")?,
        account_id: row.try_get("account_id")?,
        account_uri: row.try_get("account_uri")?,
        boost_of_id: row.try_get("boost_of_id")?,
        boost_of_uri: row.try_get("boost_of_uri")?,
        in_reply_to_uri: row.try_get("in_reply_to_uri")?,
        content: row.try_get("content")?,
        content_warning: row.try_get("content_warning")?,
        sensitive: bool_from_any_row(row, "sensitive")?,
        language: row.try_get("language")?,
        attachment_ids: ids_from_db_text(&attachment_ids)?,
        attachments: Vec::new(),
        emoji_ids: ids_from_db_text(&emoji_ids)?,
        emojis: Vec::new(),
        pinned_at: datetime_from_millis(row.try_get("pinned_at")?),
        created_at: datetime_from_millis(row.try_get("created_at")?),
        updated_at: datetime_from_millis(row.try_get("updated_at")?),
        fetched_at: datetime_from_millis(row.try_get("fetched_at")?),
    })
}

pub async fn get_status_by_uri(pool: &DbPool, uri: &str) -> Result<Option<Status>, DbError> {
    let sql = format!("{SELECT_STATUS} WHERE uri = $1");
    let row = sqlx::query(&sql).bind(uri).fetch_optional(pool).await?;
    Ok(row.map(|r| status_from_row(&r)).transpose()?)
}

pub async fn get_status_by_url(pool: &DbPool, url: &str) -> Result<Option<Status>, DbError> {
    let sql = format!("{SELECT_STATUS} WHERE url = $1");
    let row = sqlx::query(&sql).bind(url).fetch_optional(pool).await?;
    Ok(row.map(|r| status_from_row(&r)).transpose()?)
}

/// Statuses the account currently has pinned, most recently pinned first.
pub async fn get_pinned_statuses(pool: &DbPool, account_id: i64) -> Result<Vec<Status>, DbError> {
    let sql = format!(
        "{SELECT_STATUS} WHERE account_id = $1 AND pinned_at IS NOT NULL ORDER BY pinned_at DESC"
    );
    let rows = sqlx::query(&sql).bind(account_id).fetch_all(pool).await?;
    rows.iter()
        .map(|r| status_from_row(r).map_err(DbError::from))
        .collect()
}

pub async fn insert_status(pool: &DbPool, status: &Status) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO statuses (id, uri, url, local, account_id, account_uri, boost_of_id,
            boost_of_uri, in_reply_to_uri, content, content_warning, sensitive, language,
            attachment_ids, emoji_ids, pinned_at, created_at, updated_at, fetched_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(status.id)
    .bind(status.uri.as_str())
    .bind(status.url.as_deref())
    .bind(status.local)
    .bind(status.account_id)
    .bind(status.account_uri.as_str())
    .bind(status.boost_of_id)
    .bind(status.boost_of_uri.as_deref())
    .bind(status.in_reply_to_uri.as_deref())
    .bind(status.content.as_deref())
    .bind(status.content_warning.as_deref())
    .bind(status.sensitive)
    .bind(status.language.as_deref())
    .bind(ids_to_db_text(&status.attachment_ids))
    .bind(ids_to_db_text(&status.emoji_ids))
    .bind(millis_from_datetime(status.pinned_at))
    .bind(millis_from_datetime(status.created_at))
    .bind(millis_from_datetime(status.updated_at))
    .bind(millis_from_datetime(status.fetched_at))
    .execute(pool)
    .await?;
    Ok(())
}

/// Write the named columns of `status`; an empty list writes every column.
pub async fn update_status(
    pool: &DbPool,
    status: &Status,
    columns: &[&str],
) -> Result<(), DbError> {
    let columns = if columns.is_empty() {
        STATUS_COLUMNS
    } else {
        columns
    };
    let sql = format!(
        "UPDATE statuses SET {} WHERE id = $1",
        update_set_clause(columns, STATUS_COLUMNS)?
    );
    let mut query = sqlx::query(&sql).bind(status.id);
    for column in columns {
        query = bind_status_column(query, status, column);
    }
    let result = query.execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn bind_status_column<'q>(query: AnyQuery<'q>, status: &'q Status, column: &str) -> AnyQuery<'q> {
    match column {
        "uri" => query.bind(status.uri.as_str()),
        "url" => query.bind(status.url.as_deref()),
        "local" => query.bind(status.local),
        "account_id" => query.bind(status.account_id),
        "account_uri" => query.bind(status.account_uri.as_str()),
        "boost_of_id" => query.bind(status.boost_of_id),
        "boost_of_uri" => query.bind(status.boost_of_uri.as_deref()),
        "in_reply_to_uri" => query.bind(status.in_reply_to_uri.as_deref()),
        "content" => query.bind(status.content.as_deref()),
        "content_warning" => query.bind(status.content_warning.as_deref()),
        "sensitive" => query.bind(status.sensitive),
        "language" => query.bind(status.language.as_deref()),
        "attachment_ids" => query.bind(ids_to_db_text(&status.attachment_ids)),
        "emoji_ids" => query.bind(ids_to_db_text(&status.emoji_ids)),
        "pinned_at" => query.bind(millis_from_datetime(status.pinned_at)),
        "created_at" => query.bind(millis_from_datetime(status.created_at)),
        "updated_at" => query.bind(millis_from_datetime(status.updated_at)),
        "fetched_at" => query.bind(millis_from_datetime(status.fetched_at)),
        _ => query,
    }
}
