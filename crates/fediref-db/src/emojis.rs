use fediref_models::Emoji;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::{bool_from_any_row, datetime_from_millis, millis_from_datetime, DbError, DbPool};

const SELECT_EMOJI: &str = "SELECT id, shortcode, domain, uri, image_remote_url,
        image_attachment_id, disabled, created_at, updated_at
     FROM emojis";

fn emoji_from_row(row: &AnyRow) -> Result<Emoji, sqlx::Error> {
    Ok(Emoji {
        id: row.try_get("id")?,
        shortcode: row.try_get("shortcode")?,
        domain: row.try_get("domain")?,
        uri: row.try_get("uri")?,
        image_remote_url: row.try_get("image_remote_url")?,
        image_attachment_id: row.try_get("image_attachment_id")?,
        disabled: bool_from_any_row(row, "disabled")?,
        created_at: datetime_from_millis(row.try_get("created_at")?),
        updated_at: datetime_from_millis(row.try_get("updated_at")?),
    })
}

pub async fn get_emoji(pool: &DbPool, id: i64) -> Result<Option<Emoji>, DbError> {
    let sql = format!("{SELECT_EMOJI} WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.map(|r| emoji_from_row(&r)).transpose()?)
}

pub async fn get_emoji_by_uri(pool: &DbPool, uri: &str) -> Result<Option<Emoji>, DbError> {
    let sql = format!("{SELECT_EMOJI} WHERE uri = $1");
    let row = sqlx::query(&sql).bind(uri).fetch_optional(pool).await?;
    Ok(row.map(|r| emoji_from_row(&r)).transpose()?)
}

pub async fn insert_emoji(pool: &DbPool, emoji: &Emoji) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO emojis (id, shortcode, domain, uri, image_remote_url,
            image_attachment_id, disabled, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(emoji.id)
    .bind(emoji.shortcode.as_str())
    .bind(emoji.domain.as_deref())
    .bind(emoji.uri.as_str())
    .bind(emoji.image_remote_url.as_deref())
    .bind(emoji.image_attachment_id)
    .bind(emoji.disabled)
    .bind(millis_from_datetime(emoji.created_at))
    .bind(millis_from_datetime(emoji.updated_at))
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh the remote image of an existing emoji.
pub async fn update_emoji_image(pool: &DbPool, emoji: &Emoji) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE emojis SET shortcode = $2, image_remote_url = $3, image_attachment_id = $4,
            updated_at = $5
         WHERE id = $1",
    )
    .bind(emoji.id)
    .bind(emoji.shortcode.as_str())
    .bind(emoji.image_remote_url.as_deref())
    .bind(emoji.image_attachment_id)
    .bind(millis_from_datetime(emoji.updated_at))
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
