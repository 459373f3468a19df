use fediref_models::{MediaAttachment, MediaKind};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::{datetime_from_millis, millis_from_datetime, DbError, DbPool};

const SELECT_ATTACHMENT: &str = "SELECT id, account_id, status_id, kind, remote_url,
        content_type, file_size, storage_key, description, created_at
     FROM media_attachments";

fn attachment_from_row(row: &AnyRow) -> Result<MediaAttachment, sqlx::Error> {
    let kind: i64 = row.try_get("kind")?;
    let kind = i16::try_from(kind)
        .ok()
        .and_then(MediaKind::from_i16)
        .ok_or_else(|| sqlx::Error::Protocol(format!("invalid media kind {kind}")))?;
    Ok(MediaAttachment {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        status_id: row.try_get("status_id")?,
        kind,
        remote_url: row.try_get("remote_url")?,
        content_type: row.try_get("content_type")?,
        file_size: row.try_get("file_size")?,
        storage_key: row.try_get("storage_key")?,
        description: row.try_get("description")?,
        created_at: datetime_from_millis(row.try_get("created_at")?),
    })
}

pub async fn get_attachment(pool: &DbPool, id: i64) -> Result<Option<MediaAttachment>, DbError> {
    let sql = format!("{SELECT_ATTACHMENT} WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.map(|r| attachment_from_row(&r)).transpose()?)
}

pub async fn insert_attachment(pool: &DbPool, media: &MediaAttachment) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO media_attachments (id, account_id, status_id, kind, remote_url,
            content_type, file_size, storage_key, description, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(media.id)
    .bind(media.account_id)
    .bind(media.status_id)
    .bind(i64::from(media.kind.as_i16()))
    .bind(media.remote_url.as_deref())
    .bind(media.content_type.as_deref())
    .bind(media.file_size)
    .bind(media.storage_key.as_deref())
    .bind(media.description.as_deref())
    .bind(millis_from_datetime(media.created_at))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn kind_survives_storage() {
        let pool = test_pool().await;
        let media = MediaAttachment {
            id: 9,
            account_id: 1,
            kind: MediaKind::Header,
            remote_url: Some("https://example.org/header.png".to_string()),
            file_size: 1024,
            ..Default::default()
        };
        insert_attachment(&pool, &media).await.expect("insert");
        let stored = get_attachment(&pool, 9).await.expect("query").expect("row");
        assert_eq!(stored, media);
        assert!(get_attachment(&pool, 10).await.expect("query").is_none());
    }
}
