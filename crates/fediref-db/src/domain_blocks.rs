use fediref_util::uri::domain_and_parents;

use crate::{DbError, DbPool};

pub async fn insert_domain_block(
    pool: &DbPool,
    domain: &str,
    reason: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO domain_blocks (domain, reason, created_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (domain) DO UPDATE SET reason = EXCLUDED.reason",
    )
    .bind(domain.trim().to_ascii_lowercase())
    .bind(reason)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_domain_block(pool: &DbPool, domain: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM domain_blocks WHERE domain = $1")
        .bind(domain.trim().to_ascii_lowercase())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether `host` or any of its parent domains is blocked.
pub async fn is_domain_blocked(pool: &DbPool, host: &str) -> Result<bool, DbError> {
    for candidate in domain_and_parents(host) {
        let hit: Option<String> =
            sqlx::query_scalar("SELECT domain FROM domain_blocks WHERE domain = $1")
                .bind(candidate)
                .fetch_optional(pool)
                .await?;
        if hit.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}
