pub mod accounts;
pub mod attachments;
pub mod domain_blocks;
pub mod emojis;
pub mod statuses;
pub mod store;

use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use std::sync::OnceLock;
use thiserror::Error;

pub use store::{DataStore, SqlStore};

pub type DbPool = sqlx::AnyPool;

pub(crate) type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Sqlite,
    Postgres,
}

static ACTIVE_DB_ENGINE: OnceLock<DatabaseEngine> = OnceLock::new();

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[source] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) if is_unique_violation(db_err.as_ref()) => {
                Self::AlreadyExists
            }
            _ => Self::Sqlx(err),
        }
    }
}

fn is_unique_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    if err.is_unique_violation() {
        return true;
    }
    // SQLite primary key / unique, PostgreSQL unique_violation.
    matches!(err.code().as_deref(), Some("1555") | Some("2067") | Some("23505"))
}

/// Pool sizing and per-connection session settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// PostgreSQL `statement_timeout` in seconds (0 = disabled).
    pub statement_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            statement_timeout_secs: 0,
        }
    }
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    connect(
        database_url,
        &PoolSettings {
            max_connections,
            ..Default::default()
        },
    )
    .await
}

/// Open a pool for a `sqlite:` or `postgres://` URL and remember the engine
/// for [`run_migrations`].
pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<DbPool, sqlx::Error> {
    let engine = detect_database_engine(database_url)?;
    let _ = ACTIVE_DB_ENGINE.set(engine);
    sqlx::any::install_default_drivers();

    let url = match engine {
        DatabaseEngine::Sqlite => normalize_sqlite_url_for_any(database_url),
        DatabaseEngine::Postgres => database_url.to_string(),
    };
    let statement_timeout_secs = settings.statement_timeout_secs;
    AnyPoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                for statement in session_statements(engine, statement_timeout_secs) {
                    sqlx::query(&statement).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(&url)
        .await
}

fn session_statements(engine: DatabaseEngine, statement_timeout_secs: u64) -> Vec<String> {
    match engine {
        DatabaseEngine::Sqlite => vec![
            "PRAGMA journal_mode = WAL".to_string(),
            "PRAGMA busy_timeout = 5000".to_string(),
            "PRAGMA synchronous = NORMAL".to_string(),
        ],
        DatabaseEngine::Postgres => {
            let mut statements = vec!["SET timezone = 'UTC'".to_string()];
            if statement_timeout_secs > 0 {
                statements.push(format!("SET statement_timeout = '{statement_timeout_secs}s'"));
            }
            statements
        }
    }
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    run_migrations_for_engine(pool, active_database_engine()).await
}

pub async fn run_migrations_for_engine(
    pool: &DbPool,
    engine: DatabaseEngine,
) -> Result<(), sqlx::Error> {
    match engine {
        DatabaseEngine::Sqlite => sqlx::migrate!("./migrations").run(pool).await?,
        DatabaseEngine::Postgres => sqlx::migrate!("./migrations_pg").run(pool).await?,
    }
    tracing::info!("migrations: applied successfully");
    Ok(())
}

pub fn detect_database_engine(database_url: &str) -> Result<DatabaseEngine, sqlx::Error> {
    let normalized = database_url.trim().to_ascii_lowercase();
    if normalized.starts_with("sqlite:") {
        Ok(DatabaseEngine::Sqlite)
    } else if normalized.starts_with("postgres://") || normalized.starts_with("postgresql://") {
        Ok(DatabaseEngine::Postgres)
    } else {
        Err(sqlx::Error::Configuration(
            format!("unsupported database URL scheme in '{}'", database_url).into(),
        ))
    }
}

pub fn active_database_engine() -> DatabaseEngine {
    *ACTIVE_DB_ENGINE.get().unwrap_or(&DatabaseEngine::Sqlite)
}

fn normalize_sqlite_url_for_any(url: &str) -> String {
    // sqlx::Any expects absolute Windows paths as sqlite:///C:/...
    if !url.starts_with("sqlite://") {
        return url.to_string();
    }
    let rest = &url["sqlite://".len()..];
    if rest.starts_with('/') {
        return url.to_string();
    }
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        format!("sqlite:///{rest}")
    } else {
        url.to_string()
    }
}

pub(crate) fn millis_from_datetime(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|dt| dt.timestamp_millis())
}

pub(crate) fn datetime_from_millis(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(DateTime::from_timestamp_millis)
}

pub(crate) fn ids_to_db_text(ids: &[i64]) -> String {
    let joined: Vec<String> = ids.iter().map(i64::to_string).collect();
    format!("[{}]", joined.join(","))
}

pub(crate) fn ids_from_db_text(value: &str) -> Result<Vec<i64>, sqlx::Error> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(value).map_err(|e| sqlx::Error::Protocol(format!("invalid id list: {e}")))
}

pub(crate) fn bool_from_any_row(
    row: &sqlx::any::AnyRow,
    column: &str,
) -> Result<bool, sqlx::Error> {
    use sqlx::Row;
    let first_err = match row.try_get::<bool, _>(column) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if let Ok(raw) = row.try_get::<i64, _>(column) {
        return Ok(raw != 0);
    }
    if let Ok(raw) = row.try_get::<i32, _>(column) {
        return Ok(raw != 0);
    }
    if let Ok(raw) = row.try_get::<String, _>(column) {
        let normalized = raw.trim().to_ascii_lowercase();
        if matches!(normalized.as_str(), "1" | "true" | "t") {
            return Ok(true);
        }
        if matches!(normalized.as_str(), "0" | "false" | "f") {
            return Ok(false);
        }
    }

    Err(first_err)
}

/// Build `col1 = $2, col2 = $3, ...` for an update keyed by `$1`,
/// rejecting anything outside `allowed`.
pub(crate) fn update_set_clause(columns: &[&str], allowed: &[&str]) -> Result<String, DbError> {
    let mut sets = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        if !allowed.contains(column) {
            return Err(DbError::UnknownColumn(column.to_string()));
        }
        sets.push(format!("{column} = ${}", i + 2));
    }
    Ok(sets.join(", "))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}
