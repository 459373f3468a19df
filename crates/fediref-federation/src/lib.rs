pub mod client;
pub mod converter;
pub mod dereferencing;
pub mod freshness;
pub mod media;
pub mod outcome;
pub mod tracker;
pub mod transport;
pub mod worker;

use std::time::Duration;

use fediref_db::DbError;

pub use dereferencing::Dereferencer;
pub use freshness::FreshnessWindow;
pub use outcome::{AccountOutcome, Outcome, StatusOutcome};
pub use transport::TransportError;

/// The failure classes callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing usable could be fetched: network, webfinger or URI failure.
    Unretrievable,
    /// The remote answered with something we cannot accept.
    Malformed,
    NotFound,
    AlreadyExists,
    Blocked,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("{uri} is unretrievable: {reason}")]
    Unretrievable { uri: String, reason: String },
    #[error("malformed object at {uri}: {reason}")]
    Malformed { uri: String, reason: String },
    #[error("domain {0} is blocked")]
    Blocked(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<FederationError>,
    },
}

impl FederationError {
    pub fn unretrievable(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unretrievable {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap with an operation description, keeping the original kind.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unretrievable { .. } | Self::Transport(_) => ErrorKind::Unretrievable,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::Blocked(_) => ErrorKind::Blocked,
            Self::Database(DbError::NotFound) => ErrorKind::NotFound,
            Self::Database(DbError::AlreadyExists) => ErrorKind::AlreadyExists,
            Self::Database(_) | Self::Config(_) => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_unretrievable(&self) -> bool {
        self.kind() == ErrorKind::Unretrievable
    }

    pub fn is_malformed(&self) -> bool {
        self.kind() == ErrorKind::Malformed
    }

    pub fn is_blocked(&self) -> bool {
        self.kind() == ErrorKind::Blocked
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Transport status code, when the failure came from an HTTP response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport(err) => err.status_code(),
            Self::Context { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Host this server answers on.
    pub host: String,
    /// Domain used in local handles; often equal to `host`.
    pub account_domain: String,
    /// Scheme used for webfinger and synthesized lock keys.
    pub protocol: String,
    pub user_agent: String,
    /// Worker bits of generated snowflake ids.
    pub node_id: u16,
    pub request_timeout: Duration,
    pub media_timeout: Duration,
    pub account_freshness: FreshnessWindow,
    pub status_freshness: FreshnessWindow,
    pub worker_concurrency: usize,
    pub worker_queue_size: usize,
    pub max_collection_pages: usize,
    pub max_collection_items: usize,
    pub media_max_size: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            account_domain: "localhost".to_string(),
            protocol: "https".to_string(),
            user_agent: format!("fediref/{}", env!("CARGO_PKG_VERSION")),
            node_id: 0,
            request_timeout: Duration::from_secs(30),
            media_timeout: Duration::from_secs(120),
            account_freshness: FreshnessWindow::DEFAULT_ACCOUNT,
            status_freshness: FreshnessWindow::DEFAULT_STATUS,
            worker_concurrency: 4,
            worker_queue_size: 1024,
            max_collection_pages: 10,
            max_collection_items: 200,
            media_max_size: 40 * 1024 * 1024,
        }
    }
}

impl FederationConfig {
    /// Whether `host` names this server, by host or account domain.
    pub fn is_local_host(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(&self.host) || host.eq_ignore_ascii_case(&self.account_domain)
    }

    pub fn validate(&self) -> Result<(), FederationError> {
        if self.host.trim().is_empty() {
            return Err(FederationError::Config("host must not be empty".to_string()));
        }
        if !matches!(self.protocol.as_str(), "http" | "https") {
            return Err(FederationError::Config(format!(
                "unsupported protocol '{}'",
                self.protocol
            )));
        }
        if self.node_id > 0x3FF {
            return Err(FederationError::Config(format!(
                "node_id {} does not fit in 10 bits",
                self.node_id
            )));
        }
        if self.worker_concurrency == 0 || self.worker_queue_size == 0 {
            return Err(FederationError::Config(
                "worker concurrency and queue size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
