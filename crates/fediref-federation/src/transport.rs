use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use url::Url;

use crate::FederationError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },
    #[error("request to {uri} returned {status}")]
    Status { uri: String, status: u16 },
    #[error("request to {uri} timed out")]
    Timeout { uri: String },
    #[error("{uri} is larger than {limit} bytes")]
    TooLarge { uri: String, limit: u64 },
    #[error("invalid response from {uri}: {reason}")]
    InvalidResponse { uri: String, reason: String },
}

impl TransportError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Body of a dereferenced object and the URI it was finally served from.
#[derive(Debug, Clone)]
pub struct DereferenceResponse {
    pub body: Bytes,
    /// Differs from the requested URI when redirects were followed.
    pub final_uri: Url,
}

pub struct MediaStream {
    pub content_type: Option<String>,
    /// Advertised length, if the remote sent one.
    pub size: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Result of a webfinger lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finger {
    /// Domain from the `acct:` subject, which may differ from the one asked.
    pub domain: String,
    /// ActivityPub actor URI from the `self` link.
    pub uri: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn dereference(&self, uri: &Url) -> Result<DereferenceResponse, TransportError>;
    async fn dereference_media(&self, uri: &Url, max_size: u64)
        -> Result<MediaStream, TransportError>;
    async fn finger(&self, username: &str, domain: &str) -> Result<Finger, TransportError>;
}

/// Hands out a transport acting on behalf of a local user.
pub trait TransportController: Send + Sync {
    fn transport_for(&self, requesting_user: &str) -> Result<Arc<dyn Transport>, FederationError>;
}
