use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::transport::{
    DereferenceResponse, Finger, MediaStream, Transport, TransportController, TransportError,
};
use crate::{FederationConfig, FederationError};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Upper bound for a single ActivityStreams document.
const MAX_OBJECT_SIZE: usize = 2 * 1024 * 1024;

const ACTIVITY_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
const JRD_ACCEPT: &str = "application/jrd+json, application/json";

/// HTTP transport for dereferencing remote objects.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    protocol: String,
}

impl HttpTransport {
    pub fn new(config: &FederationConfig) -> Result<Self, FederationError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FederationError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            protocol: config.protocol.clone(),
        })
    }

    /// GET request with exponential backoff retry on server errors.
    async fn get_with_retry(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let mut last_err = TransportError::Request {
            uri: url.to_string(),
            reason: "no attempts made".to_string(),
        };
        for attempt in 0..MAX_RETRIES {
            let request = self.http.get(url).header(ACCEPT, accept);

            match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = TransportError::Status {
                        uri: url.to_string(),
                        status: resp.status().as_u16(),
                    };
                }
                Ok(resp) => {
                    return Err(TransportError::Status {
                        uri: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) if e.is_timeout() => {
                    last_err = TransportError::Timeout {
                        uri: url.to_string(),
                    };
                }
                Err(e) => {
                    last_err = TransportError::Request {
                        uri: url.to_string(),
                        reason: e.to_string(),
                    };
                }
            }
            if attempt + 1 < MAX_RETRIES {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dereference(&self, uri: &Url) -> Result<DereferenceResponse, TransportError> {
        let resp = self.get_with_retry(uri.as_str(), ACTIVITY_ACCEPT).await?;
        if resp
            .content_length()
            .is_some_and(|len| len > MAX_OBJECT_SIZE as u64)
        {
            return Err(TransportError::TooLarge {
                uri: uri.to_string(),
                limit: MAX_OBJECT_SIZE as u64,
            });
        }
        let final_uri = resp.url().clone();
        let body = resp.bytes().await.map_err(|e| TransportError::Request {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if body.len() > MAX_OBJECT_SIZE {
            return Err(TransportError::TooLarge {
                uri: uri.to_string(),
                limit: MAX_OBJECT_SIZE as u64,
            });
        }
        Ok(DereferenceResponse { body, final_uri })
    }

    async fn dereference_media(
        &self,
        uri: &Url,
        max_size: u64,
    ) -> Result<MediaStream, TransportError> {
        let resp = self.get_with_retry(uri.as_str(), "*/*").await?;
        let size = resp.content_length();
        if size.is_some_and(|len| len > max_size) {
            return Err(TransportError::TooLarge {
                uri: uri.to_string(),
                limit: max_size,
            });
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let error_uri = uri.to_string();
        let body = resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| TransportError::Request {
                    uri: error_uri.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed();
        Ok(MediaStream {
            content_type,
            size,
            body,
        })
    }

    async fn finger(&self, username: &str, domain: &str) -> Result<Finger, TransportError> {
        let url = webfinger_url(&self.protocol, username, domain)?;
        let resp = self.get_with_retry(url.as_str(), JRD_ACCEPT).await?;
        let body = resp.bytes().await.map_err(|e| TransportError::Request {
            uri: url.to_string(),
            reason: e.to_string(),
        })?;
        parse_webfinger(&body, url.as_str(), domain)
    }
}

fn webfinger_url(protocol: &str, username: &str, domain: &str) -> Result<Url, TransportError> {
    let base = format!("{protocol}://{domain}/.well-known/webfinger");
    let mut url = Url::parse(&base).map_err(|e| TransportError::Request {
        uri: base.clone(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("resource", &format!("acct:{username}@{domain}"));
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct WebfingerResponse {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    links: Vec<WebfingerLink>,
}

#[derive(Debug, Deserialize)]
struct WebfingerLink {
    rel: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    href: Option<String>,
}

/// Extract the canonical domain and actor URI from a JRD document.
pub(crate) fn parse_webfinger(
    body: &[u8],
    source: &str,
    requested_domain: &str,
) -> Result<Finger, TransportError> {
    let jrd: WebfingerResponse =
        serde_json::from_slice(body).map_err(|e| TransportError::InvalidResponse {
            uri: source.to_string(),
            reason: format!("invalid webfinger json: {e}"),
        })?;

    let domain = jrd
        .subject
        .as_deref()
        .and_then(|subject| subject.strip_prefix("acct:"))
        .and_then(|acct| acct.rsplit_once('@'))
        .map(|(_, domain)| domain.to_ascii_lowercase())
        .unwrap_or_else(|| requested_domain.to_ascii_lowercase());

    let uri = jrd
        .links
        .iter()
        .find(|link| {
            link.rel == "self"
                && link
                    .kind
                    .as_deref()
                    .is_some_and(|kind| kind.contains("activity+json") || kind.contains("ld+json"))
        })
        .and_then(|link| link.href.clone())
        .ok_or_else(|| TransportError::InvalidResponse {
            uri: source.to_string(),
            reason: "no activitypub self link".to_string(),
        })?;

    Ok(Finger { domain, uri })
}

/// Hands out one shared [`HttpTransport`] for every requesting user.
#[derive(Debug, Clone)]
pub struct HttpTransportController {
    transport: Arc<HttpTransport>,
}

impl HttpTransportController {
    pub fn new(config: &FederationConfig) -> Result<Self, FederationError> {
        Ok(Self {
            transport: Arc::new(HttpTransport::new(config)?),
        })
    }
}

impl TransportController for HttpTransportController {
    fn transport_for(&self, requesting_user: &str) -> Result<Arc<dyn Transport>, FederationError> {
        tracing::trace!("federation: transport for {}", requesting_user);
        Ok(self.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webfinger_subject_overrides_requested_domain() {
        let body = br#"{
            "subject": "acct:alice@example.org",
            "aliases": ["https://social.example.org/@alice"],
            "links": [
                {"rel": "http://webfinger.net/rel/profile-page", "type": "text/html",
                 "href": "https://social.example.org/@alice"},
                {"rel": "self", "type": "application/activity+json",
                 "href": "https://social.example.org/users/alice"}
            ]
        }"#;
        let finger = parse_webfinger(body, "https://social.example.org/.well-known/webfinger", "social.example.org")
            .expect("parse");
        assert_eq!(finger.domain, "example.org");
        assert_eq!(finger.uri, "https://social.example.org/users/alice");
    }

    #[test]
    fn webfinger_without_self_link_is_invalid() {
        let body = br#"{"subject": "acct:alice@example.org", "links": []}"#;
        let err = parse_webfinger(body, "https://example.org/.well-known/webfinger", "example.org")
            .expect_err("no self link");
        assert!(matches!(err, TransportError::InvalidResponse { .. }));
    }

    #[test]
    fn webfinger_url_escapes_resource() {
        let url = webfinger_url("https", "alice", "example.org").expect("url");
        assert_eq!(
            url.as_str(),
            "https://example.org/.well-known/webfinger?resource=acct%3Aalice%40example.org"
        );
    }
}
