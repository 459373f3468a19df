//! Remote media download and storage.
//!
//! Media is fetched lazily: [`MediaManager::pre_process_media`] only reserves
//! an attachment id, and the download runs on the first
//! [`ProcessingMedia::load_attachment`] call. Every clone of a
//! [`ProcessingMedia`] shares that single download and its result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fediref_db::DataStore;
use fediref_models::{MediaAttachment, MediaKind};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::transport::{MediaStream, TransportError};

/// Opens the remote media stream when the download actually starts.
pub type DataFn =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<MediaStream, TransportError>> + Send>;

type Job = BoxFuture<'static, Result<MediaAttachment, MediaError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("fetching media failed: {0}")]
    Fetch(String),
    #[error("media exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("storing media failed: {0}")]
    Io(String),
    #[error("recording media failed: {0}")]
    Database(String),
    #[error("media processing was abandoned")]
    Abandoned,
}

#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub remote_url: String,
    pub status_id: Option<i64>,
    pub description: Option<String>,
}

pub trait MediaManager: Send + Sync {
    /// Reserve an attachment for `owner_id` and prepare its download.
    fn pre_process_media(&self, data: DataFn, owner_id: i64, info: MediaInfo) -> ProcessingMedia;
}

struct Processing {
    attachment_id: i64,
    job: Mutex<Option<Job>>,
    result: OnceCell<Result<MediaAttachment, MediaError>>,
}

/// Handle to a media download that may not have started yet.
#[derive(Clone)]
pub struct ProcessingMedia {
    inner: Arc<Processing>,
}

impl ProcessingMedia {
    pub fn new(attachment_id: i64, job: Job) -> Self {
        Self {
            inner: Arc::new(Processing {
                attachment_id,
                job: Mutex::new(Some(job)),
                result: OnceCell::new(),
            }),
        }
    }

    pub fn attachment_id(&self) -> i64 {
        self.inner.attachment_id
    }

    /// Run the download if nobody has yet, then return the shared result.
    pub async fn load_attachment(&self) -> Result<MediaAttachment, MediaError> {
        self.inner
            .result
            .get_or_init(|| async {
                let job = self.inner.job.lock().await.take();
                match job {
                    Some(job) => job.await,
                    None => Err(MediaError::Abandoned),
                }
            })
            .await
            .clone()
    }
}

impl std::fmt::Debug for ProcessingMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingMedia")
            .field("attachment_id", &self.inner.attachment_id)
            .field("done", &self.inner.result.initialized())
            .finish()
    }
}

/// Writes media under `root/<owner_id>/` and records it in the store.
#[derive(Clone)]
pub struct LocalMediaManager {
    store: Arc<dyn DataStore>,
    root: PathBuf,
    max_size: u64,
    node_id: u16,
}

impl LocalMediaManager {
    pub fn new(store: Arc<dyn DataStore>, root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            store,
            root: root.into(),
            max_size,
            node_id: 0,
        }
    }

    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = node_id;
        self
    }
}

impl MediaManager for LocalMediaManager {
    fn pre_process_media(&self, data: DataFn, owner_id: i64, info: MediaInfo) -> ProcessingMedia {
        let attachment_id = fediref_util::snowflake::generate(self.node_id);
        let store = self.store.clone();
        let root = self.root.clone();
        let max_size = self.max_size;
        let job = Box::pin(async move {
            let stream = data().await.map_err(|e| MediaError::Fetch(e.to_string()))?;
            let attachment = MediaAttachment {
                id: attachment_id,
                account_id: owner_id,
                status_id: info.status_id,
                kind: info.kind,
                remote_url: Some(info.remote_url),
                description: info.description,
                ..Default::default()
            };
            store_stream(store.as_ref(), &root, max_size, attachment, stream).await
        });
        ProcessingMedia::new(attachment_id, job)
    }
}

async fn store_stream(
    store: &dyn DataStore,
    root: &Path,
    max_size: u64,
    mut attachment: MediaAttachment,
    stream: MediaStream,
) -> Result<MediaAttachment, MediaError> {
    if stream.size.is_some_and(|size| size > max_size) {
        return Err(MediaError::TooLarge { limit: max_size });
    }

    let remote_path = attachment
        .remote_url
        .as_deref()
        .and_then(|raw| url::Url::parse(raw).ok())
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_default();
    let content_type = stream.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&remote_path)
            .first_or_octet_stream()
            .to_string()
    });
    let ext = Path::new(&remote_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let file_id = Uuid::new_v4().to_string();
    let stored_name = if ext.is_empty() {
        file_id
    } else {
        format!("{}.{}", file_id, ext)
    };
    let owner_dir = attachment.account_id.to_string();
    let dir = root.join(&owner_dir);
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| MediaError::Io(e.to_string()))?;
    let file_path = dir.join(&stored_name);

    let written = match write_stream(&file_path, max_size, stream).await {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&file_path).await;
            return Err(e);
        }
    };

    attachment.content_type = Some(content_type);
    attachment.file_size = written as i64;
    attachment.storage_key = Some(format!("{}/{}", owner_dir, stored_name));
    attachment.created_at = Some(Utc::now());

    if let Err(e) = store.put_attachment(&attachment).await {
        let _ = fs::remove_file(&file_path).await;
        return Err(MediaError::Database(e.to_string()));
    }
    Ok(attachment)
}

async fn write_stream(path: &Path, max_size: u64, stream: MediaStream) -> Result<u64, MediaError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| MediaError::Io(e.to_string()))?;
    let mut body = stream.body;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| MediaError::Fetch(e.to_string()))?;
        written += chunk.len() as u64;
        if written > max_size {
            return Err(MediaError::TooLarge { limit: max_size });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| MediaError::Io(e.to_string()))?;
    }
    file.flush()
        .await
        .map_err(|e| MediaError::Io(e.to_string()))?;
    Ok(written)
}
