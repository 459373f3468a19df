#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fediref_db::{DataStore, DbError, SqlStore};
use fediref_federation::converter::ActivityStreamsConverter;
use fediref_federation::media::LocalMediaManager;
use fediref_federation::transport::{
    DereferenceResponse, Finger, MediaStream, Transport, TransportController, TransportError,
};
use fediref_federation::worker::{AsyncWorker, Task};
use fediref_federation::{Dereferencer, FederationConfig, FederationError};
use fediref_models::{Account, Emoji, MediaAttachment, Status};
use futures_util::StreamExt;
use serde_json::{json, Value};
use url::Url;

pub const LOCAL_HOST: &str = "local.test";
pub const REQUESTER: &str = "admin";

enum Scripted {
    Object { body: Value, final_uri: String },
    Fail(u16),
}

/// Transport answering from scripted responses and counting every call.
#[derive(Default)]
pub struct MockTransport {
    objects: Mutex<HashMap<String, Scripted>>,
    fingers: Mutex<HashMap<String, Result<Finger, u16>>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    dereferenced: Mutex<Vec<String>>,
    fingered: Mutex<Vec<String>>,
    media_fetched: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl MockTransport {
    pub fn serve(&self, uri: &str, body: Value) {
        self.objects.lock().unwrap().insert(
            uri.to_string(),
            Scripted::Object {
                body,
                final_uri: uri.to_string(),
            },
        );
    }

    /// Answer `from` with `body` as if redirected to `to`.
    pub fn redirect(&self, from: &str, to: &str, body: Value) {
        self.objects.lock().unwrap().insert(
            from.to_string(),
            Scripted::Object {
                body,
                final_uri: to.to_string(),
            },
        );
    }

    pub fn fail(&self, uri: &str, status: u16) {
        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), Scripted::Fail(status));
    }

    pub fn answer_finger(&self, username: &str, domain: &str, resolved_domain: &str, uri: &str) {
        self.fingers.lock().unwrap().insert(
            format!("{username}@{domain}"),
            Ok(Finger {
                domain: resolved_domain.to_string(),
                uri: uri.to_string(),
            }),
        );
    }

    pub fn fail_finger(&self, username: &str, domain: &str, status: u16) {
        self.fingers
            .lock()
            .unwrap()
            .insert(format!("{username}@{domain}"), Err(status));
    }

    pub fn serve_media(&self, url: &str, bytes: &[u8]) {
        self.media
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn dereferences_of(&self, uri: &str) -> usize {
        self.dereferenced
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == uri)
            .count()
    }

    pub fn dereference_count(&self) -> usize {
        self.dereferenced.lock().unwrap().len()
    }

    pub fn finger_count(&self) -> usize {
        self.fingered.lock().unwrap().len()
    }

    pub fn media_count(&self) -> usize {
        self.media_fetched.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.dereference_count() + self.finger_count() + self.media_count()
    }

    pub fn reset_counts(&self) {
        self.dereferenced.lock().unwrap().clear();
        self.fingered.lock().unwrap().clear();
        self.media_fetched.lock().unwrap().clear();
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dereference(&self, uri: &Url) -> Result<DereferenceResponse, TransportError> {
        self.dereferenced.lock().unwrap().push(uri.to_string());
        self.pause().await;
        let scripted = {
            let objects = self.objects.lock().unwrap();
            match objects.get(uri.as_str()) {
                Some(Scripted::Object { body, final_uri }) => Ok((body.clone(), final_uri.clone())),
                Some(Scripted::Fail(status)) => Err(*status),
                None => Err(404),
            }
        };
        match scripted {
            Ok((body, final_uri)) => Ok(DereferenceResponse {
                body: Bytes::from(serde_json::to_vec(&body).unwrap()),
                final_uri: Url::parse(&final_uri).unwrap(),
            }),
            Err(status) => Err(TransportError::Status {
                uri: uri.to_string(),
                status,
            }),
        }
    }

    async fn dereference_media(
        &self,
        uri: &Url,
        max_size: u64,
    ) -> Result<MediaStream, TransportError> {
        self.media_fetched.lock().unwrap().push(uri.to_string());
        self.pause().await;
        let bytes = self.media.lock().unwrap().get(uri.as_str()).cloned();
        let Some(bytes) = bytes else {
            return Err(TransportError::Status {
                uri: uri.to_string(),
                status: 404,
            });
        };
        if bytes.len() as u64 > max_size {
            return Err(TransportError::TooLarge {
                uri: uri.to_string(),
                limit: max_size,
            });
        }
        let size = bytes.len() as u64;
        Ok(MediaStream {
            content_type: None,
            size: Some(size),
            body: futures_util::stream::iter(vec![Ok(Bytes::from(bytes))]).boxed(),
        })
    }

    async fn finger(&self, username: &str, domain: &str) -> Result<Finger, TransportError> {
        let handle = format!("{username}@{domain}");
        self.fingered.lock().unwrap().push(handle.clone());
        self.pause().await;
        let answer = self.fingers.lock().unwrap().get(&handle).cloned();
        match answer {
            Some(Ok(finger)) => Ok(finger),
            Some(Err(status)) => Err(TransportError::Status {
                uri: handle,
                status,
            }),
            None => Err(TransportError::Status {
                uri: handle,
                status: 404,
            }),
        }
    }
}

pub struct MockController(pub Arc<MockTransport>);

impl TransportController for MockController {
    fn transport_for(&self, _requesting_user: &str) -> Result<Arc<dyn Transport>, FederationError> {
        Ok(self.0.clone())
    }
}

/// Worker that holds tasks until the test runs them.
#[derive(Default)]
pub struct ManualWorker {
    tasks: Mutex<Vec<Task>>,
}

impl ManualWorker {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub async fn run_all(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                task.await;
            }
        }
    }
}

impl AsyncWorker for ManualWorker {
    fn enqueue(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }
}

/// [`SqlStore`] that records writes and can fake an insert race.
pub struct CountingStore {
    inner: SqlStore,
    account_puts: Mutex<Vec<String>>,
    account_updates: Mutex<Vec<(String, Vec<String>)>>,
    status_puts: Mutex<Vec<String>>,
    status_updates: Mutex<Vec<(String, Vec<String>)>>,
    race_winner: Mutex<Option<Account>>,
}

impl CountingStore {
    pub fn inner(&self) -> &SqlStore {
        &self.inner
    }

    pub fn account_puts(&self) -> Vec<String> {
        self.account_puts.lock().unwrap().clone()
    }

    pub fn account_updates(&self) -> Vec<(String, Vec<String>)> {
        self.account_updates.lock().unwrap().clone()
    }

    pub fn status_puts(&self) -> Vec<String> {
        self.status_puts.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<(String, Vec<String>)> {
        self.status_updates.lock().unwrap().clone()
    }

    pub fn status_updates_of(&self, uri: &str) -> Vec<Vec<String>> {
        self.status_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == uri)
            .map(|(_, columns)| columns.clone())
            .collect()
    }

    /// The next account insert loses to `winner`, which is written first.
    pub fn lose_next_account_insert_to(&self, winner: Account) {
        *self.race_winner.lock().unwrap() = Some(winner);
    }
}

fn column_list(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

#[async_trait]
impl DataStore for CountingStore {
    async fn get_account_by_uri(&self, uri: &str) -> Result<Account, DbError> {
        self.inner.get_account_by_uri(uri).await
    }

    async fn get_account_by_url(&self, url: &str) -> Result<Account, DbError> {
        self.inner.get_account_by_url(url).await
    }

    async fn get_account_by_username_domain(
        &self,
        username: &str,
        domain: Option<&str>,
    ) -> Result<Account, DbError> {
        self.inner.get_account_by_username_domain(username, domain).await
    }

    async fn put_account(&self, account: &Account) -> Result<(), DbError> {
        let winner = self.race_winner.lock().unwrap().take();
        if let Some(winner) = winner {
            self.inner.put_account(&winner).await?;
            return Err(DbError::AlreadyExists);
        }
        self.account_puts.lock().unwrap().push(account.uri.clone());
        self.inner.put_account(account).await
    }

    async fn update_account(&self, account: &Account, columns: &[&str]) -> Result<(), DbError> {
        self.account_updates
            .lock()
            .unwrap()
            .push((account.uri.clone(), column_list(columns)));
        self.inner.update_account(account, columns).await
    }

    async fn populate_account(&self, account: &mut Account) -> Result<(), DbError> {
        self.inner.populate_account(account).await
    }

    async fn get_status_by_uri(&self, uri: &str) -> Result<Status, DbError> {
        self.inner.get_status_by_uri(uri).await
    }

    async fn get_status_by_url(&self, url: &str) -> Result<Status, DbError> {
        self.inner.get_status_by_url(url).await
    }

    async fn put_status(&self, status: &Status) -> Result<(), DbError> {
        self.status_puts.lock().unwrap().push(status.uri.clone());
        self.inner.put_status(status).await
    }

    async fn update_status(&self, status: &Status, columns: &[&str]) -> Result<(), DbError> {
        self.status_updates
            .lock()
            .unwrap()
            .push((status.uri.clone(), column_list(columns)));
        self.inner.update_status(status, columns).await
    }

    async fn populate_status(&self, status: &mut Status) -> Result<(), DbError> {
        self.inner.populate_status(status).await
    }

    async fn get_account_pinned_statuses(&self, account_id: i64) -> Result<Vec<Status>, DbError> {
        self.inner.get_account_pinned_statuses(account_id).await
    }

    async fn get_emoji(&self, id: i64) -> Result<Emoji, DbError> {
        self.inner.get_emoji(id).await
    }

    async fn get_emoji_by_uri(&self, uri: &str) -> Result<Emoji, DbError> {
        self.inner.get_emoji_by_uri(uri).await
    }

    async fn put_emoji(&self, emoji: &Emoji) -> Result<(), DbError> {
        self.inner.put_emoji(emoji).await
    }

    async fn update_emoji(&self, emoji: &Emoji) -> Result<(), DbError> {
        self.inner.update_emoji(emoji).await
    }

    async fn get_attachment(&self, id: i64) -> Result<MediaAttachment, DbError> {
        self.inner.get_attachment(id).await
    }

    async fn put_attachment(&self, media: &MediaAttachment) -> Result<(), DbError> {
        self.inner.put_attachment(media).await
    }

    async fn is_domain_blocked(&self, host: &str) -> Result<bool, DbError> {
        self.inner.is_domain_blocked(host).await
    }

    async fn put_domain_block(&self, domain: &str, reason: Option<&str>) -> Result<(), DbError> {
        self.inner.put_domain_block(domain, reason).await
    }

    async fn delete_domain_block(&self, domain: &str) -> Result<bool, DbError> {
        self.inner.delete_domain_block(domain).await
    }
}

pub struct Harness {
    pub deref: Dereferencer,
    pub transport: Arc<MockTransport>,
    pub store: Arc<CountingStore>,
    pub worker: Arc<ManualWorker>,
    _media_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = fediref_db::create_pool("sqlite::memory:", 1)
            .await
            .expect("pool");
        fediref_db::run_migrations(&pool).await.expect("migrations");
        let store = Arc::new(CountingStore {
            inner: SqlStore::new(pool),
            account_puts: Mutex::default(),
            account_updates: Mutex::default(),
            status_puts: Mutex::default(),
            status_updates: Mutex::default(),
            race_winner: Mutex::default(),
        });
        let transport = Arc::new(MockTransport::default());
        let worker = Arc::new(ManualWorker::default());
        let media_dir = tempfile::tempdir().expect("tempdir");

        let config = FederationConfig {
            host: LOCAL_HOST.to_string(),
            account_domain: LOCAL_HOST.to_string(),
            ..Default::default()
        };
        let media = LocalMediaManager::new(store.clone(), media_dir.path(), config.media_max_size);
        let deref = Dereferencer::new(
            config,
            store.clone(),
            Arc::new(MockController(transport.clone())),
            Arc::new(ActivityStreamsConverter),
            Arc::new(media),
            worker.clone(),
        );
        Self {
            deref,
            transport,
            store,
            worker,
            _media_dir: media_dir,
        }
    }
}

pub fn person(uri: &str, username: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": uri,
        "type": "Person",
        "preferredUsername": username,
        "name": username,
        "url": uri,
    })
}

pub fn note(uri: &str, author: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": uri,
        "type": "Note",
        "attributedTo": author,
        "content": "<p>hello</p>",
        "published": "2024-05-01T12:00:00Z",
    })
}

pub fn emoji_tag(uri: &str, shortcode: &str, icon: &str) -> Value {
    json!({
        "type": "Emoji",
        "id": uri,
        "name": format!(":{shortcode}:"),
        "icon": {"type": "Image", "url": icon},
    })
}

pub fn ordered_collection(uri: &str, items: &[&str]) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": uri,
        "type": "OrderedCollection",
        "totalItems": items.len(),
        "orderedItems": items,
    })
}

/// A stored remote account fetched `age` ago.
pub fn stored_account(id: i64, uri: &str, username: &str, domain: &str, age: chrono::Duration) -> Account {
    let fetched = chrono::Utc::now() - age;
    Account {
        id,
        username: username.to_string(),
        domain: Some(domain.to_string()),
        uri: uri.to_string(),
        url: Some(uri.to_string()),
        display_name: Some(username.to_string()),
        created_at: Some(fetched - chrono::Duration::days(30)),
        updated_at: Some(fetched),
        fetched_at: Some(fetched),
        ..Default::default()
    }
}
