use std::sync::Arc;

use dashmap::DashMap;
use fediref_models::MediaAttachment;
use fediref_util::KeyedLocks;

use crate::media::{MediaError, ProcessingMedia};

/// Deduplicates concurrent downloads of the same remote media URL.
///
/// The first caller for a URL starts the download; later callers arriving
/// while it runs wait on the same [`ProcessingMedia`]. Entries are dropped
/// once the download settles, so a failed fetch can be retried.
#[derive(Clone, Default)]
pub struct MediaTracker {
    in_flight: Arc<DashMap<String, ProcessingMedia>>,
    locks: KeyedLocks,
}

impl MediaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load<F>(&self, url: &str, start: F) -> Result<MediaAttachment, MediaError>
    where
        F: FnOnce() -> ProcessingMedia,
    {
        let mut guard = self.locks.lock(url).await;
        let existing = self.in_flight.get(url).map(|entry| entry.value().clone());
        let (processing, cleanup) = match existing {
            Some(processing) => (processing, None),
            None => {
                let processing = start();
                self.in_flight.insert(url.to_string(), processing.clone());
                let cleanup = InFlightEntry {
                    in_flight: self.in_flight.clone(),
                    url: url.to_string(),
                    attachment_id: processing.attachment_id(),
                };
                (processing, Some(cleanup))
            }
        };
        guard.unlock();

        let result = processing.load_attachment().await;

        if let Some(cleanup) = cleanup {
            let _guard = self.locks.lock(url).await;
            drop(cleanup);
        }
        result
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Removes the owner's map entry, also when the owner is cancelled mid-load.
struct InFlightEntry {
    in_flight: Arc<DashMap<String, ProcessingMedia>>,
    url: String,
    attachment_id: i64,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let id = self.attachment_id;
        self.in_flight
            .remove_if(&self.url, |_, processing| processing.attachment_id() == id);
    }
}
