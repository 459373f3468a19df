use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use fediref_models::wire::PageRef;
use fediref_models::{RemoteObject, WireCollection};
use fediref_util::uri;
use url::Url;

use super::Dereferencer;
use crate::transport::Transport;
use crate::FederationError;

/// Forward-only walk over the item IRIs of a remote collection.
///
/// Pages are fetched on demand. The walk stops after the configured number of
/// pages or items, and refuses pages served from another host.
pub struct CollectionIter<'a> {
    deref: &'a Dereferencer,
    transport: Arc<dyn Transport>,
    collection_uri: Url,
    pending: VecDeque<String>,
    next_page: Option<String>,
    visited: HashSet<String>,
    pages: usize,
    yielded: usize,
}

impl<'a> CollectionIter<'a> {
    pub(crate) async fn open(
        deref: &'a Dereferencer,
        transport: Arc<dyn Transport>,
        collection_uri: Url,
    ) -> Result<CollectionIter<'a>, FederationError> {
        let resp = deref.fetch(transport.as_ref(), &collection_uri).await?;
        let collection = parse_collection(&resp.body, collection_uri.as_str())?;

        let mut iter = CollectionIter {
            deref,
            transport,
            collection_uri,
            pending: VecDeque::new(),
            next_page: None,
            visited: HashSet::new(),
            pages: 1,
            yielded: 0,
        };
        iter.visited.insert(iter.collection_uri.to_string());
        iter.pending.extend(collection.item_iris());
        match collection.first {
            Some(PageRef::Iri(first)) => iter.next_page = Some(first),
            Some(PageRef::Page(page)) => {
                iter.pending.extend(page.item_iris());
                iter.next_page = page.next;
            }
            None => iter.next_page = collection.next,
        }
        Ok(iter)
    }

    /// Next item IRI, or `None` once the collection or a limit is exhausted.
    /// A page that fails to load ends the walk with an error.
    pub async fn next_item(&mut self) -> Result<Option<String>, FederationError> {
        let max_items = self.deref.config().max_collection_items;
        let max_pages = self.deref.config().max_collection_pages;
        loop {
            if self.yielded >= max_items {
                tracing::debug!(
                    "collection: item limit reached for {}",
                    self.collection_uri
                );
                return Ok(None);
            }
            if let Some(item) = self.pending.pop_front() {
                self.yielded += 1;
                return Ok(Some(item));
            }

            let Some(page) = self.next_page.take() else {
                return Ok(None);
            };
            if !self.visited.insert(page.clone()) {
                return Ok(None);
            }
            if self.pages >= max_pages {
                tracing::warn!(
                    "collection: page limit reached for {}",
                    self.collection_uri
                );
                return Ok(None);
            }
            if !uri::same_host(&page, self.collection_uri.as_str()) {
                tracing::warn!(
                    "collection: ignoring page {} of {} on another host",
                    page,
                    self.collection_uri
                );
                return Ok(None);
            }

            let page_uri = self.deref.parse_remote_uri(&page)?;
            let resp = self.deref.fetch(self.transport.as_ref(), &page_uri).await?;
            let page = parse_collection(&resp.body, page_uri.as_str())?;
            self.pages += 1;
            self.pending.extend(page.item_iris());
            self.next_page = page.next;
        }
    }
}

fn parse_collection(body: &[u8], source: &str) -> Result<WireCollection, FederationError> {
    RemoteObject::from_slice(body)
        .and_then(RemoteObject::into_collection)
        .map_err(|e| FederationError::malformed(source, e))
}
