use crate::core::{EntitlementError, EntitlementPatch, EntitlementState, Result, UserId};
use crate::storage::{RecordSender, RecordSubscription, RemoteStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::debug;

#[derive(Default)]
struct RemoteDocuments {
    documents: HashMap<String, Value>,
    feeds: HashMap<String, RecordSender>,
    offline: bool,
    writes: u64,
}

/// An in-memory document store with per-document change feeds.
///
/// Documents are kept as raw JSON under `<collection>/<uid>`, and `update`
/// merges only the patched fields, so several handles (devices) sharing one
/// store observe each other's writes through their subscriptions.
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    collection: String,
    inner: Arc<Mutex<RemoteDocuments>>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new("users")
    }
}

impl InMemoryRemoteStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            inner: Arc::new(Mutex::new(RemoteDocuments::default())),
        }
    }

    /// Simulates losing (or regaining) connectivity. While unavailable every call fails.
    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.offline = !available;
    }

    /// Deletes a document out of band and notifies its subscribers.
    pub async fn remove(&self, id: &UserId) -> bool {
        let key = self.key(id);
        let mut inner = self.inner.lock().await;
        let removed = inner.documents.remove(&key).is_some();
        if removed {
            Self::publish(&mut inner, &key, None);
        }
        removed
    }

    /// Raw stored document, if any.
    pub async fn document(&self, id: &UserId) -> Option<Value> {
        self.inner.lock().await.documents.get(&self.key(id)).cloned()
    }

    /// Stores a raw document without validation, as a foreign writer could.
    pub async fn put_raw(&self, id: &UserId, document: Value) {
        let key = self.key(id);
        self.inner.lock().await.documents.insert(key, document);
    }

    /// Number of accepted `set`/`update` calls.
    pub async fn write_count(&self) -> u64 {
        self.inner.lock().await.writes
    }

    /// Number of documents with an open change feed.
    pub async fn feed_count(&self) -> usize {
        self.inner.lock().await.feeds.len()
    }

    pub async fn subscriber_count(&self, id: &UserId) -> usize {
        let key = self.key(id);
        let inner = self.inner.lock().await;
        inner
            .feeds
            .get(&key)
            .map(|feed| feed.receiver_count())
            .unwrap_or(0)
    }

    fn key(&self, id: &UserId) -> String {
        format!("{}/{}", self.collection, id)
    }

    fn ensure_available(inner: &RemoteDocuments, op: &str, key: &str) -> Result<()> {
        if inner.offline {
            return Err(EntitlementError::BackendUnavailable(format!(
                "{} '{}': remote store is unreachable",
                op, key
            )));
        }
        Ok(())
    }

    /// Sends the latest document to live subscribers. A feed nobody listens to is dropped.
    fn publish(inner: &mut RemoteDocuments, key: &str, document: Option<EntitlementState>) {
        let Some(feed) = inner.feeds.get(key) else {
            return;
        };
        if feed.receiver_count() == 0 {
            inner.feeds.remove(key);
            return;
        }
        feed.send_replace(document);
        debug!(
            document = key,
            subscribers = feed.receiver_count(),
            "published record change"
        );
    }

    fn decode(key: &str, document: &Value) -> Result<EntitlementState> {
        serde_json::from_value(document.clone()).map_err(|e| {
            EntitlementError::InvalidRecord(format!("document '{}': {}", key, e))
        })
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, id: &UserId) -> Result<Option<EntitlementState>> {
        let key = self.key(id);
        let inner = self.inner.lock().await;
        Self::ensure_available(&inner, "get", &key)?;
        inner
            .documents
            .get(&key)
            .map(|document| Self::decode(&key, document))
            .transpose()
    }

    async fn set(&self, id: &UserId, record: &EntitlementState) -> Result<()> {
        let key = self.key(id);
        let document = serde_json::to_value(record)?;
        let mut inner = self.inner.lock().await;
        Self::ensure_available(&inner, "set", &key)?;
        inner.documents.insert(key.clone(), document);
        inner.writes += 1;
        Self::publish(&mut inner, &key, Some(record.clone()));
        Ok(())
    }

    async fn update(&self, id: &UserId, patch: &EntitlementPatch) -> Result<()> {
        let key = self.key(id);
        let fields = serde_json::to_value(patch)?;
        let mut inner = self.inner.lock().await;
        Self::ensure_available(&inner, "update", &key)?;

        let Some(document) = inner.documents.get(&key) else {
            return Err(EntitlementError::BackendUnavailable(format!(
                "update '{}': no such document",
                key
            )));
        };
        let mut merged = document.clone();
        if let (Some(target), Value::Object(fields)) = (merged.as_object_mut(), fields) {
            for (field, value) in fields {
                target.insert(field, value);
            }
        }
        let record = Self::decode(&key, &merged)?;

        inner.documents.insert(key.clone(), merged);
        inner.writes += 1;
        Self::publish(&mut inner, &key, Some(record));
        Ok(())
    }

    async fn subscribe(&self, id: &UserId) -> Result<RecordSubscription> {
        let key = self.key(id);
        let mut inner = self.inner.lock().await;
        Self::ensure_available(&inner, "subscribe", &key)?;

        let current = inner
            .documents
            .get(&key)
            .map(|document| Self::decode(&key, document))
            .transpose()?;
        inner.feeds.retain(|_, feed| feed.receiver_count() > 0);
        let feed = inner
            .feeds
            .entry(key)
            .or_insert_with(|| watch::channel(None).0);
        feed.send_if_modified(|latest| {
            if *latest == current {
                false
            } else {
                *latest = current;
                true
            }
        });
        Ok(RecordSubscription::new(feed))
    }
}
