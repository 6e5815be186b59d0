//! Persistence collaborators for entitlement records.
//!
//! Two interchangeable stores hold one record per identity: a synchronous
//! device-scoped slot for anonymous sessions and an asynchronous per-user
//! document store for authenticated sessions. The store picks one of them
//! through [`backend::select_backend`] when it binds to an identity.

pub mod backend;
pub mod local;
pub mod remote;

pub use backend::{BackendKind, EntitlementBackend, LocalSlotBackend, RemoteDocumentBackend, select_backend};
pub use local::{FileLocalStore, MemoryLocalStore};
pub use remote::InMemoryRemoteStore;

use crate::core::{EntitlementPatch, EntitlementState, Result, UserId};
use async_trait::async_trait;
use tokio::sync::watch;

/// Device-scoped slot holding the anonymous record. Reads and writes are synchronous.
pub trait LocalStore: Send + Sync {
    fn get(&self) -> Result<Option<EntitlementState>>;
    fn set(&self, record: &EntitlementState) -> Result<()>;
}

/// Authenticated per-user document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, id: &UserId) -> Result<Option<EntitlementState>>;

    async fn set(&self, id: &UserId, record: &EntitlementState) -> Result<()>;

    /// Applies only the fields present in `patch`. Fails if the document does not exist.
    async fn update(&self, id: &UserId, patch: &EntitlementPatch) -> Result<()>;

    /// Opens a change feed for one document. Dropping the subscription unsubscribes.
    async fn subscribe(&self, id: &UserId) -> Result<RecordSubscription>;
}

/// A change observed on a subscribed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Updated(EntitlementState),
    Removed,
}

/// Publishing half of a change feed: the latest known document, `None` when absent.
pub type RecordSender = watch::Sender<Option<EntitlementState>>;

/// Change feed for one record.
///
/// The feed carries the latest document state, not a log of writes. A slow
/// reader skips intermediate states and never observes an older state after a
/// newer one.
#[derive(Debug)]
pub struct RecordSubscription {
    receiver: watch::Receiver<Option<EntitlementState>>,
}

impl RecordSubscription {
    /// Subscribes to `sender`. The current value is delivered as the first change.
    pub fn new(sender: &RecordSender) -> Self {
        let mut receiver = sender.subscribe();
        receiver.mark_changed();
        Self { receiver }
    }

    /// Waits for the next change. `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<RecordChange> {
        self.receiver.changed().await.ok()?;
        Some(Self::to_change(self.receiver.borrow_and_update().clone()))
    }

    pub fn try_next(&mut self) -> Option<RecordChange> {
        if !self.receiver.has_changed().ok()? {
            return None;
        }
        Some(Self::to_change(self.receiver.borrow_and_update().clone()))
    }

    fn to_change(document: Option<EntitlementState>) -> RecordChange {
        match document {
            Some(record) => RecordChange::Updated(record),
            None => RecordChange::Removed,
        }
    }
}
