use crate::core::{
    EntitlementError, EntitlementPatch, EntitlementState, Identity, Result, UserId,
};
use crate::storage::{LocalStore, RecordSubscription, RemoteStore};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Local => "local",
            Self::Remote => "remote",
        };
        write!(f, "{label}")
    }
}

/// Where one identity's record lives. Chosen once when a store binds.
#[async_trait]
pub trait EntitlementBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Reads the record. `None` means the identity has never been observed.
    async fn load(&self) -> Result<Option<EntitlementState>>;

    /// Writes a complete record, creating it if needed.
    async fn initialize(&self, record: &EntitlementState) -> Result<()>;

    /// Persists a transition. Returns only after the write is confirmed.
    async fn commit(&self, next: &EntitlementState, patch: &EntitlementPatch) -> Result<()>;

    /// Change feed for records other writers can touch. Local slots have none.
    async fn subscribe(&self) -> Result<Option<RecordSubscription>>;
}

/// Anonymous record in the device slot.
pub struct LocalSlotBackend {
    store: Arc<dyn LocalStore>,
}

impl LocalSlotBackend {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntitlementBackend for LocalSlotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn load(&self) -> Result<Option<EntitlementState>> {
        match self.store.get() {
            Ok(record) => Ok(record),
            Err(EntitlementError::InvalidRecord(reason)) => {
                warn!(%reason, "discarding unreadable local entitlement record");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn initialize(&self, record: &EntitlementState) -> Result<()> {
        self.store.set(record)
    }

    async fn commit(&self, next: &EntitlementState, _patch: &EntitlementPatch) -> Result<()> {
        self.store.set(next)
    }

    async fn subscribe(&self) -> Result<Option<RecordSubscription>> {
        Ok(None)
    }
}

/// Authenticated record in the remote document store.
pub struct RemoteDocumentBackend {
    store: Arc<dyn RemoteStore>,
    user: UserId,
}

impl RemoteDocumentBackend {
    pub fn new(store: Arc<dyn RemoteStore>, user: UserId) -> Self {
        Self { store, user }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }
}

#[async_trait]
impl EntitlementBackend for RemoteDocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn load(&self) -> Result<Option<EntitlementState>> {
        self.store.get(&self.user).await
    }

    async fn initialize(&self, record: &EntitlementState) -> Result<()> {
        self.store.set(&self.user, record).await
    }

    async fn commit(&self, _next: &EntitlementState, patch: &EntitlementPatch) -> Result<()> {
        self.store.update(&self.user, patch).await
    }

    async fn subscribe(&self) -> Result<Option<RecordSubscription>> {
        self.store.subscribe(&self.user).await.map(Some)
    }
}

/// Authenticated identities use the remote store, everything else the device slot.
pub fn select_backend(
    identity: &Identity,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
) -> Arc<dyn EntitlementBackend> {
    match identity {
        Identity::User(user) => Arc::new(RemoteDocumentBackend::new(remote, user.clone())),
        Identity::Anonymous(_) => Arc::new(LocalSlotBackend::new(local)),
    }
}
