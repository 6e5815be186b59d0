//! Session-level owner of the identity binding.
//!
//! The service follows the auth collaborator and keeps exactly one
//! [`EntitlementStore`] bound to the current identity. Switching identity
//! closes the previous store (tearing down its remote subscription) before the
//! next one binds, so no state leaks from one identity to another.

use crate::auth::AuthProvider;
use crate::core::{
    AuthState, EntitlementError, EntitlementState, Feature, GrantChannel, Identity, Result,
    SpendChannel, Tier,
};
use crate::gate::{Gate, UpsellPrompt};
use crate::store::{EntitlementStore, StoreContext};
use crate::worker::ResetTarget;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct EntitlementService {
    ctx: StoreContext,
    upsell: UpsellPrompt,
    provisional: watch::Sender<EntitlementState>,
    current: watch::Sender<Option<Arc<EntitlementStore>>>,
    binding: Mutex<()>,
}

impl EntitlementService {
    /// Creates an unbound service.
    ///
    /// Until an identity resolves, reads are served from a provisional copy of
    /// the device slot so a guest sees their balance immediately. Mutations
    /// are refused until then.
    pub fn new(ctx: StoreContext) -> Self {
        let (provisional, _) = watch::channel(read_device_slot(&ctx));
        let (current, _) = watch::channel(None);
        Self {
            ctx,
            upsell: UpsellPrompt::new(),
            provisional,
            current,
            binding: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn upsell(&self) -> &UpsellPrompt {
        &self.upsell
    }

    pub fn open_upsell(&self) {
        self.upsell.open();
    }

    pub fn close_upsell(&self) {
        self.upsell.close();
    }

    /// Store bound to the current identity, if any
    pub fn store(&self) -> Option<Arc<EntitlementStore>> {
        self.current.borrow().clone()
    }

    /// Observes identity bindings as they change
    pub fn bindings(&self) -> watch::Receiver<Option<Arc<EntitlementStore>>> {
        self.current.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.store().map(|store| store.identity().clone())
    }

    /// Bound record, or the provisional one while unbound
    pub fn state(&self) -> EntitlementState {
        match self.store() {
            Some(store) => store.state(),
            None => self.provisional.borrow().clone(),
        }
    }

    /// Binds `identity`, closing whatever was bound before.
    ///
    /// Re-binding the identity that is already bound returns the existing store.
    pub async fn bind(&self, identity: Identity) -> Result<Arc<EntitlementStore>> {
        let _binding = self.binding.lock().await;

        if let Some(existing) = self.store() {
            if existing.identity() == &identity && !existing.is_closed() {
                return Ok(existing);
            }
        }

        if let Some(previous) = self.current.send_replace(None) {
            info!(from = %previous.identity(), to = %identity, "switching entitlement identity");
            previous.close();
            self.refresh_provisional();
        }

        let store = Arc::new(EntitlementStore::bind(identity, &self.ctx).await?);
        self.current.send_replace(Some(store.clone()));
        Ok(store)
    }

    /// Closes the current binding without binding another identity.
    pub fn unbind(&self) {
        if let Some(previous) = self.current.send_replace(None) {
            previous.close();
            self.refresh_provisional();
        }
    }

    /// Re-reads the device slot so unbound reads reflect what the last session left there.
    fn refresh_provisional(&self) {
        let record = read_device_slot(&self.ctx);
        self.provisional.send_if_modified(|current| {
            if *current == record {
                false
            } else {
                *current = record;
                true
            }
        });
    }

    /// Waits until `identity` is bound. `None` if the service shut down first.
    pub async fn wait_for(&self, identity: &Identity) -> Option<Arc<EntitlementStore>> {
        let mut bindings = self.bindings();
        loop {
            if let Some(store) = bindings.borrow_and_update().clone() {
                if store.identity() == identity {
                    return Some(store);
                }
            }
            bindings.changed().await.ok()?;
        }
    }

    /// Rebinds on every resolved auth change until the returned follower stops.
    pub fn follow<A>(self: &Arc<Self>, auth: &A) -> AuthFollower
    where
        A: AuthProvider + ?Sized,
    {
        let mut auth_rx = auth.watch();
        let service = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                let state = auth_rx.borrow_and_update().clone();
                if let AuthState::Resolved(identity) = state {
                    if let Err(err) = service.bind(identity.clone()).await {
                        warn!(identity = %identity, error = %err, "failed to bind entitlements");
                    }
                }

                tokio::select! {
                    _ = &mut stop_rx => break,
                    changed = auth_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        AuthFollower {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Gate over the bound record, or over the provisional one while unbound
    pub fn gate(&self) -> Gate {
        match self.store() {
            Some(store) => store.gate(self.upsell.clone()),
            None => Gate::new(self.provisional.subscribe(), self.upsell.clone()),
        }
    }

    pub fn check_allowance(&self, cost: u64, feature: Feature) -> bool {
        self.gate().check_allowance(cost, feature)
    }

    pub async fn spend(&self, cost: u64, channel: SpendChannel) -> Result<bool> {
        self.bound()?.spend(cost, channel).await
    }

    pub async fn grant(&self, amount: u64, channel: GrantChannel) -> Result<()> {
        self.bound()?.grant(amount, channel).await
    }

    /// Changes tier and dismisses the upsell prompt.
    pub async fn upgrade_tier(&self, tier: Tier) -> Result<()> {
        self.bound()?.upgrade_tier(tier).await?;
        self.upsell.close();
        Ok(())
    }

    pub async fn check_reset(&self) -> Result<bool> {
        self.bound()?.check_reset().await
    }

    fn bound(&self) -> Result<Arc<EntitlementStore>> {
        self.store().ok_or(EntitlementError::IdentityUnresolved)
    }
}

fn read_device_slot(ctx: &StoreContext) -> EntitlementState {
    match ctx.local.get() {
        Ok(Some(record)) => record,
        Ok(None) => EntitlementState::initial(&ctx.config, ctx.clock.now()),
        Err(err) => {
            warn!(error = %err, "unreadable local record, showing defaults");
            EntitlementState::initial(&ctx.config, ctx.clock.now())
        }
    }
}

#[async_trait]
impl ResetTarget for EntitlementService {
    async fn check_reset(&self) -> Result<bool> {
        match self.store() {
            Some(store) => store.check_reset().await,
            None => Ok(false),
        }
    }
}

/// Background task that keeps the service bound to the auth identity.
pub struct AuthFollower {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl AuthFollower {
    /// Signals the follower to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                EntitlementError::Task(format!("auth follower join: {}", err))
            })?;
        }
        Ok(())
    }
}

impl Drop for AuthFollower {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
