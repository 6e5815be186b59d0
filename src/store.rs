//! Identity-bound entitlement store.
//!
//! An [`EntitlementStore`] owns exactly one identity's record for as long as
//! it is bound. It picks the backend once, keeps an in-memory mirror that is
//! only advanced after the backend confirmed a write, and serializes every
//! mutation so that operations issued from one process apply in order.
//!
//! Cross-device writers are *not* serialized: two devices spending from the
//! same remote record can both observe the pre-decrement balance and both
//! succeed. No compare-and-swap is attempted against the remote store.

use crate::clock::Clock;
use crate::config::EntitlementConfig;
use crate::core::{
    Deduction, EntitlementError, EntitlementPatch, EntitlementState, GrantChannel, Identity,
    Result, SpendChannel, Tier,
};
use crate::gate::{Gate, UpsellPrompt};
use crate::storage::{
    BackendKind, EntitlementBackend, LocalStore, RecordChange, RecordSubscription, RemoteStore,
    select_backend,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

const EVENT_CAPACITY: usize = 64;

/// Notices for the UI layer. Delivery is best effort; state is read from the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementEvent {
    MonthlyReset {
        tier: Tier,
        fuel_credits: u64,
        search_queries: u64,
    },
    CreditsSpent {
        channel: SpendChannel,
        deduction: Deduction,
    },
    CreditsGranted {
        channel: GrantChannel,
        amount: u64,
    },
    TierUpgraded {
        tier: Tier,
    },
    /// Another writer changed the record; the mirror now holds its version.
    RemoteSync,
    /// The remote record disappeared and was re-created with defaults.
    Reinitialized,
}

/// Collaborators a store binds against.
#[derive(Clone)]
pub struct StoreContext {
    pub config: Arc<EntitlementConfig>,
    pub clock: Arc<dyn Clock>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
}

impl StoreContext {
    pub fn new(
        config: EntitlementConfig,
        clock: Arc<dyn Clock>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            local,
            remote,
        }
    }
}

struct StoreShared {
    identity: Identity,
    config: Arc<EntitlementConfig>,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn EntitlementBackend>,
    mirror: watch::Sender<EntitlementState>,
    events: broadcast::Sender<EntitlementEvent>,
    ops: Mutex<()>,
    closed: AtomicBool,
}

impl StoreShared {
    fn emit(&self, event: EntitlementEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EntitlementError::StoreClosed);
        }
        Ok(())
    }

    /// Persists `next` and, once confirmed, advances the mirror by the same patch.
    async fn commit(&self, before: &EntitlementState, next: &EntitlementState) -> Result<()> {
        let patch = EntitlementPatch::diff(before, next);
        if patch.is_empty() {
            return Ok(());
        }
        self.backend.commit(next, &patch).await?;
        self.mirror.send_modify(|mirror| patch.apply_to(mirror));
        Ok(())
    }

    /// Caller must hold `ops`.
    async fn reset_if_stale(&self) -> Result<bool> {
        let before = self.mirror.borrow().clone();
        let Some(next) = before.reset(&self.config, self.clock.now()) else {
            return Ok(false);
        };

        self.commit(&before, &next).await?;
        info!(
            identity = %self.identity,
            tier = %next.tier,
            fuel = next.fuel_credits,
            search = next.search_queries,
            "monthly allowances reset"
        );
        self.emit(EntitlementEvent::MonthlyReset {
            tier: next.tier,
            fuel_credits: next.fuel_credits,
            search_queries: next.search_queries,
        });
        Ok(true)
    }
}

pub struct EntitlementStore {
    shared: Arc<StoreShared>,
    sync_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    reset_on_bind: bool,
}

impl EntitlementStore {
    /// Binds to `identity`: selects its backend, loads or creates its record,
    /// subscribes to remote changes and applies a pending monthly reset.
    pub async fn bind(identity: Identity, ctx: &StoreContext) -> Result<Self> {
        let backend = select_backend(&identity, ctx.local.clone(), ctx.remote.clone());
        let span = info_span!("bind_entitlements", identity = %identity, backend = %backend.kind());

        async move {
            let record = match backend.load().await? {
                Some(record) => record,
                None => {
                    let initial = EntitlementState::initial(&ctx.config, ctx.clock.now());
                    backend.initialize(&initial).await?;
                    info!("created default entitlement record");
                    initial
                }
            };

            let (mirror, _) = watch::channel(record);
            let (events, _) = broadcast::channel(EVENT_CAPACITY);
            let shared = Arc::new(StoreShared {
                identity,
                config: ctx.config.clone(),
                clock: ctx.clock.clone(),
                backend: backend.clone(),
                mirror,
                events,
                ops: Mutex::new(()),
                closed: AtomicBool::new(false),
            });

            let sync_task = match backend.subscribe().await? {
                Some(feed) => Some(tokio::spawn(follow_remote(shared.clone(), feed))),
                None => None,
            };

            let mut store = Self {
                shared,
                sync_task: std::sync::Mutex::new(sync_task),
                reset_on_bind: false,
            };
            store.reset_on_bind = match store.check_reset().await {
                Ok(applied) => applied,
                Err(err) => {
                    warn!(error = %err, "monthly reset check failed during bind");
                    false
                }
            };
            Ok::<Self, EntitlementError>(store)
        }
        .instrument(span)
        .await
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// `true` if binding found a stale record and applied the monthly reset.
    pub fn reset_on_bind(&self) -> bool {
        self.reset_on_bind
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.shared.backend.kind()
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.shared.config
    }

    /// Snapshot of the mirrored record
    pub fn state(&self) -> EntitlementState {
        self.shared.mirror.borrow().clone()
    }

    pub fn tier(&self) -> Tier {
        self.shared.mirror.borrow().tier
    }

    pub fn fuel_credits(&self) -> u64 {
        self.shared.mirror.borrow().fuel_credits
    }

    pub fn power_credits(&self) -> u64 {
        self.shared.mirror.borrow().power_credits
    }

    pub fn search_queries(&self) -> u64 {
        self.shared.mirror.borrow().search_queries
    }

    pub fn last_reset_date(&self) -> DateTime<Utc> {
        self.shared.mirror.borrow().last_reset_date
    }

    /// Receiver that observes every mirror update
    pub fn watch(&self) -> watch::Receiver<EntitlementState> {
        self.shared.mirror.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.shared.events.subscribe()
    }

    /// Allowance gate reading this store's mirror
    pub fn gate(&self, upsell: UpsellPrompt) -> Gate {
        Gate::new(self.watch(), upsell)
    }

    /// Charges `cost` following the search, power, fuel priority.
    ///
    /// Returns `Ok(false)` without touching the record when no single balance
    /// can cover the request.
    pub async fn spend(&self, cost: u64, channel: SpendChannel) -> Result<bool> {
        if cost == 0 {
            return Err(EntitlementError::InvalidAmount(
                "spend cost must be positive".to_string(),
            ));
        }
        let _ops = self.shared.ops.lock().await;
        self.shared.ensure_open()?;
        self.shared.reset_if_stale().await?;

        let before = self.state();
        let Some((next, deduction)) = before.spend(cost, channel) else {
            debug!(identity = %self.shared.identity, %channel, cost, "insufficient credits");
            return Ok(false);
        };

        self.shared.commit(&before, &next).await?;
        debug!(identity = %self.shared.identity, %channel, cost, ?deduction, "credits spent");
        self.shared
            .emit(EntitlementEvent::CreditsSpent { channel, deduction });
        Ok(true)
    }

    /// Adds `amount` to a balance. There is no upper bound.
    pub async fn grant(&self, amount: u64, channel: GrantChannel) -> Result<()> {
        if amount == 0 {
            return Err(EntitlementError::InvalidAmount(
                "grant amount must be positive".to_string(),
            ));
        }
        let _ops = self.shared.ops.lock().await;
        self.shared.ensure_open()?;
        self.shared.reset_if_stale().await?;

        let before = self.state();
        let next = before.grant(amount, channel);
        self.shared.commit(&before, &next).await?;
        info!(identity = %self.shared.identity, %channel, amount, "credits granted");
        self.shared
            .emit(EntitlementEvent::CreditsGranted { channel, amount });
        Ok(())
    }

    /// Switches tier, raising balances to the new tier's baseline where lower.
    pub async fn upgrade_tier(&self, tier: Tier) -> Result<()> {
        let _ops = self.shared.ops.lock().await;
        self.shared.ensure_open()?;
        self.shared.reset_if_stale().await?;

        let before = self.state();
        let next = before.upgrade(tier, &self.shared.config);
        self.shared.commit(&before, &next).await?;
        info!(identity = %self.shared.identity, from = %before.tier, to = %tier, "tier changed");
        self.shared.emit(EntitlementEvent::TierUpgraded { tier });
        Ok(())
    }

    /// Applies the monthly reset if the calendar month changed. Returns `true` if it did.
    pub async fn check_reset(&self) -> Result<bool> {
        let _ops = self.shared.ops.lock().await;
        self.shared.ensure_open()?;
        self.shared.reset_if_stale().await
    }

    /// Releases the identity binding. Pending operations finish; later ones fail.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = match self.sync_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        debug!(identity = %self.shared.identity, "entitlement store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for EntitlementStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Feeds remote changes into the mirror until the subscription ends or the store closes.
async fn follow_remote(shared: Arc<StoreShared>, mut feed: RecordSubscription) {
    while let Some(change) = feed.next().await {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        match change {
            RecordChange::Updated(record) => {
                let changed = shared.mirror.send_if_modified(|mirror| {
                    if *mirror == record {
                        false
                    } else {
                        *mirror = record;
                        true
                    }
                });
                if changed {
                    debug!(identity = %shared.identity, "mirror synced from remote");
                    shared.emit(EntitlementEvent::RemoteSync);
                }
            }
            RecordChange::Removed => {
                let _ops = shared.ops.lock().await;
                let initial = EntitlementState::initial(&shared.config, shared.clock.now());
                match shared.backend.initialize(&initial).await {
                    Ok(()) => {
                        shared.mirror.send_replace(initial);
                        warn!(identity = %shared.identity, "remote record vanished, re-created defaults");
                        shared.emit(EntitlementEvent::Reinitialized);
                    }
                    Err(err) => {
                        warn!(identity = %shared.identity, error = %err, "failed to re-create remote record");
                    }
                }
            }
        }
    }
}
