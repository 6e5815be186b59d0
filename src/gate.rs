//! Synchronous pre-flight check for costly actions.
//!
//! The gate reads the cached mirror, so its answer is advisory: another tab or
//! device may have spent the same credits already. Callers still have to go
//! through `EntitlementStore::spend` before treating the resource as consumed.

use crate::core::{EntitlementState, Feature};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Visibility of the upgrade prompt. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct UpsellPrompt {
    open: Arc<watch::Sender<bool>>,
}

impl Default for UpsellPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl UpsellPrompt {
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_if_modified(|open| !std::mem::replace(open, true));
    }

    pub fn close(&self) {
        self.open.send_if_modified(|open| std::mem::replace(open, false));
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.open.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct Gate {
    state: watch::Receiver<EntitlementState>,
    upsell: UpsellPrompt,
}

impl Gate {
    pub fn new(state: watch::Receiver<EntitlementState>, upsell: UpsellPrompt) -> Self {
        Self { state, upsell }
    }

    /// `true` if some balance can cover `cost` for `feature`. Opens the upsell prompt otherwise.
    pub fn check_allowance(&self, cost: u64, feature: Feature) -> bool {
        let allowed = self.state.borrow().can_afford(cost, feature);
        if !allowed {
            debug!(cost, %feature, "allowance denied, opening upsell prompt");
            self.upsell.open();
        }
        allowed
    }

    pub fn upsell(&self) -> &UpsellPrompt {
        &self.upsell
    }
}
