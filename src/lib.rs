// ============================================================================
// creditgate Library
// ============================================================================

//! Credit and subscription entitlements for metered features.
//!
//! Each identity (a signed-in user or an anonymous device) owns one
//! [`EntitlementState`]: a tier plus fuel, power and search balances that are
//! refreshed monthly. An [`EntitlementStore`] bound to that identity is the
//! only writer of the record; it persists to a device slot ([`LocalStore`])
//! for anonymous sessions and to a per-user document store ([`RemoteStore`])
//! for authenticated ones.
//!
//! ```no_run
//! use creditgate::{
//!     DeviceId, EntitlementConfig, EntitlementService, Feature, Identity,
//!     InMemoryRemoteStore, MemoryLocalStore, SpendChannel, StoreContext, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> creditgate::Result<()> {
//! let ctx = StoreContext::new(
//!     EntitlementConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(InMemoryRemoteStore::default()),
//! );
//! let service = EntitlementService::new(ctx);
//! service.bind(Identity::Anonymous(DeviceId::generate())).await?;
//!
//! if service.check_allowance(1, Feature::Doc) && service.spend(1, SpendChannel::Fuel).await? {
//!     // run the costly action
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod core;
pub mod gate;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

pub use auth::{AuthHandle, AuthProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EntitlementConfig, TierAllowance};
pub use crate::core::{
    AuthState, Deduction, DeviceId, EntitlementError, EntitlementPatch, EntitlementState,
    Feature, GrantChannel, Identity, Result, SpendChannel, Tier, UserId,
};
pub use gate::{Gate, UpsellPrompt};
pub use service::{AuthFollower, EntitlementService};
pub use storage::{
    BackendKind, EntitlementBackend, FileLocalStore, InMemoryRemoteStore, LocalStore,
    MemoryLocalStore, RecordChange, RecordSubscription, RemoteStore,
};
pub use store::{EntitlementEvent, EntitlementStore, StoreContext};
pub use worker::{ResetTarget, ResetWorker};
