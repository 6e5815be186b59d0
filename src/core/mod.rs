pub mod error;
pub mod state;
pub mod types;

pub use error::{EntitlementError, Result};
pub use state::{Deduction, EntitlementPatch, EntitlementState};
pub use types::{AuthState, DeviceId, Feature, GrantChannel, Identity, SpendChannel, Tier, UserId};
