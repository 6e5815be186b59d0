use crate::core::{AuthState, DeviceId, Identity, UserId};
use std::sync::Arc;
use tokio::sync::watch;

/// Source of the session's identity.
///
/// Sign-in status resolves asynchronously; consumers watch the channel and
/// react to every change.
pub trait AuthProvider: Send + Sync {
    /// Current auth status
    fn current(&self) -> AuthState;

    /// Change notifications
    fn watch(&self) -> watch::Receiver<AuthState>;
}

/// Auth state driven by the embedding application.
///
/// Starts out `Resolving`; the application reports the outcome of its sign-in
/// flow through `sign_in`, `sign_out` or `resolve`. Clones share the same state.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    device: DeviceId,
    state: Arc<watch::Sender<AuthState>>,
}

impl AuthHandle {
    /// Creates a handle for this device, still resolving
    pub fn new(device: DeviceId) -> Self {
        let (state, _) = watch::channel(AuthState::Resolving);
        Self {
            device,
            state: Arc::new(state),
        }
    }

    /// Creates a handle already resolved to the anonymous identity
    pub fn anonymous(device: DeviceId) -> Self {
        let handle = Self::new(device);
        handle.sign_out();
        handle
    }

    /// Returns the device placeholder used while signed out
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Reports a signed-in user
    pub fn sign_in(&self, user: UserId) {
        self.resolve(Identity::User(user));
    }

    /// Reports that nobody is signed in on this device
    pub fn sign_out(&self) {
        self.resolve(Identity::Anonymous(self.device));
    }

    /// Reports a resolved identity. Repeating the current identity is not a change.
    pub fn resolve(&self, identity: Identity) {
        let next = AuthState::Resolved(identity);
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl AuthProvider for AuthHandle {
    fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}
