use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid entitlement record: {0}")]
    InvalidRecord(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Identity is still resolving")]
    IdentityUnresolved,

    #[error("Entitlement store is closed")]
    StoreClosed,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, EntitlementError>;

impl<T> From<std::sync::PoisonError<T>> for EntitlementError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for EntitlementError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EntitlementError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::InvalidRecord(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl EntitlementError {
    /// Returns `true` for failures the caller may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
