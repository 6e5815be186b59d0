use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Subscription level. Determines the monthly baseline allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tier {
    #[default]
    Free,
    Scholar,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Scholar => "Scholar",
            Self::Pro => "Pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "scholar" => Ok(Self::Scholar),
            "pro" => Ok(Self::Pro),
            other => Err(format!("unknown tier '{}' (expected free, scholar or pro)", other)),
        }
    }
}

/// Channel a spend request is charged against.
///
/// Only `Search` changes the deduction order; `Fuel` and `Power` both fall
/// through the power-then-fuel priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendChannel {
    Fuel,
    Power,
    Search,
}

impl fmt::Display for SpendChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fuel => "fuel",
            Self::Power => "power",
            Self::Search => "search",
        };
        write!(f, "{label}")
    }
}

impl FromStr for SpendChannel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fuel" => Ok(Self::Fuel),
            "power" => Ok(Self::Power),
            "search" => Ok(Self::Search),
            other => Err(format!(
                "unknown spend channel '{}' (expected fuel, power or search)",
                other
            )),
        }
    }
}

/// Balance a grant is credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantChannel {
    Fuel,
    Power,
}

impl fmt::Display for GrantChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fuel => "fuel",
            Self::Power => "power",
        };
        write!(f, "{label}")
    }
}

impl FromStr for GrantChannel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fuel" => Ok(Self::Fuel),
            "power" => Ok(Self::Power),
            other => Err(format!(
                "unknown grant channel '{}' (expected fuel or power)",
                other
            )),
        }
    }
}

/// Costly feature a caller wants to run, as seen by the allowance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Search,
    Vision,
    Doc,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Search => "search",
            Self::Vision => "vision",
            Self::Doc => "doc",
        };
        write!(f, "{label}")
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(Self::Search),
            "vision" => Ok(Self::Vision),
            "doc" => Ok(Self::Doc),
            other => Err(format!(
                "unknown feature '{}' (expected search, vision or doc)",
                other
            )),
        }
    }
}

/// Authenticated user key in the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-device placeholder identity used while nobody is signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// Owner of exactly one entitlement record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Anonymous(DeviceId),
    User(UserId),
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Anonymous(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous(device) => write!(f, "{device}"),
            Self::User(user) => write!(f, "user:{user}"),
        }
    }
}

/// What the auth collaborator currently knows about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Sign-in status has not been determined yet.
    Resolving,
    Resolved(Identity),
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Resolving => None,
            Self::Resolved(identity) => Some(identity),
        }
    }
}
