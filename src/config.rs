use crate::core::Tier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monthly baseline granted by a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierAllowance {
    /// Fuel credits restored on reset, and the floor applied on upgrade
    pub fuel_credits: u64,

    /// Search queries granted on reset and on upgrade
    pub search_queries: u64,
}

impl TierAllowance {
    pub const fn new(fuel_credits: u64, search_queries: u64) -> Self {
        Self {
            fuel_credits,
            search_queries,
        }
    }
}

/// Entitlement store configuration
///
/// Defaults match the published plan table (Free 10, Scholar 300 + 10 searches, Pro 1000).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementConfig {
    /// Free tier allowance
    pub free: TierAllowance,

    /// Scholar tier allowance
    pub scholar: TierAllowance,

    /// Pro tier allowance
    pub pro: TierAllowance,

    /// How often the reset worker re-checks the calendar month
    pub reset_check_interval_secs: u64,

    /// Device-scoped slot name for the anonymous record
    pub local_slot: String,

    /// Remote collection holding one document per user
    pub remote_collection: String,
}

impl EntitlementConfig {
    pub fn new() -> Self {
        Self {
            free: TierAllowance::new(10, 0),
            scholar: TierAllowance::new(300, 10),
            pro: TierAllowance::new(1000, 0),
            reset_check_interval_secs: 60,
            local_slot: "subscription_state".to_string(),
            remote_collection: "users".to_string(),
        }
    }

    /// Allowance for a tier
    pub fn allowance(&self, tier: Tier) -> TierAllowance {
        match tier {
            Tier::Free => self.free,
            Tier::Scholar => self.scholar,
            Tier::Pro => self.pro,
        }
    }

    /// Override a tier's allowance
    pub fn with_allowance(mut self, tier: Tier, allowance: TierAllowance) -> Self {
        match tier {
            Tier::Free => self.free = allowance,
            Tier::Scholar => self.scholar = allowance,
            Tier::Pro => self.pro = allowance,
        }
        self
    }

    /// Set the reset check interval
    pub fn reset_check_interval(mut self, interval: Duration) -> Self {
        self.reset_check_interval_secs = interval.as_secs();
        self
    }

    /// Set the local slot name
    pub fn local_slot(mut self, slot: &str) -> Self {
        self.local_slot = slot.to_string();
        self
    }

    /// Set the remote collection name
    pub fn remote_collection(mut self, collection: &str) -> Self {
        self.remote_collection = collection.to_string();
        self
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_check_interval_secs)
    }

    /// Parse from a JSON document; missing fields fall back to defaults
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| format!("Invalid config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.local_slot.trim().is_empty() {
            return Err("local_slot cannot be empty".to_string());
        }

        if self.remote_collection.trim().is_empty() {
            return Err("remote_collection cannot be empty".to_string());
        }

        if self.reset_check_interval_secs == 0 {
            return Err("reset_check_interval must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self::new()
    }
}
