//! The persisted entitlement record and its pure transitions.
//!
//! Everything here is synchronous and side-effect free. The store decides
//! *when* a transition runs and *where* the result is written; this module
//! only decides *what* the next record looks like.

use crate::config::EntitlementConfig;
use crate::core::types::{Feature, GrantChannel, SpendChannel, Tier};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// One identity's entitlement record, in its persisted shape.
///
/// Balances are unsigned, so a record with a negative balance is rejected at
/// decode time instead of being carried around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementState {
    pub tier: Tier,
    pub fuel_credits: u64,
    pub power_credits: u64,
    pub search_queries: u64,
    pub last_reset_date: DateTime<Utc>,
}

/// Which balance a successful spend was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "balance", content = "amount", rename_all = "camelCase")]
pub enum Deduction {
    SearchQuery,
    Power(u64),
    Fuel(u64),
}

impl EntitlementState {
    /// Record for an identity that has never been observed before.
    pub fn initial(config: &EntitlementConfig, now: DateTime<Utc>) -> Self {
        let free = config.allowance(Tier::Free);
        Self {
            tier: Tier::Free,
            fuel_credits: free.fuel_credits,
            power_credits: 0,
            search_queries: free.search_queries,
            last_reset_date: now,
        }
    }

    pub fn from_json(raw: &str) -> crate::core::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> crate::core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `true` when `now` falls in a different calendar month than the last reset.
    pub fn needs_reset(&self, now: DateTime<Utc>) -> bool {
        (now.year(), now.month())
            != (self.last_reset_date.year(), self.last_reset_date.month())
    }

    /// Hard monthly reset: fuel and search go back to the tier's allowance,
    /// power credits never expire.
    pub fn reset(&self, config: &EntitlementConfig, now: DateTime<Utc>) -> Option<Self> {
        if !self.needs_reset(now) {
            return None;
        }
        let allowance = config.allowance(self.tier);
        Some(Self {
            tier: self.tier,
            fuel_credits: allowance.fuel_credits,
            power_credits: self.power_credits,
            search_queries: allowance.search_queries,
            last_reset_date: now,
        })
    }

    /// Strict priority: search allowance, then power, then fuel.
    ///
    /// A request is never split across balances. `None` means insufficient
    /// funds and the caller must leave the record untouched.
    pub fn spend(&self, cost: u64, channel: SpendChannel) -> Option<(Self, Deduction)> {
        let mut next = self.clone();
        let deduction = if channel == SpendChannel::Search && self.search_queries > 0 {
            next.search_queries -= 1;
            Deduction::SearchQuery
        } else if self.power_credits >= cost {
            next.power_credits -= cost;
            Deduction::Power(cost)
        } else if self.fuel_credits >= cost {
            next.fuel_credits -= cost;
            Deduction::Fuel(cost)
        } else {
            return None;
        };
        Some((next, deduction))
    }

    pub fn grant(&self, amount: u64, channel: GrantChannel) -> Self {
        let mut next = self.clone();
        match channel {
            GrantChannel::Fuel => next.fuel_credits = next.fuel_credits.saturating_add(amount),
            GrantChannel::Power => next.power_credits = next.power_credits.saturating_add(amount),
        }
        next
    }

    /// Mid-cycle upgrade. Fuel is raised to the new tier's baseline but never
    /// lowered; a tier with a search grant has its search allowance set to
    /// exactly that grant.
    pub fn upgrade(&self, tier: Tier, config: &EntitlementConfig) -> Self {
        let mut next = self.clone();
        next.tier = tier;
        if tier != Tier::Free {
            let allowance = config.allowance(tier);
            next.fuel_credits = next.fuel_credits.max(allowance.fuel_credits);
            if allowance.search_queries > 0 {
                next.search_queries = allowance.search_queries;
            }
        }
        next
    }

    pub fn can_afford(&self, cost: u64, feature: Feature) -> bool {
        self.power_credits >= cost
            || self.fuel_credits >= cost
            || (feature == Feature::Search && self.search_queries > 0)
    }
}

/// Partial update: only the fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_credits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_credits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_queries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset_date: Option<DateTime<Utc>>,
}

impl EntitlementPatch {
    pub fn diff(before: &EntitlementState, after: &EntitlementState) -> Self {
        fn changed<T: PartialEq + Copy>(a: T, b: T) -> Option<T> {
            (a != b).then_some(b)
        }

        Self {
            tier: changed(before.tier, after.tier),
            fuel_credits: changed(before.fuel_credits, after.fuel_credits),
            power_credits: changed(before.power_credits, after.power_credits),
            search_queries: changed(before.search_queries, after.search_queries),
            last_reset_date: changed(before.last_reset_date, after.last_reset_date),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, state: &mut EntitlementState) {
        if let Some(tier) = self.tier {
            state.tier = tier;
        }
        if let Some(fuel) = self.fuel_credits {
            state.fuel_credits = fuel;
        }
        if let Some(power) = self.power_credits {
            state.power_credits = power;
        }
        if let Some(search) = self.search_queries {
            state.search_queries = search;
        }
        if let Some(date) = self.last_reset_date {
            state.last_reset_date = date;
        }
    }
}
