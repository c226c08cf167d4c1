//! Agent records for the trust ledger
//!
//! An agent is backed by staked collateral and carries a bounded
//! reputation score. Reputation moves by fixed integer steps on task
//! outcomes: a success earns less than a failure costs.

use crate::{AccountId, AgentId, TokenAmount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound of the reputation scale
pub const REPUTATION_SCALE: u32 = 10_000;

/// Score assigned at registration (midpoint)
pub const REPUTATION_INITIAL: u32 = 5_000;

/// Fixed increase on a successful outcome
pub const REPUTATION_SUCCESS_STEP: u32 = 100;

/// Fixed decrease on a failed outcome
pub const REPUTATION_FAILURE_STEP: u32 = 200;

/// Fixed decrease applied by a slash, on top of the stake cut
pub const REPUTATION_SLASH_PENALTY: u32 = 500;

/// Bounded reputation score in [0, 10000]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reputation(u32);

impl Reputation {
    /// Score assigned at registration
    pub fn initial() -> Self {
        Self(REPUTATION_INITIAL)
    }

    /// Current score
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Apply a successful outcome (+100, saturating at 10000)
    pub fn record_success(&mut self) {
        self.0 = (self.0 + REPUTATION_SUCCESS_STEP).min(REPUTATION_SCALE);
    }

    /// Apply a failed outcome (-200, floored at 0)
    pub fn record_failure(&mut self) {
        self.0 = self.0.saturating_sub(REPUTATION_FAILURE_STEP);
    }

    /// Apply a slash penalty (-500, floored at 0)
    pub fn apply_slash_penalty(&mut self) {
        self.0 = self.0.saturating_sub(REPUTATION_SLASH_PENALTY);
    }
}

impl Default for Reputation {
    fn default() -> Self {
        Self::initial()
    }
}

/// A registered agent
///
/// Records are never destroyed; deactivation is the terminal soft delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent id (derived from owner + name + registration time)
    pub id: AgentId,
    /// Owning account; the only principal allowed to manage this agent
    pub owner: AccountId,
    /// Display name
    pub name: String,
    /// Declared capability tags (set semantics - duplicates collapse)
    pub capabilities: BTreeSet<String>,
    /// Collateral currently staked
    pub staked: TokenAmount,
    /// Bounded reputation score
    pub reputation: Reputation,
    /// Number of successfully completed steps
    pub completed_tasks: u64,
    /// Number of failed steps
    pub failed_tasks: u64,
    /// Lifetime earnings paid out through settlements
    pub total_earned: TokenAmount,
    /// Whether the agent may accept work
    pub active: bool,
    /// When the agent registered
    pub registered_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Check whether the agent declares a capability
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Check the activity invariant against a minimum stake
    pub fn covers_minimum(&self, minimum: TokenAmount) -> bool {
        self.staked >= minimum
    }
}
