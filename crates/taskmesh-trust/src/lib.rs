//! TaskMesh Trust - the agent trust ledger
//!
//! Authoritative record of agent stake and reputation. This is the only
//! component permitted to move a reputation score or slash stake. The
//! settlement engine affects trust through a capability gate: a small
//! allow-list of settlement callers, managed by the governance principal,
//! may record outcomes and slash - everyone else is rejected at the
//! boundary.
//!
//! # Invariants
//!
//! 1. `active ⇒ staked ≥ minimum_stake`
//! 2. Stake never goes negative; all arithmetic is checked
//! 3. Reputation stays within [0, 10000]
//! 4. Agent records are never destroyed - deactivation is the soft delete

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use taskmesh_assets::AssetLedger;
use taskmesh_types::{
    AccountId, AgentId, AgentRecord, Reputation, Result, TaskMeshError, TokenAmount,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Default slash cut: 10% of current stake
pub const DEFAULT_SLASH_BPS: u32 = 1_000;

/// Hard ceiling on the slash cut: 50%
pub const MAX_SLASH_BPS: u32 = 5_000;

/// Trust ledger configuration
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Minimum stake an active agent must hold
    pub minimum_stake: TokenAmount,
    /// Slash cut in basis points of current stake
    pub slash_bps: u32,
    /// Treasury sink receiving slashed stake
    pub treasury: AccountId,
}

impl TrustConfig {
    pub fn new(minimum_stake: TokenAmount, treasury: AccountId) -> Self {
        Self {
            minimum_stake,
            slash_bps: DEFAULT_SLASH_BPS,
            treasury,
        }
    }

    /// Override the slash cut; rejected above the hard ceiling
    pub fn with_slash_bps(mut self, bps: u32) -> Result<Self> {
        if bps > MAX_SLASH_BPS {
            return Err(TaskMeshError::SlashAboveCeiling {
                bps,
                ceiling: MAX_SLASH_BPS,
            });
        }
        self.slash_bps = bps;
        Ok(self)
    }
}

/// The agent trust ledger
///
/// Thread-safe; every state-changing operation validates fully before
/// mutating anything.
pub struct TrustLedger {
    config: TrustConfig,
    governance: AccountId,
    assets: Arc<dyn AssetLedger>,
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
    by_owner: Arc<RwLock<HashMap<AccountId, Vec<AgentId>>>>,
    by_capability: Arc<RwLock<HashMap<String, BTreeSet<AgentId>>>>,
    authorized: Arc<RwLock<HashSet<AccountId>>>,
}

impl TrustLedger {
    /// Create a trust ledger owned by a governance principal
    pub fn new(config: TrustConfig, governance: AccountId, assets: Arc<dyn AssetLedger>) -> Self {
        Self {
            config,
            governance,
            assets,
            agents: Arc::new(RwLock::new(HashMap::new())),
            by_owner: Arc::new(RwLock::new(HashMap::new())),
            by_capability: Arc::new(RwLock::new(HashMap::new())),
            authorized: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// The configured minimum stake
    pub fn minimum_stake(&self) -> TokenAmount {
        self.config.minimum_stake
    }

    // ========================================================================
    // Governance: the settlement-caller allow-list
    // ========================================================================

    /// Add an account to the settlement-caller allow-list
    pub async fn authorize_caller(&self, caller: &AccountId, account: AccountId) -> Result<()> {
        if *caller != self.governance {
            return Err(TaskMeshError::NotGovernance {
                caller: caller.to_string(),
            });
        }
        self.authorized.write().await.insert(account);
        info!(%account, "settlement caller authorized");
        Ok(())
    }

    /// Remove an account from the settlement-caller allow-list
    pub async fn revoke_caller(&self, caller: &AccountId, account: &AccountId) -> Result<()> {
        if *caller != self.governance {
            return Err(TaskMeshError::NotGovernance {
                caller: caller.to_string(),
            });
        }
        self.authorized.write().await.remove(account);
        info!(%account, "settlement caller revoked");
        Ok(())
    }

    /// Check allow-list membership
    pub async fn is_authorized(&self, account: &AccountId) -> bool {
        self.authorized.read().await.contains(account)
    }

    async fn require_authorized(&self, caller: &AccountId) -> Result<()> {
        if !self.is_authorized(caller).await {
            return Err(TaskMeshError::NotAuthorizedCaller {
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Registration and stake management
    // ========================================================================

    /// Register a new agent, pulling its stake into custody
    pub async fn register(
        &self,
        owner: &AccountId,
        name: &str,
        capabilities: Vec<String>,
        stake: TokenAmount,
    ) -> Result<AgentId> {
        if name.trim().is_empty() {
            return Err(TaskMeshError::EmptyName);
        }
        let capabilities: BTreeSet<String> = capabilities
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if capabilities.is_empty() {
            return Err(TaskMeshError::EmptyCapabilities);
        }
        if stake < self.config.minimum_stake {
            return Err(TaskMeshError::StakeBelowMinimum {
                required: self.config.minimum_stake.raw(),
                provided: stake.raw(),
            });
        }

        let now = Utc::now();
        let id = AgentId::derive(owner, name, now);

        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(TaskMeshError::IdCollision { id: id.to_string() });
        }

        // Escrow the stake before the record exists; a failed pull leaves
        // the ledger untouched.
        self.assets.transfer_in(owner, stake).await?;

        let record = AgentRecord {
            id,
            owner: *owner,
            name: name.to_string(),
            capabilities: capabilities.clone(),
            staked: stake,
            reputation: Reputation::initial(),
            completed_tasks: 0,
            failed_tasks: 0,
            total_earned: TokenAmount::zero(),
            active: true,
            registered_at: now,
            updated_at: now,
        };
        agents.insert(id, record);

        self.by_owner.write().await.entry(*owner).or_default().push(id);
        let mut by_capability = self.by_capability.write().await;
        for cap in &capabilities {
            by_capability.entry(cap.clone()).or_default().insert(id);
        }

        info!(agent = %id, %owner, %stake, "agent registered");
        Ok(id)
    }

    /// Add stake to an agent (owner only)
    pub async fn add_stake(
        &self,
        caller: &AccountId,
        agent_id: &AgentId,
        amount: TokenAmount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(TaskMeshError::ZeroAmount);
        }

        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;
        Self::require_owner(caller, agent)?;

        let staked = agent.staked.checked_add(amount)?;
        self.assets.transfer_in(caller, amount).await?;

        agent.staked = staked;
        agent.updated_at = Utc::now();
        info!(agent = %agent_id, %amount, total = %staked, "stake added");
        Ok(())
    }

    /// Withdraw stake from an agent (owner only)
    ///
    /// An active agent may not drop below the minimum stake.
    pub async fn withdraw_stake(
        &self,
        caller: &AccountId,
        agent_id: &AgentId,
        amount: TokenAmount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(TaskMeshError::ZeroAmount);
        }

        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;
        Self::require_owner(caller, agent)?;

        if amount > agent.staked {
            return Err(TaskMeshError::InsufficientFunds {
                account: agent_id.to_string(),
                requested: amount.raw(),
                available: agent.staked.raw(),
            });
        }
        let remaining = agent.staked.checked_sub(amount)?;
        if agent.active && remaining < self.config.minimum_stake {
            return Err(TaskMeshError::StakeBelowMinimum {
                required: self.config.minimum_stake.raw(),
                provided: remaining.raw(),
            });
        }

        self.assets.transfer_out(caller, amount).await?;

        agent.staked = remaining;
        agent.updated_at = Utc::now();
        info!(agent = %agent_id, %amount, remaining = %remaining, "stake withdrawn");
        Ok(())
    }

    /// Deactivate an agent (owner only)
    pub async fn deactivate(&self, caller: &AccountId, agent_id: &AgentId) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;
        Self::require_owner(caller, agent)?;

        if !agent.active {
            return Err(TaskMeshError::AgentInactive {
                agent_id: agent_id.to_string(),
            });
        }
        agent.active = false;
        agent.updated_at = Utc::now();
        info!(agent = %agent_id, "agent deactivated");
        Ok(())
    }

    /// Reactivate an agent (owner only); requires stake at or above minimum
    pub async fn reactivate(&self, caller: &AccountId, agent_id: &AgentId) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;
        Self::require_owner(caller, agent)?;

        if agent.active {
            return Err(TaskMeshError::AgentAlreadyActive {
                agent_id: agent_id.to_string(),
            });
        }
        if !agent.covers_minimum(self.config.minimum_stake) {
            return Err(TaskMeshError::StakeBelowMinimum {
                required: self.config.minimum_stake.raw(),
                provided: agent.staked.raw(),
            });
        }
        agent.active = true;
        agent.updated_at = Utc::now();
        info!(agent = %agent_id, "agent reactivated");
        Ok(())
    }

    // ========================================================================
    // Settlement-gated mutations
    // ========================================================================

    /// Record a task outcome (authorized settlement callers only)
    ///
    /// Success moves reputation up by a fixed step; failure moves it down
    /// by a larger fixed step. Slashing is a separate operation - failure
    /// alone never touches stake.
    pub async fn record_outcome(
        &self,
        caller: &AccountId,
        agent_id: &AgentId,
        success: bool,
        earned: TokenAmount,
    ) -> Result<()> {
        self.require_authorized(caller).await?;

        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;

        if success {
            let total_earned = agent.total_earned.checked_add(earned)?;
            agent.completed_tasks += 1;
            agent.total_earned = total_earned;
            agent.reputation.record_success();
        } else {
            agent.failed_tasks += 1;
            agent.reputation.record_failure();
        }
        agent.updated_at = Utc::now();

        info!(
            agent = %agent_id,
            success,
            %earned,
            reputation = agent.reputation.value(),
            "outcome recorded"
        );
        Ok(())
    }

    /// Slash an agent's stake for provable misbehavior (authorized only)
    ///
    /// Cuts the configured fraction of current stake to the treasury,
    /// applies the reputation penalty, and deactivates the agent if the
    /// remaining stake no longer covers the minimum. Returns the amount
    /// slashed.
    pub async fn slash(
        &self,
        caller: &AccountId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<TokenAmount> {
        self.require_authorized(caller).await?;

        let mut agents = self.agents.write().await;
        let agent = Self::get_mut(&mut agents, agent_id)?;

        let penalty = agent.staked.basis_points(self.config.slash_bps)?;
        let remaining = agent.staked.checked_sub(penalty)?;

        if !penalty.is_zero() {
            self.assets.transfer_out(&self.config.treasury, penalty).await?;
        }

        agent.staked = remaining;
        agent.reputation.apply_slash_penalty();
        agent.updated_at = Utc::now();

        let deactivated = agent.active && !agent.covers_minimum(self.config.minimum_stake);
        if deactivated {
            agent.active = false;
        }

        warn!(
            agent = %agent_id,
            %penalty,
            remaining = %remaining,
            deactivated,
            reason,
            "agent slashed"
        );
        Ok(penalty)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch an agent record
    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| TaskMeshError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    /// Agents declaring a capability
    pub async fn agents_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.by_capability
            .read()
            .await
            .get(capability)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Agents registered by an owner
    pub async fn agents_by_owner(&self, owner: &AccountId) -> Vec<AgentId> {
        self.by_owner
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    fn get_mut<'a>(
        agents: &'a mut HashMap<AgentId, AgentRecord>,
        agent_id: &AgentId,
    ) -> Result<&'a mut AgentRecord> {
        agents
            .get_mut(agent_id)
            .ok_or_else(|| TaskMeshError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    fn require_owner(caller: &AccountId, agent: &AgentRecord) -> Result<()> {
        if *caller != agent.owner {
            return Err(TaskMeshError::NotAgentOwner {
                caller: caller.to_string(),
                agent_id: agent.id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_assets::InMemoryAssetLedger;
    use taskmesh_types::{ErrorCategory, REPUTATION_SCALE};

    struct Harness {
        assets: Arc<InMemoryAssetLedger>,
        ledger: TrustLedger,
        governance: AccountId,
        settlement: AccountId,
        owner: AccountId,
    }

    async fn harness(minimum_stake: u128) -> Harness {
        let assets = Arc::new(InMemoryAssetLedger::new());
        let governance = AccountId::random();
        let settlement = AccountId::random();
        let owner = AccountId::random();
        assets.set_balance(owner, TokenAmount::new(100_000)).await;

        let ledger = TrustLedger::new(
            TrustConfig::new(TokenAmount::new(minimum_stake), AccountId::random()),
            governance,
            assets.clone(),
        );
        ledger.authorize_caller(&governance, settlement).await.unwrap();

        Harness {
            assets,
            ledger,
            governance,
            settlement,
            owner,
        }
    }

    async fn register(h: &Harness, stake: u128) -> AgentId {
        h.ledger
            .register(
                &h.owner,
                "indexer",
                vec!["index".to_string(), "scrape".to_string()],
                TokenAmount::new(stake),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn registration_pulls_stake_and_initializes_reputation() {
        let h = harness(100).await;
        let id = register(&h, 500).await;

        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.staked, TokenAmount::new(500));
        assert_eq!(agent.reputation.value(), 5_000);
        assert!(agent.active);

        assert_eq!(h.assets.balance(&h.owner).await, TokenAmount::new(99_500));
        assert_eq!(h.assets.custody_balance().await, TokenAmount::new(500));
    }

    #[tokio::test]
    async fn registration_validates_inputs() {
        let h = harness(100).await;

        let err = h
            .ledger
            .register(&h.owner, "", vec!["index".into()], TokenAmount::new(500))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_NAME");

        let err = h
            .ledger
            .register(&h.owner, "indexer", vec![], TokenAmount::new(500))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_CAPABILITIES");

        let err = h
            .ledger
            .register(&h.owner, "indexer", vec!["index".into()], TokenAmount::new(50))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STAKE_BELOW_MINIMUM");
    }

    #[tokio::test]
    async fn capabilities_collapse_to_a_set() {
        let h = harness(100).await;
        let id = h
            .ledger
            .register(
                &h.owner,
                "indexer",
                vec!["index".into(), "index".into(), "index".into()],
                TokenAmount::new(500),
            )
            .await
            .unwrap();

        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.capabilities.len(), 1);
        assert_eq!(h.ledger.agents_by_capability("index").await, vec![id]);
    }

    #[tokio::test]
    async fn withdraw_guards_the_minimum_while_active() {
        let h = harness(100).await;
        let id = register(&h, 150).await;

        let err = h
            .ledger
            .withdraw_stake(&h.owner, &id, TokenAmount::new(100))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STAKE_BELOW_MINIMUM");

        // Fine once deactivated
        h.ledger.deactivate(&h.owner, &id).await.unwrap();
        h.ledger
            .withdraw_stake(&h.owner, &id, TokenAmount::new(100))
            .await
            .unwrap();
        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.staked, TokenAmount::new(50));
    }

    #[tokio::test]
    async fn stake_management_is_owner_only() {
        let h = harness(100).await;
        let id = register(&h, 500).await;
        let stranger = AccountId::random();

        let err = h
            .ledger
            .withdraw_stake(&stranger, &id, TokenAmount::new(10))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authorization);

        let err = h.ledger.deactivate(&stranger, &id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[tokio::test]
    async fn outcomes_require_the_allow_list() {
        let h = harness(100).await;
        let id = register(&h, 500).await;
        let stranger = AccountId::random();

        let err = h
            .ledger
            .record_outcome(&stranger, &id, true, TokenAmount::new(10))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_AUTHORIZED_CALLER");

        let err = h.ledger.slash(&stranger, &id, "fabricated output").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_AUTHORIZED_CALLER");

        // Revocation closes the gate again
        h.ledger.revoke_caller(&h.governance, &h.settlement).await.unwrap();
        let err = h
            .ledger
            .record_outcome(&h.settlement, &id, true, TokenAmount::new(10))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_AUTHORIZED_CALLER");
    }

    #[tokio::test]
    async fn allow_list_is_governance_only() {
        let h = harness(100).await;
        let stranger = AccountId::random();
        let err = h
            .ledger
            .authorize_caller(&stranger, AccountId::random())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_GOVERNANCE");
    }

    #[tokio::test]
    async fn outcome_recording_moves_reputation_by_fixed_steps() {
        let h = harness(100).await;
        let id = register(&h, 500).await;

        h.ledger
            .record_outcome(&h.settlement, &id, true, TokenAmount::new(40))
            .await
            .unwrap();
        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.reputation.value(), 5_100);
        assert_eq!(agent.completed_tasks, 1);
        assert_eq!(agent.total_earned, TokenAmount::new(40));

        h.ledger
            .record_outcome(&h.settlement, &id, false, TokenAmount::zero())
            .await
            .unwrap();
        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.reputation.value(), 4_900);
        assert_eq!(agent.failed_tasks, 1);
    }

    #[tokio::test]
    async fn reputation_stays_bounded_under_any_sequence() {
        let h = harness(100).await;
        let id = register(&h, 10_000).await;

        for _ in 0..80 {
            h.ledger
                .record_outcome(&h.settlement, &id, true, TokenAmount::new(1))
                .await
                .unwrap();
        }
        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.reputation.value(), REPUTATION_SCALE);

        for _ in 0..80 {
            h.ledger
                .record_outcome(&h.settlement, &id, false, TokenAmount::zero())
                .await
                .unwrap();
        }
        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.reputation.value(), 0);
    }

    #[tokio::test]
    async fn slash_cuts_stake_and_deactivates_at_the_floor() {
        // Stake exactly at the minimum, then a single 10% slash
        let h = harness(100).await;
        let id = register(&h, 100).await;

        let slashed = h
            .ledger
            .slash(&h.settlement, &id, "withheld output")
            .await
            .unwrap();
        assert_eq!(slashed, TokenAmount::new(10));

        let agent = h.ledger.get_agent(&id).await.unwrap();
        assert_eq!(agent.staked, TokenAmount::new(90));
        assert!(!agent.active);
        assert_eq!(agent.reputation.value(), 4_500);

        // Reactivation fails until the stake is restored
        let err = h.ledger.reactivate(&h.owner, &id).await.unwrap_err();
        assert_eq!(err.error_code(), "STAKE_BELOW_MINIMUM");

        h.ledger
            .add_stake(&h.owner, &id, TokenAmount::new(10))
            .await
            .unwrap();
        h.ledger.reactivate(&h.owner, &id).await.unwrap();
        assert!(h.ledger.get_agent(&id).await.unwrap().active);
    }

    #[tokio::test]
    async fn slash_pays_the_treasury() {
        let assets = Arc::new(InMemoryAssetLedger::new());
        let governance = AccountId::random();
        let settlement = AccountId::random();
        let owner = AccountId::random();
        let treasury = AccountId::random();
        assets.set_balance(owner, TokenAmount::new(1_000)).await;

        let ledger = TrustLedger::new(
            TrustConfig::new(TokenAmount::new(100), treasury),
            governance,
            assets.clone(),
        );
        ledger.authorize_caller(&governance, settlement).await.unwrap();

        let id = ledger
            .register(&owner, "indexer", vec!["index".into()], TokenAmount::new(1_000))
            .await
            .unwrap();
        ledger.slash(&settlement, &id, "double submission").await.unwrap();

        assert_eq!(assets.balance(&treasury).await, TokenAmount::new(100));
        assert_eq!(assets.custody_balance().await, TokenAmount::new(900));
    }

    #[tokio::test]
    async fn slash_ceiling_is_enforced_at_config_time() {
        let err = TrustConfig::new(TokenAmount::new(100), AccountId::random())
            .with_slash_bps(6_000)
            .unwrap_err();
        assert_eq!(err.error_code(), "SLASH_ABOVE_CEILING");

        assert!(TrustConfig::new(TokenAmount::new(100), AccountId::random())
            .with_slash_bps(5_000)
            .is_ok());
    }

    #[tokio::test]
    async fn owner_index_tracks_registrations() {
        let h = harness(100).await;
        let a = register(&h, 500).await;
        let b = h
            .ledger
            .register(&h.owner, "scraper", vec!["scrape".into()], TokenAmount::new(200))
            .await
            .unwrap();

        assert_eq!(h.ledger.agents_by_owner(&h.owner).await, vec![a, b]);
    }
}
