//! TaskMesh Assets - the external asset ledger port
//!
//! The settlement engine and trust ledger never hold funds themselves;
//! they instruct an asset ledger to pull escrow and stake into custody
//! and to push payouts, refunds and slashes back out. The ledger is an
//! external collaborator - only its interface is owned here, plus an
//! in-memory implementation for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;

use taskmesh_types::{AccountId, Result, TaskMeshError, TokenAmount};
use tokio::sync::RwLock;
use tracing::debug;

/// Atomic fungible-asset transfers between accounts and custody
#[async_trait::async_trait]
pub trait AssetLedger: Send + Sync {
    /// Pull `amount` from `from` into custody
    async fn transfer_in(&self, from: &AccountId, amount: TokenAmount) -> Result<()>;

    /// Push `amount` out of custody to `to`
    async fn transfer_out(&self, to: &AccountId, amount: TokenAmount) -> Result<()>;

    /// Current balance of an account
    async fn balance(&self, account: &AccountId) -> TokenAmount;
}

/// In-memory asset ledger
///
/// Tracks per-account balances plus an explicit custody balance, so escrow
/// conservation (custody = Σ live escrow + Σ stake) is observable in tests.
pub struct InMemoryAssetLedger {
    balances: Arc<RwLock<HashMap<AccountId, TokenAmount>>>,
    custody: Arc<RwLock<TokenAmount>>,
}

impl InMemoryAssetLedger {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            custody: Arc::new(RwLock::new(TokenAmount::zero())),
        }
    }

    /// Seed an account balance
    pub async fn set_balance(&self, account: AccountId, balance: TokenAmount) {
        self.balances.write().await.insert(account, balance);
    }

    /// Total funds currently held in custody
    pub async fn custody_balance(&self) -> TokenAmount {
        *self.custody.read().await
    }
}

impl Default for InMemoryAssetLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AssetLedger for InMemoryAssetLedger {
    async fn transfer_in(&self, from: &AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().await;
        let mut custody = self.custody.write().await;

        let available = balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Err(TaskMeshError::InsufficientFunds {
                account: from.to_string(),
                requested: amount.raw(),
                available: available.raw(),
            });
        }

        let remaining = available.checked_sub(amount)?;
        let held = custody.checked_add(amount)?;
        balances.insert(*from, remaining);
        *custody = held;

        debug!(%from, %amount, "pulled into custody");
        Ok(())
    }

    async fn transfer_out(&self, to: &AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().await;
        let mut custody = self.custody.write().await;

        if *custody < amount {
            return Err(TaskMeshError::InsufficientFunds {
                account: "custody".to_string(),
                requested: amount.raw(),
                available: custody.raw(),
            });
        }

        let held = custody.checked_sub(amount)?;
        let credited = balances
            .get(to)
            .copied()
            .unwrap_or_default()
            .checked_add(amount)?;
        *custody = held;
        balances.insert(*to, credited);

        debug!(%to, %amount, "pushed out of custody");
        Ok(())
    }

    async fn balance(&self, account: &AccountId) -> TokenAmount {
        self.balances
            .read()
            .await
            .get(account)
            .copied()
            .unwrap_or_default()
    }
}
