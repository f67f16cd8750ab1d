use anyhow::{bail, Result};
use async_trait::async_trait;
use dlp_types::{AccountAddress, Asset, DlpId, TokenAmount};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Downstream treasury the engine credits converted rewards to and pays
/// penalty withdrawals from.
#[async_trait]
pub trait TreasuryClient: Send + Sync {
    /// Credit `amount` of `asset` to the participant's treasury.
    async fn credit(&self, dlp_id: DlpId, asset: Asset, amount: TokenAmount) -> Result<()>;

    /// Transfer `amount` of `asset` to an external account.
    async fn transfer(&self, to: AccountAddress, asset: Asset, amount: TokenAmount) -> Result<()>;
}

/// In-memory treasury used by tests and local runs.
pub struct MemoryTreasury {
    participant: RwLock<HashMap<(DlpId, Asset), TokenAmount>>,
    external: RwLock<HashMap<(AccountAddress, Asset), TokenAmount>>,
    fail_next: RwLock<Option<String>>,
}

impl MemoryTreasury {
    pub fn new() -> Self {
        Self {
            participant: RwLock::new(HashMap::new()),
            external: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(None),
        }
    }

    pub async fn balance_of(&self, dlp_id: DlpId, asset: Asset) -> TokenAmount {
        self.participant
            .read()
            .await
            .get(&(dlp_id, asset))
            .copied()
            .unwrap_or(TokenAmount::ZERO)
    }

    pub async fn external_balance(&self, account: AccountAddress, asset: Asset) -> TokenAmount {
        self.external
            .read()
            .await
            .get(&(account, asset))
            .copied()
            .unwrap_or(TokenAmount::ZERO)
    }

    /// Make the next credit or transfer fail with `reason`.
    pub async fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.write().await = Some(reason.into());
    }

    async fn take_failure(&self) -> Option<String> {
        self.fail_next.write().await.take()
    }
}

impl Default for MemoryTreasury {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TreasuryClient for MemoryTreasury {
    async fn credit(&self, dlp_id: DlpId, asset: Asset, amount: TokenAmount) -> Result<()> {
        if let Some(reason) = self.take_failure().await {
            bail!("treasury credit rejected: {}", reason);
        }
        let mut balances = self.participant.write().await;
        let balance = balances.entry((dlp_id, asset)).or_insert(TokenAmount::ZERO);
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    async fn transfer(&self, to: AccountAddress, asset: Asset, amount: TokenAmount) -> Result<()> {
        if let Some(reason) = self.take_failure().await {
            bail!("treasury transfer rejected: {}", reason);
        }
        let mut balances = self.external.write().await;
        let balance = balances.entry((to, asset)).or_insert(TokenAmount::ZERO);
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}
