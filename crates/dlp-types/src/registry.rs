use crate::types::{AccountAddress, DlpId, TokenAmount};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// External view of the participant set. Registration, staking and identity
/// live in the embedding environment; the engine only reads.
#[async_trait]
pub trait ParticipantRegistry: Send + Sync {
    async fn exists(&self, dlp_id: DlpId) -> Result<bool>;

    async fn owner_of(&self, dlp_id: DlpId) -> Result<AccountAddress>;

    async fn treasury_of(&self, dlp_id: DlpId) -> Result<AccountAddress>;

    /// Base stake backing the participant, before per-epoch adjustments.
    async fn stake_of(&self, dlp_id: DlpId) -> Result<TokenAmount>;

    /// All currently registered participant ids.
    async fn registered_ids(&self) -> Result<Vec<DlpId>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub dlp_id: DlpId,
    pub owner: AccountAddress,
    pub treasury: AccountAddress,
    pub stake: TokenAmount,
}

/// In-memory registry for tests and embedders without an external identity
/// source.
pub struct MemoryRegistry {
    entries: Arc<RwLock<HashMap<DlpId, RegistryEntry>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a participant with addresses derived from its id.
    pub async fn register(&self, dlp_id: DlpId, stake: TokenAmount) -> RegistryEntry {
        let entry = RegistryEntry {
            dlp_id,
            owner: derived_address(dlp_id, 0x01),
            treasury: derived_address(dlp_id, 0x02),
            stake,
        };
        self.entries.write().await.insert(dlp_id, entry.clone());
        entry
    }

    pub async fn register_entry(&self, entry: RegistryEntry) {
        self.entries.write().await.insert(entry.dlp_id, entry);
    }

    pub async fn set_stake(&self, dlp_id: DlpId, stake: TokenAmount) {
        if let Some(entry) = self.entries.write().await.get_mut(&dlp_id) {
            entry.stake = stake;
        }
    }

    pub async fn deregister(&self, dlp_id: DlpId) -> Option<RegistryEntry> {
        self.entries.write().await.remove(&dlp_id)
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn derived_address(dlp_id: DlpId, tag: u8) -> AccountAddress {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[24..].copy_from_slice(&dlp_id.to_be_bytes());
    AccountAddress::from_bytes(bytes)
}

#[async_trait]
impl ParticipantRegistry for MemoryRegistry {
    async fn exists(&self, dlp_id: DlpId) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(&dlp_id))
    }

    async fn owner_of(&self, dlp_id: DlpId) -> Result<AccountAddress> {
        match self.entries.read().await.get(&dlp_id) {
            Some(entry) => Ok(entry.owner),
            None => bail!("dlp {} not registered", dlp_id),
        }
    }

    async fn treasury_of(&self, dlp_id: DlpId) -> Result<AccountAddress> {
        match self.entries.read().await.get(&dlp_id) {
            Some(entry) => Ok(entry.treasury),
            None => bail!("dlp {} not registered", dlp_id),
        }
    }

    async fn stake_of(&self, dlp_id: DlpId) -> Result<TokenAmount> {
        match self.entries.read().await.get(&dlp_id) {
            Some(entry) => Ok(entry.stake),
            None => bail!("dlp {} not registered", dlp_id),
        }
    }

    async fn registered_ids(&self) -> Result<Vec<DlpId>> {
        let mut ids: Vec<DlpId> = self.entries.read().await.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
