use chrono::{DateTime, Utc};
use dlp_types::{BlockNumber, DlpError, DlpId, EpochId, Pct, Result, TokenAmount};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// One executed tranche, append-only once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheRecord {
    pub tranche_index: u64,
    pub block: BlockNumber,
    /// Reward-asset amount released from the entitlement, pre-penalty.
    pub gross: TokenAmount,
    pub penalty_withheld: TokenAmount,
    /// Settlement-asset amount credited to the participant's treasury.
    pub converted: TokenAmount,
    /// Reward-asset spare the venue left unconsumed, carried to the next swap.
    pub spare_reward: TokenAmount,
    /// Settlement-asset residue carried to the next credit.
    pub spare_settlement: TokenAmount,
    /// Total settlement the venue delivered on this fill, residue included.
    pub settlement_used: TokenAmount,
    pub receipt_id: String,
    pub executed_at: DateTime<Utc>,
}

/// Reward state for one (epoch, participant), created at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardAccount {
    pub epoch_id: EpochId,
    pub dlp_id: DlpId,
    /// 1-based position in the epoch's selection.
    pub rank: u64,
    pub score: u128,
    pub share: Pct,
    /// Total reward-asset allocation across all tranches.
    pub entitlement: TokenAmount,
    pub tranches_released: u64,
    /// Sum of released tranche gross amounts.
    pub released_total: TokenAmount,
    /// Assigned penalty not yet withheld from a tranche.
    pub penalty_pending: TokenAmount,
    /// Withheld penalty awaiting withdrawal.
    pub penalty_withdrawable: TokenAmount,
    pub penalty_withheld_total: TokenAmount,
    pub penalty_withdrawn_total: TokenAmount,
    /// Unconverted reward carried into the next tranche's swap.
    pub spare_reward: TokenAmount,
    /// Settlement residue carried into the next credit.
    pub spare_settlement: TokenAmount,
    pub tranches: Vec<TrancheRecord>,
}

impl RewardAccount {
    pub fn new(
        epoch_id: EpochId,
        dlp_id: DlpId,
        rank: u64,
        score: u128,
        share: Pct,
        entitlement: TokenAmount,
    ) -> Self {
        Self {
            epoch_id,
            dlp_id,
            rank,
            score,
            share,
            entitlement,
            tranches_released: 0,
            released_total: TokenAmount::ZERO,
            penalty_pending: TokenAmount::ZERO,
            penalty_withdrawable: TokenAmount::ZERO,
            penalty_withheld_total: TokenAmount::ZERO,
            penalty_withdrawn_total: TokenAmount::ZERO,
            spare_reward: TokenAmount::ZERO,
            spare_settlement: TokenAmount::ZERO,
            tranches: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ArenaInner {
    accounts: Vec<RewardAccount>,
    index: HashMap<(EpochId, DlpId), usize>,
    /// Epochs whose finalization has inserted accounts, including empty
    /// selections.
    populated: HashSet<EpochId>,
}

/// Indexed arena of reward accounts: contiguous storage plus an
/// (epoch, dlp) -> slot map. Accounts are inserted once per finalization and
/// mutated only through the commit paths below.
pub struct RewardArena {
    inner: RwLock<ArenaInner>,
}

impl RewardArena {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ArenaInner::default()),
        }
    }

    /// Insert the accounts of a freshly finalized epoch and mark the epoch
    /// populated. Populating an epoch twice, or colliding on an
    /// (epoch, dlp) pair, is an invariant violation and inserts nothing.
    /// An empty account list still marks the epoch, so a selection of zero
    /// participants is final too.
    pub async fn insert_accounts(
        &self,
        epoch_id: EpochId,
        accounts: Vec<RewardAccount>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.populated.contains(&epoch_id) {
            return Err(DlpError::InvariantViolation(format!(
                "reward accounts for epoch {} already inserted",
                epoch_id
            )));
        }
        for account in &accounts {
            if inner
                .index
                .contains_key(&(account.epoch_id, account.dlp_id))
            {
                return Err(DlpError::InvariantViolation(format!(
                    "reward account for epoch {} dlp {} already exists",
                    account.epoch_id, account.dlp_id
                )));
            }
        }
        inner.populated.insert(epoch_id);
        for account in accounts {
            let slot = inner.accounts.len();
            inner.index.insert((account.epoch_id, account.dlp_id), slot);
            inner.accounts.push(account);
        }
        Ok(())
    }

    pub async fn get(&self, epoch_id: EpochId, dlp_id: DlpId) -> Option<RewardAccount> {
        let inner = self.inner.read().await;
        inner
            .index
            .get(&(epoch_id, dlp_id))
            .map(|&slot| inner.accounts[slot].clone())
    }

    /// All accounts of an epoch, in rank order.
    pub async fn epoch_accounts(&self, epoch_id: EpochId) -> Vec<RewardAccount> {
        self.inner
            .read()
            .await
            .accounts
            .iter()
            .filter(|a| a.epoch_id == epoch_id)
            .cloned()
            .collect()
    }

    /// Whether finalization has populated this epoch. True even when the
    /// selection was empty.
    pub async fn has_epoch(&self, epoch_id: EpochId) -> bool {
        self.inner.read().await.populated.contains(&epoch_id)
    }

    /// Commit one executed tranche. `expected_index` is the released counter
    /// observed when the tranche was computed; a moved counter aborts the
    /// commit.
    pub async fn commit_tranche(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        expected_index: u64,
        record: TrancheRecord,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = *inner
            .index
            .get(&(epoch_id, dlp_id))
            .ok_or(DlpError::NoEntitlement {
                epoch: epoch_id,
                dlp: dlp_id,
            })?;
        let account = &mut inner.accounts[slot];

        if account.tranches_released != expected_index {
            return Err(DlpError::InvariantViolation(format!(
                "tranche counter moved for epoch {} dlp {}: expected {}, found {}",
                epoch_id, dlp_id, expected_index, account.tranches_released
            )));
        }

        account.released_total = account
            .released_total
            .checked_add(record.gross)
            .ok_or(DlpError::AmountOverflow("released total"))?;
        account.penalty_pending = account
            .penalty_pending
            .checked_sub(record.penalty_withheld)
            .ok_or_else(|| {
                DlpError::InvariantViolation(format!(
                    "withheld penalty exceeds pending for epoch {} dlp {}",
                    epoch_id, dlp_id
                ))
            })?;
        account.penalty_withdrawable = account
            .penalty_withdrawable
            .checked_add(record.penalty_withheld)
            .ok_or(DlpError::AmountOverflow("penalty withdrawable"))?;
        account.penalty_withheld_total = account
            .penalty_withheld_total
            .saturating_add(record.penalty_withheld);
        account.spare_reward = record.spare_reward;
        account.spare_settlement = record.spare_settlement;
        account.tranches_released += 1;
        account.tranches.push(record);
        Ok(())
    }

    /// Add to the pending penalty. Returns the new pending balance.
    pub async fn add_penalty(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        amount: TokenAmount,
    ) -> Result<TokenAmount> {
        let mut inner = self.inner.write().await;
        let slot = *inner
            .index
            .get(&(epoch_id, dlp_id))
            .ok_or(DlpError::NoEntitlement {
                epoch: epoch_id,
                dlp: dlp_id,
            })?;
        let account = &mut inner.accounts[slot];
        account.penalty_pending = account
            .penalty_pending
            .checked_add(amount)
            .ok_or(DlpError::AmountOverflow("penalty pending"))?;
        Ok(account.penalty_pending)
    }

    /// Zero the withdrawable penalty balance and return what it held.
    pub async fn take_withdrawable(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
    ) -> Result<TokenAmount> {
        let mut inner = self.inner.write().await;
        let slot = *inner
            .index
            .get(&(epoch_id, dlp_id))
            .ok_or(DlpError::NoEntitlement {
                epoch: epoch_id,
                dlp: dlp_id,
            })?;
        let account = &mut inner.accounts[slot];
        if account.penalty_withdrawable.is_zero() {
            return Err(DlpError::NothingToWithdraw {
                epoch: epoch_id,
                dlp: dlp_id,
            });
        }
        let amount = account.penalty_withdrawable;
        account.penalty_withdrawable = TokenAmount::ZERO;
        account.penalty_withdrawn_total = account.penalty_withdrawn_total.saturating_add(amount);
        Ok(amount)
    }

    /// Undo a `take_withdrawable` whose external transfer failed.
    pub async fn restore_withdrawable(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        amount: TokenAmount,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = *inner
            .index
            .get(&(epoch_id, dlp_id))
            .ok_or(DlpError::NoEntitlement {
                epoch: epoch_id,
                dlp: dlp_id,
            })?;
        let account = &mut inner.accounts[slot];
        account.penalty_withdrawable = account
            .penalty_withdrawable
            .checked_add(amount)
            .ok_or(DlpError::AmountOverflow("penalty withdrawable"))?;
        account.penalty_withdrawn_total = account.penalty_withdrawn_total.saturating_sub(amount);
        Ok(())
    }
}

impl Default for RewardArena {
    fn default() -> Self {
        Self::new()
    }
}
