use crate::arena::{RewardAccount, RewardArena};
use crate::executor::{DistributionReport, Distributor};
use crate::penalty::PenaltyLedger;
use crate::schedule::{stream_state, ScheduleBook, TrancheState};
use crate::treasury::TreasuryClient;
use crate::venue::SwapVenue;
use dlp_ranking::{EpochLedger, RankingEngine};
use dlp_types::{
    apply_pct, AccountAddress, BlockNumber, ConfigStore, DlpError, DlpId, EpochId,
    ParticipantRegistry, Result, TokenAmount,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Aggregate reward figures for one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochRewardStats {
    pub epoch_id: EpochId,
    pub participants: usize,
    pub total_entitlement: TokenAmount,
    pub total_released: TokenAmount,
    pub total_converted: TokenAmount,
    pub total_penalty_withheld: TokenAmount,
    pub tranches_released: u64,
    pub completed: bool,
}

/// Facade over the full reward lifecycle: initialize an epoch's reward pool,
/// finalize the epoch into ranked reward accounts, stream tranches out, and
/// manage penalties.
///
/// State-changing entry points serialize on an internal lock; reads go
/// straight to the underlying stores.
pub struct RewardsEngine {
    ledger: Arc<EpochLedger>,
    ranking: Arc<RankingEngine>,
    config: Arc<ConfigStore>,
    schedules: Arc<ScheduleBook>,
    arena: Arc<RewardArena>,
    distributor: Distributor,
    penalties: PenaltyLedger,
    operators: Option<HashSet<AccountAddress>>,
    op_lock: Mutex<()>,
}

impl RewardsEngine {
    pub fn new(
        registry: Arc<dyn ParticipantRegistry>,
        treasury: Arc<dyn TreasuryClient>,
        venue: Arc<dyn SwapVenue>,
        config: Arc<ConfigStore>,
    ) -> Self {
        let ledger = Arc::new(EpochLedger::new());
        let ranking = Arc::new(RankingEngine::new(
            ledger.clone(),
            registry,
            config.clone(),
        ));
        Self::with_parts(ledger, ranking, treasury, venue, config)
    }

    /// Build around an existing ledger and ranking engine, for callers that
    /// hold their own (for example to gate ratings behind an oracle).
    pub fn with_parts(
        ledger: Arc<EpochLedger>,
        ranking: Arc<RankingEngine>,
        treasury: Arc<dyn TreasuryClient>,
        venue: Arc<dyn SwapVenue>,
        config: Arc<ConfigStore>,
    ) -> Self {
        let arena = Arc::new(RewardArena::new());
        Self {
            ledger,
            ranking,
            config,
            schedules: Arc::new(ScheduleBook::new()),
            distributor: Distributor::new(arena.clone(), venue, treasury.clone()),
            penalties: PenaltyLedger::new(arena.clone(), treasury),
            arena,
            operators: None,
            op_lock: Mutex::new(()),
        }
    }

    /// Restrict epoch lifecycle calls to the given operator accounts. Without
    /// this, lifecycle calls are open to any caller.
    pub fn with_operators(mut self, operators: impl IntoIterator<Item = AccountAddress>) -> Self {
        self.operators = Some(operators.into_iter().collect());
        self
    }

    pub fn ranking(&self) -> &Arc<RankingEngine> {
        &self.ranking
    }

    pub fn ledger(&self) -> &Arc<EpochLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    fn ensure_operator(&self, caller: AccountAddress) -> Result<()> {
        match &self.operators {
            Some(operators) if !operators.contains(&caller) => {
                Err(DlpError::NotAuthorized(caller))
            }
            _ => Ok(()),
        }
    }

    /// Bind the reward pool and a config snapshot to an epoch. Must happen
    /// before the epoch is finalized; the snapshot governs the whole epoch
    /// regardless of later config changes. Returns the snapshot's version.
    pub async fn initialize_epoch_rewards(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        reward_pool: TokenAmount,
    ) -> Result<u64> {
        self.ensure_operator(caller)?;
        let _guard = self.op_lock.lock().await;

        if self.ledger.is_finalized(epoch_id).await {
            return Err(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: "already finalized; rewards must be initialized first".to_string(),
            });
        }
        let snapshot = self.config.snapshot().await;
        let schedule = self
            .schedules
            .initialize(epoch_id, reward_pool, snapshot)
            .await?;
        Ok(schedule.config.version)
    }

    /// Freeze the epoch's ratings, rank participants under the epoch's config
    /// snapshot, and open one reward account per selected participant.
    ///
    /// If a previous call froze the ledger but failed before accounts were
    /// inserted, calling again resumes from the stored finalization block and
    /// ignores `block`.
    pub async fn finalize_epoch(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        block: BlockNumber,
    ) -> Result<Vec<RewardAccount>> {
        self.ensure_operator(caller)?;
        let _guard = self.op_lock.lock().await;

        let schedule = self
            .schedules
            .get(epoch_id)
            .await
            .ok_or(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: "rewards not initialized".to_string(),
            })?;

        let finalized_at = match self.ledger.finalized_block(epoch_id).await {
            Some(at) if self.arena.has_epoch(epoch_id).await => {
                return Err(DlpError::InvalidEpoch {
                    epoch: epoch_id,
                    reason: format!("already finalized at block {}", at),
                });
            }
            Some(at) => {
                info!(
                    epoch_id = epoch_id,
                    finalized_at = at,
                    "Resuming interrupted finalization"
                );
                at
            }
            None => {
                self.ledger.finalize(epoch_id, block).await?;
                block
            }
        };

        let cfg = &schedule.config;
        let ranked = self
            .ranking
            .rank_epoch_with(epoch_id, cfg.max_rewarded, &cfg.weights, &cfg.curve)
            .await?;
        let distributable = apply_pct(schedule.reward_pool, cfg.reward_percentage);

        let mut accounts: Vec<RewardAccount> = Vec::with_capacity(ranked.len());
        let mut assigned = TokenAmount::ZERO;
        for entry in &ranked {
            let entitlement = apply_pct(distributable, entry.share);
            assigned = assigned
                .checked_add(entitlement)
                .ok_or(DlpError::AmountOverflow("entitlement"))?;
            accounts.push(RewardAccount::new(
                epoch_id,
                entry.dlp_id,
                entry.rank,
                entry.score,
                entry.share,
                entitlement,
            ));
        }
        if let Some(first) = accounts.first_mut() {
            // Flooring dust from the share split lands on the top rank so the
            // distributable amount is assigned in full.
            let dust = distributable.saturating_sub(assigned);
            first.entitlement = first
                .entitlement
                .checked_add(dust)
                .ok_or(DlpError::AmountOverflow("entitlement"))?;
        } else {
            warn!(
                epoch_id = epoch_id,
                "🪹 Epoch finalized with no reward accounts"
            );
        }

        self.arena.insert_accounts(epoch_id, accounts.clone()).await?;
        info!(
            epoch_id = epoch_id,
            finalized_at = finalized_at,
            participants = accounts.len(),
            distributable = %distributable,
            config_version = cfg.version,
            "🏁 Epoch finalized"
        );
        Ok(accounts)
    }

    /// Release the next eligible tranche for each listed participant.
    pub async fn distribute_rewards(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        dlp_ids: &[DlpId],
        current_block: BlockNumber,
    ) -> Result<DistributionReport> {
        self.ensure_operator(caller)?;
        let finalized_at = self
            .ledger
            .finalized_block(epoch_id)
            .await
            .ok_or(DlpError::EpochNotFinalized(epoch_id))?;
        let schedule = self
            .schedules
            .get(epoch_id)
            .await
            .ok_or(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: "rewards not initialized".to_string(),
            })?;

        let _guard = self.op_lock.lock().await;
        Ok(self
            .distributor
            .distribute(&schedule, finalized_at, dlp_ids, current_block)
            .await)
    }

    /// Release the next eligible tranche for every reward account of the
    /// epoch, in rank order.
    pub async fn distribute_all(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        current_block: BlockNumber,
    ) -> Result<DistributionReport> {
        let ids: Vec<DlpId> = self
            .arena
            .epoch_accounts(epoch_id)
            .await
            .into_iter()
            .map(|a| a.dlp_id)
            .collect();
        self.distribute_rewards(caller, epoch_id, &ids, current_block)
            .await
    }

    /// Assign a penalty against a participant's remaining tranches. Admin
    /// only. Returns the new pending balance.
    pub async fn assign_penalty(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        dlp_id: DlpId,
        amount: TokenAmount,
    ) -> Result<TokenAmount> {
        self.config.ensure_admin(caller)?;
        let _guard = self.op_lock.lock().await;
        self.penalties.assign(epoch_id, dlp_id, amount).await
    }

    /// Pay a participant's withheld penalty balance to `recipient`. Admin
    /// only.
    pub async fn withdraw_penalty(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        dlp_id: DlpId,
        recipient: AccountAddress,
    ) -> Result<TokenAmount> {
        self.config.ensure_admin(caller)?;
        let _guard = self.op_lock.lock().await;
        self.penalties.withdraw(epoch_id, dlp_id, recipient).await
    }

    pub async fn reward_of(&self, epoch_id: EpochId, dlp_id: DlpId) -> Option<RewardAccount> {
        self.arena.get(epoch_id, dlp_id).await
    }

    pub async fn epoch_rewards(&self, epoch_id: EpochId) -> Vec<RewardAccount> {
        self.arena.epoch_accounts(epoch_id).await
    }

    /// Lifecycle state of a participant's tranche stream at `current_block`.
    pub async fn tranche_state(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        current_block: BlockNumber,
    ) -> TrancheState {
        let schedule = match self.schedules.get(epoch_id).await {
            Some(s) => s,
            None => return TrancheState::Uninitialized,
        };
        let finalized_at = match self.ledger.finalized_block(epoch_id).await {
            Some(at) => at,
            None => return TrancheState::Pending,
        };
        let account = match self.arena.get(epoch_id, dlp_id).await {
            Some(a) => a,
            None => return TrancheState::Uninitialized,
        };
        stream_state(
            schedule.params(),
            finalized_at,
            account.tranches_released,
            current_block,
        )
    }

    pub async fn epoch_stats(&self, epoch_id: EpochId) -> Option<EpochRewardStats> {
        let schedule = self.schedules.get(epoch_id).await?;
        let accounts = self.arena.epoch_accounts(epoch_id).await;

        let mut stats = EpochRewardStats {
            epoch_id,
            participants: accounts.len(),
            total_entitlement: TokenAmount::ZERO,
            total_released: TokenAmount::ZERO,
            total_converted: TokenAmount::ZERO,
            total_penalty_withheld: TokenAmount::ZERO,
            tranches_released: 0,
            completed: !accounts.is_empty(),
        };
        for account in &accounts {
            stats.total_entitlement = stats.total_entitlement.saturating_add(account.entitlement);
            stats.total_released = stats.total_released.saturating_add(account.released_total);
            stats.total_penalty_withheld = stats
                .total_penalty_withheld
                .saturating_add(account.penalty_withheld_total);
            stats.tranches_released += account.tranches_released;
            for tranche in &account.tranches {
                stats.total_converted = stats.total_converted.saturating_add(tranche.converted);
            }
            if account.tranches_released < schedule.params().tranche_count {
                stats.completed = false;
            }
        }
        Some(stats)
    }
}
