use crate::arena::RewardArena;
use crate::treasury::TreasuryClient;
use dlp_types::{AccountAddress, Asset, DlpError, DlpId, EpochId, Result, TokenAmount};
use std::sync::Arc;
use tracing::{info, warn};

/// Penalty flow over a reward account: assignments accrue as pending, tranche
/// release moves min(pending, gross) to withdrawable, and withdrawal pays the
/// withdrawable balance out through the treasury.
pub struct PenaltyLedger {
    arena: Arc<RewardArena>,
    treasury: Arc<dyn TreasuryClient>,
}

impl PenaltyLedger {
    pub fn new(arena: Arc<RewardArena>, treasury: Arc<dyn TreasuryClient>) -> Self {
        Self { arena, treasury }
    }

    /// Assign an additional penalty. Returns the new pending balance. The
    /// pending balance may exceed what future tranches can cover; the excess
    /// simply never converts to withdrawable.
    pub async fn assign(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        amount: TokenAmount,
    ) -> Result<TokenAmount> {
        if amount.is_zero() {
            return Err(DlpError::InvalidParameters(
                "penalty amount must be positive".to_string(),
            ));
        }
        let pending = self.arena.add_penalty(epoch_id, dlp_id, amount).await?;
        info!(
            epoch_id = epoch_id,
            dlp_id = dlp_id,
            amount = %amount,
            pending = %pending,
            "🚫 Penalty assigned"
        );
        Ok(pending)
    }

    /// Pay the withdrawable balance to `recipient`. The balance is zeroed
    /// before the transfer and restored if the transfer fails.
    pub async fn withdraw(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        recipient: AccountAddress,
    ) -> Result<TokenAmount> {
        let amount = self.arena.take_withdrawable(epoch_id, dlp_id).await?;
        if let Err(e) = self
            .treasury
            .transfer(recipient, Asset::Reward, amount)
            .await
        {
            self.arena
                .restore_withdrawable(epoch_id, dlp_id, amount)
                .await?;
            warn!(
                epoch_id = epoch_id,
                dlp_id = dlp_id,
                amount = %amount,
                error = %e,
                "↩️ Penalty withdrawal reverted, balance restored"
            );
            return Err(DlpError::Treasury(e.to_string()));
        }
        info!(
            epoch_id = epoch_id,
            dlp_id = dlp_id,
            amount = %amount,
            recipient = %recipient,
            "💸 Penalty withdrawn"
        );
        Ok(amount)
    }
}
