use crate::arena::{RewardArena, TrancheRecord};
use crate::schedule::{eligible_at, tranche_amount, EpochSchedule};
use crate::treasury::TreasuryClient;
use crate::venue::{SwapError, SwapFill, SwapVenue};
use chrono::Utc;
use dlp_types::{
    apply_pct, Asset, BlockNumber, DlpError, DlpId, EpochId, Result, TokenAmount, PCT_DENOMINATOR,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One tranche released in a batch. `credited` is false when the tranche was
/// committed but the downstream treasury credit failed; the committed state
/// stands and the credit is retried out of band.
#[derive(Debug, Clone)]
pub struct ReleasedTranche {
    pub dlp_id: DlpId,
    pub record: TrancheRecord,
    pub credited: bool,
}

#[derive(Debug)]
pub struct FailedTranche {
    pub dlp_id: DlpId,
    pub error: DlpError,
}

/// Outcome of one distribution batch. A failing participant never blocks the
/// rest of the batch.
#[derive(Debug)]
pub struct DistributionReport {
    pub epoch_id: EpochId,
    pub block: BlockNumber,
    pub released: Vec<ReleasedTranche>,
    pub failed: Vec<FailedTranche>,
}

impl DistributionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_gross(&self) -> TokenAmount {
        self.released
            .iter()
            .fold(TokenAmount::ZERO, |acc, t| acc.saturating_add(t.record.gross))
    }

    pub fn total_converted(&self) -> TokenAmount {
        self.released.iter().fold(TokenAmount::ZERO, |acc, t| {
            acc.saturating_add(t.record.converted)
        })
    }
}

/// Executes eligible tranches: withholds pending penalties, converts the
/// payable amount through the swap venue, commits the tranche, and credits
/// the participant's treasury with the settlement proceeds.
pub struct Distributor {
    arena: Arc<RewardArena>,
    venue: Arc<dyn SwapVenue>,
    treasury: Arc<dyn TreasuryClient>,
}

impl Distributor {
    pub fn new(
        arena: Arc<RewardArena>,
        venue: Arc<dyn SwapVenue>,
        treasury: Arc<dyn TreasuryClient>,
    ) -> Self {
        Self {
            arena,
            venue,
            treasury,
        }
    }

    /// Release the next tranche for each participant in `dlp_ids`. Failures
    /// are collected per participant, never propagated across the batch.
    pub async fn distribute(
        &self,
        schedule: &EpochSchedule,
        finalized_at: BlockNumber,
        dlp_ids: &[DlpId],
        current_block: BlockNumber,
    ) -> DistributionReport {
        let mut report = DistributionReport {
            epoch_id: schedule.epoch_id,
            block: current_block,
            released: Vec::new(),
            failed: Vec::new(),
        };

        for &dlp_id in dlp_ids {
            match self
                .release_one(schedule, finalized_at, dlp_id, current_block)
                .await
            {
                Ok((record, credited)) => {
                    info!(
                        epoch_id = schedule.epoch_id,
                        dlp_id = dlp_id,
                        tranche_index = record.tranche_index,
                        gross = %record.gross,
                        withheld = %record.penalty_withheld,
                        converted = %record.converted,
                        credited = credited,
                        receipt_id = %record.receipt_id,
                        "💰 Tranche released"
                    );
                    report.released.push(ReleasedTranche {
                        dlp_id,
                        record,
                        credited,
                    });
                }
                Err(error) => {
                    warn!(
                        epoch_id = schedule.epoch_id,
                        dlp_id = dlp_id,
                        error = %error,
                        kind = ?error.kind(),
                        "⚠️ Tranche not released"
                    );
                    report.failed.push(FailedTranche { dlp_id, error });
                }
            }
        }

        info!(
            epoch_id = schedule.epoch_id,
            block = current_block,
            released = report.released.len(),
            failed = report.failed.len(),
            total_gross = %report.total_gross(),
            total_converted = %report.total_converted(),
            "📦 Distribution batch complete"
        );
        report
    }

    async fn release_one(
        &self,
        schedule: &EpochSchedule,
        finalized_at: BlockNumber,
        dlp_id: DlpId,
        current_block: BlockNumber,
    ) -> Result<(TrancheRecord, bool)> {
        let epoch_id = schedule.epoch_id;
        let account = self
            .arena
            .get(epoch_id, dlp_id)
            .await
            .ok_or(DlpError::NoEntitlement {
                epoch: epoch_id,
                dlp: dlp_id,
            })?;

        let params = schedule.params();
        let released = account.tranches_released;
        if released >= params.tranche_count {
            return Err(DlpError::AlreadyComplete {
                epoch: epoch_id,
                dlp: dlp_id,
                total: params.tranche_count,
            });
        }

        let eligible = eligible_at(finalized_at, params, released);
        if current_block < eligible {
            return Err(DlpError::NotYetEligible {
                epoch: epoch_id,
                dlp: dlp_id,
                eligible_at: eligible,
                current: current_block,
            });
        }

        let index = released;
        let is_final = index + 1 == params.tranche_count;
        let gross = tranche_amount(account.entitlement, params.tranche_count, index);
        let withheld = account.penalty_pending.min(gross);
        let payable = gross.saturating_sub(withheld);

        let swap_input = payable
            .checked_add(account.spare_reward)
            .ok_or(DlpError::AmountOverflow("swap input"))?;
        let fill = if swap_input.is_zero() {
            SwapFill::EMPTY
        } else {
            self.convert(swap_input, schedule.config.max_slippage).await?
        };

        let mut converted = fill
            .amount_out
            .checked_add(account.spare_settlement)
            .ok_or(DlpError::AmountOverflow("tranche credit"))?;
        let carried_settlement = if is_final {
            converted = converted
                .checked_add(fill.spare_out)
                .ok_or(DlpError::AmountOverflow("tranche credit"))?;
            TokenAmount::ZERO
        } else {
            fill.spare_out
        };
        let settlement_used = fill
            .amount_out
            .checked_add(fill.spare_out)
            .ok_or(DlpError::AmountOverflow("settlement used"))?;

        let record = TrancheRecord {
            tranche_index: index,
            block: current_block,
            gross,
            penalty_withheld: withheld,
            converted,
            spare_reward: fill.spare_in,
            spare_settlement: carried_settlement,
            settlement_used,
            receipt_id: receipt_id(epoch_id, dlp_id, index, gross, current_block),
            executed_at: Utc::now(),
        };
        self.arena
            .commit_tranche(epoch_id, dlp_id, index, record.clone())
            .await?;

        let mut credited = true;
        if !converted.is_zero() {
            if let Err(e) = self
                .treasury
                .credit(dlp_id, Asset::Settlement, converted)
                .await
            {
                credited = false;
                error!(
                    epoch_id = epoch_id,
                    dlp_id = dlp_id,
                    tranche_index = index,
                    amount = %converted,
                    error = %e,
                    "💥 Treasury credit failed after tranche commit"
                );
            }
        }
        Ok((record, credited))
    }

    /// Quote, derive the slippage floor, and execute the swap. The fill must
    /// conserve the input across consumed and spare parts.
    async fn convert(&self, amount_in: TokenAmount, max_slippage: u64) -> Result<SwapFill> {
        let expected = self
            .venue
            .quote(Asset::Reward, Asset::Settlement, amount_in)
            .await
            .map_err(|e| DlpError::Swap(e.to_string()))?;
        let minimum = apply_pct(expected, PCT_DENOMINATOR - max_slippage);

        let fill = self
            .venue
            .convert(Asset::Reward, Asset::Settlement, amount_in, minimum)
            .await
            .map_err(|e| match e {
                SwapError::BelowMinimumOut { minimum, actual } => DlpError::SlippageExceeded {
                    expected,
                    minimum,
                    actual,
                },
                SwapError::Venue(msg) => DlpError::Swap(msg),
            })?;

        if fill.amount_out < minimum {
            return Err(DlpError::SlippageExceeded {
                expected,
                minimum,
                actual: fill.amount_out,
            });
        }
        if fill.amount_in_used.checked_add(fill.spare_in) != Some(amount_in) {
            return Err(DlpError::InvariantViolation(format!(
                "venue fill does not conserve input: used {} + spare {} != {}",
                fill.amount_in_used, fill.spare_in, amount_in
            )));
        }
        Ok(fill)
    }
}

/// Deterministic tranche receipt id: 128-bit hash of the release coordinates.
fn receipt_id(
    epoch_id: EpochId,
    dlp_id: DlpId,
    index: u64,
    gross: TokenAmount,
    block: BlockNumber,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dlp-reward-tranche-v1");
    hasher.update(&epoch_id.to_le_bytes());
    hasher.update(&dlp_id.to_le_bytes());
    hasher.update(&index.to_le_bytes());
    hasher.update(&gross.to_base_units().to_le_bytes());
    hasher.update(&block.to_le_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::RewardAccount;
    use crate::treasury::MemoryTreasury;
    use crate::venue::FixedRateVenue;
    use async_trait::async_trait;
    use dlp_types::ProtocolConfig;

    fn schedule(epoch_id: EpochId) -> EpochSchedule {
        EpochSchedule {
            epoch_id,
            reward_pool: TokenAmount::from_base_units(2_500),
            config: Arc::new(ProtocolConfig::default()),
            initialized_at: Utc::now(),
        }
    }

    async fn seeded_arena(entitlement: u64) -> Arc<RewardArena> {
        let arena = Arc::new(RewardArena::new());
        arena
            .insert_accounts(1, vec![RewardAccount::new(
                1,
                7,
                1,
                10,
                100_000,
                TokenAmount::from_base_units(entitlement),
            )])
            .await
            .unwrap();
        arena
    }

    #[tokio::test]
    async fn test_release_converts_and_credits() {
        let arena = seeded_arena(1_000).await;
        let venue = Arc::new(FixedRateVenue::pegged());
        let treasury = Arc::new(MemoryTreasury::new());
        let distributor = Distributor::new(arena.clone(), venue, treasury.clone());

        let report = distributor.distribute(&schedule(1), 1_000, &[7], 1_050).await;
        assert!(report.is_clean());
        assert_eq!(report.released.len(), 1);

        let released = &report.released[0];
        assert!(released.credited);
        assert_eq!(released.record.tranche_index, 0);
        assert_eq!(released.record.gross.to_base_units(), 250);
        assert_eq!(released.record.converted.to_base_units(), 250);
        assert_eq!(released.record.receipt_id.len(), 32);
        assert_eq!(
            treasury.balance_of(7, Asset::Settlement).await.to_base_units(),
            250
        );

        let account = arena.get(1, 7).await.unwrap();
        assert_eq!(account.tranches_released, 1);
        assert_eq!(account.released_total.to_base_units(), 250);
    }

    #[tokio::test]
    async fn test_premature_release_is_rejected() {
        let arena = seeded_arena(1_000).await;
        let venue = Arc::new(FixedRateVenue::pegged());
        let treasury = Arc::new(MemoryTreasury::new());
        let distributor = Distributor::new(arena.clone(), venue, treasury);

        // Remediation window runs to block 1050.
        let report = distributor.distribute(&schedule(1), 1_000, &[7], 1_049).await;
        assert!(report.released.is_empty());
        assert!(matches!(
            report.failed[0].error,
            DlpError::NotYetEligible {
                eligible_at: 1_050,
                current: 1_049,
                ..
            }
        ));
        assert_eq!(arena.get(1, 7).await.unwrap().tranches_released, 0);
    }

    #[tokio::test]
    async fn test_fully_withheld_tranche_skips_the_venue() {
        let arena = seeded_arena(1_000).await;
        let venue = Arc::new(FixedRateVenue::pegged());
        let treasury = Arc::new(MemoryTreasury::new());
        // A primed failure would surface if the venue were touched.
        venue.fail_next(SwapError::Venue("must not be called".into())).await;
        arena
            .add_penalty(1, 7, TokenAmount::from_base_units(400))
            .await
            .unwrap();
        let distributor = Distributor::new(arena.clone(), venue.clone(), treasury.clone());

        let report = distributor.distribute(&schedule(1), 1_000, &[7], 1_050).await;
        assert!(report.is_clean());
        let record = &report.released[0].record;
        assert_eq!(record.penalty_withheld.to_base_units(), 250);
        assert_eq!(record.converted, TokenAmount::ZERO);
        assert_eq!(treasury.balance_of(7, Asset::Settlement).await, TokenAmount::ZERO);

        let account = arena.get(1, 7).await.unwrap();
        assert_eq!(account.penalty_pending.to_base_units(), 150);
        assert_eq!(account.penalty_withdrawable.to_base_units(), 250);

        // The primed failure was never consumed.
        assert!(venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1),
                TokenAmount::ZERO,
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_credit_failure_keeps_committed_state() {
        let arena = seeded_arena(1_000).await;
        let venue = Arc::new(FixedRateVenue::pegged());
        let treasury = Arc::new(MemoryTreasury::new());
        treasury.fail_next("ledger offline").await;
        let distributor = Distributor::new(arena.clone(), venue, treasury.clone());

        let report = distributor.distribute(&schedule(1), 1_000, &[7], 1_050).await;
        assert!(report.is_clean());
        assert!(!report.released[0].credited);
        assert_eq!(treasury.balance_of(7, Asset::Settlement).await, TokenAmount::ZERO);

        // The tranche itself is committed; only the credit is outstanding.
        let account = arena.get(1, 7).await.unwrap();
        assert_eq!(account.tranches_released, 1);
        assert_eq!(account.released_total.to_base_units(), 250);
    }

    #[tokio::test]
    async fn test_nonconserving_fill_is_an_invariant_violation() {
        struct LeakyVenue;

        #[async_trait]
        impl SwapVenue for LeakyVenue {
            async fn quote(
                &self,
                _from: Asset,
                _to: Asset,
                amount_in: TokenAmount,
            ) -> crate::venue::SwapResult<TokenAmount> {
                Ok(amount_in)
            }

            async fn convert(
                &self,
                _from: Asset,
                _to: Asset,
                amount_in: TokenAmount,
                _min_amount_out: TokenAmount,
            ) -> crate::venue::SwapResult<SwapFill> {
                // Drops one base unit of input on the floor.
                Ok(SwapFill {
                    amount_out: amount_in,
                    amount_in_used: amount_in.saturating_sub(TokenAmount::from_base_units(1)),
                    spare_in: TokenAmount::ZERO,
                    spare_out: TokenAmount::ZERO,
                })
            }
        }

        let arena = seeded_arena(1_000).await;
        let treasury = Arc::new(MemoryTreasury::new());
        let distributor = Distributor::new(arena.clone(), Arc::new(LeakyVenue), treasury);

        let report = distributor.distribute(&schedule(1), 1_000, &[7], 1_050).await;
        assert!(matches!(
            report.failed[0].error,
            DlpError::InvariantViolation(_)
        ));
        assert_eq!(arena.get(1, 7).await.unwrap().tranches_released, 0);
    }

    #[tokio::test]
    async fn test_receipt_ids_are_stable_and_distinct() {
        let a = receipt_id(1, 7, 0, TokenAmount::from_base_units(250), 1_050);
        let b = receipt_id(1, 7, 0, TokenAmount::from_base_units(250), 1_050);
        let c = receipt_id(1, 7, 1, TokenAmount::from_base_units(250), 1_150);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
