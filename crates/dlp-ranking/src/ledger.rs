use chrono::{DateTime, Utc};
use dlp_types::{BlockNumber, DlpError, DlpId, EpochId, Result, TokenAmount};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Signed change to a participant's effective stake for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeDelta {
    Increase(TokenAmount),
    Decrease(TokenAmount),
}

impl StakeDelta {
    pub fn as_signed(&self) -> i128 {
        match self {
            StakeDelta::Increase(amount) => amount.to_base_units() as i128,
            StakeDelta::Decrease(amount) => -(amount.to_base_units() as i128),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRating {
    /// Raw oracle performance rating.
    pub performance: u64,
    /// Cumulative signed stake adjustment in base units.
    pub stake_adjustment: i128,
    pub updated_at: DateTime<Utc>,
}

/// Read-only epoch summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochView {
    pub epoch_id: EpochId,
    pub finalized_at: Option<BlockNumber>,
    pub total_performance: u128,
    pub participant_count: usize,
}

#[derive(Debug, Default)]
struct EpochEntry {
    finalized_at: Option<BlockNumber>,
    total_performance: u128,
    ratings: HashMap<DlpId, ParticipantRating>,
}

/// Per-epoch rating state. An epoch entry appears on first write; once
/// finalized, every mutation is rejected with `InvalidEpoch`.
pub struct EpochLedger {
    epochs: Arc<RwLock<HashMap<EpochId, EpochEntry>>>,
}

impl EpochLedger {
    pub fn new() -> Self {
        Self {
            epochs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record (or overwrite) a participant's performance rating, keeping the
    /// epoch's running total in step.
    pub async fn record_performance(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        performance: u64,
    ) -> Result<()> {
        let mut epochs = self.epochs.write().await;
        let entry = epochs.entry(epoch_id).or_default();
        if entry.finalized_at.is_some() {
            return Err(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: "epoch is finalized".to_string(),
            });
        }

        let (previous, adjustment) = entry
            .ratings
            .get(&dlp_id)
            .map(|r| (r.performance, r.stake_adjustment))
            .unwrap_or((0, 0));
        entry.total_performance =
            entry.total_performance - previous as u128 + performance as u128;
        entry.ratings.insert(
            dlp_id,
            ParticipantRating {
                performance,
                stake_adjustment: adjustment,
                updated_at: Utc::now(),
            },
        );

        debug!(
            epoch = epoch_id,
            dlp = dlp_id,
            performance = performance,
            total = %entry.total_performance,
            "📊 Performance rating recorded"
        );
        Ok(())
    }

    /// Apply a signed stake delta. `base` is the registry stake the delta is
    /// validated against; the resulting effective stake must stay in
    /// `0..=u64::MAX`. Returns the new effective stake.
    pub async fn adjust_stake(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
        base: TokenAmount,
        delta: StakeDelta,
    ) -> Result<TokenAmount> {
        let mut epochs = self.epochs.write().await;
        let entry = epochs.entry(epoch_id).or_default();
        if entry.finalized_at.is_some() {
            return Err(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: "epoch is finalized".to_string(),
            });
        }

        let (performance, current) = entry
            .ratings
            .get(&dlp_id)
            .map(|r| (r.performance, r.stake_adjustment))
            .unwrap_or((0, 0));
        let adjustment = current
            .checked_add(delta.as_signed())
            .ok_or(DlpError::AmountOverflow("stake adjustment"))?;
        let effective = base.to_base_units() as i128 + adjustment;
        if effective < 0 {
            return Err(DlpError::Underflow {
                epoch: epoch_id,
                dlp: dlp_id,
                base,
                adjustment,
            });
        }
        if effective > u64::MAX as i128 {
            return Err(DlpError::AmountOverflow("effective stake"));
        }

        entry.ratings.insert(
            dlp_id,
            ParticipantRating {
                performance,
                stake_adjustment: adjustment,
                updated_at: Utc::now(),
            },
        );

        debug!(
            epoch = epoch_id,
            dlp = dlp_id,
            adjustment = adjustment,
            effective = effective as u64,
            "⚖️ Stake adjustment applied"
        );
        Ok(TokenAmount::from_base_units(effective as u64))
    }

    /// Freeze the epoch at `block`. All later writes fail with `InvalidEpoch`.
    pub async fn finalize(&self, epoch_id: EpochId, block: BlockNumber) -> Result<EpochView> {
        let mut epochs = self.epochs.write().await;
        let entry = epochs.entry(epoch_id).or_default();
        if let Some(at) = entry.finalized_at {
            return Err(DlpError::InvalidEpoch {
                epoch: epoch_id,
                reason: format!("already finalized at block {}", at),
            });
        }
        entry.finalized_at = Some(block);

        info!(
            epoch = epoch_id,
            block = block,
            participants = entry.ratings.len(),
            "🧊 Epoch ratings frozen"
        );
        Ok(EpochView {
            epoch_id,
            finalized_at: Some(block),
            total_performance: entry.total_performance,
            participant_count: entry.ratings.len(),
        })
    }

    pub async fn is_finalized(&self, epoch_id: EpochId) -> bool {
        self.epochs
            .read()
            .await
            .get(&epoch_id)
            .map(|e| e.finalized_at.is_some())
            .unwrap_or(false)
    }

    pub async fn finalized_block(&self, epoch_id: EpochId) -> Option<BlockNumber> {
        self.epochs
            .read()
            .await
            .get(&epoch_id)
            .and_then(|e| e.finalized_at)
    }

    pub async fn rating_of(&self, epoch_id: EpochId, dlp_id: DlpId) -> Option<ParticipantRating> {
        self.epochs
            .read()
            .await
            .get(&epoch_id)
            .and_then(|e| e.ratings.get(&dlp_id).cloned())
    }

    /// Atomic snapshot of an epoch's ratings and total performance.
    pub async fn epoch_ratings(
        &self,
        epoch_id: EpochId,
    ) -> (HashMap<DlpId, ParticipantRating>, u128) {
        match self.epochs.read().await.get(&epoch_id) {
            Some(entry) => (entry.ratings.clone(), entry.total_performance),
            None => (HashMap::new(), 0),
        }
    }

    pub async fn epoch_view(&self, epoch_id: EpochId) -> Option<EpochView> {
        self.epochs.read().await.get(&epoch_id).map(|entry| EpochView {
            epoch_id,
            finalized_at: entry.finalized_at,
            total_performance: entry.total_performance,
            participant_count: entry.ratings.len(),
        })
    }
}

impl Default for EpochLedger {
    fn default() -> Self {
        Self::new()
    }
}
