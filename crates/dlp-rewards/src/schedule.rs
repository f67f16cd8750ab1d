use chrono::{DateTime, Utc};
use dlp_types::{
    BlockNumber, DlpError, EpochId, ProtocolConfig, Result, ScheduleParams, TokenAmount,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Lifecycle of one participant's tranche stream within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrancheState {
    /// No schedule bound, or the participant has no reward account.
    Uninitialized,
    /// Scheduled; the next tranche is not yet block-eligible.
    Pending,
    /// The next tranche is releasable at the current block.
    Eligible,
    /// Every tranche has been released.
    Complete,
}

impl TrancheState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrancheState::Complete)
    }

    pub fn can_transition_to(&self, next: &TrancheState) -> bool {
        use TrancheState::*;
        matches!(
            (self, next),
            (Uninitialized, Pending)
                | (Pending, Eligible)
                | (Eligible, Pending)
                | (Eligible, Complete)
        )
    }
}

/// Gross amount of tranche `index` (0-based): the entitlement divided evenly,
/// with the division remainder folded into the final tranche so the tranches
/// always sum exactly to the entitlement.
pub fn tranche_amount(entitlement: TokenAmount, tranche_count: u64, index: u64) -> TokenAmount {
    debug_assert!(tranche_count > 0 && index < tranche_count);
    let units = entitlement.to_base_units();
    let base = units / tranche_count;
    if index + 1 == tranche_count {
        TokenAmount::from_base_units(units - base * (tranche_count - 1))
    } else {
        TokenAmount::from_base_units(base)
    }
}

/// Block at which the tranche following `released` completed ones becomes
/// eligible. Saturates at `u64::MAX` instead of wrapping, so an overflowing
/// schedule stays pending forever.
pub fn eligible_at(
    finalized_at: BlockNumber,
    params: &ScheduleParams,
    released: u64,
) -> BlockNumber {
    finalized_at
        .saturating_add(params.remediation_window)
        .saturating_add(released.saturating_mul(params.tranche_interval))
}

/// State of a tranche stream given its progress and the current block.
pub fn stream_state(
    params: &ScheduleParams,
    finalized_at: BlockNumber,
    released: u64,
    current_block: BlockNumber,
) -> TrancheState {
    if released >= params.tranche_count {
        TrancheState::Complete
    } else if current_block >= eligible_at(finalized_at, params, released) {
        TrancheState::Eligible
    } else {
        TrancheState::Pending
    }
}

/// Schedule bound to one epoch at reward initialization. The configuration
/// snapshot is immutable for the epoch's lifetime; later config changes only
/// affect later epochs.
#[derive(Debug, Clone)]
pub struct EpochSchedule {
    pub epoch_id: EpochId,
    pub reward_pool: TokenAmount,
    pub config: Arc<ProtocolConfig>,
    pub initialized_at: DateTime<Utc>,
}

impl EpochSchedule {
    pub fn params(&self) -> &ScheduleParams {
        &self.config.schedule
    }
}

/// Per-epoch schedule registry. An epoch's schedule is bound exactly once.
pub struct ScheduleBook {
    inner: RwLock<HashMap<EpochId, EpochSchedule>>,
}

impl ScheduleBook {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn initialize(
        &self,
        epoch_id: EpochId,
        reward_pool: TokenAmount,
        config: Arc<ProtocolConfig>,
    ) -> Result<EpochSchedule> {
        config.validate()?;
        if reward_pool.is_zero() {
            return Err(DlpError::InvalidParameters(
                "reward pool must be positive".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;
        if inner.contains_key(&epoch_id) {
            return Err(DlpError::AlreadyInitialized(epoch_id));
        }
        let schedule = EpochSchedule {
            epoch_id,
            reward_pool,
            config,
            initialized_at: Utc::now(),
        };
        inner.insert(epoch_id, schedule.clone());
        drop(inner);

        info!(
            epoch = epoch_id,
            pool = %schedule.reward_pool,
            tranches = schedule.params().tranche_count,
            config_version = schedule.config.version,
            "🗓️ Epoch reward schedule initialized"
        );
        Ok(schedule)
    }

    pub async fn get(&self, epoch_id: EpochId) -> Option<EpochSchedule> {
        self.inner.read().await.get(&epoch_id).cloned()
    }

    pub async fn is_initialized(&self, epoch_id: EpochId) -> bool {
        self.inner.read().await.contains_key(&epoch_id)
    }
}

impl Default for ScheduleBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlp_types::ProtocolConfig;

    fn params() -> ScheduleParams {
        ScheduleParams {
            tranche_count: 4,
            tranche_interval: 100,
            remediation_window: 50,
        }
    }

    #[test]
    fn test_tranche_amounts_divide_evenly() {
        let entitlement = TokenAmount::from_base_units(1_000);
        for index in 0..4 {
            assert_eq!(
                tranche_amount(entitlement, 4, index),
                TokenAmount::from_base_units(250)
            );
        }
    }

    #[test]
    fn test_remainder_folds_into_final_tranche() {
        let entitlement = TokenAmount::from_base_units(10);
        assert_eq!(tranche_amount(entitlement, 3, 0).to_base_units(), 3);
        assert_eq!(tranche_amount(entitlement, 3, 1).to_base_units(), 3);
        assert_eq!(tranche_amount(entitlement, 3, 2).to_base_units(), 4);

        // Entitlement smaller than the tranche count: everything lands in the
        // final tranche.
        let tiny = TokenAmount::from_base_units(2);
        assert_eq!(tranche_amount(tiny, 5, 0).to_base_units(), 0);
        assert_eq!(tranche_amount(tiny, 5, 4).to_base_units(), 2);
    }

    #[test]
    fn test_single_tranche_is_whole_entitlement() {
        let entitlement = TokenAmount::from_base_units(987_654_321);
        assert_eq!(tranche_amount(entitlement, 1, 0), entitlement);
    }

    #[test]
    fn test_eligibility_blocks() {
        let p = params();
        assert_eq!(eligible_at(1_000, &p, 0), 1_050);
        assert_eq!(eligible_at(1_000, &p, 1), 1_150);
        assert_eq!(eligible_at(1_000, &p, 2), 1_250);
        assert_eq!(eligible_at(1_000, &p, 3), 1_350);
    }

    #[test]
    fn test_eligibility_saturates_instead_of_wrapping() {
        let p = ScheduleParams {
            tranche_count: 4,
            tranche_interval: u64::MAX,
            remediation_window: u64::MAX,
        };
        assert_eq!(eligible_at(1_000, &p, 0), u64::MAX);
        assert_eq!(eligible_at(1_000, &p, 3), u64::MAX);
        // A wrapped threshold would read as eligible here.
        assert_eq!(
            stream_state(&p, 1_000, 1, u64::MAX - 1),
            TrancheState::Pending
        );
    }

    #[test]
    fn test_stream_state_progression() {
        let p = params();
        assert_eq!(stream_state(&p, 1_000, 0, 1_049), TrancheState::Pending);
        assert_eq!(stream_state(&p, 1_000, 0, 1_050), TrancheState::Eligible);
        assert_eq!(stream_state(&p, 1_000, 1, 1_050), TrancheState::Pending);
        assert_eq!(stream_state(&p, 1_000, 1, 1_150), TrancheState::Eligible);
        assert_eq!(stream_state(&p, 1_000, 4, 9_999), TrancheState::Complete);
        assert!(stream_state(&p, 1_000, 4, 9_999).is_terminal());
    }

    #[test]
    fn test_transition_rules() {
        use TrancheState::*;
        assert!(Uninitialized.can_transition_to(&Pending));
        assert!(Pending.can_transition_to(&Eligible));
        assert!(Eligible.can_transition_to(&Pending));
        assert!(Eligible.can_transition_to(&Complete));
        assert!(!Complete.can_transition_to(&Pending));
        assert!(!Pending.can_transition_to(&Complete));
    }

    #[tokio::test]
    async fn test_initialize_binds_once() {
        let book = ScheduleBook::new();
        let config = Arc::new(ProtocolConfig::default());
        let pool = TokenAmount::from_base_units(5_000);

        book.initialize(1, pool, config.clone()).await.unwrap();
        let err = book.initialize(1, pool, config).await.unwrap_err();
        assert!(matches!(err, DlpError::AlreadyInitialized(1)));

        let schedule = book.get(1).await.unwrap();
        assert_eq!(schedule.reward_pool, pool);
        assert!(book.is_initialized(1).await);
        assert!(!book.is_initialized(2).await);
    }

    #[tokio::test]
    async fn test_initialize_rejects_zero_pool() {
        let book = ScheduleBook::new();
        let err = book
            .initialize(1, TokenAmount::ZERO, Arc::new(ProtocolConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DlpError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_config() {
        let book = ScheduleBook::new();
        let mut config = ProtocolConfig::default();
        config.schedule.tranche_count = 7;
        book.initialize(3, TokenAmount::from_base_units(100), Arc::new(config))
            .await
            .unwrap();

        let schedule = book.get(3).await.unwrap();
        assert_eq!(schedule.params().tranche_count, 7);
    }
}
