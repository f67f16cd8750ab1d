use crate::ledger::{EpochLedger, StakeDelta};
use crate::score::blended_score;
use crate::selection::{select_top, RankedDlp};
use dlp_types::{
    AccountAddress, ConfigStore, DlpError, DlpId, EpochId, MultiplierCurve, ParticipantRegistry,
    RatingWeights, Result, TokenAmount,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Write API over the epoch ledger plus ranking. Rating writes are gated to
/// the configured metrics oracle; an unset oracle leaves them open.
pub struct RankingEngine {
    ledger: Arc<EpochLedger>,
    registry: Arc<dyn ParticipantRegistry>,
    config: Arc<ConfigStore>,
    oracle: Option<AccountAddress>,
}

impl RankingEngine {
    pub fn new(
        ledger: Arc<EpochLedger>,
        registry: Arc<dyn ParticipantRegistry>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            ledger,
            registry,
            config,
            oracle: None,
        }
    }

    /// Restrict rating writes to one trusted caller.
    pub fn with_oracle(mut self, oracle: AccountAddress) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn ledger(&self) -> &Arc<EpochLedger> {
        &self.ledger
    }

    fn ensure_oracle(&self, caller: AccountAddress) -> Result<()> {
        match self.oracle {
            Some(oracle) if oracle != caller => Err(DlpError::NotAuthorized(caller)),
            _ => Ok(()),
        }
    }

    async fn ensure_registered(&self, dlp_id: DlpId) -> Result<()> {
        let exists = self
            .registry
            .exists(dlp_id)
            .await
            .map_err(|e| DlpError::Registry(e.to_string()))?;
        if !exists {
            return Err(DlpError::UnknownParticipant(dlp_id));
        }
        Ok(())
    }

    async fn base_stake(&self, dlp_id: DlpId) -> Result<TokenAmount> {
        self.registry
            .stake_of(dlp_id)
            .await
            .map_err(|e| DlpError::Registry(e.to_string()))
    }

    /// Record a performance rating for an open epoch.
    pub async fn record_performance(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        dlp_id: DlpId,
        performance: u64,
    ) -> Result<()> {
        self.ensure_oracle(caller)?;
        self.ensure_registered(dlp_id).await?;
        self.ledger
            .record_performance(epoch_id, dlp_id, performance)
            .await
    }

    /// Apply a stake adjustment for an open epoch. Returns the new effective
    /// stake.
    pub async fn adjust_stake(
        &self,
        caller: AccountAddress,
        epoch_id: EpochId,
        dlp_id: DlpId,
        delta: StakeDelta,
    ) -> Result<TokenAmount> {
        self.ensure_oracle(caller)?;
        self.ensure_registered(dlp_id).await?;
        let base = self.base_stake(dlp_id).await?;
        self.ledger.adjust_stake(epoch_id, dlp_id, base, delta).await
    }

    /// Registry base stake plus the epoch's cumulative adjustment. A negative
    /// result is an `Underflow`, never a silent clamp.
    pub async fn effective_stake(
        &self,
        epoch_id: EpochId,
        dlp_id: DlpId,
    ) -> Result<TokenAmount> {
        let base = self.base_stake(dlp_id).await?;
        let adjustment = self
            .ledger
            .rating_of(epoch_id, dlp_id)
            .await
            .map(|r| r.stake_adjustment)
            .unwrap_or(0);
        effective_of(epoch_id, dlp_id, base, adjustment)
    }

    /// Rank every registered participant with the live configured weights and
    /// curve.
    pub async fn rank_epoch(&self, epoch_id: EpochId, k: u64) -> Result<Vec<RankedDlp>> {
        let config = self.config.snapshot().await;
        self.rank_epoch_with(epoch_id, k, &config.weights, &config.curve)
            .await
    }

    /// Rank every registered participant with explicit weights and curve
    /// (validated the same way). A participant with no recorded rating scores
    /// on its stake term alone.
    pub async fn rank_epoch_with(
        &self,
        epoch_id: EpochId,
        k: u64,
        weights: &RatingWeights,
        curve: &MultiplierCurve,
    ) -> Result<Vec<RankedDlp>> {
        let ids = self
            .registry
            .registered_ids()
            .await
            .map_err(|e| DlpError::Registry(e.to_string()))?;
        self.rank_ids(epoch_id, k, ids, weights, curve).await
    }

    /// Rank an explicit candidate subset with the live configured weights and
    /// curve; shares renormalize over the subset alone.
    pub async fn rank_candidates(
        &self,
        epoch_id: EpochId,
        k: u64,
        candidates: &[DlpId],
    ) -> Result<Vec<RankedDlp>> {
        let config = self.config.snapshot().await;
        self.rank_candidates_with(epoch_id, k, candidates, &config.weights, &config.curve)
            .await
    }

    /// Explicit candidate subset with explicit weights and curve. Candidates
    /// are deduplicated; each must be registered.
    pub async fn rank_candidates_with(
        &self,
        epoch_id: EpochId,
        k: u64,
        candidates: &[DlpId],
        weights: &RatingWeights,
        curve: &MultiplierCurve,
    ) -> Result<Vec<RankedDlp>> {
        let ids: BTreeSet<DlpId> = candidates.iter().copied().collect();
        for &dlp_id in &ids {
            self.ensure_registered(dlp_id).await?;
        }
        self.rank_ids(epoch_id, k, ids.into_iter().collect(), weights, curve)
            .await
    }

    async fn rank_ids(
        &self,
        epoch_id: EpochId,
        k: u64,
        ids: Vec<DlpId>,
        weights: &RatingWeights,
        curve: &MultiplierCurve,
    ) -> Result<Vec<RankedDlp>> {
        weights.validate()?;
        curve.validate()?;

        let (ratings, total_performance) = self.ledger.epoch_ratings(epoch_id).await;

        let mut candidates = Vec::with_capacity(ids.len());
        for dlp_id in ids {
            let (performance, adjustment) = ratings
                .get(&dlp_id)
                .map(|r| (r.performance, r.stake_adjustment))
                .unwrap_or((0, 0));
            let base = self.base_stake(dlp_id).await?;
            let effective = effective_of(epoch_id, dlp_id, base, adjustment)?;
            candidates.push((
                dlp_id,
                blended_score(weights, curve, effective, performance, total_performance),
            ));
        }

        let candidate_count = candidates.len();
        let ranked = select_top(candidates, k as usize);
        debug!(
            epoch = epoch_id,
            candidates = candidate_count,
            selected = ranked.len(),
            "🏆 Epoch ranking computed"
        );
        Ok(ranked)
    }
}

fn effective_of(
    epoch_id: EpochId,
    dlp_id: DlpId,
    base: TokenAmount,
    adjustment: i128,
) -> Result<TokenAmount> {
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
    Ok(TokenAmount::from_base_units(effective as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlp_types::{MemoryRegistry, ProtocolConfig, PCT_DENOMINATOR};

    async fn setup() -> (RankingEngine, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        let config = Arc::new(ConfigStore::new(ProtocolConfig::default()).unwrap());
        let engine = RankingEngine::new(Arc::new(EpochLedger::new()), registry.clone(), config);
        (engine, registry)
    }

    #[tokio::test]
    async fn test_oracle_gate() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(1, TokenAmount::ZERO).await;
        let config = Arc::new(ConfigStore::new(ProtocolConfig::default()).unwrap());
        let oracle = AccountAddress::from_bytes([7u8; 32]);
        let engine = RankingEngine::new(Arc::new(EpochLedger::new()), registry, config)
            .with_oracle(oracle);

        let stranger = AccountAddress::from_bytes([8u8; 32]);
        let err = engine
            .record_performance(stranger, 1, 1, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, DlpError::NotAuthorized(_)));

        engine.record_performance(oracle, 1, 1, 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_participant_rejected() {
        let (engine, _registry) = setup().await;
        let caller = AccountAddress::zero();

        let err = engine
            .record_performance(caller, 1, 99, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DlpError::UnknownParticipant(99)));
    }

    #[tokio::test]
    async fn test_effective_stake_tracks_adjustments() {
        let (engine, registry) = setup().await;
        registry.register(4, TokenAmount::from_base_units(1_000)).await;
        let caller = AccountAddress::zero();

        engine
            .adjust_stake(
                caller,
                1,
                4,
                StakeDelta::Decrease(TokenAmount::from_base_units(400)),
            )
            .await
            .unwrap();
        assert_eq!(
            engine.effective_stake(1, 4).await.unwrap(),
            TokenAmount::from_base_units(600)
        );

        // Registry stake shrinking below the recorded decrease surfaces loudly.
        registry.set_stake(4, TokenAmount::from_base_units(300)).await;
        let err = engine.effective_stake(1, 4).await.unwrap_err();
        assert!(matches!(err, DlpError::Underflow { .. }));
    }

    #[tokio::test]
    async fn test_ranking_includes_unrated_participants() {
        let (engine, registry) = setup().await;
        // 2 sits two buckets above 1, but neither has a rating.
        registry.register(1, TokenAmount::from_tokens(50.0)).await;
        registry.register(2, TokenAmount::from_tokens(250.0)).await;

        let ranked = engine.rank_epoch(1, 10).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].dlp_id, 2);
        assert_eq!(ranked[1].dlp_id, 1);
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let (engine, registry) = setup().await;
        let caller = AccountAddress::zero();
        for dlp in 1..=5u64 {
            registry
                .register(dlp, TokenAmount::from_tokens(100.0 * dlp as f64))
                .await;
            engine
                .record_performance(caller, 1, dlp, dlp * 11)
                .await
                .unwrap();
        }

        let first = engine.rank_epoch(1, 3).await.unwrap();
        let second = engine.rank_epoch(1, 3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rank_rejects_out_of_range_weights() {
        let (engine, registry) = setup().await;
        registry.register(1, TokenAmount::ZERO).await;

        // Lopsided weights are allowed, out-of-range ones are not.
        assert!(engine
            .rank_epoch_with(1, 5, &RatingWeights::new(1, 2), &MultiplierCurve::default())
            .await
            .is_ok());

        let err = engine
            .rank_epoch_with(
                1,
                5,
                &RatingWeights::new(PCT_DENOMINATOR + 1, 0),
                &MultiplierCurve::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DlpError::InvalidPercentageSum { .. }));
    }

    #[tokio::test]
    async fn test_subset_ranking_renormalizes_over_the_subset() {
        let (engine, registry) = setup().await;
        let caller = AccountAddress::zero();
        for dlp in 1..=4u64 {
            registry.register(dlp, TokenAmount::from_tokens(100.0)).await;
            engine
                .record_performance(caller, 1, dlp, 10 * dlp)
                .await
                .unwrap();
        }

        // Duplicates collapse; only the subset is scored.
        let ranked = engine.rank_candidates(1, 10, &[3, 1, 3]).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].dlp_id, 3);
        assert_eq!(ranked[1].dlp_id, 1);
        assert_eq!(ranked[0].share + ranked[1].share, PCT_DENOMINATOR);

        let err = engine.rank_candidates(1, 10, &[1, 42]).await.unwrap_err();
        assert!(matches!(err, DlpError::UnknownParticipant(42)));
    }
}
