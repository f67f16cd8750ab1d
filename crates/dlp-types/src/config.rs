use crate::error::{DlpError, Result};
use crate::types::{AccountAddress, Pct, TokenAmount, PCT_DENOMINATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

/// Multiplier table values are in hundredths: 100 = 1.0x, 300 = 3.0x.
pub const MULTIPLIER_SCALE: u64 = 100;

/// Blend weights for the two score components. Independent percentages, each
/// bounded by `PCT_DENOMINATOR`; scores are relative, so only the ratio
/// between the two matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingWeights {
    pub stake_weight: Pct,
    pub performance_weight: Pct,
}

impl RatingWeights {
    pub fn new(stake_weight: Pct, performance_weight: Pct) -> Self {
        Self {
            stake_weight,
            performance_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for weight in [self.stake_weight, self.performance_weight] {
            if weight > PCT_DENOMINATOR {
                return Err(DlpError::InvalidPercentageSum {
                    bound: PCT_DENOMINATOR,
                    actual: weight,
                });
            }
        }
        Ok(())
    }
}

impl Default for RatingWeights {
    fn default() -> Self {
        Self {
            stake_weight: 50_000,
            performance_weight: 50_000,
        }
    }
}

/// Stake multiplier curve: effective stake is bucketed by `bucket_size` and
/// the bucket index looks up the table, clamping to the last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierCurve {
    pub bucket_size: TokenAmount,
    pub table: Vec<u64>,
}

/// Default curve: 64 buckets of 100 tokens, ramping linearly from 1.0x to
/// 3.0x.
const DEFAULT_MULTIPLIER_TABLE: [u64; 64] = [
    100, 103, 106, 109, 112, 115, 119, 122, 125, 128, 131, 134, 138, 141, 144, 147, 150, 153, 157,
    160, 163, 166, 169, 173, 176, 179, 182, 185, 188, 192, 195, 198, 201, 204, 207, 211, 214, 217,
    220, 223, 226, 230, 233, 236, 239, 242, 246, 249, 252, 255, 258, 261, 265, 268, 271, 274, 277,
    280, 284, 287, 290, 293, 296, 300,
];

impl MultiplierCurve {
    pub fn new(bucket_size: TokenAmount, table: Vec<u64>) -> Self {
        Self { bucket_size, table }
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(DlpError::InvalidParameters(
                "multiplier table must not be empty".to_string(),
            ));
        }
        if self.bucket_size.is_zero() {
            return Err(DlpError::InvalidParameters(
                "stake bucket size must be positive".to_string(),
            ));
        }
        if self.table.windows(2).any(|w| w[1] < w[0]) {
            return Err(DlpError::InvalidParameters(
                "multiplier table must be non-decreasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Table lookup in `MULTIPLIER_SCALE` units, clamped to the last bucket.
    pub fn multiplier_for(&self, effective_stake: TokenAmount) -> u64 {
        let last = match self.table.last() {
            Some(v) => *v,
            None => return MULTIPLIER_SCALE,
        };
        if self.bucket_size.is_zero() {
            return last;
        }
        let idx = (effective_stake.to_base_units() / self.bucket_size.to_base_units()) as usize;
        self.table.get(idx).copied().unwrap_or(last)
    }
}

impl Default for MultiplierCurve {
    fn default() -> Self {
        Self {
            bucket_size: TokenAmount::from_base_units(100 * TokenAmount::BASE_UNIT),
            table: DEFAULT_MULTIPLIER_TABLE.to_vec(),
        }
    }
}

/// Block-gated tranche schedule parameters, bound per epoch at reward
/// initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParams {
    /// Number of tranches an entitlement is split into.
    pub tranche_count: u64,
    /// Blocks between consecutive tranches.
    pub tranche_interval: u64,
    /// Blocks after epoch finalization before the first tranche.
    pub remediation_window: u64,
}

impl ScheduleParams {
    pub fn validate(&self) -> Result<()> {
        if self.tranche_count == 0 {
            return Err(DlpError::InvalidParameters(
                "tranche count must be at least 1".to_string(),
            ));
        }
        if self.tranche_interval == 0 {
            return Err(DlpError::InvalidParameters(
                "tranche interval must be at least 1 block".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            tranche_count: 4,
            tranche_interval: 100,
            remediation_window: 50,
        }
    }
}

/// The full protocol configuration. A versioned snapshot is bound to each
/// epoch at reward initialization; all of that epoch's math reads the
/// snapshot, never the live store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub version: u64,
    /// Share of the epoch reward pool that becomes distributable.
    pub reward_percentage: Pct,
    /// Maximum tolerated shortfall between quoted and filled swap output.
    pub max_slippage: Pct,
    pub weights: RatingWeights,
    pub curve: MultiplierCurve,
    pub schedule: ScheduleParams,
    /// Number of top-ranked participants rewarded per epoch.
    pub max_rewarded: u64,
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reward_percentage > PCT_DENOMINATOR {
            return Err(DlpError::InvalidParameters(
                "reward percentage cannot exceed 100%".to_string(),
            ));
        }
        if self.max_slippage >= PCT_DENOMINATOR {
            return Err(DlpError::InvalidParameters(
                "max slippage must be below 100%".to_string(),
            ));
        }
        if self.max_rewarded == 0 {
            return Err(DlpError::InvalidParameters(
                "max rewarded participants must be at least 1".to_string(),
            ));
        }
        self.weights.validate()?;
        self.curve.validate()?;
        self.schedule.validate()?;
        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: 1,
            reward_percentage: 80_000,
            max_slippage: 2_000,
            weights: RatingWeights::default(),
            curve: MultiplierCurve::default(),
            schedule: ScheduleParams::default(),
            max_rewarded: 16,
        }
    }
}

/// Notification emitted after every accepted config change.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub version: u64,
    pub field: &'static str,
    pub changed_at: DateTime<Utc>,
}

/// Live protocol configuration: validated admin-gated updates, a version bump
/// per change, immutable `Arc` snapshots and broadcast change notifications.
pub struct ConfigStore {
    current: RwLock<Arc<ProtocolConfig>>,
    admin: Option<AccountAddress>,
    change_tx: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    pub fn new(initial: ProtocolConfig) -> Result<Self> {
        initial.validate()?;
        let (change_tx, _) = broadcast::channel(64);
        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
            admin: None,
            change_tx,
        })
    }

    /// Restrict updates (and admin-gated engine operations) to one caller.
    pub fn with_admin(mut self, admin: AccountAddress) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn admin(&self) -> Option<AccountAddress> {
        self.admin
    }

    pub fn ensure_admin(&self, caller: AccountAddress) -> Result<()> {
        match self.admin {
            Some(admin) if admin != caller => Err(DlpError::NotAuthorized(caller)),
            _ => Ok(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    /// Immutable snapshot of the current configuration.
    pub async fn snapshot(&self) -> Arc<ProtocolConfig> {
        self.current.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.current.read().await.version
    }

    async fn apply(
        &self,
        caller: AccountAddress,
        field: &'static str,
        mutate: impl FnOnce(&mut ProtocolConfig),
    ) -> Result<u64> {
        self.ensure_admin(caller)?;
        let mut guard = self.current.write().await;
        let mut next = ProtocolConfig::clone(&guard);
        mutate(&mut next);
        next.validate()?;
        next.version = guard.version + 1;
        let version = next.version;
        *guard = Arc::new(next);
        drop(guard);

        let _ = self.change_tx.send(ConfigChange {
            version,
            field,
            changed_at: Utc::now(),
        });
        info!(version = version, field = field, "⚙️ Protocol config updated");
        Ok(version)
    }

    pub async fn set_reward_percentage(&self, caller: AccountAddress, pct: Pct) -> Result<u64> {
        self.apply(caller, "reward_percentage", |c| c.reward_percentage = pct)
            .await
    }

    pub async fn set_max_slippage(&self, caller: AccountAddress, pct: Pct) -> Result<u64> {
        self.apply(caller, "max_slippage", |c| c.max_slippage = pct)
            .await
    }

    pub async fn set_rating_weights(
        &self,
        caller: AccountAddress,
        weights: RatingWeights,
    ) -> Result<u64> {
        self.apply(caller, "weights", |c| c.weights = weights).await
    }

    pub async fn set_multiplier_curve(
        &self,
        caller: AccountAddress,
        curve: MultiplierCurve,
    ) -> Result<u64> {
        self.apply(caller, "curve", |c| c.curve = curve).await
    }

    pub async fn set_schedule_params(
        &self,
        caller: AccountAddress,
        schedule: ScheduleParams,
    ) -> Result<u64> {
        self.apply(caller, "schedule", |c| c.schedule = schedule)
            .await
    }

    pub async fn set_max_rewarded(&self, caller: AccountAddress, count: u64) -> Result<u64> {
        self.apply(caller, "max_rewarded", |c| c.max_rewarded = count)
            .await
    }
}
