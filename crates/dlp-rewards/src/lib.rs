//! Tranche-scheduled reward distribution for ranked epoch participants.
//!
//! An epoch's reward pool is bound up front together with a config snapshot,
//! the epoch is finalized into per-participant reward accounts, and each
//! entitlement is then streamed out in block-gated tranches: pending penalties
//! are withheld, the payable remainder is converted to the settlement asset
//! through a swap venue, and the proceeds are credited to the participant's
//! treasury. Every tranche leaves an auditable receipt.

pub mod arena;
pub mod engine;
pub mod executor;
pub mod penalty;
pub mod schedule;
pub mod treasury;
pub mod venue;

pub use arena::{RewardAccount, RewardArena, TrancheRecord};
pub use engine::{EpochRewardStats, RewardsEngine};
pub use executor::{DistributionReport, Distributor, FailedTranche, ReleasedTranche};
pub use penalty::PenaltyLedger;
pub use schedule::{
    eligible_at, stream_state, tranche_amount, EpochSchedule, ScheduleBook, TrancheState,
};
pub use treasury::{MemoryTreasury, TreasuryClient};
pub use venue::{FixedRateVenue, SwapError, SwapFill, SwapResult, SwapVenue};
