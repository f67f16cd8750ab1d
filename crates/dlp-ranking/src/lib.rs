//! Per-epoch rating aggregation and deterministic top-K ranking for DLP
//! federation participants.

pub mod engine;
pub mod ledger;
pub mod score;
pub mod selection;

pub use engine::RankingEngine;
pub use ledger::{EpochLedger, EpochView, ParticipantRating, StakeDelta};
pub use score::{blended_score, normalized_performance};
pub use selection::{select_top, RankedDlp};
