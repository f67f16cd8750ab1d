use crate::types::{AccountAddress, BlockNumber, DlpId, EpochId, TokenAmount};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DlpError>;

/// Coarse failure class, for callers that route on outcome rather than on
/// the specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range input.
    Validation,
    /// Operation not valid in the current lifecycle state.
    State,
    /// A collaborator (registry, treasury, swap venue) failed.
    External,
    /// Internal accounting invariant violated; fatal for the unit that hit it.
    Invariant,
}

#[derive(Debug, Error)]
pub enum DlpError {
    #[error("Invalid epoch {epoch}: {reason}")]
    InvalidEpoch { epoch: EpochId, reason: String },

    #[error("Stake adjustment underflow for dlp {dlp} in epoch {epoch}: base {base} with adjustment {adjustment}")]
    Underflow {
        epoch: EpochId,
        dlp: DlpId,
        base: TokenAmount,
        adjustment: i128,
    },

    #[error("Rating weight {actual} exceeds the {bound} fixed-point bound")]
    InvalidPercentageSum { bound: u64, actual: u64 },

    #[error("Rewards already initialized for epoch {0}")]
    AlreadyInitialized(EpochId),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tranche for dlp {dlp} in epoch {epoch} not eligible until block {eligible_at} (current block {current})")]
    NotYetEligible {
        epoch: EpochId,
        dlp: DlpId,
        eligible_at: BlockNumber,
        current: BlockNumber,
    },

    #[error("All {total} tranches already released for dlp {dlp} in epoch {epoch}")]
    AlreadyComplete {
        epoch: EpochId,
        dlp: DlpId,
        total: u64,
    },

    #[error("Epoch {0} is not finalized")]
    EpochNotFinalized(EpochId),

    #[error("Swap output {actual} below minimum {minimum} (quoted {expected})")]
    SlippageExceeded {
        expected: TokenAmount,
        minimum: TokenAmount,
        actual: TokenAmount,
    },

    #[error("No penalty balance to withdraw for dlp {dlp} in epoch {epoch}")]
    NothingToWithdraw { epoch: EpochId, dlp: DlpId },

    #[error("Dlp {0} is not registered")]
    UnknownParticipant(DlpId),

    #[error("No reward entitlement for dlp {dlp} in epoch {epoch}")]
    NoEntitlement { epoch: EpochId, dlp: DlpId },

    #[error("Caller {0} is not authorized")]
    NotAuthorized(AccountAddress),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Treasury error: {0}")]
    Treasury(String),

    #[error("Swap venue error: {0}")]
    Swap(String),

    #[error("Amount overflow in {0}")]
    AmountOverflow(&'static str),

    #[error("State invariant violated: {0}")]
    InvariantViolation(String),
}

impl DlpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DlpError::InvalidPercentageSum { .. }
            | DlpError::InvalidParameters(_)
            | DlpError::UnknownParticipant(_)
            | DlpError::NoEntitlement { .. }
            | DlpError::NotAuthorized(_) => ErrorKind::Validation,

            DlpError::InvalidEpoch { .. }
            | DlpError::AlreadyInitialized(_)
            | DlpError::NotYetEligible { .. }
            | DlpError::AlreadyComplete { .. }
            | DlpError::EpochNotFinalized(_)
            | DlpError::NothingToWithdraw { .. } => ErrorKind::State,

            DlpError::SlippageExceeded { .. }
            | DlpError::Registry(_)
            | DlpError::Treasury(_)
            | DlpError::Swap(_) => ErrorKind::External,

            DlpError::Underflow { .. }
            | DlpError::AmountOverflow(_)
            | DlpError::InvariantViolation(_) => ErrorKind::Invariant,
        }
    }
}
