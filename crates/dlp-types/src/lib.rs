//! Core types for the DLP reward engine: identifiers, token amounts,
//! fixed-point percentage math, the shared error taxonomy, protocol
//! configuration with a versioned store, and the participant registry seam.

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{
    ConfigChange, ConfigStore, MultiplierCurve, ProtocolConfig, RatingWeights, ScheduleParams,
    MULTIPLIER_SCALE,
};
pub use error::{DlpError, ErrorKind, Result};
pub use registry::{MemoryRegistry, ParticipantRegistry, RegistryEntry};
pub use types::{
    apply_pct, pct_ratio, AccountAddress, Asset, BlockNumber, DlpId, EpochId, Pct, TokenAmount,
    PCT_DENOMINATOR,
};
