use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch identifier. Ids are assigned by the embedding environment and
/// increase monotonically; an epoch is immutable once finalized.
pub type EpochId = u64;

/// Block height supplied by the embedding environment.
pub type BlockNumber = u64;

/// Numeric id of a Data Liquidity Pool participant.
pub type DlpId = u64;

/// Fixed-point percentage in parts per 100,000 (100% = 100_000).
pub type Pct = u64;

/// Denominator of the fixed-point percentage space.
pub const PCT_DENOMINATOR: u64 = 100_000;

/// Applies a percentage (at most 100%) to an amount, flooring the result.
pub fn apply_pct(amount: TokenAmount, pct: Pct) -> TokenAmount {
    debug_assert!(pct <= PCT_DENOMINATOR);
    let scaled = (amount.to_base_units() as u128 * pct as u128) / PCT_DENOMINATOR as u128;
    TokenAmount::from_base_units(scaled as u64)
}

/// Expresses `part / whole` as a percentage, flooring. Zero when `whole` is zero.
pub fn pct_ratio(part: u128, whole: u128) -> Pct {
    if whole == 0 {
        return 0;
    }
    ((part * PCT_DENOMINATOR as u128) / whole) as u64
}

/// The two assets the engine touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    /// Asset entitlements and penalties are denominated in.
    Reward,
    /// Asset participant treasuries are credited in.
    Settlement,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Reward => write!(f, "reward"),
            Asset::Settlement => write!(f, "settlement"),
        }
    }
}

/// Token amount in base units with 9 decimal places.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TokenAmount(u64);

impl TokenAmount {
    pub const DECIMALS: u32 = 9;
    pub const BASE_UNIT: u64 = 1_000_000_000;
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    /// Create from a whole-token value. Only for configuration and tests;
    /// accounting paths stay in base units.
    pub fn from_tokens(tokens: f64) -> Self {
        Self((tokens * Self::BASE_UNIT as f64) as u64)
    }

    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_tokens(&self) -> f64 {
        self.0 as f64 / Self::BASE_UNIT as f64
    }

    pub const fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn min(&self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9} DLP", self.to_tokens())
    }
}

/// 32-byte account address of an external caller or recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress([u8; 32]);

impl AccountAddress {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Parse from a 64-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut addr = [0u8; 32];
        addr.copy_from_slice(&bytes);
        Ok(Self(addr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}...", &hex::encode(self.0)[..16])
    }
}
