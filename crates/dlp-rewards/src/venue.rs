use async_trait::async_trait;
use dlp_types::{apply_pct, Asset, Pct, TokenAmount, PCT_DENOMINATOR};
use thiserror::Error;
use tokio::sync::RwLock;

pub type SwapResult<T> = std::result::Result<T, SwapError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapError {
    #[error("Fill {actual} below minimum output {minimum}")]
    BelowMinimumOut {
        minimum: TokenAmount,
        actual: TokenAmount,
    },
    #[error("Venue rejected conversion: {0}")]
    Venue(String),
}

/// Outcome of one conversion. Venues are allowed to leave part of the input
/// unconsumed and to return residue output on top of the fill; both travel
/// back to the caller as spares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapFill {
    pub amount_out: TokenAmount,
    pub amount_in_used: TokenAmount,
    /// Input the venue did not consume.
    pub spare_in: TokenAmount,
    /// Output delivered beyond the fill itself.
    pub spare_out: TokenAmount,
}

impl SwapFill {
    pub const EMPTY: SwapFill = SwapFill {
        amount_out: TokenAmount::ZERO,
        amount_in_used: TokenAmount::ZERO,
        spare_in: TokenAmount::ZERO,
        spare_out: TokenAmount::ZERO,
    };
}

/// Conversion venue between the reward asset and the settlement asset.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Indicative output for `amount_in`, used to derive the slippage floor.
    async fn quote(&self, from: Asset, to: Asset, amount_in: TokenAmount)
        -> SwapResult<TokenAmount>;

    /// Execute the conversion. Fills below `min_amount_out` must be rejected
    /// with `BelowMinimumOut` and leave no partial state behind.
    async fn convert(
        &self,
        from: Asset,
        to: Asset,
        amount_in: TokenAmount,
        min_amount_out: TokenAmount,
    ) -> SwapResult<SwapFill>;
}

struct VenueState {
    rate_num: u64,
    rate_den: u64,
    fee: Pct,
    holdback: Pct,
    out_residue: TokenAmount,
    fail_next: Option<SwapError>,
}

/// Fixed-rate venue for tests and local runs. Output is
/// `in * rate_num / rate_den` minus a fee; a configurable holdback leaves part
/// of the input unconsumed, and `out_residue` is handed back as spare output
/// on the next fill.
pub struct FixedRateVenue {
    state: RwLock<VenueState>,
}

impl FixedRateVenue {
    pub fn new(rate_num: u64, rate_den: u64) -> Self {
        Self {
            state: RwLock::new(VenueState {
                rate_num,
                rate_den: rate_den.max(1),
                fee: 0,
                holdback: 0,
                out_residue: TokenAmount::ZERO,
                fail_next: None,
            }),
        }
    }

    /// 1:1 venue.
    pub fn pegged() -> Self {
        Self::new(1, 1)
    }

    pub async fn set_rate(&self, num: u64, den: u64) {
        let mut state = self.state.write().await;
        state.rate_num = num;
        state.rate_den = den.max(1);
    }

    /// Fee charged on the output, in parts per 100 000. Clamped to 100%.
    pub async fn set_fee(&self, fee: Pct) {
        self.state.write().await.fee = fee.min(PCT_DENOMINATOR);
    }

    /// Fraction of the input left unconsumed, in parts per 100 000. Clamped
    /// to 100%.
    pub async fn set_holdback(&self, holdback: Pct) {
        self.state.write().await.holdback = holdback.min(PCT_DENOMINATOR);
    }

    /// Residue output attached to the next fill.
    pub async fn set_out_residue(&self, residue: TokenAmount) {
        self.state.write().await.out_residue = residue;
    }

    /// Make the next `convert` call fail with `err`.
    pub async fn fail_next(&self, err: SwapError) {
        self.state.write().await.fail_next = Some(err);
    }

    fn rate_out(amount_in: TokenAmount, num: u64, den: u64) -> TokenAmount {
        let units = amount_in.to_base_units() as u128 * num as u128 / den as u128;
        TokenAmount::from_base_units(units.min(u64::MAX as u128) as u64)
    }
}

#[async_trait]
impl SwapVenue for FixedRateVenue {
    async fn quote(
        &self,
        _from: Asset,
        _to: Asset,
        amount_in: TokenAmount,
    ) -> SwapResult<TokenAmount> {
        let state = self.state.read().await;
        Ok(Self::rate_out(amount_in, state.rate_num, state.rate_den))
    }

    async fn convert(
        &self,
        _from: Asset,
        _to: Asset,
        amount_in: TokenAmount,
        min_amount_out: TokenAmount,
    ) -> SwapResult<SwapFill> {
        let mut state = self.state.write().await;
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let spare_in = apply_pct(amount_in, state.holdback);
        let consumed = amount_in.saturating_sub(spare_in);
        let raw_out = Self::rate_out(consumed, state.rate_num, state.rate_den);
        let amount_out = apply_pct(raw_out, PCT_DENOMINATOR - state.fee);
        if amount_out < min_amount_out {
            return Err(SwapError::BelowMinimumOut {
                minimum: min_amount_out,
                actual: amount_out,
            });
        }

        let spare_out = std::mem::take(&mut state.out_residue);
        Ok(SwapFill {
            amount_out,
            amount_in_used: consumed,
            spare_in,
            spare_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pegged_convert_is_lossless() {
        let venue = FixedRateVenue::pegged();
        let fill = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
                TokenAmount::from_base_units(1_000),
            )
            .await
            .unwrap();
        assert_eq!(fill.amount_out.to_base_units(), 1_000);
        assert_eq!(fill.amount_in_used.to_base_units(), 1_000);
        assert_eq!(fill.spare_in, TokenAmount::ZERO);
        assert_eq!(fill.spare_out, TokenAmount::ZERO);
    }

    #[tokio::test]
    async fn test_fee_can_push_fill_below_minimum() {
        let venue = FixedRateVenue::pegged();
        venue.set_fee(10_000).await; // 10% off the output

        let quote = venue
            .quote(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
            )
            .await
            .unwrap();
        assert_eq!(quote.to_base_units(), 1_000);

        let err = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
                TokenAmount::from_base_units(950),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SwapError::BelowMinimumOut {
                minimum: TokenAmount::from_base_units(950),
                actual: TokenAmount::from_base_units(900),
            }
        );
    }

    #[tokio::test]
    async fn test_holdback_returns_spare_input() {
        let venue = FixedRateVenue::pegged();
        venue.set_holdback(20_000).await; // 20% of input unconsumed

        let fill = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
                TokenAmount::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(fill.spare_in.to_base_units(), 200);
        assert_eq!(fill.amount_in_used.to_base_units(), 800);
        assert_eq!(fill.amount_out.to_base_units(), 800);
    }

    #[tokio::test]
    async fn test_fee_and_holdback_clamp_to_full_range() {
        let venue = FixedRateVenue::pegged();
        venue.set_fee(250_000).await;

        // An overshooting fee acts as 100%: the whole output is eaten.
        let fill = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
                TokenAmount::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(fill.amount_out, TokenAmount::ZERO);
        assert_eq!(fill.amount_in_used.to_base_units(), 1_000);

        // An overshooting holdback leaves the whole input unconsumed.
        venue.set_holdback(250_000).await;
        let fill = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(1_000),
                TokenAmount::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(fill.spare_in.to_base_units(), 1_000);
        assert_eq!(fill.amount_in_used, TokenAmount::ZERO);
    }

    #[tokio::test]
    async fn test_out_residue_attaches_once() {
        let venue = FixedRateVenue::pegged();
        venue
            .set_out_residue(TokenAmount::from_base_units(7))
            .await;

        let first = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(100),
                TokenAmount::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(first.spare_out.to_base_units(), 7);

        let second = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(100),
                TokenAmount::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(second.spare_out, TokenAmount::ZERO);
    }

    #[tokio::test]
    async fn test_fail_next_consumed_by_one_call() {
        let venue = FixedRateVenue::pegged();
        venue
            .fail_next(SwapError::Venue("liquidity drained".into()))
            .await;

        let err = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(10),
                TokenAmount::ZERO,
            )
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::Venue("liquidity drained".into()));

        assert!(venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(10),
                TokenAmount::ZERO,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rate_applies_to_quote_and_fill() {
        let venue = FixedRateVenue::new(3, 2);
        let quote = venue
            .quote(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(100),
            )
            .await
            .unwrap();
        assert_eq!(quote.to_base_units(), 150);

        let fill = venue
            .convert(
                Asset::Reward,
                Asset::Settlement,
                TokenAmount::from_base_units(100),
                quote,
            )
            .await
            .unwrap();
        assert_eq!(fill.amount_out, quote);
    }
}
