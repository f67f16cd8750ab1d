use dlp_types::{pct_ratio, MultiplierCurve, Pct, RatingWeights, TokenAmount, MULTIPLIER_SCALE, PCT_DENOMINATOR};

/// A participant's performance as a share of the epoch total, in percentage
/// parts. Zero when the epoch recorded no performance at all.
pub fn normalized_performance(rating: u64, total_performance: u128) -> Pct {
    pct_ratio(rating as u128, total_performance)
}

/// Blended score: `stake_weight x multiplier + performance_weight x
/// normalized performance`, with both components brought into percentage
/// parts first. Scores live in a fixed-point space of weight-parts times
/// percentage-parts; only comparisons and ratios between them are
/// meaningful.
pub fn blended_score(
    weights: &RatingWeights,
    curve: &MultiplierCurve,
    effective_stake: TokenAmount,
    rating: u64,
    total_performance: u128,
) -> u128 {
    let multiplier_pct = curve.multiplier_for(effective_stake) as u128 * PCT_DENOMINATOR as u128
        / MULTIPLIER_SCALE as u128;
    let stake_term = weights.stake_weight as u128 * multiplier_pct;
    let performance_term = weights.performance_weight as u128
        * normalized_performance(rating, total_performance) as u128;
    stake_term + performance_term
}
