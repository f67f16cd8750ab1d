use dlp_ranking::{blended_score, select_top};
use dlp_types::{MultiplierCurve, RatingWeights, TokenAmount, PCT_DENOMINATOR};
use proptest::prelude::*;

prop_compose! {
    /// Candidate vectors with distinct ids and arbitrary scores.
    fn arb_candidates()(scores in prop::collection::vec(0u128..1_000_000_000_000, 1..60))
        -> Vec<(u64, u128)>
    {
        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| (i as u64, score))
            .collect()
    }
}

prop_compose! {
    fn arb_sorted_table()(mut table in prop::collection::vec(1u64..10_000, 1..80)) -> Vec<u64> {
        table.sort_unstable();
        table
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn prop_shares_sum_exactly(candidates in arb_candidates(), k in 1usize..60) {
        let ranked = select_top(candidates, k);
        prop_assert!(!ranked.is_empty());
        let sum: u64 = ranked.iter().map(|r| r.share).sum();
        prop_assert_eq!(sum, PCT_DENOMINATOR);
    }

    #[test]
    fn prop_ordering_is_strict_and_total(candidates in arb_candidates(), k in 1usize..60) {
        let ranked = select_top(candidates, k);
        for pair in ranked.windows(2) {
            let ordered = pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].dlp_id < pair[1].dlp_id);
            prop_assert!(ordered, "ranking order violated: {:?} before {:?}", pair[0], pair[1]);
        }
        for (i, entry) in ranked.iter().enumerate() {
            prop_assert_eq!(entry.rank, i as u64 + 1);
        }
    }

    #[test]
    fn prop_selection_is_permutation_independent(
        candidates in arb_candidates(),
        k in 1usize..60,
        seed in any::<u64>(),
    ) {
        let mut shuffled = candidates.clone();
        for i in (1..shuffled.len()).rev() {
            let j = (seed.wrapping_mul(i as u64 + 1) % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }
        prop_assert_eq!(select_top(candidates, k), select_top(shuffled, k));
    }

    #[test]
    fn prop_shares_track_score_order(candidates in arb_candidates(), k in 1usize..60) {
        let ranked = select_top(candidates, k);
        // Skip the first entry: it may also carry the rounding remainder.
        for pair in ranked.windows(2).skip(1) {
            prop_assert!(pair[0].share >= pair[1].share);
        }
    }

    #[test]
    fn prop_multiplier_lookup_stays_in_table(
        stake in any::<u64>(),
        bucket in 1u64..=u64::MAX,
        table in arb_sorted_table(),
    ) {
        let curve = MultiplierCurve::new(TokenAmount::from_base_units(bucket), table.clone());
        let multiplier = curve.multiplier_for(TokenAmount::from_base_units(stake));
        prop_assert!(table.contains(&multiplier));
        // Beyond the last bucket the lookup clamps.
        let clamped = curve.multiplier_for(TokenAmount::MAX);
        prop_assert_eq!(clamped, *table.last().unwrap());
    }

    #[test]
    fn prop_score_monotone_in_rating(
        stake in 0u64..1_000_000_000,
        low in 0u64..1_000_000,
        extra in 0u64..1_000_000,
        total_pad in 0u128..1_000_000,
    ) {
        let weights = RatingWeights::default();
        let curve = MultiplierCurve::default();
        let high = low + extra;
        let total = high as u128 + total_pad;
        let stake = TokenAmount::from_base_units(stake);

        let score_low = blended_score(&weights, &curve, stake, low, total);
        let score_high = blended_score(&weights, &curve, stake, high, total);
        prop_assert!(score_high >= score_low);
    }
}
