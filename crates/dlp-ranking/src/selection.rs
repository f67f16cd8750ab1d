//! Deterministic top-K selection with exact share renormalization.
//!
//! Ordering is total: descending blended score, ties broken by ascending
//! participant id. Shares are renormalized over the selected set so they sum
//! to exactly `PCT_DENOMINATOR`; the flooring remainder lands on the
//! first-ranked entry, so no dust is ever lost to integer division.

use dlp_types::{DlpId, Pct, PCT_DENOMINATOR};
use serde::{Deserialize, Serialize};

/// One selected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedDlp {
    pub dlp_id: DlpId,
    /// 1-based position in the selection.
    pub rank: u64,
    pub score: u128,
    /// Share of the epoch reward in percentage parts.
    pub share: Pct,
}

/// Select the top `k` candidates. All-zero scores split shares equally.
/// `k = 0` or an empty candidate set selects nothing.
pub fn select_top(mut candidates: Vec<(DlpId, u128)>, k: usize) -> Vec<RankedDlp> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates.truncate(k);

    let count = candidates.len() as u64;
    let total: u128 = candidates.iter().map(|(_, score)| *score).sum();

    let mut ranked: Vec<RankedDlp> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, (dlp_id, score))| {
            let share = if total == 0 {
                PCT_DENOMINATOR / count
            } else {
                ((score * PCT_DENOMINATOR as u128) / total) as u64
            };
            RankedDlp {
                dlp_id,
                rank: i as u64 + 1,
                score,
                share,
            }
        })
        .collect();

    let assigned: u64 = ranked.iter().map(|r| r.share).sum();
    ranked[0].share += PCT_DENOMINATOR - assigned;
    ranked
}
