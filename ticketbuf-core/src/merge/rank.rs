/// Stable re-ranking of a reordered group.
///
/// The longest common subsequence between the original and the edited order
/// marks the items the user did not move. Those keep their rank untouched and
/// act as anchors; every maximal run of moved items between two anchors gets
/// ranks interpolated strictly between them, or stepped away from the single
/// anchor on one side.
///
/// Unranked items sort after every ranked one, so an unranked item only stays
/// put when it belongs to the unranked tail of the edited order. Anywhere else
/// it joins the surrounding run and receives a rank.
use std::collections::HashSet;

use crate::types::ItemId;

/// Interpolation steps below this are logged; ranks are never renormalized here.
pub const MIN_RANK_GAP: f64 = 1e-6;

/// Longest common subsequence of two id sequences. Ties prefer dropping
/// from `original` first, which keeps earlier edited positions anchored.
pub fn longest_common_subsequence(original: &[ItemId], current: &[ItemId]) -> Vec<ItemId> {
    let n = original.len();
    let m = current.len();

    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if original[i] == current[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut i = 0;
    let mut j = 0;
    let mut out = Vec::with_capacity(lcs[0][0]);
    while i < n && j < m {
        if original[i] == current[j] {
            out.push(original[i]);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// New ranks for the items of `current` that moved relative to `original`.
///
/// `rank_of` returns an item's existing rank. Items in the common
/// subsequence are never returned. The caller decides which of the returned
/// ranks actually differ from the old value.
pub fn rerank(
    original: &[ItemId],
    current: &[ItemId],
    rank_of: impl Fn(ItemId) -> Option<f64>,
    step: f64,
) -> Vec<(ItemId, f64)> {
    if original == current {
        return Vec::new();
    }

    let common: HashSet<ItemId> = longest_common_subsequence(original, current).into_iter().collect();
    let tail = current
        .iter()
        .rev()
        .take_while(|id| common.contains(id) && rank_of(**id).is_none())
        .count();
    let unranked_tail = &current[current.len() - tail..];
    let fixed: HashSet<ItemId> = common
        .into_iter()
        .filter(|id| rank_of(*id).is_some() || unranked_tail.contains(id))
        .collect();
    let anchor = |id: &ItemId| if fixed.contains(id) { rank_of(*id) } else { None };

    let mut assigned = Vec::new();
    let mut i = 0;
    while i < current.len() {
        if fixed.contains(&current[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < current.len() && !fixed.contains(&current[i]) {
            i += 1;
        }
        let run = &current[start..i];
        let count = run.len();

        let prev = current[..start].iter().rev().find_map(anchor);
        let next = current[i..].iter().find_map(anchor);

        match (prev, next) {
            (Some(prev), Some(next)) => {
                let gap = (next - prev) / (count as f64 + 1.0);
                if gap.abs() < MIN_RANK_GAP {
                    log::warn!(
                        "[ticketbuf.rank] Rank gap {} between {} and {} is too small to order {} item(s) reliably",
                        gap,
                        prev,
                        next,
                        count
                    );
                }
                for (pos, &id) in run.iter().enumerate() {
                    assigned.push((id, prev + gap * (pos as f64 + 1.0)));
                }
            }
            (None, Some(next)) => {
                for (pos, &id) in run.iter().enumerate() {
                    assigned.push((id, next - step * (count - pos) as f64));
                }
            }
            (Some(prev), None) => {
                for (pos, &id) in run.iter().enumerate() {
                    assigned.push((id, prev + step * (pos as f64 + 1.0)));
                }
            }
            (None, None) => {
                for (pos, &id) in run.iter().enumerate() {
                    assigned.push((id, step * (pos as f64 + 1.0)));
                }
            }
        }
    }

    assigned
}
