//! Contiguous seat block selection.
//!
//! Seats are grouped by (block, floor, row) and every window of `quantity`
//! seats with strictly consecutive numbers is a candidate. When no row holds
//! such a run, rows are ignored and the search repeats per (block, floor).
//! A party is never split across unrelated seats: with no run anywhere the
//! allocator gives up.

use std::collections::HashMap;
use std::collections::HashSet;

use uuid::Uuid;

use crate::models::Seat;

/// Picks `quantity` seats out of `available`, which must already be in
/// canonical (block, floor, row, number) order.
///
/// Candidates are ranked by how many `preferred` seats they contain, then by
/// how close their mean seat number sits to the centre of the whole pool's
/// number range. Remaining ties keep scan order.
pub fn find_contiguous_block(
    available: &[Seat],
    quantity: usize,
    preferred: &[Uuid],
) -> Option<Vec<Seat>> {
    if quantity == 0 || available.len() < quantity {
        return None;
    }
    // A single seat is always "contiguous"; no ranking at this size.
    if quantity == 1 {
        return available.first().map(|seat| vec![seat.clone()]);
    }

    let mut candidates = scan(available, quantity, |seat| {
        (
            seat.block.as_str(),
            seat.floor.as_str(),
            seat.row.as_deref().unwrap_or(""),
        )
    });
    if candidates.is_empty() {
        candidates = scan(available, quantity, |seat| {
            (seat.block.as_str(), seat.floor.as_str(), "")
        });
    }
    if candidates.is_empty() {
        return None;
    }

    let preferred: HashSet<&Uuid> = preferred.iter().collect();
    let (min, max) = available
        .iter()
        .fold((u32::MAX, u32::MIN), |(lo, hi), seat| {
            (lo.min(seat.number), hi.max(seat.number))
        });
    let center = (f64::from(min) + f64::from(max)) / 2.0;

    let preferred_hits = |run: &[&Seat]| run.iter().filter(|s| preferred.contains(&s.id)).count();
    let distance = |run: &[&Seat]| {
        let mean = run.iter().map(|s| f64::from(s.number)).sum::<f64>() / run.len() as f64;
        (mean - center).abs()
    };

    // `sort_by` is stable, which keeps scan order for full ties.
    candidates.sort_by(|a, b| {
        preferred_hits(b)
            .cmp(&preferred_hits(a))
            .then_with(|| {
                distance(a)
                    .partial_cmp(&distance(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    candidates
        .into_iter()
        .next()
        .map(|run| run.into_iter().cloned().collect())
}

/// Every consecutive window of `quantity` seats per group, groups visited in
/// order of first appearance.
fn scan<'a, K, F>(seats: &'a [Seat], quantity: usize, key_of: F) -> Vec<Vec<&'a Seat>>
where
    K: Eq + std::hash::Hash,
    F: Fn(&'a Seat) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<&'a Seat>> = Vec::new();
    for seat in seats {
        let slot = *index.entry(key_of(seat)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(seat);
    }

    let mut runs = Vec::new();
    for group in &mut groups {
        group.sort_by_key(|seat| seat.number);
        for window in group.windows(quantity) {
            let consecutive = window
                .windows(2)
                .all(|pair| pair[0].number.checked_add(1) == Some(pair[1].number));
            if consecutive {
                runs.push(window.to_vec());
            }
        }
    }
    runs
}
