//! Partition sinusoids into optimization groups by amplitude.
//!
//! Joint non-linear fits scale badly with parameter count, so sinusoids are
//! optimized in blocks. Sorting by descending amplitude puts the components
//! that interact most strongly with the residual in the same early groups,
//! and each cut is placed at the largest amplitude gap inside the allowed
//! size window so near-equal components stay together.

/// Partition indices `0..ampls.len()` into groups of descending amplitude.
///
/// Every group except the last has between `min_group` and `max_group`
/// members; the trailing group absorbs whatever remains and may be smaller.
pub fn group_partition(ampls: &[f64], min_group: usize, max_group: usize) -> Vec<Vec<usize>> {
    if ampls.is_empty() {
        return Vec::new();
    }
    let min_group = min_group.max(1);
    let max_group = max_group.max(min_group);

    let mut order: Vec<usize> = (0..ampls.len()).collect();
    order.sort_by(|&a, &b| {
        ampls[b]
            .partial_cmp(&ampls[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut groups = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let remaining = order.len() - start;
        if remaining <= max_group {
            groups.push(order[start..].to_vec());
            break;
        }

        // Cut at the largest amplitude gap within the size window. `lo` and
        // `hi` are the last admissible member positions of this group.
        let lo = start + min_group - 1;
        let hi = (start + max_group - 1).min(order.len() - 2);
        let mut cut = lo;
        let mut best_gap = f64::NEG_INFINITY;
        for i in lo..=hi {
            let gap = ampls[order[i]] - ampls[order[i + 1]];
            if gap > best_gap {
                best_gap = gap;
                cut = i;
            }
        }
        groups.push(order[start..=cut].to_vec());
        start = cut + 1;
    }
    groups
}
