//! Average-linkage agglomerative clustering (UPGMA).
//!
//! Operates on a condensed pairwise-distance vector in canonical
//! combination order (`i < j`). Clusters are merged while the smallest
//! average inter-cluster distance stays at or below the cut, which is
//! equivalent to cutting the (monotonic) UPGMA dendrogram at that height.

/// Cluster `n` observations and cut the dendrogram at `cut`.
///
/// Returns one label per observation; labels are assigned in order of the
/// smallest member index of each final cluster, starting at 0.
pub fn upgma_labels(condensed: &[f64], n: usize, cut: f64) -> Vec<usize> {
    assert_eq!(
        condensed.len(),
        n * n.saturating_sub(1) / 2,
        "condensed distance vector length does not match the observation count"
    );
    if n == 0 {
        return Vec::new();
    }

    // Working inter-cluster distance matrix and the member lists.
    let mut active: Vec<bool> = vec![true; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut dist: Vec<Vec<f64>> = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = condensed[condensed_index(i, j, n)];
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    loop {
        // Smallest inter-cluster distance; ties resolve to the lowest
        // index pair.
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !active[j] {
                    continue;
                }
                if best.map(|(_, _, d)| dist[i][j] < d).unwrap_or(true) {
                    best = Some((i, j, dist[i][j]));
                }
            }
        }
        let Some((i, j, d)) = best else {
            break;
        };
        if d > cut {
            break;
        }
        // Merge j into i with Lance-Williams average-linkage update.
        let ni = members[i].len() as f64;
        let nj = members[j].len() as f64;
        for k in 0..n {
            if !active[k] || k == i || k == j {
                continue;
            }
            let updated = (ni * dist[i][k] + nj * dist[j][k]) / (ni + nj);
            dist[i][k] = updated;
            dist[k][i] = updated;
        }
        let moved = std::mem::take(&mut members[j]);
        members[i].extend(moved);
        active[j] = false;
    }

    // Label clusters by their smallest member index.
    let mut clusters: Vec<&Vec<usize>> = (0..n).filter(|&i| active[i]).map(|i| &members[i]).collect();
    clusters.sort_by_key(|m| *m.iter().min().expect("clusters are non-empty"));
    let mut labels = vec![0usize; n];
    for (label, cluster) in clusters.iter().enumerate() {
        for &member in cluster.iter() {
            labels[member] = label;
        }
    }
    labels
}

/// Index of `(i, j)` (`i < j`) in a condensed distance vector of `n`
/// observations.
pub fn condensed_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}
