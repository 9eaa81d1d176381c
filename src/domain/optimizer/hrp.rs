//! Hierarchical risk parity.
//!
//! 1. Correlation distance d_ij = √((1 - ρ_ij) / 2).
//! 2. Single-linkage agglomerative clustering on the Euclidean distance
//!    between rows of d.
//! 3. Quasi-diagonal ordering: the leaves of the cluster tree left to right.
//! 4. Recursive bisection of the ordered list, splitting weight between the
//!    halves in inverse proportion to their cluster variances.
//!
//! Only cluster-level variances are used; Σ is never inverted.

use log::debug;
use nalgebra::{DMatrix, DVector};

use super::correlation_from_covariance;

/// One merge of the agglomerative clustering. Ids below N are assets;
/// merge k creates cluster N + k.
#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
}

pub(crate) fn solve(cov: &DMatrix<f64>) -> DVector<f64> {
    let n = cov.nrows();
    if n == 1 {
        return DVector::from_element(1, 1.0);
    }
    let corr = correlation_from_covariance(cov);
    let distance = correlation_distance(&corr);
    let links = single_linkage(&distance_between_rows(&distance));
    let order = quasi_diagonal_order(&links, n);
    debug!("hrp leaf order: {order:?}");
    recursive_bisection(cov, &order)
}

/// d_ij = √((1 - ρ_ij) / 2), in [0, 1].
pub fn correlation_distance(corr: &DMatrix<f64>) -> DMatrix<f64> {
    corr.map(|rho| ((1.0 - rho) / 2.0).max(0.0).sqrt())
}

/// Euclidean distance between rows of a distance matrix.
fn distance_between_rows(d: &DMatrix<f64>) -> DMatrix<f64> {
    let n = d.nrows();
    DMatrix::from_fn(n, n, |i, j| (d.row(i) - d.row(j)).norm())
}

/// Single-linkage merges, closest pair first. Ties go to the pair with the
/// lowest ids, and each merge lists the lower id on the left.
pub fn single_linkage(dist: &DMatrix<f64>) -> Vec<Linkage> {
    let n = dist.nrows();
    // (cluster id, member assets)
    let mut active: Vec<(usize, Vec<usize>)> = (0..n).map(|i| (i, vec![i])).collect();
    let mut links = Vec::with_capacity(n.saturating_sub(1));

    while active.len() > 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..active.len() {
            for b in (a + 1)..active.len() {
                let d = cluster_distance(dist, &active[a].1, &active[b].1);
                let better = match best {
                    None => true,
                    Some((_, _, best_d)) => d < best_d,
                };
                if better {
                    best = Some((a, b, d));
                }
            }
        }
        let Some((a, b, d)) = best else { break };

        let (id_b, members_b) = active.remove(b);
        let (id_a, members_a) = active.remove(a);
        let (left, right) = (id_a.min(id_b), id_a.max(id_b));
        let mut members = members_a;
        members.extend(members_b);
        links.push(Linkage {
            left,
            right,
            distance: d,
        });
        active.push((n + links.len() - 1, members));
        active.sort_by_key(|(id, _)| *id);
    }
    links
}

fn cluster_distance(dist: &DMatrix<f64>, a: &[usize], b: &[usize]) -> f64 {
    a.iter()
        .flat_map(|&i| b.iter().map(move |&j| dist[(i, j)]))
        .fold(f64::INFINITY, f64::min)
}

/// Leaves of the linkage tree, left subtree first.
pub fn quasi_diagonal_order(links: &[Linkage], n: usize) -> Vec<usize> {
    if links.is_empty() {
        return (0..n).collect();
    }
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![n + links.len() - 1];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
        } else {
            let link = &links[node - n];
            stack.push(link.right);
            stack.push(link.left);
        }
    }
    order
}

/// Weights in asset order from a leaf ordering.
pub fn recursive_bisection(cov: &DMatrix<f64>, order: &[usize]) -> DVector<f64> {
    let mut w = DVector::from_element(cov.nrows(), 1.0);
    let mut pending: Vec<&[usize]> = vec![order];
    while let Some(items) = pending.pop() {
        if items.len() < 2 {
            continue;
        }
        let (left, right) = items.split_at(items.len() / 2);
        let left_var = cluster_variance(cov, left);
        let right_var = cluster_variance(cov, right);
        let total = left_var + right_var;
        let alpha = if total > 0.0 {
            1.0 - left_var / total
        } else {
            0.5
        };
        for &i in left {
            w[i] *= alpha;
        }
        for &i in right {
            w[i] *= 1.0 - alpha;
        }
        pending.push(left);
        pending.push(right);
    }
    let total = w.sum();
    if total > 0.0 {
        w / total
    } else {
        DVector::from_element(cov.nrows(), 1.0 / cov.nrows() as f64)
    }
}

/// Variance of the inverse-variance portfolio over `items`. A zero-variance
/// member makes the cluster riskless.
pub fn cluster_variance(cov: &DMatrix<f64>, items: &[usize]) -> f64 {
    if items.iter().any(|&i| cov[(i, i)] <= 0.0) {
        return 0.0;
    }
    let inv: Vec<f64> = items.iter().map(|&i| 1.0 / cov[(i, i)]).collect();
    let inv_total: f64 = inv.iter().sum();
    let w: Vec<f64> = inv.iter().map(|v| v / inv_total).collect();
    let mut var = 0.0;
    for (a, &i) in items.iter().enumerate() {
        for (b, &j) in items.iter().enumerate() {
            var += w[a] * w[b] * cov[(i, j)];
        }
    }
    var.max(0.0)
}
