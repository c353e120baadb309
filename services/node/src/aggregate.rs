//! Weight aggregation math shared by the aggregator and gossip actors.

use fedmesh_wire::ModelWeights;

/// FedAvg: the arithmetic mean of a non-empty set of weight vectors.
///
/// Coefficient vectors shorter than the widest participant are treated as
/// zero-extended.
pub fn mean(shares: &[ModelWeights]) -> Option<ModelWeights> {
    weighted_mean(shares, &vec![1.0; shares.len()])
}

/// Weighted mean with the given per-share weights; weights are normalized
/// to sum to 1 before averaging.
pub fn weighted_mean(shares: &[ModelWeights], weights: &[f64]) -> Option<ModelWeights> {
    if shares.is_empty() || shares.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let width = shares.iter().map(|s| s.coef.len()).max().unwrap_or(0);
    let mut coef = vec![0.0; width];
    let mut intercept = 0.0;
    for (share, w) in shares.iter().zip(weights) {
        let w = w / total;
        for (i, c) in share.coef.iter().enumerate() {
            coef[i] += w * c;
        }
        intercept += w * share.intercept;
    }
    Some(ModelWeights::new(coef, intercept))
}

/// FedProx blend: `new = (1 - mu) * avg + mu * previous`.
pub fn blend(avg: &ModelWeights, previous: &ModelWeights, mu: f64) -> ModelWeights {
    let width = avg.coef.len().max(previous.coef.len());
    let mut coef = Vec::with_capacity(width);
    for i in 0..width {
        let a = avg.coef.get(i).copied().unwrap_or(0.0);
        let p = previous.coef.get(i).copied().unwrap_or(0.0);
        coef.push((1.0 - mu) * a + mu * p);
    }
    let intercept = (1.0 - mu) * avg.intercept + mu * previous.intercept;
    ModelWeights::new(coef, intercept)
}

/// Convergence distance: L2 on coefficients plus the absolute intercept
/// difference.
pub fn distance(a: &ModelWeights, b: &ModelWeights) -> f64 {
    let width = a.coef.len().max(b.coef.len());
    let mut sq = 0.0;
    for i in 0..width {
        let d = a.coef.get(i).copied().unwrap_or(0.0) - b.coef.get(i).copied().unwrap_or(0.0);
        sq += d * d;
    }
    sq.sqrt() + (a.intercept - b.intercept).abs()
}
