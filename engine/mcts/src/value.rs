//! Utility math: turning raw win/loss/score values into the scalar the
//! selection formula maximizes, plus the precomputed distribution used to
//! down-weight outlier child values during stats recomputation.
//!
//! All utilities in this module are white-centric; flipping to the
//! perspective of the player to move happens at the parent-child boundary
//! in selection, never here.

use crate::evaluator::NnOutput;
use crate::params::SearchParams;

/// Utility of the game outcome distribution alone.
#[inline]
pub fn result_utility(win: f64, loss: f64, no_result: f64, params: &SearchParams) -> f64 {
    params.win_loss_utility_factor * (win - loss) + params.no_result_utility * no_result
}

/// Bounded utility of an expected score, in absolute board terms.
#[inline]
pub fn static_score_utility(score_mean: f64, params: &SearchParams) -> f64 {
    params.static_score_utility_factor * (score_mean / params.static_score_scale).tanh()
}

/// Bounded utility of an expected score relative to the center recomputed at
/// the start of each search, so it has zero mean on neutral positions.
#[inline]
pub fn dynamic_score_utility(score_mean: f64, center: f64, params: &SearchParams) -> f64 {
    params.dynamic_score_utility_factor
        * ((score_mean - center) / params.dynamic_score_scale).tanh()
}

#[inline]
pub fn combined_utility(
    win: f64,
    loss: f64,
    no_result: f64,
    score_mean: f64,
    score_center: f64,
    params: &SearchParams,
) -> f64 {
    result_utility(win, loss, no_result, params)
        + static_score_utility(score_mean, params)
        + dynamic_score_utility(score_mean, score_center, params)
}

/// Utility of a raw NN evaluation.
pub fn utility_from_nn(out: &NnOutput, score_center: f64, params: &SearchParams) -> f64 {
    combined_utility(
        out.white_win_prob as f64,
        out.white_loss_prob as f64,
        out.no_result_prob as f64,
        out.white_score_mean as f64,
        score_center,
        params,
    )
}

/// Utility of accumulated node sums. Returns `None` when no weight has been
/// accumulated yet.
#[allow(clippy::too_many_arguments)]
pub fn utility_of_sums(
    win_value_sum: f64,
    no_result_value_sum: f64,
    score_mean_sum: f64,
    value_sum_weight: f64,
    score_center: f64,
    params: &SearchParams,
) -> Option<f64> {
    if value_sum_weight <= 0.0 {
        return None;
    }
    let win = win_value_sum / value_sum_weight;
    let no_result = no_result_value_sum / value_sum_weight;
    let loss = (1.0 - win - no_result).max(0.0);
    let score_mean = score_mean_sum / value_sum_weight;
    Some(combined_utility(
        win,
        loss,
        no_result,
        score_mean,
        score_center,
        params,
    ))
}

// Scale relating a child's utility deficit to the stdev of its estimate.
// Together with the 1/sqrt(visits) shrinkage below this fixes the shape of
// the down-weighting curve; the curve is not externally tunable.
const VALUE_WEIGHT_STDEV: f64 = 0.25;

/// Precomputed standard-normal CDF over a clamped z range, sampled finely
/// enough that linear interpolation is exact to ~1e-5.
pub struct DistributionTable {
    cdf: Vec<f64>,
    min_z: f64,
    max_z: f64,
}

impl DistributionTable {
    pub fn new(size: usize) -> DistributionTable {
        let (min_z, max_z) = (-6.0, 6.0);
        let cdf = (0..size)
            .map(|i| {
                let z = min_z + (max_z - min_z) * (i as f64) / ((size - 1) as f64);
                normal_cdf(z)
            })
            .collect();
        DistributionTable { cdf, min_z, max_z }
    }

    pub fn cdf(&self, z: f64) -> f64 {
        if z <= self.min_z {
            return 0.0;
        }
        if z >= self.max_z {
            return 1.0;
        }
        let t = (z - self.min_z) / (self.max_z - self.min_z) * ((self.cdf.len() - 1) as f64);
        let i = t as usize;
        let frac = t - i as f64;
        self.cdf[i] * (1.0 - frac) + self.cdf[i + 1] * frac
    }

    /// Weights in (0, 1] for aggregating child values into a parent.
    ///
    /// `self_utilities` are from the perspective of the player choosing
    /// among these children. A child whose utility sits far below the best
    /// child's, relative to the uncertainty implied by its visit count,
    /// contributes less: it was an exploration detour, not a candidate.
    pub fn value_child_weights(
        &self,
        self_utilities: &[f64],
        visits: &[i64],
        out: &mut Vec<f64>,
    ) {
        debug_assert_eq!(self_utilities.len(), visits.len());
        out.clear();
        let best = self_utilities
            .iter()
            .zip(visits)
            .filter(|(_, &n)| n > 0)
            .map(|(&u, _)| u)
            .fold(f64::NEG_INFINITY, f64::max);
        for (&u, &n) in self_utilities.iter().zip(visits) {
            if n <= 0 {
                out.push(0.0);
                continue;
            }
            let stdev = VALUE_WEIGHT_STDEV / (n as f64).sqrt();
            let z = (u - best) / stdev;
            // cdf(z) is 1/2 at the best child; rescale so it gets weight 1.
            out.push((2.0 * self.cdf(z)).min(1.0));
        }
    }
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation.
fn normal_cdf(z: f64) -> f64 {
    let x = z / std::f64::consts::SQRT_2;
    0.5 * (1.0 + erf(x))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utility_signs() {
        let params = SearchParams::default();
        assert!(result_utility(1.0, 0.0, 0.0, &params) > 0.0);
        assert!(result_utility(0.0, 1.0, 0.0, &params) < 0.0);
        assert_eq!(result_utility(0.5, 0.5, 0.0, &params), 0.0);
        assert!(static_score_utility(10.0, &params) > 0.0);
        assert!(static_score_utility(-10.0, &params) < 0.0);
    }

    #[test]
    fn dynamic_utility_centers() {
        let params = SearchParams::default();
        assert_eq!(dynamic_score_utility(5.0, 5.0, &params), 0.0);
        assert!(dynamic_score_utility(8.0, 5.0, &params) > 0.0);
        assert!(dynamic_score_utility(2.0, 5.0, &params) < 0.0);
    }

    #[test]
    fn cdf_table_matches_known_points() {
        let table = DistributionTable::new(4096);
        assert!((table.cdf(0.0) - 0.5).abs() < 1e-4);
        assert!((table.cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((table.cdf(-1.96) - 0.025).abs() < 1e-3);
        assert_eq!(table.cdf(-10.0), 0.0);
        assert_eq!(table.cdf(10.0), 1.0);
    }

    #[test]
    fn child_weights_downweight_outliers() {
        let table = DistributionTable::new(4096);
        let utilities = [0.5, 0.48, -0.5];
        let visits = [100, 80, 50];
        let mut weights = Vec::new();
        table.value_child_weights(&utilities, &visits, &mut weights);
        assert!(weights[0] > 0.999_999);
        // Near the best: keeps most of its weight.
        assert!(weights[1] > 0.2);
        // A clear outlier: heavily discounted.
        assert!(weights[2] < 0.01);
        // Monotone in utility at similar visit counts.
        assert!(weights[1] > weights[2]);
    }

    #[test]
    fn unvisited_children_get_zero_weight() {
        let table = DistributionTable::new(512);
        let mut weights = Vec::new();
        table.value_child_weights(&[0.3, 0.1], &[10, 0], &mut weights);
        assert_eq!(weights[1], 0.0);
    }
}
