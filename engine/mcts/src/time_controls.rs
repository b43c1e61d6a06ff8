//! Clock state and the per-move time budget.

use crate::params::SearchParams;

/// Remaining clock for one player: absolute main time plus optional
/// byo-yomi periods of `per_period_time` seconds covering
/// `num_stones_left` moves each.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeControls {
    pub main_time_left: f64,
    pub per_period_time: f64,
    pub num_periods_left: i32,
    pub num_stones_left: i32,
}

// Effectively no clock at all.
const UNLIMITED: f64 = 1e20;

impl TimeControls {
    pub fn unlimited() -> TimeControls {
        TimeControls {
            main_time_left: UNLIMITED,
            per_period_time: 0.0,
            num_periods_left: 0,
            num_stones_left: 0,
        }
    }

    /// Absolute main time only.
    pub fn absolute(main_time: f64) -> TimeControls {
        TimeControls {
            main_time_left: main_time,
            per_period_time: 0.0,
            num_periods_left: 0,
            num_stones_left: 0,
        }
    }

    pub fn byo_yomi(main_time: f64, period: f64, periods: i32, stones: i32) -> TimeControls {
        TimeControls {
            main_time_left: main_time,
            per_period_time: period,
            num_periods_left: periods,
            num_stones_left: stones.max(1),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.main_time_left >= UNLIMITED
    }

    /// Wall-clock budget for the move about to be searched.
    ///
    /// `search_factor` scales the desired spend (pondering restarts, winning
    /// reductions). The hard cap, all the time actually on the clock minus
    /// the lag buffer, is never exceeded regardless of the factor.
    pub fn time_for_move(&self, params: &SearchParams, search_factor: f64) -> f64 {
        if self.is_unlimited() {
            return UNLIMITED;
        }
        // Spread main time over a horizon of expected remaining moves; once
        // in byo-yomi, a period per move is the natural spend.
        const MOVE_HORIZON: f64 = 24.0;
        let mut desired = self.main_time_left / MOVE_HORIZON;
        if self.num_periods_left > 0 {
            let per_move = self.per_period_time / self.num_stones_left.max(1) as f64;
            if self.main_time_left <= 0.0 {
                desired = per_move;
            } else {
                desired = desired.max(per_move * 0.5);
            }
        }
        desired *= search_factor.max(0.0);

        let mut cap = self.main_time_left.max(0.0);
        if self.num_periods_left > 0 {
            // Spending into the current period is safe; later periods are
            // reserve.
            cap += self.per_period_time;
        }
        cap = (cap - params.lag_buffer).max(0.0);
        desired.clamp(0.0, cap)
    }
}

impl Default for TimeControls {
    fn default() -> TimeControls {
        TimeControls::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_caps() {
        let tc = TimeControls::unlimited();
        let params = SearchParams::default();
        assert!(tc.time_for_move(&params, 1.0) > 1e19);
    }

    #[test]
    fn budget_stays_under_clock_plus_lag() {
        let params = SearchParams::default();
        let tc = TimeControls::absolute(1.0);
        let budget = tc.time_for_move(&params, 1.0);
        assert!(budget > 0.0);
        assert!(budget <= 1.0 + params.lag_buffer);
    }

    #[test]
    fn byo_yomi_grants_period_per_move() {
        let params = SearchParams::default();
        let tc = TimeControls::byo_yomi(0.0, 30.0, 5, 1);
        let budget = tc.time_for_move(&params, 1.0);
        assert!((budget - 30.0).abs() < params.lag_buffer + 1e-9);
    }

    #[test]
    fn search_factor_scales_but_never_exceeds_cap() {
        let params = SearchParams::default();
        let tc = TimeControls::absolute(10.0);
        let normal = tc.time_for_move(&params, 1.0);
        let reduced = tc.time_for_move(&params, 0.4);
        assert!(reduced < normal);
        let huge = tc.time_for_move(&params, 1e6);
        assert!(huge <= 10.0 - params.lag_buffer + 1e-9);
    }
}
