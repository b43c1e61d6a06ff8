//! Search configuration parameters.
//!
//! Every knob the search core recognizes lives here. Defaults are reasonable
//! starting points, not tuned values; serious use supplies them from config.

use serde::Deserialize;
use thiserror::Error;

/// Errors from malformed search parameters. Fatal at setup time.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("numSearchThreads must be >= 1, got {0}")]
    BadThreadCount(usize),

    #[error("{name} must be in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("failed to parse search params: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for a [`crate::Search`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SearchParams {
    /// Number of OS threads descending the shared tree.
    pub num_search_threads: usize,
    /// Advisory batch size for the evaluator: how many concurrent requests
    /// it should expect to be able to coalesce. The search itself never
    /// batches; it just blocks more threads than this into the evaluator.
    pub nn_max_batch_size: usize,
    /// Playouts per whole search. `i64::MAX` means unbounded.
    pub max_playouts: i64,
    /// Cap on root visits per whole search (counts reused subtree visits).
    pub max_visits: i64,

    /// Exploration constant in the PUCT formula.
    pub c_puct: f64,
    /// First-play-urgency reduction, scaled by sqrt of visited policy mass.
    pub fpu_reduction: f64,

    /// Mix Dirichlet noise into the root policy each search.
    pub root_noise_enabled: bool,
    pub root_dirichlet_alpha: f64,
    pub root_dirichlet_epsilon: f64,
    /// Exponent softening (>1) or sharpening (<1) of the root policy.
    pub root_policy_temperature: f64,

    /// Weight of the win/loss difference in the utility.
    pub win_loss_utility_factor: f64,
    /// Utility credited to a no-result outcome (draws under some rules).
    pub no_result_utility: f64,
    /// Weight and scale of the board-absolute score term.
    pub static_score_utility_factor: f64,
    pub static_score_scale: f64,
    /// Weight and scale of the score term re-centered per search.
    pub dynamic_score_utility_factor: f64,
    pub dynamic_score_scale: f64,
    /// Pull of the recent score center toward zero between searches.
    pub recent_score_center_zero_weight: f64,

    /// Virtual losses added to a child per in-flight descent through it.
    pub virtual_loss_count: i32,

    /// Recompute a node's stats from its children every this many visits,
    /// down-weighting outlier child values. 0 disables recomputation.
    pub value_weight_recompute_interval: i64,

    /// Score points at stake in the endgame shaping bonuses (pass bonus,
    /// wasted moves inside pass-alive territory).
    pub ending_bonus_points: f64,

    /// Move-selection temperature over play-selection values, with a higher
    /// early-game value decaying by `chosen_move_temperature_halflife` moves.
    pub chosen_move_temperature: f64,
    pub chosen_move_temperature_early: f64,
    pub chosen_move_temperature_halflife: f64,
    /// Subtracted from each child's visits before selection, damping
    /// single-visit noise.
    pub chosen_move_subtract: f64,

    /// Budget multiplier once the root win-loss value (for the mover)
    /// exceeds the threshold.
    pub search_factor_when_winning: f64,
    pub search_factor_when_winning_threshold: f64,
    /// Seconds held back from every time budget for transport lag.
    pub lag_buffer: f64,

    /// Resignation knobs, consumed by the driving game loop via the root
    /// value accessors; the search itself never resigns.
    pub allow_resignation: bool,
    pub resign_threshold: f64,
    pub resign_consec_turns: u32,
}

impl Default for SearchParams {
    fn default() -> SearchParams {
        SearchParams {
            num_search_threads: 1,
            nn_max_batch_size: 16,
            max_playouts: i64::MAX,
            max_visits: i64::MAX,
            c_puct: 1.1,
            fpu_reduction: 0.2,
            root_noise_enabled: false,
            root_dirichlet_alpha: 0.3,
            root_dirichlet_epsilon: 0.25,
            root_policy_temperature: 1.0,
            win_loss_utility_factor: 1.0,
            no_result_utility: 0.0,
            static_score_utility_factor: 0.1,
            static_score_scale: 30.0,
            dynamic_score_utility_factor: 0.3,
            dynamic_score_scale: 20.0,
            recent_score_center_zero_weight: 0.2,
            virtual_loss_count: 3,
            value_weight_recompute_interval: 32,
            ending_bonus_points: 0.5,
            chosen_move_temperature: 0.1,
            chosen_move_temperature_early: 0.5,
            chosen_move_temperature_halflife: 19.0,
            chosen_move_subtract: 0.0,
            search_factor_when_winning: 0.4,
            search_factor_when_winning_threshold: 0.95,
            lag_buffer: 0.1,
            allow_resignation: false,
            resign_threshold: -0.95,
            resign_consec_turns: 3,
        }
    }
}

impl SearchParams {
    /// Parse from TOML, with unset fields defaulted, then validate.
    pub fn from_toml_str(s: &str) -> Result<SearchParams, ParamsError> {
        let params: SearchParams = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_search_threads == 0 {
            return Err(ParamsError::BadThreadCount(self.num_search_threads));
        }
        if self.nn_max_batch_size == 0 {
            return Err(ParamsError::OutOfRange {
                name: "nnMaxBatchSize",
                range: "[1, inf)",
                value: 0.0,
            });
        }
        let positive = [
            ("cPuct", self.c_puct),
            ("staticScoreScale", self.static_score_scale),
            ("dynamicScoreScale", self.dynamic_score_scale),
            ("rootPolicyTemperature", self.root_policy_temperature),
            ("rootDirichletAlpha", self.root_dirichlet_alpha),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(ParamsError::OutOfRange {
                    name,
                    range: "(0, inf)",
                    value,
                });
            }
        }
        let unit = [
            ("rootDirichletEpsilon", self.root_dirichlet_epsilon),
            (
                "recentScoreCenterZeroWeight",
                self.recent_score_center_zero_weight,
            ),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ParamsError::OutOfRange {
                    name,
                    range: "[0, 1]",
                    value,
                });
            }
        }
        if self.virtual_loss_count < 0 {
            return Err(ParamsError::OutOfRange {
                name: "virtualLossCount",
                range: "[0, inf)",
                value: self.virtual_loss_count as f64,
            });
        }
        Ok(())
    }

    /// A small fast configuration for tests.
    pub fn for_testing() -> SearchParams {
        SearchParams {
            max_playouts: 100,
            max_visits: 100,
            chosen_move_temperature: 0.0,
            chosen_move_temperature_early: 0.0,
            ending_bonus_points: 0.0,
            ..SearchParams::default()
        }
    }

    pub fn with_threads(mut self, n: usize) -> SearchParams {
        self.num_search_threads = n;
        self
    }

    pub fn with_max_visits(mut self, n: i64) -> SearchParams {
        self.max_visits = n;
        self
    }

    pub fn with_max_playouts(mut self, n: i64) -> SearchParams {
        self.max_playouts = n;
        self
    }

    /// Combined magnitude of a certain win plus maximal score utility; the
    /// utility of a hopeless position is the negative of this.
    pub fn max_utility(&self) -> f64 {
        self.win_loss_utility_factor
            + self.static_score_utility_factor
            + self.dynamic_score_utility_factor
    }
}
