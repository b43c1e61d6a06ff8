//! The search façade and whole-search driver.
//!
//! A [`Search`] owns the tree, the mutex pool, and the root position.
//! Structural operations (installing positions, committing moves, changing
//! parameters) take `&mut self`; the playout loop runs over `&self` from
//! many threads at once, with all shared mutation going through the
//! per-node locks.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Gamma};
use thiserror::Error;
use tracing::{debug, warn};

use go_core::{Board, BoardHistory, Color, Loc, Player, Rules, RulesError};

use crate::evaluator::{EvalError, NnEvaluator, NUM_SYMMETRIES};
use crate::mutex_pool::MutexPool;
use crate::node::{drop_subtree, SearchNode};
use crate::params::{ParamsError, SearchParams};
use crate::playout::{self, SearchThread};
use crate::time_controls::TimeControls;
use crate::value::{self, DistributionTable};

const MUTEX_POOL_SIZE: usize = 4096;
const DISTRIBUTION_TABLE_SIZE: usize = 2048;
/// Playouts between time-policy evaluations in single-threaded mode, and
/// the poll period of the supervising thread in multi-threaded mode.
const TIME_CHECK_PLAYOUT_INTERVAL: i64 = 16;
const SUPERVISOR_POLL: Duration = Duration::from_millis(5);

/// Errors that abort a whole search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("evaluator failed: {0}")]
    Eval(#[from] EvalError),
}

/// Aggregate values recorded at a node, white-centric, plus derived score
/// spread. Score "values" here are the bounded squashings without their
/// utility weights.
#[derive(Debug, Clone, Copy)]
pub struct NodeValues {
    pub win_value: f64,
    pub loss_value: f64,
    pub no_result_value: f64,
    pub static_score_value: f64,
    pub dynamic_score_value: f64,
    pub expected_score: f64,
    pub expected_score_stdev: f64,
}

/// Per-root-child numbers used to pick the move to actually play.
#[derive(Debug, Clone, Default)]
pub struct PlaySelectionValues {
    pub locs: Vec<Loc>,
    pub values: Vec<f64>,
    /// Total child visits before any filtering or subtraction.
    pub unreduced_num_visits: i64,
}

pub struct Search {
    root_pla: Player,
    root_board: Board,
    root_history: BoardHistory,
    root_pass_legal: bool,
    allowed_root_moves: Option<Vec<Loc>>,
    root_safe_area: Vec<Color>,
    recent_score_center: f64,
    params: SearchParams,
    num_searches_begun: u64,
    rand_seed: String,

    root_node: Option<Box<SearchNode>>,
    root_noised_policy: Option<Vec<f32>>,

    mutex_pool: MutexPool,
    nn_eval: Arc<dyn NnEvaluator>,
    value_weight_distribution: DistributionTable,
    num_playouts: AtomicI64,
    // Only for use outside the playout loop; per-thread RNGs live in
    // SearchThread.
    non_search_rng: ChaCha20Rng,
}

impl Search {
    pub fn new(
        params: SearchParams,
        nn_eval: Arc<dyn NnEvaluator>,
        rand_seed: &str,
    ) -> Result<Search, ParamsError> {
        params.validate()?;
        let root_board = Board::new(19).expect("19 is a legal board size");
        let root_history = BoardHistory::new(&root_board, Player::Black, Rules::default());
        let mut seed_rng = ChaCha20Rng::seed_from_u64(playout::splitmix64(
            rand_seed.bytes().fold(0u64, |h, b| {
                playout::splitmix64(h ^ b as u64)
            }),
        ));
        let non_search_rng = ChaCha20Rng::seed_from_u64(seed_rng.gen());
        let safe_len = root_board.pass_alive_area().len();
        Ok(Search {
            root_pla: Player::Black,
            root_board,
            root_history,
            root_pass_legal: true,
            allowed_root_moves: None,
            root_safe_area: vec![Color::Empty; safe_len],
            recent_score_center: 0.0,
            params,
            num_searches_begun: 0,
            rand_seed: rand_seed.to_string(),
            root_node: None,
            root_noised_policy: None,
            mutex_pool: MutexPool::new(MUTEX_POOL_SIZE),
            nn_eval,
            value_weight_distribution: DistributionTable::new(DISTRIBUTION_TABLE_SIZE),
            num_playouts: AtomicI64::new(0),
            non_search_rng,
        })
    }

    // ---- accessors ------------------------------------------------------

    pub fn root_board(&self) -> &Board {
        &self.root_board
    }

    pub fn root_history(&self) -> &BoardHistory {
        &self.root_history
    }

    pub fn root_pla(&self) -> Player {
        self.root_pla
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Pass-alive territory computed at the last `begin_search`, indexed by
    /// location.
    pub fn root_safe_area(&self) -> &[Color] {
        &self.root_safe_area
    }

    pub fn num_playouts_this_search(&self) -> i64 {
        self.num_playouts.load(Ordering::Acquire)
    }

    pub(crate) fn nn_eval(&self) -> &dyn NnEvaluator {
        &*self.nn_eval
    }

    pub(crate) fn mutex_pool(&self) -> &MutexPool {
        &self.mutex_pool
    }

    pub(crate) fn root_node_ref(&self) -> Option<&SearchNode> {
        self.root_node.as_deref()
    }

    pub(crate) fn root_noised_policy(&self) -> Option<&[f32]> {
        self.root_noised_policy.as_deref()
    }

    pub(crate) fn recent_score_center(&self) -> f64 {
        self.recent_score_center
    }

    pub(crate) fn rand_seed(&self) -> &str {
        &self.rand_seed
    }

    pub(crate) fn num_searches_begun(&self) -> u64 {
        self.num_searches_begun
    }

    pub(crate) fn value_weight_distribution(&self) -> &DistributionTable {
        &self.value_weight_distribution
    }

    pub(crate) fn is_allowed_root_move(&self, loc: Loc) -> bool {
        if loc.is_pass() && !self.root_pass_legal {
            return false;
        }
        match &self.allowed_root_moves {
            Some(allowed) => allowed.contains(&loc),
            None => true,
        }
    }

    // ---- outside-of-search operations -----------------------------------

    /// Install a new root position, discarding any existing tree.
    pub fn set_position(&mut self, pla: Player, board: Board, history: BoardHistory) {
        self.clear_search();
        self.root_safe_area = vec![Color::Empty; board.pass_alive_area().len()];
        self.root_pla = pla;
        self.root_board = board;
        self.root_history = history;
    }

    /// Keep the stones, restart the history with `pla` to move.
    pub fn set_player_and_clear_history(&mut self, pla: Player) {
        self.clear_search();
        self.root_pla = pla;
        self.root_history = BoardHistory::new(&self.root_board, pla, self.root_history.rules);
    }

    pub fn set_rules_and_clear_history(&mut self, rules: Rules) {
        self.clear_search();
        self.root_history = BoardHistory::new(&self.root_board, self.root_pla, rules);
    }

    /// Update komi. Clears the search only when the value actually changes;
    /// the move history is preserved either way.
    pub fn set_komi_if_new(&mut self, komi: f32) -> Result<(), RulesError> {
        if komi == self.root_history.rules.komi {
            return Ok(());
        }
        let new_rules = self.root_history.rules.with_komi(komi)?;
        self.clear_search();
        self.root_history.rules = new_rules;
        Ok(())
    }

    pub fn set_root_pass_legal(&mut self, legal: bool) {
        self.root_pass_legal = legal;
    }

    /// Restrict the moves considered at the root; `None` lifts the
    /// restriction. Disallowed moves are skipped in selection and absent
    /// from play-selection values.
    pub fn set_allowed_root_moves(&mut self, allowed: Option<Vec<Loc>>) {
        self.allowed_root_moves = allowed;
    }

    /// Replace all parameters, clearing the search.
    pub fn set_params(&mut self, params: SearchParams) -> Result<(), ParamsError> {
        params.validate()?;
        self.clear_search();
        self.params = params;
        Ok(())
    }

    /// Replace parameters without clearing; for knobs that do not invalidate
    /// accumulated statistics (time policy, chosen-move temperature).
    pub fn set_params_no_clearing(&mut self, params: SearchParams) -> Result<(), ParamsError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_nn_eval(&mut self, nn_eval: Arc<dyn NnEvaluator>) {
        self.clear_search();
        self.nn_eval = nn_eval;
    }

    /// Drop the whole tree.
    pub fn clear_search(&mut self) {
        if let Some(root) = self.root_node.take() {
            drop_subtree(root);
        }
        self.root_noised_policy = None;
    }

    pub fn is_legal(&self, loc: Loc, pla: Player) -> bool {
        if pla == self.root_pla {
            self.root_history.is_legal(&self.root_board, loc, pla)
        } else {
            // Out-of-turn query: answer from board-local rules alone, since
            // the history describes the other player's turn.
            self.root_board.is_legal(loc, pla)
        }
    }

    /// Commit a move, reusing the matching subtree as the new root.
    ///
    /// If `pla` is not the expected mover the history is rebuilt around
    /// `pla` first (the caller is re-establishing the position). Returns
    /// false and changes nothing if the move is illegal.
    pub fn make_move(&mut self, loc: Loc, pla: Player) -> bool {
        if pla != self.root_pla {
            self.set_player_and_clear_history(pla);
        }
        if !self.root_history.is_legal(&self.root_board, loc, pla) {
            return false;
        }
        self.root_node = match self.root_node.take() {
            Some(mut old_root) => {
                let children = old_root.children_exclusive();
                let idx = children.iter().position(|c| c.prev_move_loc == loc);
                let promoted = idx.map(|i| children.swap_remove(i));
                drop_subtree(old_root);
                promoted
            }
            None => None,
        };
        self.root_noised_policy = None;
        let moved = self.root_history.make_move(&mut self.root_board, loc, pla);
        debug_assert!(moved);
        self.root_pla = pla.opponent();
        true
    }

    // ---- value queries --------------------------------------------------

    pub fn num_root_visits(&self) -> i64 {
        self.root_node.as_ref().map_or(0, |n| n.visits())
    }

    pub fn get_node_values(&self, node: &SearchNode) -> Option<NodeValues> {
        let stats = node.stats.lock().clone();
        if stats.value_sum_weight <= 0.0 {
            return None;
        }
        let inv = 1.0 / stats.value_sum_weight;
        let win_value = stats.win_value_sum * inv;
        let no_result_value = stats.no_result_value_sum * inv;
        let loss_value = (1.0 - win_value - no_result_value).max(0.0);
        let expected_score = stats.score_mean_sum * inv;
        let expected_score_sq = stats.score_mean_sq_sum * inv;
        let variance = (expected_score_sq - expected_score * expected_score).max(0.0);
        Some(NodeValues {
            win_value,
            loss_value,
            no_result_value,
            static_score_value: (expected_score / self.params.static_score_scale).tanh(),
            dynamic_score_value: ((expected_score - self.recent_score_center)
                / self.params.dynamic_score_scale)
                .tanh(),
            expected_score,
            expected_score_stdev: variance.sqrt(),
        })
    }

    pub fn get_root_values(&self) -> Option<NodeValues> {
        self.get_node_values(self.root_node.as_deref()?)
    }

    /// The root's combined utility from the root player's perspective.
    pub fn get_root_utility(&self) -> Option<f64> {
        let root = self.root_node.as_deref()?;
        let stats = root.stats.lock().clone();
        let utility_white = value::utility_of_sums(
            stats.win_value_sum,
            stats.no_result_value_sum,
            stats.score_mean_sum,
            stats.value_sum_weight,
            self.recent_score_center,
            &self.params,
        )?;
        Some(playout::from_whites_perspective(utility_white, self.root_pla))
    }

    /// Win minus loss from the root mover's perspective, in [-1, 1]. Used by
    /// the time policy and by drivers for resignation decisions.
    pub fn root_win_loss_for_mover(&self) -> Option<f64> {
        let values = self.get_root_values()?;
        let white = values.win_value - values.loss_value;
        Some(playout::from_whites_perspective(white, self.root_pla))
    }

    // ---- move selection -------------------------------------------------

    /// Play-selection values for the root children: visits with the
    /// configured subtract applied, disallowed moves skipped. If the best
    /// value falls below `scale_max_to_at_least` everything is scaled up so
    /// it reaches it.
    pub fn get_play_selection_values(
        &self,
        scale_max_to_at_least: f64,
    ) -> Option<PlaySelectionValues> {
        let root = self.root_node.as_deref()?;
        self.get_play_selection_values_at(root, true, scale_max_to_at_least)
    }

    pub(crate) fn get_play_selection_values_at(
        &self,
        node: &SearchNode,
        is_root: bool,
        scale_max_to_at_least: f64,
    ) -> Option<PlaySelectionValues> {
        let mut out = PlaySelectionValues::default();
        let snapshot: Vec<(Loc, i64)> = {
            let _guard = self.mutex_pool.lock(node.lock_idx);
            // SAFETY: pool mutex held.
            unsafe { node.children() }
                .iter()
                .map(|c| (c.prev_move_loc, c.visits()))
                .collect()
        };
        for (loc, visits) in snapshot {
            out.unreduced_num_visits += visits;
            if is_root && !self.is_allowed_root_move(loc) {
                continue;
            }
            out.locs.push(loc);
            out.values
                .push((visits as f64 - self.params.chosen_move_subtract).max(0.0));
        }
        let max = out.values.iter().cloned().fold(0.0f64, f64::max);
        if max > 0.0 && max < scale_max_to_at_least {
            let scale = scale_max_to_at_least / max;
            for v in &mut out.values {
                *v *= scale;
            }
        }
        Some(out)
    }

    /// Temperature over play-selection values for the move about to be
    /// chosen, decaying from the early-game value with the configured
    /// halflife in moves.
    fn chosen_move_temperature_now(&self) -> f64 {
        let params = &self.params;
        let halflife = params.chosen_move_temperature_halflife.max(1e-3);
        let decay = 0.5f64.powf(self.root_history.moves().len() as f64 / halflife);
        let early = params.chosen_move_temperature_early.max(1e-4);
        let late = params.chosen_move_temperature.max(1e-4);
        // Interpolate in log space so halflife semantics hold across scales.
        (early.ln() * decay + late.ln() * (1.0 - decay)).exp()
    }

    /// Pick an index proportional to `values^(1/temperature)`; argmax when
    /// the temperature is (near) zero.
    pub fn choose_index_with_temperature(
        rng: &mut ChaCha20Rng,
        values: &[f64],
        temperature: f64,
    ) -> usize {
        debug_assert!(!values.is_empty());
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if temperature <= 1e-4 {
            return values.iter().position(|&v| v == max).unwrap_or(0);
        }
        let weights: Vec<f64> = values
            .iter()
            .map(|&v| {
                if v <= 0.0 {
                    0.0
                } else {
                    ((v / max).ln() / temperature).exp()
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0;
        }
        let mut r: f64 = rng.gen::<f64>() * total;
        for (i, &w) in weights.iter().enumerate() {
            r -= w;
            if r <= 0.0 {
                return i;
            }
        }
        weights.len() - 1
    }

    /// Choose the move to play from the current tree, with temperature
    /// randomization. Returns `Loc::NULL` when there is nothing to choose.
    pub fn get_chosen_move_loc(&mut self) -> Loc {
        let Some(selection) = self.get_play_selection_values(0.0) else {
            return Loc::NULL;
        };
        if selection.locs.is_empty() {
            return Loc::NULL;
        }
        let temperature = self.chosen_move_temperature_now();
        let idx = Self::choose_index_with_temperature(
            &mut self.non_search_rng,
            &selection.values,
            temperature,
        );
        selection.locs[idx]
    }

    // ---- whole-search driver --------------------------------------------

    /// Prepare for a new whole search: install and evaluate the root if
    /// needed, recompute the root safe area and the recent score center,
    /// and draw this search's root policy noise.
    pub fn begin_search(&mut self) -> Result<(), SearchError> {
        self.num_searches_begun += 1;
        self.num_playouts.store(0, Ordering::Release);
        if self.root_history.is_game_finished() {
            return Ok(());
        }

        self.root_safe_area = self.root_board.pass_alive_area();

        if self.root_node.is_none() {
            let lock_idx = self.mutex_pool.idx_for_hash(self.root_board.pos_hash());
            self.root_node = Some(Box::new(SearchNode::new(self.root_pla, Loc::NULL, lock_idx)));
        }

        // Evaluate a fresh root immediately: its values seed the score
        // center and its policy seeds the noise below.
        let root = self.root_node.as_deref().expect("just installed");
        if root.nn_output().is_none() {
            let symmetry = self.non_search_rng.gen_range(0..NUM_SYMMETRIES);
            let out =
                self.nn_eval
                    .evaluate(&self.root_board, &self.root_history, self.root_pla, symmetry)?;
            let out = root.install_nn_output(out);
            let values = playout::leaf_values_from_nn(out);
            let mut stats = root.stats.lock();
            stats.visits += 1;
            stats.add_values(values.win, values.no_result, values.score_mean, values.score_mean_sq, 1.0);
        }

        let expected_score = self
            .get_root_values()
            .map(|v| v.expected_score)
            .unwrap_or(0.0);
        self.recent_score_center =
            expected_score * (1.0 - self.params.recent_score_center_zero_weight);

        self.root_noised_policy = if self.params.root_noise_enabled
            || (self.params.root_policy_temperature - 1.0).abs() > 1e-9
        {
            Some(self.make_root_policy())
        } else {
            None
        };
        Ok(())
    }

    /// The root policy transformed for this search: temperature applied,
    /// Dirichlet noise mixed in. Consulted only during root selection, so
    /// the node's own output stays untouched.
    fn make_root_policy(&mut self) -> Vec<f32> {
        let nn = self
            .root_node
            .as_deref()
            .and_then(|n| n.nn_output())
            .expect("root evaluated in begin_search");
        let mut policy: Vec<f64> = nn.policy.iter().map(|&p| p as f64).collect();

        let temp = self.params.root_policy_temperature;
        if (temp - 1.0).abs() > 1e-9 {
            let mut sum = 0.0;
            for p in policy.iter_mut() {
                if *p > 0.0 {
                    *p = p.powf(1.0 / temp);
                    sum += *p;
                }
            }
            if sum > 0.0 {
                for p in policy.iter_mut() {
                    *p /= sum;
                }
            }
        }

        if self.params.root_noise_enabled {
            let support: Vec<usize> = policy
                .iter()
                .enumerate()
                .filter(|(_, &p)| p > 0.0)
                .map(|(i, _)| i)
                .collect();
            if !support.is_empty() {
                let gamma = Gamma::new(self.params.root_dirichlet_alpha, 1.0)
                    .expect("alpha validated positive");
                let mut noise: Vec<f64> = support
                    .iter()
                    .map(|_| gamma.sample(&mut self.non_search_rng))
                    .collect();
                let total: f64 = noise.iter().sum();
                if total > 0.0 {
                    for n in noise.iter_mut() {
                        *n /= total;
                    }
                    let eps = self.params.root_dirichlet_epsilon;
                    for (i, &pos) in support.iter().enumerate() {
                        policy[pos] = (1.0 - eps) * policy[pos] + eps * noise[i];
                    }
                }
            }
        }

        policy.into_iter().map(|p| p as f32).collect()
    }

    /// Run one whole search under the given budget and stop flag.
    ///
    /// `callback` fires on the supervising thread every `interval` of wall
    /// clock with a consistent-enough snapshot for analysis output.
    /// `record_utilities`, honored only in single-threaded searches, is
    /// appended the root utility after every playout.
    pub fn run_whole_search(
        &mut self,
        should_stop: &AtomicBool,
        pondering: bool,
        time_controls: Option<&TimeControls>,
        search_factor: f64,
        mut callback: Option<(Duration, &mut (dyn FnMut(&Search) + Send))>,
        mut record_utilities: Option<&mut Vec<f64>>,
    ) -> Result<(), SearchError> {
        self.begin_search()?;
        if self.root_history.is_game_finished() || self.root_node.is_none() {
            warn!("whole search requested on a finished game");
            return Ok(());
        }

        let start = Instant::now();
        let base_budget = time_controls.map(|tc| tc.time_for_move(&self.params, search_factor));
        let num_threads = self.params.num_search_threads;
        debug!(
            threads = num_threads,
            pondering,
            budget_secs = base_budget.unwrap_or(f64::INFINITY),
            search = self.num_searches_begun,
            "whole search starting"
        );

        let result = if num_threads <= 1 {
            self.run_search_single_threaded(
                should_stop,
                pondering,
                start,
                base_budget,
                &mut callback,
                &mut record_utilities,
            )
        } else {
            self.run_search_multi_threaded(should_stop, pondering, start, base_budget, &mut callback)
        };

        debug!(
            playouts = self.num_playouts_this_search(),
            root_visits = self.num_root_visits(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "whole search finished"
        );
        result
    }

    /// Convenience wrapper: search for `move_pla` and return the chosen move.
    pub fn run_whole_search_and_get_move(
        &mut self,
        move_pla: Player,
        should_stop: &AtomicBool,
        time_controls: Option<&TimeControls>,
        search_factor: f64,
    ) -> Result<Loc, SearchError> {
        if move_pla != self.root_pla {
            self.set_player_and_clear_history(move_pla);
        }
        self.run_whole_search(should_stop, false, time_controls, search_factor, None, None)?;
        Ok(self.get_chosen_move_loc())
    }

    /// Budget multiplier from the time policy: shrink the budget once the
    /// root says the game is decided.
    fn winning_time_factor(&self) -> f64 {
        match self.root_win_loss_for_mover() {
            Some(wl) if wl > self.params.search_factor_when_winning_threshold => {
                self.params.search_factor_when_winning
            }
            _ => 1.0,
        }
    }

    fn over_playout_budget(&self, pondering: bool) -> bool {
        if pondering {
            return false;
        }
        self.num_playouts.load(Ordering::Acquire) >= self.params.max_playouts
            || self.num_root_visits() >= self.params.max_visits
    }

    fn over_time_budget(&self, start: Instant, base_budget: Option<f64>) -> bool {
        match base_budget {
            Some(base) => start.elapsed().as_secs_f64() >= base * self.winning_time_factor(),
            None => false,
        }
    }

    fn run_search_single_threaded(
        &mut self,
        should_stop: &AtomicBool,
        pondering: bool,
        start: Instant,
        base_budget: Option<f64>,
        callback: &mut Option<(Duration, &mut (dyn FnMut(&Search) + Send))>,
        record_utilities: &mut Option<&mut Vec<f64>>,
    ) -> Result<(), SearchError> {
        let mut thread = SearchThread::new(0, self);
        let mut last_callback = Instant::now();
        loop {
            if should_stop.load(Ordering::Acquire) || self.over_playout_budget(pondering) {
                break;
            }
            let playouts = self.num_playouts.load(Ordering::Acquire);
            if playouts % TIME_CHECK_PLAYOUT_INTERVAL == 0 && self.over_time_budget(start, base_budget)
            {
                break;
            }
            if !self.run_single_playout(&mut thread, should_stop)? {
                break;
            }
            self.num_playouts.fetch_add(1, Ordering::AcqRel);
            if let Some(buf) = record_utilities.as_deref_mut() {
                buf.push(self.get_root_utility().unwrap_or(0.0));
            }
            if let Some((interval, cb)) = callback.as_mut() {
                if last_callback.elapsed() >= *interval {
                    cb(self);
                    last_callback = Instant::now();
                }
            }
        }
        Ok(())
    }

    fn run_search_multi_threaded(
        &mut self,
        should_stop: &AtomicBool,
        pondering: bool,
        start: Instant,
        base_budget: Option<f64>,
        callback: &mut Option<(Duration, &mut (dyn FnMut(&Search) + Send))>,
    ) -> Result<(), SearchError> {
        let num_threads = self.params.num_search_threads;
        let mut worker_threads: Vec<SearchThread> = (0..num_threads)
            .map(|i| SearchThread::new(i, self))
            .collect();
        let first_error: Mutex<Option<SearchError>> = Mutex::new(None);
        let active_workers = AtomicUsize::new(num_threads);
        // The caller's flag is never written; external stop, time policy,
        // and evaluator failure all funnel into this one.
        let local_stop = AtomicBool::new(false);
        let this: &Search = &*self;

        std::thread::scope(|scope| {
            for mut thread in worker_threads.drain(..) {
                let first_error = &first_error;
                let active_workers = &active_workers;
                let local_stop = &local_stop;
                scope.spawn(move || {
                    loop {
                        if local_stop.load(Ordering::Acquire)
                            || this.over_playout_budget(pondering)
                        {
                            break;
                        }
                        match this.run_single_playout(&mut thread, local_stop) {
                            Ok(true) => {
                                this.num_playouts.fetch_add(1, Ordering::AcqRel);
                            }
                            Ok(false) => break,
                            Err(e) => {
                                warn!(error = %e, "search thread aborting");
                                let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                local_stop.store(true, Ordering::Release);
                                break;
                            }
                        }
                    }
                    active_workers.fetch_sub(1, Ordering::AcqRel);
                });
            }

            // Supervise: relay the external stop flag, evaluate the time
            // policy, and fire the analysis callback until every worker has
            // drained.
            let mut last_callback = Instant::now();
            while active_workers.load(Ordering::Acquire) > 0 {
                std::thread::sleep(SUPERVISOR_POLL);
                if should_stop.load(Ordering::Acquire)
                    || this.over_time_budget(start, base_budget)
                {
                    local_stop.store(true, Ordering::Release);
                }
                if let Some((interval, cb)) = callback.as_mut() {
                    if last_callback.elapsed() >= *interval {
                        cb(this);
                        last_callback = Instant::now();
                    }
                }
            }
        });

        let result = match first_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            Some(e) => Err(e),
            None => Ok(()),
        };
        result
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.clear_search();
    }
}
