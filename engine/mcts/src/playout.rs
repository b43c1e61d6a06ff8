//! The playout engine: per-thread descent, expansion, and backup.
//!
//! Each search thread owns a [`SearchThread`] with a scratch board and
//! history that it replays from the root on every playout. Descent applies
//! virtual loss on the way down and removes it on the way back up, on every
//! path including aborts, so the balance invariant holds whenever a playout
//! ends.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::trace;

use go_core::{Board, BoardHistory, Color, GameResult, Loc, Player};

use crate::evaluator::{NnOutput, NUM_SYMMETRIES};
use crate::node::{LeafValues, NodeStats, SearchNode};
use crate::search::{Search, SearchError};
use crate::value;

/// Per-thread search state: scratch position, RNG, and reusable buffers.
pub struct SearchThread {
    pub thread_idx: usize,
    pub pla: Player,
    pub board: Board,
    pub history: BoardHistory,
    pub rng: ChaCha20Rng,

    utility_buf: Vec<f64>,
    visits_buf: Vec<i64>,
    weight_buf: Vec<f64>,
    stats_buf: Vec<NodeStats>,
    /// Policy positions that already have a child, marked during selection
    /// and cleared afterwards.
    poses_with_child: Vec<bool>,
}

impl SearchThread {
    pub fn new(thread_idx: usize, search: &Search) -> SearchThread {
        let seed = thread_seed(
            search.rand_seed(),
            search.num_searches_begun(),
            thread_idx,
        );
        SearchThread {
            thread_idx,
            pla: search.root_pla(),
            board: search.root_board().clone(),
            history: search.root_history().clone(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            utility_buf: Vec::new(),
            visits_buf: Vec::new(),
            weight_buf: Vec::new(),
            stats_buf: Vec::new(),
            poses_with_child: vec![false; go_core::NN_POLICY_SIZE],
        }
    }

    fn reset_to_root(&mut self, search: &Search) {
        self.pla = search.root_pla();
        self.board = search.root_board().clone();
        self.history = search.root_history().clone();
    }
}

fn thread_seed(rand_seed: &str, search_idx: u64, thread_idx: usize) -> u64 {
    // FNV-1a over the seed string, then mix in the per-search and
    // per-thread indices.
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for b in rand_seed.bytes() {
        h = (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(h ^ splitmix64(search_idx) ^ (thread_idx as u64).rotate_left(32))
}

pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[inline]
pub(crate) fn from_whites_perspective(utility_white: f64, pla: Player) -> f64 {
    match pla {
        Player::White => utility_white,
        Player::Black => -utility_white,
    }
}

pub(crate) fn leaf_values_from_result(result: GameResult) -> LeafValues {
    let (win, no_result) = if result.is_no_result {
        (0.0, 1.0)
    } else {
        match result.winner {
            Some(Player::White) => (1.0, 0.0),
            Some(Player::Black) => (0.0, 0.0),
            None => (0.5, 0.0),
        }
    };
    LeafValues {
        win,
        no_result,
        score_mean: result.white_score,
        score_mean_sq: result.white_score * result.white_score,
    }
}

pub(crate) fn leaf_values_from_nn(out: &NnOutput) -> LeafValues {
    LeafValues {
        win: out.white_win_prob as f64,
        no_result: out.no_result_prob as f64,
        score_mean: out.white_score_mean as f64,
        score_mean_sq: out.white_score_mean_sq as f64,
    }
}

fn add_leaf_value(node: &SearchNode, values: LeafValues) {
    let mut stats = node.stats.lock();
    stats.visits += 1;
    stats.add_values(
        values.win,
        values.no_result,
        values.score_mean,
        values.score_mean_sq,
        1.0,
    );
}

/// Outcome of child selection at one node.
enum Selected {
    Existing(*const SearchNode, Loc),
    /// No selectable move at all (e.g. every root move filtered out).
    None,
}

impl Search {
    /// Run one playout from the root on this thread. Returns whether the
    /// playout completed (false means it was aborted by the stop flag, with
    /// all virtual losses already released).
    pub fn run_single_playout(
        &self,
        thread: &mut SearchThread,
        should_stop: &AtomicBool,
    ) -> Result<bool, SearchError> {
        thread.reset_to_root(self);
        let root = self
            .root_node_ref()
            .expect("begin_search installs the root before playouts");
        let values = self.playout_descend(thread, root, should_stop, true)?;
        Ok(values.is_some())
    }

    fn playout_descend(
        &self,
        thread: &mut SearchThread,
        node: &SearchNode,
        should_stop: &AtomicBool,
        is_root: bool,
    ) -> Result<Option<LeafValues>, SearchError> {
        // Terminal state: score directly, no NN call. Terminality is
        // re-derived from the thread's history each visit; these nodes
        // never gain an NN output or children.
        if thread.history.is_game_finished() && !is_root {
            let result = thread
                .history
                .result()
                .expect("finished games carry a result");
            let values = leaf_values_from_result(result);
            add_leaf_value(node, values);
            return Ok(Some(values));
        }

        // Expansion: evaluate and install. The install can lose a race with
        // another thread, in which case the winner's output is used and this
        // playout backs up the winner's values.
        if node.nn_output().is_none() {
            if should_stop.load(Ordering::Acquire) {
                return Ok(None);
            }
            let symmetry = thread.rng.gen_range(0..NUM_SYMMETRIES);
            let out =
                self.nn_eval()
                    .evaluate(&thread.board, &thread.history, node.next_pla, symmetry)?;
            let out = node.install_nn_output(out);
            let values = leaf_values_from_nn(out);
            add_leaf_value(node, values);
            // The stop flag may have been raised during the NN wait; the
            // backup above already completed, so the worker loop will see
            // the flag with all invariants intact.
            return Ok(Some(values));
        }

        let (child_ptr, child_loc) = match self.select_best_child_to_descend(thread, node, is_root)
        {
            Selected::Existing(ptr, loc) => (ptr, loc),
            Selected::None => {
                // Nothing selectable; count the visit against the node's own
                // evaluation.
                let values = leaf_values_from_nn(node.nn_output().expect("expanded node"));
                add_leaf_value(node, values);
                return Ok(Some(values));
            }
        };

        // SAFETY: child boxes are only dropped by structural edits, which
        // require exclusive access to the Search; this reference lives only
        // for the remainder of this playout.
        let child: &SearchNode = unsafe { &*child_ptr };

        let vloss = self.params().virtual_loss_count;
        if vloss > 0 {
            child.stats.lock().virtual_losses += vloss;
        }

        let moved = thread
            .history
            .make_move(&mut thread.board, child_loc, node.next_pla);
        debug_assert!(moved, "selected an illegal move {child_loc}");

        let descent = self.playout_descend(thread, child, should_stop, false);

        if vloss > 0 {
            let mut stats = child.stats.lock();
            stats.virtual_losses -= vloss;
            debug_assert!(stats.virtual_losses >= 0);
        }

        let values = match descent? {
            Some(values) => values,
            None => return Ok(None),
        };

        self.update_stats_after_playout(thread, node, values);
        Ok(Some(values))
    }

    /// Pick the child to descend into, creating it if it does not exist yet.
    /// Returns a raw pointer because the reference outlives the pool lock;
    /// see the safety note at the call site.
    fn select_best_child_to_descend(
        &self,
        thread: &mut SearchThread,
        node: &SearchNode,
        is_root: bool,
    ) -> Selected {
        let params = self.params();
        let board_size = self.root_board().size();
        let nn = node.nn_output().expect("selection requires an NN output");
        let policy: &[f32] = match (is_root, self.root_noised_policy()) {
            (true, Some(p)) => p,
            _ => &nn.policy,
        };

        // Superko can make a policy-legal move illegal along this path; such
        // positions are excluded and selection retried.
        let mut excluded_poses: Vec<usize> = Vec::new();

        loop {
            let guard = self.mutex_pool().lock(node.lock_idx);
            // SAFETY: pool mutex held.
            let children = unsafe { node.children() };

            let mut total_child_visits = 0i64;
            let mut policy_mass_visited = 0.0f64;
            thread.stats_buf.clear();
            for child in children {
                let stats = child.stats.lock().clone();
                total_child_visits += stats.visits;
                let pos = child.prev_move_loc.to_policy_pos(board_size);
                policy_mass_visited += policy[pos] as f64;
                thread.poses_with_child[pos] = true;
                thread.stats_buf.push(stats);
            }

            // First-play urgency: the parent's own utility, reduced by how
            // much policy mass is already explored.
            let parent_stats = node.stats.lock().clone();
            let parent_utility_white = value::utility_of_sums(
                parent_stats.win_value_sum,
                parent_stats.no_result_value_sum,
                parent_stats.score_mean_sum,
                parent_stats.value_sum_weight,
                self.recent_score_center(),
                params,
            )
            .unwrap_or_else(|| value::utility_from_nn(nn, self.recent_score_center(), params));
            let parent_utility = from_whites_perspective(parent_utility_white, node.next_pla);
            let fpu = parent_utility - params.fpu_reduction * policy_mass_visited.sqrt();

            let sqrt_total = (total_child_visits as f64).sqrt();
            let loss_utility = -params.max_utility();

            let mut best_value = f64::NEG_INFINITY;
            let mut best: Option<(usize, Loc)> = None;

            for (idx, child) in children.iter().enumerate() {
                let loc = child.prev_move_loc;
                if is_root && !self.is_allowed_root_move(loc) {
                    continue;
                }
                let pos = loc.to_policy_pos(board_size);
                let prior = policy[pos] as f64;
                let stats = &thread.stats_buf[idx];

                let mut q = match value::utility_of_sums(
                    stats.win_value_sum,
                    stats.no_result_value_sum,
                    stats.score_mean_sum,
                    stats.value_sum_weight,
                    self.recent_score_center(),
                    params,
                ) {
                    Some(u) => from_whites_perspective(u, node.next_pla),
                    None => fpu,
                };
                // Treat in-flight descents as losses so concurrent threads
                // spread out.
                let mut n_eff = stats.visits as f64;
                if stats.virtual_losses > 0 {
                    let vl = stats.virtual_losses as f64;
                    let weight = stats.value_sum_weight.max(stats.visits as f64);
                    q = (q * weight + loss_utility * vl) / (weight + vl).max(1.0);
                    n_eff += vl;
                }

                let explore = params.c_puct * prior * sqrt_total / (1.0 + n_eff);
                let bonus = from_whites_perspective(
                    self.score_bonus_white(thread, nn, loc, node.next_pla),
                    node.next_pla,
                );
                let selection_value = q + explore + bonus;
                // Strict comparison: FP ties keep the lower index, which is
                // the child inserted at higher policy.
                if selection_value > best_value {
                    best_value = selection_value;
                    best = Some((idx, loc));
                }
            }

            let num_children = children.len();
            for (pos, &prior) in policy.iter().enumerate() {
                let prior = prior as f64;
                if prior <= 0.0
                    || thread.poses_with_child[pos]
                    || excluded_poses.contains(&pos)
                {
                    continue;
                }
                let loc = Loc::from_policy_pos(pos, board_size);
                if loc.is_null() {
                    continue;
                }
                if is_root && !self.is_allowed_root_move(loc) {
                    continue;
                }
                let explore = params.c_puct * prior * sqrt_total;
                let bonus = from_whites_perspective(
                    self.score_bonus_white(thread, nn, loc, node.next_pla),
                    node.next_pla,
                );
                let selection_value = fpu + explore + bonus;
                if selection_value > best_value {
                    best_value = selection_value;
                    best = Some((usize::MAX, loc));
                }
            }

            for child in children {
                thread.poses_with_child[child.prev_move_loc.to_policy_pos(board_size)] = false;
            }

            match best {
                None => return Selected::None,
                Some((idx, loc)) if idx < num_children => {
                    let ptr: *const SearchNode = &*children[idx];
                    drop(guard);
                    return Selected::Existing(ptr, loc);
                }
                Some((_, loc)) => {
                    // The NN mask does not know about superko; verify
                    // against the real history before committing.
                    if !thread.history.is_legal(&thread.board, loc, node.next_pla) {
                        excluded_poses.push(loc.to_policy_pos(board_size));
                        drop(guard);
                        trace!(%loc, "policy move illegal along this path, reselecting");
                        continue;
                    }
                    let lock_idx = self.mutex_pool().idx_for_hash(
                        thread.board.pos_hash()
                            ^ splitmix64(
                                (loc.0 as u64) << 2 | node.next_pla.index() as u64,
                            ),
                    );
                    let child = Box::new(SearchNode::new(
                        node.next_pla.opponent(),
                        loc,
                        lock_idx,
                    ));
                    let ptr: *const SearchNode = &*child;
                    // SAFETY: pool mutex held; append only.
                    unsafe { node.children_vec().push(child) };
                    drop(guard);
                    return Selected::Existing(ptr, loc);
                }
            }
        }
    }

    /// Score-shaping bonus for considering `move_loc` from this node, in
    /// white-centric utility. Two parts: a penalty for a game-ending pass
    /// that scores worse than the position's expectation, and a waste-of-move
    /// penalty for playing inside territory that is already pass-alive at
    /// the root.
    fn score_bonus_white(
        &self,
        thread: &SearchThread,
        parent_nn: &NnOutput,
        move_loc: Loc,
        mover: Player,
    ) -> f64 {
        let pts = self.params().ending_bonus_points;
        if pts <= 0.0 {
            return 0.0;
        }
        let mover_sign = match mover {
            Player::White => 1.0,
            Player::Black => -1.0,
        };
        let expected = parent_nn.white_score_mean as f64;
        let mut bonus_points = 0.0;

        if move_loc.is_pass() {
            if thread.history.consecutive_passes() >= 1 {
                // Passing ends the game right here; compare the real score
                // against what the evaluator expected from continued play.
                let actual = thread.history.score_finished_game(&thread.board).white_score;
                let diff = actual - expected;
                if diff * mover_sign < 0.0 {
                    bonus_points += diff.clamp(-pts, pts);
                }
            }
        } else if self.root_safe_area()[move_loc.0 as usize] != Color::Empty {
            // Filling settled territory wastes a move.
            bonus_points -= 0.5 * pts * mover_sign;
        }

        if bonus_points == 0.0 {
            return 0.0;
        }
        let params = self.params();
        let center = self.recent_score_center();
        let shifted = expected + bonus_points;
        value::static_score_utility(shifted, params) - value::static_score_utility(expected, params)
            + value::dynamic_score_utility(shifted, center, params)
            - value::dynamic_score_utility(expected, center, params)
    }

    /// Per-playout backup at one interior node: either a direct add of the
    /// leaf values, or (every `value_weight_recompute_interval` visits) a
    /// recomputation of this node's sums from its children with outlier
    /// down-weighting.
    fn update_stats_after_playout(
        &self,
        thread: &mut SearchThread,
        node: &SearchNode,
        values: LeafValues,
    ) {
        let interval = self.params().value_weight_recompute_interval;
        let recompute = {
            let mut stats = node.stats.lock();
            stats.visits += 1;
            let recompute = interval > 0 && stats.visits % interval == 0;
            if !recompute {
                stats.add_values(
                    values.win,
                    values.no_result,
                    values.score_mean,
                    values.score_mean_sq,
                    1.0,
                );
            }
            recompute
        };
        if recompute {
            self.recompute_node_stats(thread, node);
        }
    }

    /// Rebuild a node's value sums from its children, weighting each child
    /// by how credible its utility is relative to the best child, plus the
    /// node's own first evaluation at weight one.
    pub(crate) fn recompute_node_stats(&self, thread: &mut SearchThread, node: &SearchNode) {
        let params = self.params();
        let center = self.recent_score_center();

        {
            let guard = self.mutex_pool().lock(node.lock_idx);
            // SAFETY: pool mutex held.
            let children = unsafe { node.children() };
            thread.stats_buf.clear();
            thread.utility_buf.clear();
            thread.visits_buf.clear();
            for child in children {
                let stats = child.stats.lock().clone();
                let utility_white = value::utility_of_sums(
                    stats.win_value_sum,
                    stats.no_result_value_sum,
                    stats.score_mean_sum,
                    stats.value_sum_weight,
                    center,
                    params,
                )
                .unwrap_or(0.0);
                thread
                    .utility_buf
                    .push(from_whites_perspective(utility_white, node.next_pla));
                thread.visits_buf.push(stats.visits);
                thread.stats_buf.push(stats);
            }
            drop(guard);
        }

        self.value_weight_distribution().value_child_weights(
            &thread.utility_buf,
            &thread.visits_buf,
            &mut thread.weight_buf,
        );

        let nn = node.nn_output().expect("recompute on expanded node");
        let own = leaf_values_from_nn(nn);
        let mut win_sum = own.win;
        let mut no_result_sum = own.no_result;
        let mut score_mean_sum = own.score_mean;
        let mut score_mean_sq_sum = own.score_mean_sq;
        let mut weight_sum = 1.0;

        for (stats, &weight) in thread.stats_buf.iter().zip(&thread.weight_buf) {
            if stats.value_sum_weight <= 0.0 || weight <= 0.0 {
                continue;
            }
            let w = weight * stats.value_sum_weight;
            let inv = 1.0 / stats.value_sum_weight;
            win_sum += stats.win_value_sum * inv * w;
            no_result_sum += stats.no_result_value_sum * inv * w;
            score_mean_sum += stats.score_mean_sum * inv * w;
            score_mean_sq_sum += stats.score_mean_sq_sum * inv * w;
            weight_sum += w;
        }

        let mut stats = node.stats.lock();
        stats.win_value_sum = win_sum;
        stats.no_result_value_sum = no_result_sum;
        stats.score_mean_sum = score_mean_sum;
        stats.score_mean_sq_sum = score_mean_sq_sum;
        stats.value_sum_weight = weight_sum;
    }
}
