//! End-to-end search scenarios with deterministic stub evaluators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use go_core::{Board, BoardHistory, KoRule, Loc, Player, Rules, ScoringRule, NN_POLICY_SIZE};
use mcts::{
    AsyncBot, EvalError, NnEvaluator, NnOutput, Search, SearchParams, TimeControls,
    UniformEvaluator,
};

/// Constant-value evaluator with a policy concentrated on chosen moves.
/// Everything else legal shares the remaining mass.
struct FocusedEvaluator {
    focus: Vec<Loc>,
    focus_prob: f32,
}

impl NnEvaluator for FocusedEvaluator {
    fn evaluate(
        &self,
        board: &Board,
        history: &BoardHistory,
        next_pla: Player,
        _symmetry: u8,
    ) -> Result<Arc<NnOutput>, EvalError> {
        let mut legal: Vec<Loc> = board
            .all_locs()
            .into_iter()
            .filter(|&loc| history.is_legal(board, loc, next_pla))
            .collect();
        legal.push(Loc::PASS);

        let mut policy = vec![0.0f32; NN_POLICY_SIZE];
        let num_focused = self.focus.iter().filter(|&l| legal.contains(l)).count();
        let focus_total = self.focus_prob * num_focused as f32;
        let rest = (legal.len() - num_focused).max(1) as f32;
        let rest_prob = (1.0 - focus_total).max(0.0) / rest;
        for &loc in &legal {
            let p = if self.focus.contains(&loc) {
                self.focus_prob
            } else {
                rest_prob
            };
            policy[loc.to_policy_pos(board.size())] = p;
        }
        Ok(Arc::new(NnOutput {
            policy,
            white_win_prob: 0.5,
            white_loss_prob: 0.5,
            no_result_prob: 0.0,
            white_score_mean: 0.0,
            white_score_mean_sq: 0.0,
            ownership: None,
        }))
    }
}

/// Policy decaying geometrically in policy-position order; fully
/// deterministic and free of ties.
struct GradedEvaluator;

impl NnEvaluator for GradedEvaluator {
    fn evaluate(
        &self,
        board: &Board,
        history: &BoardHistory,
        next_pla: Player,
        _symmetry: u8,
    ) -> Result<Arc<NnOutput>, EvalError> {
        let mut policy = vec![0.0f32; NN_POLICY_SIZE];
        let mut weight = 1.0f32;
        let mut total = 0.0f32;
        for loc in board.all_locs() {
            if history.is_legal(board, loc, next_pla) {
                policy[loc.to_policy_pos(board.size())] = weight;
                total += weight;
                weight *= 0.9;
            }
        }
        policy[Loc::PASS.to_policy_pos(board.size())] = weight;
        total += weight;
        for p in policy.iter_mut() {
            *p /= total;
        }
        Ok(Arc::new(NnOutput {
            policy,
            white_win_prob: 0.48,
            white_loss_prob: 0.52,
            no_result_prob: 0.0,
            white_score_mean: -0.5,
            white_score_mean_sq: 4.0,
            ownership: None,
        }))
    }
}

fn area_rules(komi: f32) -> Rules {
    Rules::new(KoRule::PositionalSuperko, ScoringRule::Area, komi).unwrap()
}

fn empty_position(size: usize, komi: f32) -> (Board, BoardHistory) {
    let board = Board::new(size).unwrap();
    let history = BoardHistory::new(&board, Player::Black, area_rules(komi));
    (board, history)
}

/// 7x7 with a black wall on column 2 and a white wall on column 3, black
/// has just passed. White to move; a white pass ends the game with white
/// ahead 28 - 21 on area, komi -2, so white wins by exactly 5.
fn pass_wins_position() -> (Board, BoardHistory) {
    let mut board = Board::new(7).unwrap();
    let mut history = BoardHistory::new(&board, Player::Black, area_rules(-2.0));
    for y in 0..7 {
        assert!(history.make_move(&mut board, Loc::from_xy(2, y, 7), Player::Black));
        assert!(history.make_move(&mut board, Loc::from_xy(3, y, 7), Player::White));
    }
    assert!(history.make_move(&mut board, Loc::PASS, Player::Black));
    assert!(!history.is_game_finished());
    (board, history)
}

fn run_search(search: &mut Search) {
    let stop = AtomicBool::new(false);
    search
        .run_whole_search(&stop, false, None, 1.0, None, None)
        .unwrap();
}

fn assert_no_virtual_losses(search: &Search) {
    search.visit_nodes(|node| {
        let vl = node.stats.lock().virtual_losses;
        assert_eq!(vl, 0, "virtual losses left behind at {}", node.prev_move_loc);
    });
}

#[test]
fn mate_in_one_pass_is_chosen() {
    let params = SearchParams::for_testing()
        .with_max_visits(200)
        .with_max_playouts(400);
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "mate1").unwrap();
    let (board, history) = pass_wins_position();
    search.set_position(Player::White, board, history);

    run_search(&mut search);

    assert_eq!(search.get_chosen_move_loc(), Loc::PASS);
    let analysis = search.get_analysis_data(1, 4);
    assert_eq!(analysis[0].move_loc, Loc::PASS);
    assert!(
        (analysis[0].score_mean - 5.0).abs() < 1e-9,
        "terminal pass should score exactly +5 for white, got {}",
        analysis[0].score_mean
    );
    // Forced win for the mover: positive root utility.
    assert!(search.get_root_utility().unwrap() > 0.0);
    assert_no_virtual_losses(&search);
}

#[test]
fn virtual_loss_spreads_parallel_threads() {
    let focus = vec![Loc::from_xy(3, 3, 7), Loc::from_xy(2, 2, 7)];
    let evaluator = FocusedEvaluator {
        focus: focus.clone(),
        focus_prob: 0.4,
    };
    let params = SearchParams::for_testing()
        .with_threads(8)
        .with_max_visits(1000)
        .with_max_playouts(2000);
    let mut search = Search::new(params, Arc::new(evaluator), "steer").unwrap();
    let (board, history) = empty_position(7, 7.5);
    search.set_position(Player::Black, board, history);

    run_search(&mut search);

    let selection = search.get_play_selection_values(0.0).unwrap();
    let total: f64 = selection.values.iter().sum();
    assert!(total > 0.0);
    for loc in focus {
        let idx = selection
            .locs
            .iter()
            .position(|&l| l == loc)
            .expect("focused move was searched");
        let share = selection.values[idx] / total;
        assert!(
            share >= 0.2,
            "expected both focused moves to keep >= 20% of visits, got {share:.2}"
        );
    }
    assert_no_virtual_losses(&search);
}

#[test]
fn make_move_reuses_subtree_and_pv() {
    let params = SearchParams::for_testing()
        .with_max_visits(2000)
        .with_max_playouts(4000);
    let mut search = Search::new(params, Arc::new(GradedEvaluator), "reuse").unwrap();
    let (board, history) = empty_position(7, 7.5);
    search.set_position(Player::Black, board, history);

    run_search(&mut search);

    let old_pv = search.get_pv(3);
    assert!(old_pv.len() >= 3, "search should reach depth 3");
    let top_move = old_pv[0];
    let selection = search.get_play_selection_values(0.0).unwrap();
    let top_idx = selection.locs.iter().position(|&l| l == top_move).unwrap();
    let top_visits = selection.values[top_idx] as i64;

    assert!(search.make_move(top_move, Player::Black));

    assert_eq!(search.num_root_visits(), top_visits);
    let new_pv = search.get_pv(2);
    assert_eq!(new_pv.as_slice(), &old_pv[1..3]);
    assert_no_virtual_losses(&search);
}

#[test]
fn analyze_stops_cleanly_with_tree_intact() {
    let params = SearchParams::default().with_threads(4);
    let mut bot = AsyncBot::new(params, Arc::new(UniformEvaluator::new()), "analyze").unwrap();
    let (board, history) = empty_position(9, 7.5);
    bot.set_position(Player::Black, board, history);

    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callbacks);
    bot.analyze(
        Player::Black,
        1.0,
        0.01,
        Box::new(move |_search| {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let stop_started = Instant::now();
    bot.stop_and_wait();
    assert!(
        stop_started.elapsed() < Duration::from_millis(200),
        "stopAndWait took {:?}",
        stop_started.elapsed()
    );

    bot.with_search(|search| {
        assert!(search.num_root_visits() > 0, "tree should be intact");
        assert_no_virtual_losses(search);
    });
    assert!(callbacks.load(Ordering::Acquire) > 0, "callback never fired");
}

#[test]
fn gen_move_respects_time_budget() {
    let params = SearchParams::default().with_threads(2);
    let lag_buffer = params.lag_buffer;
    let mut bot = AsyncBot::new(params, Arc::new(UniformEvaluator::new()), "clock").unwrap();
    let (board, history) = empty_position(9, 7.5);
    bot.set_position(Player::Black, board, history);

    let start = Instant::now();
    let loc = bot
        .gen_move_synchronous(Player::Black, TimeControls::absolute(1.0), 1.0)
        .unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    assert!(!loc.is_null());
    assert!(
        elapsed <= 1.0 + lag_buffer + 0.5,
        "genmove took {elapsed:.2}s against a 1s main time"
    );
    bot.with_search(|search| assert!(search.num_root_visits() > 0));
}

#[test]
fn fixed_seed_single_thread_is_deterministic() {
    let run = || {
        let params = SearchParams::for_testing()
            .with_max_visits(200)
            .with_max_playouts(400);
        let mut search = Search::new(params, Arc::new(GradedEvaluator), "seed42").unwrap();
        let (board, history) = empty_position(7, 7.5);
        search.set_position(Player::Black, board, history);
        run_search(&mut search);
        (search.get_chosen_move_loc(), search.get_pv(4))
    };
    let (move_a, pv_a) = run();
    let (move_b, pv_b) = run();
    assert_eq!(move_a, move_b);
    assert_eq!(pv_a, pv_b);
}

#[test]
fn visit_conservation_at_root() {
    let params = SearchParams::for_testing()
        .with_max_visits(300)
        .with_max_playouts(600);
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "conserve").unwrap();
    let (board, history) = empty_position(7, 7.5);
    search.set_position(Player::Black, board, history);

    run_search(&mut search);

    let selection = search.get_play_selection_values(0.0).unwrap();
    // The root's own expansion accounts for exactly one visit.
    assert_eq!(
        search.num_root_visits(),
        selection.unreduced_num_visits + 1
    );
}

#[test]
fn set_position_round_trip_is_idempotent() {
    let params = SearchParams::for_testing();
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "roundtrip").unwrap();
    let (board, history) = empty_position(7, 7.5);

    search.set_position(Player::Black, board.clone(), history.clone());
    run_search(&mut search);
    assert!(search.num_root_visits() > 0);

    search.clear_search();
    search.set_position(Player::Black, board.clone(), history.clone());
    assert_eq!(search.num_root_visits(), 0);
    assert_eq!(search.root_board().pos_hash(), board.pos_hash());
    assert_eq!(
        search.root_history().moves().len(),
        history.moves().len()
    );
}

#[test]
fn komi_update_clears_only_on_change() {
    let params = SearchParams::for_testing();
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "komi").unwrap();
    let (board, history) = empty_position(7, 7.5);
    search.set_position(Player::Black, board, history);
    run_search(&mut search);

    let visits = search.num_root_visits();
    assert!(visits > 0);

    // Same komi: no-op.
    search.set_komi_if_new(7.5).unwrap();
    assert_eq!(search.num_root_visits(), visits);

    // Non-half-integer komi: rejected, still no change.
    assert!(search.set_komi_if_new(7.25).is_err());
    assert_eq!(search.num_root_visits(), visits);

    // New komi: search cleared.
    search.set_komi_if_new(5.5).unwrap();
    assert_eq!(search.num_root_visits(), 0);
}

#[test]
fn illegal_make_move_changes_nothing() {
    let params = SearchParams::for_testing();
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "illegal").unwrap();
    let (mut board, mut history) = empty_position(7, 7.5);
    let occupied = Loc::from_xy(3, 3, 7);
    assert!(history.make_move(&mut board, occupied, Player::Black));
    search.set_position(Player::White, board, history);
    run_search(&mut search);

    let visits = search.num_root_visits();
    assert!(!search.make_move(occupied, Player::White));
    assert_eq!(search.num_root_visits(), visits);
    assert_eq!(search.root_history().moves().len(), 1);
}

#[test]
fn disallowed_root_moves_are_skipped() {
    let allowed = vec![Loc::from_xy(0, 0, 7), Loc::from_xy(1, 1, 7)];
    let params = SearchParams::for_testing()
        .with_max_visits(100)
        .with_max_playouts(200);
    let mut search = Search::new(params, Arc::new(UniformEvaluator::new()), "allow").unwrap();
    let (board, history) = empty_position(7, 7.5);
    search.set_position(Player::Black, board, history);
    search.set_allowed_root_moves(Some(allowed.clone()));

    run_search(&mut search);

    let selection = search.get_play_selection_values(0.0).unwrap();
    assert!(!selection.locs.is_empty());
    for loc in &selection.locs {
        assert!(allowed.contains(loc), "disallowed move {loc} was reported");
    }
    assert!(allowed.contains(&search.get_chosen_move_loc()));
}
