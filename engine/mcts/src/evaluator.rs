//! The neural-net evaluator interface the search consumes.
//!
//! The evaluator is externally owned and shared between searches. Batching
//! across concurrently blocked search threads is the implementor's concern;
//! from the search's point of view `evaluate` is an ordinary blocking call.

use std::sync::Arc;

use thiserror::Error;

use go_core::{Board, BoardHistory, Loc, Player, NN_POLICY_SIZE};

/// Number of board symmetries an evaluator may exploit. The search passes a
/// symmetry drawn from the thread's RNG with each request.
pub const NUM_SYMMETRIES: u8 = 8;

/// Errors from the evaluator. Any of these aborts the whole search.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("evaluation timed out after {0:.1}s")]
    TimedOut(f64),

    #[error("evaluator is shut down")]
    ShutDown,
}

/// One evaluation result. Written once at node expansion and immutable
/// thereafter; shared via `Arc` so readers never need the node's lock.
///
/// All values are white-centric. `white_win_prob + white_loss_prob +
/// no_result_prob` sums to 1. The policy has one entry per point of the
/// NN's spatial plane plus a final pass entry; entries for illegal moves
/// are exactly 0 and legal entries sum to 1.
#[derive(Debug, Clone)]
pub struct NnOutput {
    pub policy: Vec<f32>,
    pub white_win_prob: f32,
    pub white_loss_prob: f32,
    pub no_result_prob: f32,
    pub white_score_mean: f32,
    /// Expected squared score; with the mean this yields the variance used
    /// by the risk-aware utility term.
    pub white_score_mean_sq: f32,
    /// Per-point ownership prediction in [-1, 1] (white positive), if the
    /// model provides one.
    pub ownership: Option<Vec<f32>>,
}

/// A policy/value evaluator for positions.
pub trait NnEvaluator: Send + Sync {
    /// Evaluate the position reached by `history` on `board`, with
    /// `next_pla` to move. Blocks until the result is available; the
    /// evaluator may hold the request briefly to batch it with requests
    /// from other search threads.
    fn evaluate(
        &self,
        board: &Board,
        history: &BoardHistory,
        next_pla: Player,
        symmetry: u8,
    ) -> Result<Arc<NnOutput>, EvalError>;
}

/// Evaluator assigning uniform policy over legal moves and neutral values.
/// No model, no batching; exists for tests and engine bring-up.
#[derive(Debug, Clone, Default)]
pub struct UniformEvaluator;

impl UniformEvaluator {
    pub fn new() -> UniformEvaluator {
        UniformEvaluator
    }
}

impl NnEvaluator for UniformEvaluator {
    fn evaluate(
        &self,
        board: &Board,
        history: &BoardHistory,
        next_pla: Player,
        _symmetry: u8,
    ) -> Result<Arc<NnOutput>, EvalError> {
        let mut policy = vec![0.0f32; NN_POLICY_SIZE];
        let mut legal = Vec::new();
        for loc in board.all_locs() {
            if history.is_legal(board, loc, next_pla) {
                legal.push(loc);
            }
        }
        legal.push(Loc::PASS);
        let prob = 1.0 / legal.len() as f32;
        for loc in legal {
            policy[loc.to_policy_pos(board.size())] = prob;
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

#[cfg(test)]
mod tests {
    use super::*;
    use go_core::Rules;

    #[test]
    fn uniform_policy_normalizes_over_legal_moves() {
        let board = Board::new(7).unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::standard(7.5).unwrap());
        let out = UniformEvaluator::new()
            .evaluate(&board, &hist, Player::Black, 0)
            .unwrap();

        let sum: f32 = out.policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        // 49 board points plus pass on an empty 7x7.
        let nonzero = out.policy.iter().filter(|&&p| p > 0.0).count();
        assert_eq!(nonzero, 50);
        // Policy plane points outside the board carry no mass.
        assert_eq!(out.policy[7], 0.0);
    }
}
