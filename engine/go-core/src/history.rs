//! Move history, superko tracking, and game-end detection.

use std::collections::HashSet;

use crate::board::Board;
use crate::loc::{Loc, Player};
use crate::rules::{KoRule, Rules};

/// One recorded move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub loc: Loc,
    pub pla: Player,
}

/// Outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameResult {
    /// None on a drawn or no-result game.
    pub winner: Option<Player>,
    pub is_no_result: bool,
    /// Final score from white's perspective (area difference plus komi).
    pub white_score: f64,
}

/// The history layered over a [`Board`]: recorded moves, the set of
/// situations seen so far (for superko), consecutive passes, and the
/// finished-game result.
///
/// The board is passed into each call rather than owned, mirroring how the
/// search keeps its own scratch board per thread.
#[derive(Debug, Clone)]
pub struct BoardHistory {
    pub rules: Rules,
    moves: Vec<Move>,
    /// Hashes of every situation up to and including the current one. Which
    /// hash flavor is stored depends on the ko rule.
    seen_hashes: HashSet<u64>,
    consecutive_passes: u32,
    finished: Option<GameResult>,
}

impl BoardHistory {
    /// Start a history at the given position with `next_pla` to move.
    pub fn new(board: &Board, next_pla: Player, rules: Rules) -> BoardHistory {
        let mut seen_hashes = HashSet::new();
        seen_hashes.insert(Self::hash_for(&rules, board, next_pla));
        BoardHistory {
            rules,
            moves: Vec::new(),
            seen_hashes,
            consecutive_passes: 0,
            finished: None,
        }
    }

    fn hash_for(rules: &Rules, board: &Board, next_pla: Player) -> u64 {
        match rules.ko_rule {
            KoRule::SituationalSuperko => board.situation_hash(next_pla),
            _ => board.pos_hash(),
        }
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn consecutive_passes(&self) -> u32 {
        self.consecutive_passes
    }

    #[inline]
    pub fn is_game_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn result(&self) -> Option<GameResult> {
        self.finished
    }

    /// Legality including the history-dependent ko rules. `board` must be
    /// the position this history describes.
    pub fn is_legal(&self, board: &Board, loc: Loc, pla: Player) -> bool {
        if self.finished.is_some() {
            return false;
        }
        if !board.is_legal(loc, pla) {
            return false;
        }
        if loc.is_pass() {
            return true;
        }
        match self.rules.ko_rule {
            // The board's simple-ko point already covers it; long cycles are
            // legal and resolved as no-result when they occur.
            KoRule::Simple => true,
            KoRule::PositionalSuperko | KoRule::SituationalSuperko => {
                let mut scratch = board.clone();
                let played = scratch.play(loc, pla);
                debug_assert!(played);
                !self
                    .seen_hashes
                    .contains(&Self::hash_for(&self.rules, &scratch, pla.opponent()))
            }
        }
    }

    /// Apply a legal move, recording it and updating game-end state.
    /// Returns false (nothing changed) if the move is illegal.
    pub fn make_move(&mut self, board: &mut Board, loc: Loc, pla: Player) -> bool {
        if !self.is_legal(board, loc, pla) {
            return false;
        }
        let played = board.play(loc, pla);
        debug_assert!(played);
        self.moves.push(Move { loc, pla });

        if loc.is_pass() {
            self.consecutive_passes += 1;
            if self.consecutive_passes >= 2 {
                self.finished = Some(self.score_finished_game(board));
            }
            return true;
        }
        self.consecutive_passes = 0;

        let hash = Self::hash_for(&self.rules, board, pla.opponent());
        let repeat = !self.seen_hashes.insert(hash);
        if repeat && self.rules.ko_rule == KoRule::Simple {
            // A long cycle (e.g. triple ko) under simple ko: no result.
            self.finished = Some(GameResult {
                winner: None,
                is_no_result: true,
                white_score: 0.0,
            });
        }
        true
    }

    /// Score the current position as if the game ended now.
    pub fn score_finished_game(&self, board: &Board) -> GameResult {
        let (black, white) = board.area_score();
        let white_score = white - black + self.rules.komi as f64;
        let winner = if white_score > 0.0 {
            Some(Player::White)
        } else if white_score < 0.0 {
            Some(Player::Black)
        } else {
            None
        };
        GameResult {
            winner,
            is_no_result: false,
            white_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::Color;
    use crate::rules::ScoringRule;

    fn loc(x: usize, y: usize, size: usize) -> Loc {
        Loc::from_xy(x, y, size)
    }

    fn standard(komi: f32) -> Rules {
        Rules::standard(komi).unwrap()
    }

    #[test]
    fn two_passes_end_the_game() {
        let mut board = Board::new(5).unwrap();
        let mut hist = BoardHistory::new(&board, Player::Black, standard(5.5));
        assert!(hist.make_move(&mut board, loc(2, 2, 5), Player::Black));
        assert!(hist.make_move(&mut board, Loc::PASS, Player::White));
        assert!(!hist.is_game_finished());
        assert!(hist.make_move(&mut board, Loc::PASS, Player::Black));
        assert!(hist.is_game_finished());
        let result = hist.result().unwrap();
        // One black stone, whole board is black area: 25 - 0, komi 5.5.
        assert_eq!(result.white_score, 5.5 - 25.0);
        assert_eq!(result.winner, Some(Player::Black));
    }

    #[test]
    fn no_moves_after_game_end() {
        let mut board = Board::new(5).unwrap();
        let mut hist = BoardHistory::new(&board, Player::Black, standard(0.5));
        assert!(hist.make_move(&mut board, Loc::PASS, Player::Black));
        assert!(hist.make_move(&mut board, Loc::PASS, Player::White));
        assert!(hist.is_game_finished());
        assert!(!hist.make_move(&mut board, loc(0, 0, 5), Player::Black));
    }

    #[test]
    fn positional_superko_forbids_recreating() {
        let mut board = Board::new(5).unwrap();
        let rules = Rules::new(KoRule::PositionalSuperko, ScoringRule::Area, 0.5).unwrap();
        let mut hist = BoardHistory::new(&board, Player::Black, rules);
        // Build the ko.
        for (x, y, pla) in [
            (1, 0, Player::Black),
            (2, 0, Player::White),
            (0, 1, Player::Black),
            (3, 1, Player::White),
            (1, 2, Player::Black),
            (2, 2, Player::White),
            (2, 1, Player::Black),
        ] {
            assert!(hist.make_move(&mut board, loc(x, y, 5), pla));
        }
        // White takes the ko.
        assert!(hist.make_move(&mut board, loc(1, 1, 5), Player::White));
        // Immediate recapture recreates the prior position: banned by both
        // the board's simple-ko point and superko.
        assert!(!hist.is_legal(&board, loc(2, 1, 5), Player::Black));
        // A pass lifts the board's simple-ko point, but recapturing would
        // still recreate the earlier position, so superko keeps it illegal.
        assert!(hist.make_move(&mut board, Loc::PASS, Player::Black));
        assert!(board.is_legal(loc(2, 1, 5), Player::Black));
        assert!(!hist.is_legal(&board, loc(2, 1, 5), Player::Black));
    }

    #[test]
    fn draw_with_integer_komi() {
        let mut board = Board::new(4).unwrap();
        let rules = standard(0.0);
        let mut hist = BoardHistory::new(&board, Player::Black, rules);
        // Split the 4x4 board down the middle: black column 1, white
        // column 2, eight points of area each.
        for y in 0..4 {
            assert!(hist.make_move(&mut board, loc(1, y, 4), Player::Black));
            assert!(hist.make_move(&mut board, loc(2, y, 4), Player::White));
        }
        let result = hist.score_finished_game(&board);
        assert_eq!(result.white_score, 0.0);
        assert_eq!(result.winner, None);
        assert!(!result.is_no_result);
    }

    #[test]
    fn pass_alive_area_present_after_enclosure() {
        let mut board = Board::new(5).unwrap();
        for y in 0..5 {
            assert!(board.play(loc(1, y, 5), Player::Black));
        }
        assert!(board.play(loc(0, 2, 5), Player::Black));
        let area = board.pass_alive_area();
        assert_eq!(area[loc(0, 0, 5).0 as usize], Color::Black);
    }
}
