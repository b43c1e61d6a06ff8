//! Go board, rules, history and scoring.
//!
//! This crate is the game-side collaborator of the search engine: a mutable
//! position with move application, legality queries and terminal-state
//! scoring. It is deliberately small: no SGF, no GTP, no UI.

pub mod board;
pub mod history;
pub mod loc;
pub mod rules;

pub use board::Board;
pub use history::{BoardHistory, GameResult, Move};
pub use loc::{loc_to_string, Color, Loc, Player};
pub use rules::{KoRule, Rules, RulesError, ScoringRule};

/// Largest supported square board edge.
pub const MAX_BOARD_SIZE: usize = 19;

/// Spatial edge of the neural-net policy plane. Boards smaller than this are
/// embedded in the top-left corner of the plane.
pub const NN_POS_LEN: usize = 19;

/// Length of the policy vector: one entry per point of the policy plane,
/// plus the pass move at the end.
pub const NN_POLICY_SIZE: usize = NN_POS_LEN * NN_POS_LEN + 1;
