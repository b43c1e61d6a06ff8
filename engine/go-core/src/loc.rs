//! Players, board colors, and location encoding.

use serde::{Deserialize, Serialize};

use crate::NN_POS_LEN;

/// One of the two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Player {
    Black,
    White,
}

impl Player {
    #[inline]
    pub fn opponent(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }

    /// Index used for hash tables and per-player arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Player::Black => 0,
            Player::White => 1,
        }
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::Black => write!(f, "B"),
            Player::White => write!(f, "W"),
        }
    }
}

/// Contents of a board cell. `Wall` marks the border padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Empty,
    Black,
    White,
    Wall,
}

impl Color {
    #[inline]
    pub fn of(pla: Player) -> Color {
        match pla {
            Player::Black => Color::Black,
            Player::White => Color::White,
        }
    }
}

/// A location on a border-padded board, or one of two sentinels.
///
/// The padded array for a board of edge `n` has stride `n + 2`; real points
/// live at `(x+1) + (y+1) * (n+2)`. Indices 0 and 1 fall on the border for
/// every supported size, so they double as the `NULL` and `PASS` sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loc(pub u16);

impl Loc {
    pub const NULL: Loc = Loc(0);
    pub const PASS: Loc = Loc(1);

    /// Build a location from zero-based board coordinates.
    #[inline]
    pub fn from_xy(x: usize, y: usize, board_size: usize) -> Loc {
        debug_assert!(x < board_size && y < board_size);
        Loc(((x + 1) + (y + 1) * (board_size + 2)) as u16)
    }

    #[inline]
    pub fn is_pass(self) -> bool {
        self == Loc::PASS
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == Loc::NULL
    }

    /// Zero-based coordinates, for locations that are real board points.
    #[inline]
    pub fn to_xy(self, board_size: usize) -> (usize, usize) {
        debug_assert!(!self.is_pass() && !self.is_null());
        let stride = board_size + 2;
        let i = self.0 as usize;
        (i % stride - 1, i / stride - 1)
    }

    /// Index into the NN policy vector. Pass maps to the final entry.
    pub fn to_policy_pos(self, board_size: usize) -> usize {
        if self.is_pass() {
            NN_POS_LEN * NN_POS_LEN
        } else {
            let (x, y) = self.to_xy(board_size);
            x + y * NN_POS_LEN
        }
    }

    /// Inverse of [`Loc::to_policy_pos`]. Returns `NULL` for positions that
    /// fall outside the actual board.
    pub fn from_policy_pos(pos: usize, board_size: usize) -> Loc {
        if pos == NN_POS_LEN * NN_POS_LEN {
            return Loc::PASS;
        }
        let x = pos % NN_POS_LEN;
        let y = pos / NN_POS_LEN;
        if x >= board_size || y >= board_size {
            return Loc::NULL;
        }
        Loc::from_xy(x, y, board_size)
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_pass() {
            write!(f, "pass")
        } else if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "loc({})", self.0)
        }
    }
}

/// Pretty coordinate string ("D4" style, skipping the letter I) for a known
/// board size.
pub fn loc_to_string(loc: Loc, board_size: usize) -> String {
    if loc.is_pass() {
        return "pass".to_string();
    }
    if loc.is_null() {
        return "null".to_string();
    }
    let (x, y) = loc.to_xy(board_size);
    let letters = "ABCDEFGHJKLMNOPQRST";
    let col = letters.as_bytes()[x] as char;
    format!("{}{}", col, board_size - y)
}
