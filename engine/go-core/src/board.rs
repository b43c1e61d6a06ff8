//! The board itself: stones, chains, captures, legality, hashing.

use once_cell::sync::Lazy;
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::loc::{Color, Loc, Player};
use crate::rules::RulesError;
use crate::MAX_BOARD_SIZE;

const MAX_ARR_SIZE: usize = (MAX_BOARD_SIZE + 2) * (MAX_BOARD_SIZE + 2);

struct ZobristTable {
    stones: [[u64; MAX_ARR_SIZE]; 2],
    next_pla: [u64; 2],
}

// Process-wide hash table, initialized once at first use. The seed is fixed
// so hashes are stable across runs and processes.
static ZOBRIST: Lazy<ZobristTable> = Lazy::new(|| {
    let mut rng = ChaCha20Rng::seed_from_u64(0x9d3f_8c1a_6e57_2b04);
    let mut stones = [[0u64; MAX_ARR_SIZE]; 2];
    for plane in stones.iter_mut() {
        for h in plane.iter_mut() {
            *h = rng.next_u64();
        }
    }
    let next_pla = [rng.next_u64(), rng.next_u64()];
    ZobristTable { stones, next_pla }
});

/// A Go board of edge 2..=19, stored with a one-cell wall border.
///
/// The board knows nothing about move history; superko and game-end live in
/// [`crate::BoardHistory`]. Simple ko (the immediate-recapture ban) is
/// tracked here because it is derivable from the last capture alone.
#[derive(Clone)]
pub struct Board {
    size: usize,
    stride: usize,
    stones: Vec<Color>,
    ko_loc: Loc,
    pos_hash: u64,
}

impl Board {
    pub fn new(size: usize) -> Result<Board, RulesError> {
        if !(2..=MAX_BOARD_SIZE).contains(&size) {
            return Err(RulesError::BoardSizeOutOfRange(size));
        }
        let stride = size + 2;
        let mut stones = vec![Color::Wall; stride * stride];
        for y in 0..size {
            for x in 0..size {
                stones[(x + 1) + (y + 1) * stride] = Color::Empty;
            }
        }
        Ok(Board {
            size,
            stride,
            stones,
            ko_loc: Loc::NULL,
            pos_hash: 0,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Zobrist hash of the stone configuration.
    #[inline]
    pub fn pos_hash(&self) -> u64 {
        self.pos_hash
    }

    /// Position hash combined with the player to move next.
    #[inline]
    pub fn situation_hash(&self, next_pla: Player) -> u64 {
        self.pos_hash ^ ZOBRIST.next_pla[next_pla.index()]
    }

    #[inline]
    pub fn color_at(&self, loc: Loc) -> Color {
        self.stones[loc.0 as usize]
    }

    /// The point currently banned by simple ko, if any.
    #[inline]
    pub fn ko_loc(&self) -> Loc {
        self.ko_loc
    }

    /// All real board points.
    pub fn all_locs(&self) -> Vec<Loc> {
        let mut out = Vec::with_capacity(self.size * self.size);
        for y in 0..self.size {
            for x in 0..self.size {
                out.push(Loc::from_xy(x, y, self.size));
            }
        }
        out
    }

    #[inline]
    fn adjacents(&self, loc: Loc) -> [Loc; 4] {
        let i = loc.0 as i32;
        let s = self.stride as i32;
        [
            Loc((i - 1) as u16),
            Loc((i + 1) as u16),
            Loc((i - s) as u16),
            Loc((i + s) as u16),
        ]
    }

    /// Flood-fill the chain containing `loc`, returning its stones and
    /// liberty count.
    fn chain_and_liberties(&self, loc: Loc) -> (Vec<Loc>, usize) {
        let color = self.color_at(loc);
        debug_assert!(color == Color::Black || color == Color::White);
        let mut chain = vec![loc];
        let mut visited = vec![false; self.stones.len()];
        visited[loc.0 as usize] = true;
        let mut liberties = 0usize;
        let mut lib_seen = vec![false; self.stones.len()];
        let mut idx = 0;
        while idx < chain.len() {
            let cur = chain[idx];
            idx += 1;
            for adj in self.adjacents(cur) {
                let c = self.color_at(adj);
                if c == color && !visited[adj.0 as usize] {
                    visited[adj.0 as usize] = true;
                    chain.push(adj);
                } else if c == Color::Empty && !lib_seen[adj.0 as usize] {
                    lib_seen[adj.0 as usize] = true;
                    liberties += 1;
                }
            }
        }
        (chain, liberties)
    }

    /// Legality under board-local rules: on-board empty point, not the simple
    /// ko point, not suicide. Pass is always legal. Superko is layered on by
    /// the history.
    pub fn is_legal(&self, loc: Loc, pla: Player) -> bool {
        if loc.is_pass() {
            return true;
        }
        if loc.is_null() || loc.0 as usize >= self.stones.len() {
            return false;
        }
        if self.color_at(loc) != Color::Empty {
            return false;
        }
        if loc == self.ko_loc {
            return false;
        }
        let own = Color::of(pla);
        let opp = Color::of(pla.opponent());
        for adj in self.adjacents(loc) {
            match self.color_at(adj) {
                Color::Empty => return true,
                c if c == own => {
                    let (_, libs) = self.chain_and_liberties(adj);
                    if libs >= 2 {
                        return true;
                    }
                }
                c if c == opp => {
                    let (_, libs) = self.chain_and_liberties(adj);
                    if libs == 1 {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Apply a move. Returns false (board unchanged) if the move is illegal.
    pub fn play(&mut self, loc: Loc, pla: Player) -> bool {
        if loc.is_pass() {
            self.ko_loc = Loc::NULL;
            return true;
        }
        if !self.is_legal(loc, pla) {
            return false;
        }
        let own = Color::of(pla);
        let opp = Color::of(pla.opponent());
        self.set_stone(loc, own);

        let mut num_captured = 0usize;
        let mut captured_loc = Loc::NULL;
        for adj in self.adjacents(loc) {
            if self.color_at(adj) == opp {
                let (chain, libs) = self.chain_and_liberties(adj);
                if libs == 0 {
                    num_captured += chain.len();
                    captured_loc = chain[0];
                    for stone in chain {
                        self.clear_stone(stone, opp);
                    }
                }
            }
        }

        // Simple ko: a single stone captured a single stone and the new
        // stone sits in the captured point's hole with one liberty.
        self.ko_loc = Loc::NULL;
        if num_captured == 1 {
            let (chain, libs) = self.chain_and_liberties(loc);
            if chain.len() == 1 && libs == 1 {
                self.ko_loc = captured_loc;
            }
        }
        true
    }

    #[inline]
    fn set_stone(&mut self, loc: Loc, color: Color) {
        debug_assert!(self.color_at(loc) == Color::Empty);
        self.stones[loc.0 as usize] = color;
        self.pos_hash ^= ZOBRIST.stones[zobrist_plane(color)][loc.0 as usize];
    }

    #[inline]
    fn clear_stone(&mut self, loc: Loc, color: Color) {
        debug_assert!(self.color_at(loc) == color);
        self.stones[loc.0 as usize] = Color::Empty;
        self.pos_hash ^= ZOBRIST.stones[zobrist_plane(color)][loc.0 as usize];
    }

    /// Area count for both players: stones plus single-color-enclosed empty
    /// regions. Returns (black, white).
    pub fn area_score(&self) -> (f64, f64) {
        let mut black = 0.0;
        let mut white = 0.0;
        let mut visited = vec![false; self.stones.len()];
        for loc in self.all_locs() {
            match self.color_at(loc) {
                Color::Black => black += 1.0,
                Color::White => white += 1.0,
                Color::Empty => {
                    if visited[loc.0 as usize] {
                        continue;
                    }
                    let (region, touches_black, touches_white) =
                        self.empty_region(loc, &mut visited);
                    if touches_black && !touches_white {
                        black += region.len() as f64;
                    } else if touches_white && !touches_black {
                        white += region.len() as f64;
                    }
                }
                Color::Wall => {}
            }
        }
        (black, white)
    }

    fn empty_region(&self, start: Loc, visited: &mut [bool]) -> (Vec<Loc>, bool, bool) {
        let mut region = vec![start];
        visited[start.0 as usize] = true;
        let mut touches_black = false;
        let mut touches_white = false;
        let mut idx = 0;
        while idx < region.len() {
            let cur = region[idx];
            idx += 1;
            for adj in self.adjacents(cur) {
                match self.color_at(adj) {
                    Color::Empty => {
                        if !visited[adj.0 as usize] {
                            visited[adj.0 as usize] = true;
                            region.push(adj);
                        }
                    }
                    Color::Black => touches_black = true,
                    Color::White => touches_white = true,
                    Color::Wall => {}
                }
            }
        }
        (region, touches_black, touches_white)
    }

    /// Pass-alive stones and territory for both players, by Benson's
    /// algorithm. The returned array (indexed by `Loc`) marks each point
    /// with the owning color, or `Empty` where neither side is pass-alive.
    pub fn pass_alive_area(&self) -> Vec<Color> {
        let mut area = vec![Color::Empty; self.stones.len()];
        for pla in [Player::Black, Player::White] {
            self.mark_pass_alive(pla, &mut area);
        }
        area
    }

    fn mark_pass_alive(&self, pla: Player, area: &mut [Color]) {
        let own = Color::of(pla);

        // Chains of `pla`, id per point.
        let mut chain_id = vec![usize::MAX; self.stones.len()];
        let mut chains: Vec<Vec<Loc>> = Vec::new();
        for loc in self.all_locs() {
            if self.color_at(loc) == own && chain_id[loc.0 as usize] == usize::MAX {
                let (chain, _) = self.chain_and_liberties(loc);
                let id = chains.len();
                for &stone in &chain {
                    chain_id[stone.0 as usize] = id;
                }
                chains.push(chain);
            }
        }
        if chains.is_empty() {
            return;
        }

        // Maximal regions of non-`pla` points. For each: its points, its
        // empty points, and the bordering chains of `pla`.
        let mut region_id = vec![usize::MAX; self.stones.len()];
        let mut regions: Vec<(Vec<Loc>, Vec<Loc>, Vec<usize>)> = Vec::new();
        for loc in self.all_locs() {
            if self.color_at(loc) == own || region_id[loc.0 as usize] != usize::MAX {
                continue;
            }
            let id = regions.len();
            let mut points = vec![loc];
            region_id[loc.0 as usize] = id;
            let mut empties = Vec::new();
            let mut border_chains = Vec::new();
            let mut idx = 0;
            while idx < points.len() {
                let cur = points[idx];
                idx += 1;
                if self.color_at(cur) == Color::Empty {
                    empties.push(cur);
                }
                for adj in self.adjacents(cur) {
                    let c = self.color_at(adj);
                    if c == Color::Wall {
                        continue;
                    }
                    if c == own {
                        let cid = chain_id[adj.0 as usize];
                        if !border_chains.contains(&cid) {
                            border_chains.push(cid);
                        }
                    } else if region_id[adj.0 as usize] == usize::MAX {
                        region_id[adj.0 as usize] = id;
                        points.push(adj);
                    }
                }
            }
            regions.push((points, empties, border_chains));
        }

        // A region is vital to a bordering chain when every empty point of
        // the region is a liberty of that chain.
        let mut vital_to: Vec<Vec<usize>> = vec![Vec::new(); regions.len()];
        for (rid, (_, empties, border_chains)) in regions.iter().enumerate() {
            for &cid in border_chains {
                let all_liberties = empties.iter().all(|&e| {
                    self.adjacents(e)
                        .iter()
                        .any(|&a| self.color_at(a) == own && chain_id[a.0 as usize] == cid)
                });
                if all_liberties {
                    vital_to[rid].push(cid);
                }
            }
        }

        // Benson iteration: drop chains with fewer than two vital regions,
        // drop regions bordered by a dropped chain, repeat to fixpoint.
        let mut chain_alive = vec![true; chains.len()];
        let mut region_alive = vec![true; regions.len()];
        loop {
            let mut changed = false;
            for cid in 0..chains.len() {
                if !chain_alive[cid] {
                    continue;
                }
                let vital_count = vital_to
                    .iter()
                    .enumerate()
                    .filter(|(rid, vit)| region_alive[*rid] && vit.contains(&cid))
                    .count();
                if vital_count < 2 {
                    chain_alive[cid] = false;
                    changed = true;
                }
            }
            for (rid, (_, _, border_chains)) in regions.iter().enumerate() {
                if !region_alive[rid] {
                    continue;
                }
                if border_chains.iter().any(|&cid| !chain_alive[cid]) {
                    region_alive[rid] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (cid, chain) in chains.iter().enumerate() {
            if chain_alive[cid] {
                for &stone in chain {
                    area[stone.0 as usize] = own;
                }
            }
        }
        // Territory is only the vital regions of surviving chains; a big
        // open region bordered by an alive chain is not enclosed.
        for (rid, (points, _, _)) in regions.iter().enumerate() {
            if region_alive[rid] && vital_to[rid].iter().any(|&cid| chain_alive[cid]) {
                for &p in points {
                    area[p.0 as usize] = own;
                }
            }
        }
    }
}

#[inline]
fn zobrist_plane(color: Color) -> usize {
    match color {
        Color::Black => 0,
        Color::White => 1,
        _ => unreachable!("zobrist plane for empty/wall"),
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Board {}x{}:", self.size, self.size)?;
        for y in 0..self.size {
            for x in 0..self.size {
                let c = match self.color_at(Loc::from_xy(x, y, self.size)) {
                    Color::Black => 'X',
                    Color::White => 'O',
                    _ => '.',
                };
                write!(f, "{} ", c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(x: usize, y: usize, size: usize) -> Loc {
        Loc::from_xy(x, y, size)
    }

    #[test]
    fn capture_single_stone() {
        let mut b = Board::new(5).unwrap();
        // Surround a white stone at (1,1).
        assert!(b.play(loc(1, 1, 5), Player::White));
        assert!(b.play(loc(0, 1, 5), Player::Black));
        assert!(b.play(loc(2, 1, 5), Player::Black));
        assert!(b.play(loc(1, 0, 5), Player::Black));
        assert!(b.play(loc(1, 2, 5), Player::Black));
        assert_eq!(b.color_at(loc(1, 1, 5)), Color::Empty);
    }

    #[test]
    fn suicide_is_illegal() {
        let mut b = Board::new(5).unwrap();
        assert!(b.play(loc(0, 1, 5), Player::Black));
        assert!(b.play(loc(1, 0, 5), Player::Black));
        assert!(b.play(loc(1, 2, 5), Player::Black));
        assert!(b.play(loc(2, 1, 5), Player::Black));
        assert!(!b.is_legal(loc(1, 1, 5), Player::White));
        // Filling the point with the surrounding color is fine.
        assert!(b.is_legal(loc(1, 1, 5), Player::Black));
    }

    #[test]
    fn simple_ko_banned_then_lifted() {
        let mut b = Board::new(5).unwrap();
        // Classic ko shape around (1,1)/(2,1).
        assert!(b.play(loc(1, 0, 5), Player::Black));
        assert!(b.play(loc(0, 1, 5), Player::Black));
        assert!(b.play(loc(1, 2, 5), Player::Black));
        assert!(b.play(loc(2, 0, 5), Player::White));
        assert!(b.play(loc(3, 1, 5), Player::White));
        assert!(b.play(loc(2, 2, 5), Player::White));
        assert!(b.play(loc(2, 1, 5), Player::Black));
        // White captures the ko.
        assert!(b.play(loc(1, 1, 5), Player::White));
        assert_eq!(b.color_at(loc(2, 1, 5)), Color::Empty);
        assert_eq!(b.ko_loc(), loc(2, 1, 5));
        assert!(!b.is_legal(loc(2, 1, 5), Player::Black));
        // Any other move lifts the ban.
        assert!(b.play(loc(4, 4, 5), Player::Black));
        assert!(b.is_legal(loc(2, 1, 5), Player::Black));
    }

    #[test]
    fn hash_returns_after_capture_cycle() {
        let mut b = Board::new(5).unwrap();
        let h0 = b.pos_hash();
        assert!(b.play(loc(1, 1, 5), Player::White));
        let h1 = b.pos_hash();
        assert_ne!(h0, h1);
        assert!(b.play(loc(0, 1, 5), Player::Black));
        assert!(b.play(loc(2, 1, 5), Player::Black));
        assert!(b.play(loc(1, 0, 5), Player::Black));
        assert!(b.play(loc(1, 2, 5), Player::Black));
        // White stone captured; the hash reflects only the black stones.
        let mut reference = Board::new(5).unwrap();
        reference.play(loc(0, 1, 5), Player::Black);
        reference.play(loc(2, 1, 5), Player::Black);
        reference.play(loc(1, 0, 5), Player::Black);
        reference.play(loc(1, 2, 5), Player::Black);
        assert_eq!(b.pos_hash(), reference.pos_hash());
    }

    #[test]
    fn area_score_counts_territory() {
        let mut b = Board::new(5).unwrap();
        // A wall of black stones on column 2 splits the board; only black
        // stones present, so all empty space is black's.
        for y in 0..5 {
            assert!(b.play(loc(2, y, 5), Player::Black));
        }
        let (black, white) = b.area_score();
        assert_eq!(black, 25.0);
        assert_eq!(white, 0.0);
    }

    #[test]
    fn pass_alive_two_eyes() {
        let mut b = Board::new(5).unwrap();
        // Black wall on column 2 with eyes at (0,0) and (0,4) style corner
        // space: the whole left side is enclosed by one chain with two
        // separate empty regions, each fully its liberties.
        for y in 0..5 {
            assert!(b.play(loc(1, y, 5), Player::Black));
        }
        assert!(b.play(loc(0, 2, 5), Player::Black));
        let area = b.pass_alive_area();
        // The two left-edge regions are vital; chain and regions are marked.
        assert_eq!(area[loc(1, 0, 5).0 as usize], Color::Black);
        assert_eq!(area[loc(0, 0, 5).0 as usize], Color::Black);
        assert_eq!(area[loc(0, 4, 5).0 as usize], Color::Black);
        // The open right side is not pass-alive.
        assert_eq!(area[loc(3, 2, 5).0 as usize], Color::Empty);
    }

    #[test]
    fn single_chain_one_eye_not_pass_alive() {
        let mut b = Board::new(5).unwrap();
        for y in 0..5 {
            assert!(b.play(loc(1, y, 5), Player::Black));
        }
        assert!(b.play(loc(0, 2, 5), Player::Black));
        assert!(b.play(loc(0, 1, 5), Player::Black));
        assert!(b.play(loc(0, 0, 5), Player::Black));
        // Only one eye-space region remains on the left (plus the big open
        // right side, which is not vital).
        let area = b.pass_alive_area();
        assert_eq!(area[loc(1, 0, 5).0 as usize], Color::Empty);
    }
}
