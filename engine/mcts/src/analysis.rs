//! Analysis snapshots and tree inspection.
//!
//! Everything here is safe to call while a search is running: children are
//! snapshotted under the pool mutex and statistics read under their spin
//! locks, so the numbers are a consistent-enough view for display.

use std::io::{self, Write};

use go_core::{loc_to_string, Loc, Player};

use crate::node::SearchNode;
use crate::search::Search;
use crate::value;

/// One considered root move, for analysis output.
#[derive(Debug, Clone)]
pub struct AnalysisData {
    pub move_loc: Loc,
    pub num_visits: i64,
    /// Combined utility from the root player's perspective.
    pub utility: f64,
    /// Win probability for the root player, counting half of any no-result
    /// probability.
    pub win_rate: f64,
    pub score_mean: f64,
    pub score_stdev: f64,
    pub policy_prior: f64,
    /// Rank by visits, 0 is the search's favourite.
    pub order: usize,
    /// Principal variation starting with `move_loc` itself.
    pub pv: Vec<Loc>,
}

/// Knobs for [`Search::print_tree`].
#[derive(Debug, Clone)]
pub struct PrintTreeOptions {
    pub max_depth: usize,
    pub min_visits: i64,
    pub max_children_per_node: usize,
}

impl Default for PrintTreeOptions {
    fn default() -> PrintTreeOptions {
        PrintTreeOptions {
            max_depth: 2,
            min_visits: 1,
            max_children_per_node: 10,
        }
    }
}

struct ChildSnapshot {
    ptr: *const SearchNode,
    loc: Loc,
    visits: i64,
}

impl Search {
    /// Snapshot a node's children. The pointers stay valid for the `&self`
    /// borrow: structural edits require `&mut Search`.
    fn snapshot_children(&self, node: &SearchNode) -> Vec<ChildSnapshot> {
        let _guard = self.mutex_pool().lock(node.lock_idx);
        // SAFETY: pool mutex held.
        unsafe { node.children() }
            .iter()
            .map(|c| ChildSnapshot {
                ptr: &**c,
                loc: c.prev_move_loc,
                visits: c.visits(),
            })
            .collect()
    }

    /// Analysis records for the root children, ranked by visits. If fewer
    /// than `min_moves` children exist, top raw-policy moves are appended
    /// with zero visits so callers always have something to show.
    pub fn get_analysis_data(&self, min_moves: usize, max_pv_depth: usize) -> Vec<AnalysisData> {
        let Some(root) = self.root_node_ref() else {
            return Vec::new();
        };
        let Some(nn) = root.nn_output() else {
            return Vec::new();
        };
        let board_size = self.root_board().size();
        let root_pla = self.root_pla();

        let mut snaps = self.snapshot_children(root);
        snaps.retain(|s| self.is_allowed_root_move(s.loc));
        snaps.sort_by(|a, b| {
            b.visits.cmp(&a.visits).then_with(|| {
                let pa = nn.policy[a.loc.to_policy_pos(board_size)];
                let pb = nn.policy[b.loc.to_policy_pos(board_size)];
                pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let mut out = Vec::with_capacity(snaps.len());
        for (order, snap) in snaps.iter().enumerate() {
            // SAFETY: see snapshot_children.
            let child = unsafe { &*snap.ptr };
            let Some(values) = self.get_node_values(child) else {
                continue;
            };
            let utility_white = value::combined_utility(
                values.win_value,
                values.loss_value,
                values.no_result_value,
                values.expected_score,
                self.recent_score_center(),
                self.params(),
            );
            let win_rate = match root_pla {
                Player::White => values.win_value + 0.5 * values.no_result_value,
                Player::Black => values.loss_value + 0.5 * values.no_result_value,
            };
            let mut pv = vec![snap.loc];
            self.append_pv(&mut pv, child, max_pv_depth.saturating_sub(1));
            out.push(AnalysisData {
                move_loc: snap.loc,
                num_visits: snap.visits,
                utility: crate::playout::from_whites_perspective(utility_white, root_pla),
                win_rate,
                score_mean: values.expected_score,
                score_stdev: values.expected_score_stdev,
                policy_prior: nn.policy[snap.loc.to_policy_pos(board_size)] as f64,
                order,
                pv,
            });
        }

        // Pad with unvisited moves straight from the policy.
        if out.len() < min_moves {
            let mut ranked: Vec<(usize, f32)> = nn
                .policy
                .iter()
                .cloned()
                .enumerate()
                .filter(|&(_, p)| p > 0.0)
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (pos, prior) in ranked {
                if out.len() >= min_moves {
                    break;
                }
                let loc = Loc::from_policy_pos(pos, board_size);
                if loc.is_null()
                    || !self.is_allowed_root_move(loc)
                    || out.iter().any(|d| d.move_loc == loc)
                {
                    continue;
                }
                let order = out.len();
                out.push(AnalysisData {
                    move_loc: loc,
                    num_visits: 0,
                    utility: self.get_root_utility().unwrap_or(0.0),
                    win_rate: 0.5,
                    score_mean: 0.0,
                    score_stdev: 0.0,
                    policy_prior: prior as f64,
                    order,
                    pv: vec![loc],
                });
            }
        }
        out
    }

    /// Extend `buf` with the principal variation below `node`: repeatedly
    /// follow the most-visited child, lower index breaking ties.
    pub fn append_pv(&self, buf: &mut Vec<Loc>, node: &SearchNode, max_depth: usize) {
        let mut current: *const SearchNode = node;
        for _ in 0..max_depth {
            // SAFETY: pointers from snapshot_children stay valid under &self.
            let node = unsafe { &*current };
            let snaps = self.snapshot_children(node);
            let mut best: Option<&ChildSnapshot> = None;
            for snap in &snaps {
                if snap.visits > 0 && best.map_or(true, |b| snap.visits > b.visits) {
                    best = Some(snap);
                }
            }
            let Some(best) = best else {
                break;
            };
            buf.push(best.loc);
            current = best.ptr;
        }
    }

    /// Walk every node currently reachable from the root. For diagnostics
    /// and invariant verification; the usual consistency caveats for
    /// reading a live tree apply.
    pub fn visit_nodes(&self, mut f: impl FnMut(&SearchNode)) {
        let Some(root) = self.root_node_ref() else {
            return;
        };
        let mut stack: Vec<*const SearchNode> = vec![root];
        while let Some(ptr) = stack.pop() {
            // SAFETY: see snapshot_children.
            let node = unsafe { &*ptr };
            f(node);
            for snap in self.snapshot_children(node) {
                stack.push(snap.ptr);
            }
        }
    }

    /// The principal variation from the root.
    pub fn get_pv(&self, max_depth: usize) -> Vec<Loc> {
        let mut pv = Vec::new();
        if let Some(root) = self.root_node_ref() {
            self.append_pv(&mut pv, root, max_depth);
        }
        pv
    }

    pub fn print_pv(&self, out: &mut dyn Write, max_depth: usize) -> io::Result<()> {
        let board_size = self.root_board().size();
        let pv = self.get_pv(max_depth);
        let line: Vec<String> = pv.iter().map(|&l| loc_to_string(l, board_size)).collect();
        writeln!(out, "{}", line.join(" "))
    }

    /// Dump the tree below the root for debugging.
    pub fn print_tree(&self, out: &mut dyn Write, options: &PrintTreeOptions) -> io::Result<()> {
        let Some(root) = self.root_node_ref() else {
            return writeln!(out, "(no tree)");
        };
        self.print_tree_helper(out, root, options, 0)
    }

    fn print_tree_helper(
        &self,
        out: &mut dyn Write,
        node: &SearchNode,
        options: &PrintTreeOptions,
        depth: usize,
    ) -> io::Result<()> {
        let board_size = self.root_board().size();
        let indent = "  ".repeat(depth);
        let visits = node.visits();
        let label = if node.prev_move_loc.is_null() {
            "root".to_string()
        } else {
            loc_to_string(node.prev_move_loc, board_size)
        };
        match self.get_node_values(node) {
            Some(v) => writeln!(
                out,
                "{indent}{label}: visits {visits} whiteWin {:.1}% score {:+.1} +/- {:.1}",
                v.win_value * 100.0,
                v.expected_score,
                v.expected_score_stdev,
            )?,
            None => writeln!(out, "{indent}{label}: visits {visits}")?,
        }
        if depth >= options.max_depth {
            return Ok(());
        }
        let mut snaps = self.snapshot_children(node);
        snaps.sort_by_key(|s| -s.visits);
        for snap in snaps.iter().take(options.max_children_per_node) {
            if snap.visits < options.min_visits {
                break;
            }
            // SAFETY: see snapshot_children.
            let child = unsafe { &*snap.ptr };
            self.print_tree_helper(out, child, options, depth + 1)?;
        }
        Ok(())
    }
}
