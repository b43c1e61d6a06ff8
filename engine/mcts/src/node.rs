//! The search tree vertex and its statistics block.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::OnceLock;

use go_core::{Loc, Player};

use crate::evaluator::NnOutput;
use crate::spin::SpinLock;

/// Per-node aggregates, updated under the node's stats spin lock.
///
/// All value sums are white-centric; a node's utility from the mover's
/// perspective is derived at read time. `value_sum_weight` is the total
/// weight behind the sums: equal to `visits` under plain accumulation,
/// less once outlier children have been down-weighted.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub visits: i64,
    pub win_value_sum: f64,
    pub no_result_value_sum: f64,
    pub score_mean_sum: f64,
    pub score_mean_sq_sum: f64,
    pub value_sum_weight: f64,
    /// In-flight descents through this node, scaled by the configured
    /// virtual-loss count. Every increment on the way down is matched by a
    /// decrement during backup, including on abort paths.
    pub virtual_losses: i32,
}

impl NodeStats {
    pub fn new() -> NodeStats {
        NodeStats::default()
    }

    /// Accumulate one playout's leaf values.
    pub fn add_values(
        &mut self,
        win: f64,
        no_result: f64,
        score_mean: f64,
        score_mean_sq: f64,
        weight: f64,
    ) {
        self.win_value_sum += win * weight;
        self.no_result_value_sum += no_result * weight;
        self.score_mean_sum += score_mean * weight;
        self.score_mean_sq_sum += score_mean_sq * weight;
        self.value_sum_weight += weight;
    }
}

/// One playout's leaf evaluation, backed up to every node on the descent
/// path. White-centric, like the sums it feeds.
#[derive(Debug, Clone, Copy)]
pub struct LeafValues {
    pub win: f64,
    pub no_result: f64,
    pub score_mean: f64,
    pub score_mean_sq: f64,
}

/// A vertex of the shared search tree.
///
/// Three protection domains, per field group:
/// - `next_pla`, `prev_move_loc`, `lock_idx`: constant after creation.
/// - `nn_output`: write-once with acquire/release publication; readers see
///   either `None` or the fully initialized output.
/// - `children`: grown only while holding the pool mutex for `lock_idx`.
/// - `stats` (including virtual losses): under the stats spin lock.
pub struct SearchNode {
    pub next_pla: Player,
    pub prev_move_loc: Loc,
    pub lock_idx: u32,
    nn_output: OnceLock<Arc<NnOutput>>,
    children: UnsafeCell<Vec<Box<SearchNode>>>,
    pub stats: SpinLock<NodeStats>,
}

// SAFETY: `children` is the only field without its own synchronization; all
// shared access to it goes through the unsafe accessors below, whose
// contract is that the pool mutex for `lock_idx` is held. Child boxes are
// never dropped or moved out while a search is running (structural edits
// require `&mut Search`), so references obtained under the lock stay valid
// for the duration of the search.
unsafe impl Send for SearchNode {}
unsafe impl Sync for SearchNode {}

impl SearchNode {
    pub fn new(next_pla: Player, prev_move_loc: Loc, lock_idx: u32) -> SearchNode {
        SearchNode {
            next_pla,
            prev_move_loc,
            lock_idx,
            nn_output: OnceLock::new(),
            children: UnsafeCell::new(Vec::new()),
            stats: SpinLock::new(NodeStats::new()),
        }
    }

    /// The NN output, if this node has been expanded.
    #[inline]
    pub fn nn_output(&self) -> Option<&Arc<NnOutput>> {
        self.nn_output.get()
    }

    /// Install an NN output. If another thread won the race, its output is
    /// kept and this one discarded; returns the installed output either way.
    pub fn install_nn_output(&self, out: Arc<NnOutput>) -> &Arc<NnOutput> {
        let _ = self.nn_output.set(out);
        self.nn_output.get().expect("nn output just installed")
    }

    /// Shared view of the children.
    ///
    /// # Safety
    /// The pool mutex for `self.lock_idx` must be held, or the caller must
    /// otherwise have exclusive access to the tree.
    #[inline]
    pub(crate) unsafe fn children(&self) -> &[Box<SearchNode>] {
        (*self.children.get()).as_slice()
    }

    /// Growable view of the children.
    ///
    /// # Safety
    /// As [`SearchNode::children`]; additionally the caller must not remove
    /// or reorder existing entries.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn children_vec(&self) -> &mut Vec<Box<SearchNode>> {
        &mut *self.children.get()
    }

    /// Children through exclusive access; no locking involved.
    #[inline]
    pub fn children_exclusive(&mut self) -> &mut Vec<Box<SearchNode>> {
        self.children.get_mut()
    }

    /// Visits without holding the caller's locks longer than the spin.
    #[inline]
    pub fn visits(&self) -> i64 {
        self.stats.lock().visits
    }
}

/// Tear down a subtree without recursing, so arbitrarily deep trees cannot
/// overflow the stack.
pub fn drop_subtree(root: Box<SearchNode>) {
    let mut stack = vec![root];
    while let Some(mut node) = stack.pop() {
        stack.append(node.children_exclusive());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dummy_output() -> Arc<NnOutput> {
        Arc::new(NnOutput {
            policy: vec![0.0; go_core::NN_POLICY_SIZE],
            white_win_prob: 0.7,
            white_loss_prob: 0.3,
            no_result_prob: 0.0,
            white_score_mean: 2.5,
            white_score_mean_sq: 6.25,
            ownership: None,
        })
    }

    #[test]
    fn nn_output_install_is_write_once() {
        let node = SearchNode::new(Player::Black, Loc::NULL, 0);
        assert!(node.nn_output().is_none());

        let first = dummy_output();
        node.install_nn_output(Arc::clone(&first));

        let mut second = dummy_output();
        Arc::get_mut(&mut second).unwrap().white_win_prob = 0.1;
        let installed = node.install_nn_output(second);

        // The loser of the race is discarded.
        assert_eq!(installed.white_win_prob, 0.7);
        assert!(Arc::ptr_eq(node.nn_output().unwrap(), &first));
    }

    #[test]
    fn stats_accumulate() {
        let node = SearchNode::new(Player::White, Loc::PASS, 3);
        {
            let mut stats = node.stats.lock();
            stats.visits += 1;
            stats.add_values(0.7, 0.0, 2.5, 6.25, 1.0);
        }
        {
            let mut stats = node.stats.lock();
            stats.visits += 1;
            stats.add_values(0.3, 0.0, -1.5, 2.25, 1.0);
        }
        let stats = node.stats.lock();
        assert_eq!(stats.visits, 2);
        assert!((stats.win_value_sum - 1.0).abs() < 1e-9);
        assert!((stats.score_mean_sum - 1.0).abs() < 1e-9);
        assert_eq!(stats.value_sum_weight, 2.0);
    }

    #[test]
    fn deep_subtree_drops_without_recursion() {
        // Build a 100k-deep chain bottom-up, then tear it down.
        let mut node = Box::new(SearchNode::new(Player::White, Loc::PASS, 0));
        for _ in 0..100_000 {
            let mut parent = Box::new(SearchNode::new(Player::Black, Loc::NULL, 0));
            parent.children_exclusive().push(node);
            node = parent;
        }
        drop_subtree(node);
    }
}
