//! Parallel Monte Carlo Tree Search for Go, driven by a neural-net
//! policy/value evaluator.
//!
//! Many OS threads descend one shared tree. Each playout selects children by
//! PUCT with score-aware utilities, applies virtual loss on the way down,
//! expands leaves through a blocking (batch-friendly) evaluator call, and
//! backs statistics up the descent path. The [`Search`] façade owns the tree
//! and supports subtree reuse across committed moves; [`AsyncBot`] wraps it
//! in a single background worker for game-loop drivers (move generation,
//! pondering, interval analysis).
//!
//! # Concurrency model
//!
//! - Per-node NN outputs are write-once and published with acquire/release
//!   semantics; losing a racing install is harmless.
//! - Children arrays grow under a mutex drawn from a fixed [`MutexPool`],
//!   indexed by position hash.
//! - The statistics block (including virtual losses) sits behind a
//!   test-and-set spin lock per node.
//! - There is no global tree lock. Cancellation is cooperative through an
//!   atomic flag, and every virtual loss applied on descent is released on
//!   backup, including on abort paths.

pub mod analysis;
pub mod bot;
pub mod evaluator;
pub mod mutex_pool;
pub mod node;
pub mod params;
pub mod playout;
pub mod search;
pub mod spin;
pub mod time_controls;
pub mod value;

pub use analysis::{AnalysisData, PrintTreeOptions};
pub use bot::{AnalysisCallback, AsyncBot, BotError};
pub use evaluator::{EvalError, NnEvaluator, NnOutput, UniformEvaluator, NUM_SYMMETRIES};
pub use mutex_pool::MutexPool;
pub use node::{NodeStats, SearchNode};
pub use params::{ParamsError, SearchParams};
pub use playout::SearchThread;
pub use search::{NodeValues, PlaySelectionValues, Search, SearchError};
pub use time_controls::TimeControls;
pub use value::DistributionTable;
