//! The asynchronous bot façade.
//!
//! A single background worker owns the [`Search`]; callers hand it commands
//! and synchronize on completion. Every mutating entry point first stops any
//! ongoing search (which drains the worker threads and releases all virtual
//! losses) before touching the position, so drivers never race the tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use go_core::{Board, BoardHistory, Loc, Player, RulesError};

use crate::evaluator::NnEvaluator;
use crate::params::{ParamsError, SearchParams};
use crate::search::{Search, SearchError};
use crate::time_controls::TimeControls;

/// Callback receiving analysis snapshots at a fixed wall-clock interval.
pub type AnalysisCallback = Box<dyn FnMut(&Search) + Send>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("search failed: {0}")]
    Search(String),

    #[error("bot worker is gone")]
    WorkerGone,
}

enum Command {
    Search {
        /// Player to search for; `None` keeps the current root player
        /// (pondering).
        pla: Option<Player>,
        time_controls: Option<TimeControls>,
        search_factor: f64,
        pondering: bool,
        analyze: Option<(Duration, AnalysisCallback)>,
        deliver_move: bool,
    },
    Quit,
}

#[derive(Default)]
struct WorkerState {
    searching: bool,
    last_move: Option<Loc>,
    last_error: Option<String>,
}

struct WorkerSync {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

pub struct AsyncBot {
    search: Arc<Mutex<Search>>,
    tx: mpsc::Sender<Command>,
    should_stop: Arc<AtomicBool>,
    sync: Arc<WorkerSync>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncBot {
    pub fn new(
        params: SearchParams,
        nn_eval: Arc<dyn NnEvaluator>,
        rand_seed: &str,
    ) -> Result<AsyncBot, ParamsError> {
        let search = Arc::new(Mutex::new(Search::new(params, nn_eval, rand_seed)?));
        let (tx, rx) = mpsc::channel::<Command>();
        let should_stop = Arc::new(AtomicBool::new(false));
        let sync = Arc::new(WorkerSync {
            state: Mutex::new(WorkerState::default()),
            cond: Condvar::new(),
        });

        let worker = {
            let search = Arc::clone(&search);
            let should_stop = Arc::clone(&should_stop);
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || worker_loop(rx, search, should_stop, sync))
        };

        Ok(AsyncBot {
            search,
            tx,
            should_stop,
            sync,
            worker: Some(worker),
        })
    }

    /// Run `f` against the idle search. Stops any ongoing search first.
    pub fn with_search<R>(&self, f: impl FnOnce(&mut Search) -> R) -> R {
        self.stop_and_wait();
        let mut search = self.lock_search();
        f(&mut search)
    }

    fn lock_search(&self) -> std::sync::MutexGuard<'_, Search> {
        self.search.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_position(&mut self, pla: Player, board: Board, history: BoardHistory) {
        self.with_search(|s| s.set_position(pla, board, history));
    }

    /// Commit a move with subtree reuse. False if illegal; nothing changes.
    pub fn make_move(&mut self, loc: Loc, pla: Player) -> bool {
        self.with_search(|s| s.make_move(loc, pla))
    }

    pub fn is_legal(&self, loc: Loc, pla: Player) -> bool {
        self.stop_and_wait();
        self.lock_search().is_legal(loc, pla)
    }

    pub fn set_komi_if_new(&mut self, komi: f32) -> Result<(), RulesError> {
        self.with_search(|s| s.set_komi_if_new(komi))
    }

    pub fn set_params(&mut self, params: SearchParams) -> Result<(), ParamsError> {
        self.with_search(|s| s.set_params(params))
    }

    /// Search under the clock and return the chosen move. Blocks.
    pub fn gen_move_synchronous(
        &mut self,
        pla: Player,
        time_controls: TimeControls,
        search_factor: f64,
    ) -> Result<Loc, BotError> {
        self.submit(Command::Search {
            pla: Some(pla),
            time_controls: Some(time_controls),
            search_factor,
            pondering: false,
            analyze: None,
            deliver_move: true,
        })?;
        let mut state = self.wait_idle();
        if let Some(err) = state.last_error.take() {
            return Err(BotError::Search(err));
        }
        Ok(state.last_move.take().unwrap_or(Loc::NULL))
    }

    /// Start a background analysis search; `callback` fires every
    /// `interval_sec` of wall clock until the next command stops it.
    pub fn analyze(
        &mut self,
        pla: Player,
        search_factor: f64,
        interval_sec: f64,
        callback: AnalysisCallback,
    ) -> Result<(), BotError> {
        self.submit(Command::Search {
            pla: Some(pla),
            time_controls: None,
            search_factor,
            pondering: true,
            analyze: Some((Duration::from_secs_f64(interval_sec), callback)),
            deliver_move: false,
        })
    }

    /// Think on the opponent's time: search the current position with no
    /// budget until a command interrupts.
    pub fn ponder(&mut self, search_factor: f64) -> Result<(), BotError> {
        self.submit(Command::Search {
            pla: None,
            time_controls: None,
            search_factor,
            pondering: true,
            analyze: None,
            deliver_move: false,
        })
    }

    /// Stop any ongoing search and block until the worker is idle. The tree
    /// is left intact for reuse.
    pub fn stop_and_wait(&self) {
        self.should_stop.store(true, Ordering::Release);
        let state = self
            .sync
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let _unused = self
            .sync
            .cond
            .wait_while(state, |s| s.searching)
            .unwrap_or_else(|p| p.into_inner());
    }

    fn submit(&self, command: Command) -> Result<(), BotError> {
        self.stop_and_wait();
        self.should_stop.store(false, Ordering::Release);
        {
            let mut state = self
                .sync
                .state
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            state.searching = true;
            state.last_move = None;
            state.last_error = None;
        }
        self.tx.send(command).map_err(|_| BotError::WorkerGone)
    }

    fn wait_idle(&self) -> WorkerState {
        let state = self
            .sync
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let mut state = self
            .sync
            .cond
            .wait_while(state, |s| s.searching)
            .unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *state)
    }
}

impl Drop for AsyncBot {
    fn drop(&mut self) {
        self.stop_and_wait();
        let _ = self.tx.send(Command::Quit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    rx: mpsc::Receiver<Command>,
    search: Arc<Mutex<Search>>,
    should_stop: Arc<AtomicBool>,
    sync: Arc<WorkerSync>,
) {
    while let Ok(command) = rx.recv() {
        let Command::Search {
            pla,
            time_controls,
            search_factor,
            pondering,
            mut analyze,
            deliver_move,
        } = command
        else {
            break;
        };

        let mut search_guard = search.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pla) = pla {
            if pla != search_guard.root_pla() {
                search_guard.set_player_and_clear_history(pla);
            }
        }
        let callback = analyze
            .as_mut()
            .map(|(interval, cb)| (*interval, &mut **cb as &mut (dyn FnMut(&Search) + Send)));
        let result = search_guard.run_whole_search(
            &should_stop,
            pondering,
            time_controls.as_ref(),
            search_factor,
            callback,
            None,
        );
        let chosen = if deliver_move && result.is_ok() {
            Some(search_guard.get_chosen_move_loc())
        } else {
            None
        };
        drop(search_guard);

        let mut state = sync.state.lock().unwrap_or_else(|p| p.into_inner());
        state.searching = false;
        state.last_move = chosen;
        state.last_error = match result {
            Ok(()) => None,
            Err(SearchError::Eval(e)) => {
                warn!(error = %e, "search aborted by evaluator failure");
                Some(e.to_string())
            }
        };
        drop(state);
        sync.cond.notify_all();
    }
    debug!("bot worker exiting");
}
