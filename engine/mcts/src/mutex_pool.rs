//! A fixed pool of mutexes shared by all tree nodes.
//!
//! Nodes store a pool index instead of carrying a full mutex, keeping the
//! per-node lock cost to four bytes. Collisions between unrelated nodes are
//! harmless; critical sections under these locks are short (installing an NN
//! output, growing a children array).

use std::sync::{Mutex, MutexGuard};

pub struct MutexPool {
    mutexes: Vec<Mutex<()>>,
}

impl MutexPool {
    pub fn new(size: usize) -> MutexPool {
        assert!(size.is_power_of_two(), "pool size must be a power of two");
        let mutexes = (0..size).map(|_| Mutex::new(())).collect();
        MutexPool { mutexes }
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }

    /// Pool index for a node created at a position with this hash.
    #[inline]
    pub fn idx_for_hash(&self, hash: u64) -> u32 {
        (hash & (self.mutexes.len() as u64 - 1)) as u32
    }

    #[inline]
    pub fn lock(&self, idx: u32) -> MutexGuard<'_, ()> {
        // Poisoning cannot happen: no code panics while holding these locks
        // short of an allocation failure aborting the process.
        self.mutexes[idx as usize]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
