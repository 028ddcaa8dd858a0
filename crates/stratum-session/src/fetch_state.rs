//! Per-object fetch-state coordination.
//!
//! Each object tracks one 2-bit state per fetch group in a single 64-bit
//! word guarded by a mutex, with a condvar for waiters. The protocol is
//! single-flight: the first reader to find a group `Unfetched` flips it
//! to `Pending` and runs the query outside the lock; concurrent readers
//! block until the leader broadcasts completion. A failed fetch resets
//! the group to `Unfetched`, so a woken waiter re-claims and retries.

use parking_lot::{Condvar, Mutex};

/// Fetch state of one (object, fetch group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Never loaded.
    Unfetched,
    /// A fetch is in flight on some thread.
    Pending,
    /// Loaded.
    Fetched,
}

/// Outcome of claiming a group for fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The group is already loaded; no query needed.
    AlreadyFetched,
    /// The caller owns the in-flight fetch and must call
    /// [`FetchLatch::complete`] or [`FetchLatch::abort`].
    Leader,
}

const STATE_MASK: u64 = 0b11;
const PENDING: u64 = 0b01;
const FETCHED: u64 = 0b10;

/// The fetch-state word and its wait/wake machinery.
#[derive(Debug, Default)]
pub struct FetchLatch {
    word: Mutex<u64>,
    cond: Condvar,
}

impl FetchLatch {
    /// A latch with every group unfetched.
    pub fn new() -> Self {
        Self::default()
    }

    fn shift(group: usize) -> u32 {
        // validated at registration: at most 31 groups
        (group as u32) * 2
    }

    /// Current state of a group.
    pub fn get(&self, group: usize) -> FetchState {
        let word = self.word.lock();
        match (*word >> Self::shift(group)) & STATE_MASK {
            0 => FetchState::Unfetched,
            PENDING => FetchState::Pending,
            _ => FetchState::Fetched,
        }
    }

    /// Whether a group is loaded.
    pub fn is_fetched(&self, group: usize) -> bool {
        self.get(group) == FetchState::Fetched
    }

    /// Claim a group for fetching, blocking while another thread's fetch
    /// is in flight.
    pub fn claim(&self, group: usize) -> Claim {
        let shift = Self::shift(group);
        let mut word = self.word.lock();
        loop {
            match (*word >> shift) & STATE_MASK {
                0 => {
                    *word |= PENDING << shift;
                    return Claim::Leader;
                }
                PENDING => {
                    self.cond.wait(&mut word);
                }
                _ => return Claim::AlreadyFetched,
            }
        }
    }

    /// Mark a group loaded and wake all waiters.
    pub fn complete(&self, group: usize) {
        let shift = Self::shift(group);
        let mut word = self.word.lock();
        *word = (*word & !(STATE_MASK << shift)) | (FETCHED << shift);
        drop(word);
        self.cond.notify_all();
    }

    /// Reset a group to unfetched after a failed fetch and wake all
    /// waiters so one of them can retry.
    pub fn abort(&self, group: usize) {
        let shift = Self::shift(group);
        let mut word = self.word.lock();
        *word &= !(STATE_MASK << shift);
        drop(word);
        self.cond.notify_all();
    }

    /// Mark every group loaded (freshly inserted objects have no stored
    /// state left to load).
    pub fn mark_all_fetched(&self, group_count: usize) {
        let mut word = self.word.lock();
        for group in 0..group_count {
            *word = (*word & !(STATE_MASK << Self::shift(group)))
                | (FETCHED << Self::shift(group));
        }
        drop(word);
        self.cond.notify_all();
    }

    /// Reset every group to unfetched, discarding the cached view.
    pub fn reset_all(&self) {
        let mut word = self.word.lock();
        *word = 0;
        drop(word);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn claim_complete_cycle() {
        let latch = FetchLatch::new();
        assert_eq!(latch.get(0), FetchState::Unfetched);
        assert_eq!(latch.claim(0), Claim::Leader);
        assert_eq!(latch.get(0), FetchState::Pending);
        latch.complete(0);
        assert_eq!(latch.get(0), FetchState::Fetched);
        assert_eq!(latch.claim(0), Claim::AlreadyFetched);
    }

    #[test]
    fn abort_resets_to_unfetched() {
        let latch = FetchLatch::new();
        assert_eq!(latch.claim(3), Claim::Leader);
        latch.abort(3);
        assert_eq!(latch.get(3), FetchState::Unfetched);
        // a later reader becomes the new leader
        assert_eq!(latch.claim(3), Claim::Leader);
    }

    #[test]
    fn groups_are_independent() {
        let latch = FetchLatch::new();
        assert_eq!(latch.claim(0), Claim::Leader);
        assert_eq!(latch.claim(1), Claim::Leader);
        latch.complete(1);
        assert_eq!(latch.get(0), FetchState::Pending);
        assert_eq!(latch.get(1), FetchState::Fetched);
    }

    #[test]
    fn reset_all_clears_every_group() {
        let latch = FetchLatch::new();
        latch.mark_all_fetched(4);
        assert!(latch.is_fetched(3));
        latch.reset_all();
        assert_eq!(latch.get(0), FetchState::Unfetched);
        assert_eq!(latch.get(3), FetchState::Unfetched);
    }

    #[test]
    fn highest_group_index_fits_the_word() {
        let latch = FetchLatch::new();
        assert_eq!(latch.claim(30), Claim::Leader);
        latch.complete(30);
        assert!(latch.is_fetched(30));
        assert_eq!(latch.get(29), FetchState::Unfetched);
    }

    #[test]
    fn waiters_block_until_leader_completes() {
        let latch = Arc::new(FetchLatch::new());
        assert_eq!(latch.claim(0), Claim::Leader);

        let observed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            let observed = Arc::clone(&observed);
            handles.push(std::thread::spawn(move || {
                // blocks until the leader completes, then sees Fetched
                assert_eq!(latch.claim(0), Claim::AlreadyFetched);
                observed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        latch.complete(0);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(observed.load(Ordering::SeqCst), 4);
    }
}
