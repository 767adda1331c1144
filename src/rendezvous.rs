//! Cooperative stop-the-world rendezvous.
//!
//! The initiating thread flags every other thread, then waits until each
//! one is either blocked at a safe point or running uncooperative code
//! (which cannot touch the heap and is scanned at its boundary). Between
//! `begin` and `finish`, only the collector mutates the heap; all
//! cross-side visibility goes through the rendezvous mutex.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::thread::{JavaThread, ThreadRing};

struct RvState {
    in_progress: bool,
    /// Identifier of the current rendezvous; waiters block until it
    /// changes.
    rendezvous_nb: u64,
    /// Threads accounted for so far (safe point or uncooperative).
    joined: usize,
    expected: usize,
    initiator: usize,
}

pub struct CollectionRendezvous {
    state: Mutex<RvState>,
    /// Signals the initiator that another mutator joined.
    joined_cond: Condvar,
    /// Signals blocked mutators that the collection finished.
    resume_cond: Condvar,
}

impl Default for CollectionRendezvous {
    fn default() -> CollectionRendezvous {
        CollectionRendezvous::new()
    }
}

impl CollectionRendezvous {
    pub fn new() -> CollectionRendezvous {
        CollectionRendezvous {
            state: Mutex::new(RvState {
                in_progress: false,
                rendezvous_nb: 0,
                joined: 0,
                expected: 0,
                initiator: 0,
            }),
            joined_cond: Condvar::new(),
            resume_cond: Condvar::new(),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.state.lock().in_progress
    }

    pub fn rendezvous_nb(&self) -> u64 {
        self.state.lock().rendezvous_nb
    }

    /// Header id-word of the thread driving the current collection, zero
    /// outside one.
    pub fn current_collector(&self) -> usize {
        self.state.lock().initiator
    }

    /// Stops the world. On return, every other mutator is parked at a safe
    /// point or inside uncooperative code; the caller is the collector.
    pub fn begin(&self, ring: &ThreadRing) {
        let me = JavaThread::current();
        let threads = ring.snapshot();

        let mut state = self.state.lock();
        // Back-to-back collections serialize here; a second initiator
        // waits for the previous cycle like any mutator would.
        while state.in_progress {
            self.resume_cond.wait(&mut state);
        }
        state.in_progress = true;
        state.initiator = me.id_word();
        state.joined = 0;
        state.expected = threads
            .iter()
            .filter(|t| !Arc::ptr_eq(t, &me))
            .count();

        for thread in &threads {
            if Arc::ptr_eq(thread, &me) {
                continue;
            }
            thread.do_yield.store(true, Ordering::Release);
        }
        // Threads already in uncooperative code are accounted for
        // immediately; they join for real at their boundary.
        for thread in &threads {
            if Arc::ptr_eq(thread, &me) {
                continue;
            }
            if thread.is_uncooperative() && !thread.gc_joined.swap(true, Ordering::AcqRel) {
                state.joined += 1;
            }
        }
        while state.joined < state.expected {
            self.joined_cond.wait(&mut state);
        }
    }

    /// Releases the world: clears yield flags and wakes every thread
    /// blocked at a safe point.
    pub fn finish(&self, ring: &ThreadRing) {
        let mut state = self.state.lock();
        for thread in ring.snapshot() {
            thread.do_yield.store(false, Ordering::Release);
            thread.gc_joined.store(false, Ordering::Release);
        }
        state.in_progress = false;
        state.rendezvous_nb += 1;
        state.initiator = 0;
        self.resume_cond.notify_all();
    }

    /// The mutator side: called at every safe point. When a collection is
    /// pending, joins it and blocks until the collector finishes.
    pub fn safe_point_check(&self, thread: &Arc<JavaThread>) {
        if !thread.do_yield.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        if !state.in_progress {
            return;
        }
        let nb = state.rendezvous_nb;
        if !thread.gc_joined.swap(true, Ordering::AcqRel) {
            state.joined += 1;
            self.joined_cond.notify_one();
        }
        while state.in_progress && state.rendezvous_nb == nb {
            self.resume_cond.wait(&mut state);
        }
    }

    /// Entering a blocking region without safe points (a long JNI call).
    /// A pending rendezvous is joined on the way out, not waited for.
    pub fn enter_uncooperative(&self, thread: &Arc<JavaThread>) {
        thread.enter_uncooperative_raw();
        if thread.do_yield.load(Ordering::Acquire) {
            let mut state = self.state.lock();
            if state.in_progress && !thread.gc_joined.swap(true, Ordering::AcqRel) {
                state.joined += 1;
                self.joined_cond.notify_one();
            }
        }
    }

    /// The boundary back into cooperative code performs the safe-point
    /// check the region could not.
    pub fn leave_uncooperative(&self, thread: &Arc<JavaThread>) {
        let depth = thread.leave_uncooperative_raw();
        if depth == 1 {
            self.safe_point_check(thread);
        }
    }
}
