//! Thin and fat object monitors.
//!
//! A monitor starts as a thin lock packed into the object header: the
//! owning thread id in the upper bits and a recursion count in the middle.
//! Contention, count overflow or a wait inflates it to a fat lock: an
//! out-of-line recursive mutex with a condition variable and a queue of
//! waiting threads, indexed from the header by a compact id. Fat locks are
//! never deflated back to thin while the object lives.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errors::{JavaError, JavaKind};
use crate::lock_table::{id_for_index, LockTable};
use crate::object::{
    ObjRef, FAT_MASK, ID_MASK, NON_LOCK_MASK, THIN_COUNT_ADD, THIN_COUNT_MASK, THIN_COUNT_SHIFT,
};
use crate::thread::{JavaThread, STATE_RUNNING, STATE_WAITING};

struct MonitorState {
    /// Header id-word of the owning thread; zero when unowned.
    owner: usize,
    recursion: u32,
    /// Threads blocked in Object.wait, in arrival order.
    waiters: Vec<Arc<JavaThread>>,
}

/// An inflated monitor: recursive mutex, condition variable, wait queue,
/// back-pointer to the locked object and the counters the table needs to
/// know whether anyone still cares about it.
pub struct FatLock {
    state: Mutex<MonitorState>,
    available: Condvar,
    index: u32,
    associated: AtomicUsize,
    /// Threads currently inside acquire on this lock.
    locking_threads: AtomicU32,
    /// Set when the associated object has been invalidated (bundle
    /// teardown); acquirers bail out and retry against the header.
    dead: AtomicBool,
}

impl FatLock {
    pub(crate) fn new(index: u32, obj: ObjRef) -> FatLock {
        FatLock {
            state: Mutex::new(MonitorState {
                owner: 0,
                recursion: 0,
                waiters: Vec::new(),
            }),
            available: Condvar::new(),
            index,
            associated: AtomicUsize::new(obj.addr()),
            locking_threads: AtomicU32::new(0),
            dead: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The compact id this lock writes into its object's header.
    pub fn id(&self) -> usize {
        id_for_index(self.index)
    }

    pub fn associated(&self) -> Option<ObjRef> {
        ObjRef::from_addr(self.associated.load(Ordering::Acquire))
    }

    pub(crate) fn attach(&self, obj: ObjRef) {
        self.dead.store(false, Ordering::Release);
        self.associated.store(obj.addr(), Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.associated.store(0, Ordering::Release);
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    pub fn recursion_count(&self) -> u32 {
        self.state.lock().recursion
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_owner(&self, me: usize) -> bool {
        self.state.lock().owner == me
    }

    pub fn owner_word(&self) -> usize {
        self.state.lock().owner
    }

    /// Acquires and sets the recursion count in one step. Used when a thin
    /// lock transfers its count into a fresh fat lock and when a waiter
    /// restores its recursion after waking.
    fn lock_all(&self, me: usize, count: u32) {
        let mut st = self.state.lock();
        while st.owner != 0 && st.owner != me {
            self.available.wait(&mut st);
        }
        st.owner = me;
        st.recursion = count;
    }

    /// Releases the lock completely, returning the recursion count that
    /// `lock_all` must restore afterwards.
    fn unlock_all(&self, me: usize) -> u32 {
        let mut st = self.state.lock();
        debug_assert_eq!(st.owner, me, "unlock_all by non-owner");
        let count = st.recursion;
        st.owner = 0;
        st.recursion = 0;
        self.available.notify_one();
        count
    }

    /// A contending thread blocks here. Returns false if, once acquired,
    /// the lock no longer belongs to `obj` (recycled or invalidated); the
    /// caller retries against the header.
    fn acquire_contended(&self, me: usize, obj: ObjRef) -> bool {
        self.locking_threads.fetch_add(1, Ordering::AcqRel);
        {
            let mut st = self.state.lock();
            while st.owner != 0 && st.owner != me {
                self.available.wait(&mut st);
            }
            if st.owner == me {
                st.recursion += 1;
            } else {
                st.owner = me;
                st.recursion = 1;
            }
        }
        self.locking_threads.fetch_sub(1, Ordering::AcqRel);
        if self.dead.load(Ordering::Acquire) || self.associated() != Some(obj) {
            self.release_one(me);
            return false;
        }
        true
    }

    fn release_one(&self, me: usize) {
        let mut st = self.state.lock();
        debug_assert_eq!(st.owner, me, "release by non-owner");
        st.recursion -= 1;
        if st.recursion == 0 {
            st.owner = 0;
            self.available.notify_one();
        }
    }
}

/// Acquire the monitor of `obj` for the current thread.
pub fn acquire(table: &LockTable, obj: ObjRef) {
    let thread = JavaThread::current();
    let me = thread.id_word();
    let header = obj.header();

    // Thin fast path: lock bits are free, claim them.
    loop {
        let old = header.load(Ordering::Acquire);
        if old & !NON_LOCK_MASK != 0 {
            break;
        }
        if header
            .compare_exchange_weak(old, old | me, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }

    let seen = header.load(Ordering::Acquire);
    if seen & FAT_MASK == 0 && seen & ID_MASK == me {
        // Re-entrant thin acquisition.
        if seen & THIN_COUNT_MASK != THIN_COUNT_MASK {
            loop {
                let old = header.load(Ordering::Acquire);
                if header
                    .compare_exchange_weak(
                        old,
                        old + THIN_COUNT_ADD,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
            }
        }
        overflow_thin_lock(table, obj, me);
        return;
    }

    // Contended path.
    let mut iterations = 0u32;
    loop {
        let h = header.load(Ordering::Acquire);
        if h & FAT_MASK != 0 {
            if let Some(lock) = table.from_header(h) {
                if lock.acquire_contended(me, obj) {
                    break;
                }
                iterations += 1;
                if iterations == 1000 {
                    log::debug!(
                        "monitor on {:#x} still bouncing after 1000 acquisition attempts",
                        obj.addr()
                    );
                }
            }
        }

        // Spin while a thin owner holds it; inflation needs an unlocked
        // window or an already-fat header.
        loop {
            let h = header.load(Ordering::Acquire);
            if h & !NON_LOCK_MASK == 0 || h & FAT_MASK != 0 {
                break;
            }
            std::thread::yield_now();
        }

        if header.load(Ordering::Acquire) & !NON_LOCK_MASK == 0 {
            // Unlocked: install a fresh, unowned fat lock, then race for it
            // through the fat path on the next iteration.
            let lock = table.allocate(obj);
            let mut installed = false;
            loop {
                let old = header.load(Ordering::Acquire);
                if old & !NON_LOCK_MASK != 0 {
                    break;
                }
                if header
                    .compare_exchange(
                        old,
                        (old & NON_LOCK_MASK) | lock.id(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    installed = true;
                    break;
                }
            }
            if !installed {
                table.deallocate(lock);
            }
        }
    }
    debug_assert!(owns(table, obj), "not owner after quitting acquire");
}

/// The thin recursion count is saturated; move the whole state into a fat
/// lock, counting the acquisition that overflowed.
fn overflow_thin_lock(table: &LockTable, obj: ObjRef, me: usize) {
    let lock = table.allocate(obj);
    let max = (THIN_COUNT_MASK >> THIN_COUNT_SHIFT) as u32;
    lock.lock_all(me, max + 2);
    install_fat(obj, lock);
}

fn install_fat(obj: ObjRef, lock: &FatLock) {
    let header = obj.header();
    loop {
        let old = header.load(Ordering::Acquire);
        let new = lock.id() | (old & NON_LOCK_MASK);
        if header
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

/// Inflate the monitor to its fat form, transferring the thin recursion
/// count. The caller must own the monitor.
pub fn inflate(table: &LockTable, obj: ObjRef) -> &'static FatLock {
    let header = obj.header().load(Ordering::Acquire);
    if header & FAT_MASK == 0 {
        let me = JavaThread::current().id_word();
        debug_assert_eq!(header & ID_MASK, me, "inflating a monitor we do not own");
        let lock = table.allocate(obj);
        let count = ((header & THIN_COUNT_MASK) >> THIN_COUNT_SHIFT) as u32;
        lock.lock_all(me, count + 1);
        install_fat(obj, lock);
        lock
    } else {
        table
            .from_header(header)
            .expect("lock deallocated while held")
    }
}

/// Release the monitor of `obj`. Raises IllegalMonitorStateException when
/// the current thread does not own it.
pub fn release(table: &LockTable, obj: ObjRef) -> Result<(), JavaError> {
    let me = JavaThread::current().id_word();
    let header = obj.header();
    let h = header.load(Ordering::Acquire);
    if h & !NON_LOCK_MASK == me {
        // Single thin acquisition: clear the lock bits.
        loop {
            let old = header.load(Ordering::Acquire);
            if header
                .compare_exchange_weak(
                    old,
                    old & NON_LOCK_MASK,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    } else if h & FAT_MASK != 0 {
        let lock = table
            .from_header(h)
            .ok_or_else(|| JavaError::new(JavaKind::InternalError, "lock missing on release"))?;
        if !lock.is_owner(me) {
            return Err(JavaError::new(
                JavaKind::IllegalMonitorStateException,
                "current thread is not the monitor owner",
            ));
        }
        lock.release_one(me);
        Ok(())
    } else if h & FAT_MASK == 0 && h & ID_MASK == me {
        debug_assert!(h & THIN_COUNT_MASK > 0, "inconsistent thin state");
        loop {
            let old = header.load(Ordering::Acquire);
            if header
                .compare_exchange_weak(
                    old,
                    old - THIN_COUNT_ADD,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    } else {
        Err(JavaError::new(
            JavaKind::IllegalMonitorStateException,
            "current thread is not the monitor owner",
        ))
    }
}

/// Does the current thread own the monitor of `obj`?
pub fn owns(table: &LockTable, obj: ObjRef) -> bool {
    let me = JavaThread::current().id_word();
    let h = obj.header().load(Ordering::Acquire);
    if h & FAT_MASK != 0 {
        return table.from_header(h).is_some_and(|l| l.is_owner(me));
    }
    h & ID_MASK == me
}

/// Object.wait. The caller must own the monitor; the monitor is released
/// for the duration and reacquired with its recursion count restored
/// before returning. An interrupt surfaces as InterruptedException with
/// the flag cleared.
pub fn wait(table: &LockTable, obj: ObjRef, timeout: Option<Duration>) -> Result<(), JavaError> {
    let thread = JavaThread::current();
    let me = thread.id_word();
    if !owns(table, obj) {
        return Err(JavaError::new(
            JavaKind::IllegalMonitorStateException,
            "wait without owning the monitor",
        ));
    }
    let lock = inflate(table, obj);

    if thread.clear_interrupt() {
        return Err(JavaError::new(
            JavaKind::InterruptedException,
            "interrupted before wait",
        ));
    }

    thread.state.store(STATE_WAITING, Ordering::Release);
    thread.parker.begin();
    lock.state.lock().waiters.push(thread.clone());

    let recursion = lock.unlock_all(me);
    let timed_out = thread.parker.park(&thread, timeout);
    lock.lock_all(me, recursion);

    let was_queued = {
        let mut st = lock.state.lock();
        match st.waiters.iter().position(|t| Arc::ptr_eq(t, &thread)) {
            Some(pos) => {
                st.waiters.remove(pos);
                true
            }
            None => false,
        }
    };

    let interrupted = thread.is_interrupted();
    if (interrupted || timed_out) && !was_queued {
        // A notify chose us but we are abandoning the wait; pass it on so
        // the signal is not lost.
        notify_first(lock);
    }

    thread.state.store(STATE_RUNNING, Ordering::Release);

    if interrupted {
        thread.clear_interrupt();
        return Err(JavaError::new(
            JavaKind::InterruptedException,
            "interrupted while waiting",
        ));
    }
    Ok(())
}

fn notify_first(lock: &FatLock) {
    let mut st = lock.state.lock();
    let mut i = 0;
    while i < st.waiters.len() {
        // Interrupted waiters wake on their own; leave them queued so
        // their interrupt path runs.
        if st.waiters[i].is_interrupted() {
            i += 1;
            continue;
        }
        let chosen = st.waiters.remove(i);
        chosen.parker.unpark();
        return;
    }
}

/// Object.notify: wake the first non-interrupted waiter.
pub fn notify(table: &LockTable, obj: ObjRef) -> Result<(), JavaError> {
    if !owns(table, obj) {
        return Err(JavaError::new(
            JavaKind::IllegalMonitorStateException,
            "notify without owning the monitor",
        ));
    }
    if let Some(lock) = table.from_header(obj.header().load(Ordering::Acquire)) {
        notify_first(lock);
    }
    Ok(())
}

/// Object.notifyAll: wake every waiter.
pub fn notify_all(table: &LockTable, obj: ObjRef) -> Result<(), JavaError> {
    if !owns(table, obj) {
        return Err(JavaError::new(
            JavaKind::IllegalMonitorStateException,
            "notifyAll without owning the monitor",
        ));
    }
    if let Some(lock) = table.from_header(obj.header().load(Ordering::Acquire)) {
        let mut st = lock.state.lock();
        for waiter in st.waiters.drain(..) {
            waiter.parker.unpark();
        }
    }
    Ok(())
}

/// The recursion depth currently held on `obj`'s monitor, thin or fat.
/// Zero when unlocked.
pub fn held_count(table: &LockTable, obj: ObjRef) -> u32 {
    let h = obj.header().load(Ordering::Acquire);
    if h & FAT_MASK != 0 {
        return table.from_header(h).map_or(0, |l| l.recursion_count());
    }
    if h & ID_MASK == 0 {
        return 0;
    }
    ((h & THIN_COUNT_MASK) >> THIN_COUNT_SHIFT) as u32 + 1
}
