//! Java thread state: identity, parking, interrupts, the pending-exception
//! slot, JNI local references and the frame records the stack walker
//! consumes.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::class::MethodPtr;
use crate::errors::JavaError;
use crate::object::{ObjRef, ID_SHIFT};

pub const STATE_RUNNING: u8 = 0;
pub const STATE_WAITING: u8 = 1;
pub const STATE_INTERRUPTED: u8 = 2;

/// Slots per JNI local-reference page.
pub const REFS_PER_PAGE: usize = 64;

/// Per-thread mutex + condvar used for Object.wait and park. Interrupters
/// signal it so a parked thread re-checks its flags.
pub struct Parker {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Parker {
    fn new() -> Parker {
        Parker {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Arms the parker. Must happen before the caller publishes itself to
    /// whatever queue will later `unpark` it.
    pub fn begin(&self) {
        *self.state.lock() = false;
    }

    /// Blocks until unparked, interrupted or timed out. Returns true on
    /// timeout.
    pub fn park(&self, thread: &JavaThread, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut notified = self.state.lock();
        loop {
            if *notified || thread.is_interrupted() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    if self.cond.wait_for(&mut notified, deadline - now).timed_out() {
                        return !*notified;
                    }
                }
                None => self.cond.wait(&mut notified),
            }
        }
    }

    pub fn unpark(&self) {
        let mut notified = self.state.lock();
        *notified = true;
        self.cond.notify_one();
    }

    /// Signals without setting the token, so the target re-checks its
    /// interrupt flag.
    pub fn kick(&self) {
        let _guard = self.state.lock();
        self.cond.notify_one();
    }
}

/// A page of JNI local references. Pages never move, so the address of a
/// slot is stable for the lifetime of its frame even though the object it
/// holds may be forwarded by the GC.
struct RefPage {
    slots: Box<[AtomicUsize; REFS_PER_PAGE]>,
    used: usize,
    prev: Option<Box<RefPage>>,
}

impl RefPage {
    fn new(prev: Option<Box<RefPage>>) -> Box<RefPage> {
        Box::new(RefPage {
            slots: Box::new([const { AtomicUsize::new(0) }; REFS_PER_PAGE]),
            used: 0,
            prev,
        })
    }
}

struct JniLocals {
    head: Box<RefPage>,
    /// Total live slots across all pages.
    total: usize,
    /// Watermarks recorded by push_frame.
    frames: Vec<usize>,
}

impl JniLocals {
    fn new() -> JniLocals {
        JniLocals {
            head: RefPage::new(None),
            total: 0,
            frames: Vec::new(),
        }
    }

    fn add(&mut self, obj: Option<ObjRef>) -> *const AtomicUsize {
        if self.head.used == REFS_PER_PAGE {
            let prev = std::mem::replace(&mut self.head, RefPage::new(None));
            self.head.prev = Some(prev);
        }
        let slot = &self.head.slots[self.head.used];
        slot.store(obj.map_or(0, |o| o.addr()), Ordering::Release);
        self.head.used += 1;
        self.total += 1;
        slot as *const AtomicUsize
    }

    fn remove(&mut self, count: usize) {
        let mut remaining = count.min(self.total);
        self.total -= remaining;
        while remaining > 0 {
            if self.head.used >= remaining {
                self.head.used -= remaining;
                remaining = 0;
            } else {
                remaining -= self.head.used;
                let prev = self
                    .head
                    .prev
                    .take()
                    .expect("local reference underflow across pages");
                self.head = prev;
            }
        }
    }

    fn for_each_slot(&self, visitor: &mut dyn FnMut(*mut usize)) {
        let mut page: Option<&RefPage> = Some(&self.head);
        while let Some(p) = page {
            for slot in p.slots.iter().take(p.used) {
                visitor(slot.as_ptr());
            }
            page = p.prev.as_deref();
        }
    }
}

/// A frame record registered by the execution engine at a safe point: the
/// return address, the method metadata (null for native glue frames) and
/// the live reference slots of the frame.
pub struct FrameRecord {
    pub ip: usize,
    pub method: Option<MethodPtr>,
    pub roots: Vec<*mut usize>,
}

unsafe impl Send for FrameRecord {}

/// The raised error waiting for the next Java handler, alongside the
/// materialized throwable when one exists. The object slot is a GC root.
pub struct PendingException {
    pub error: JavaError,
    pub object: Option<ObjRef>,
}

pub struct JavaThread {
    /// Value of the header's id field, already shifted into place.
    id_word: usize,
    pub parker: Parker,
    interrupt: AtomicBool,
    pub state: AtomicU8,
    pending: Mutex<Option<PendingException>>,
    jni_locals: Mutex<JniLocals>,
    frames: Mutex<Vec<FrameRecord>>,
    /// The attached java.lang.Thread mirror, when the library created one.
    java_object: AtomicUsize,
    /// Set by the collection initiator; honored at the next safe point.
    pub do_yield: AtomicBool,
    /// Whether this thread already joined the current rendezvous.
    pub(crate) gc_joined: AtomicBool,
    uncooperative_depth: AtomicU32,
}

impl JavaThread {
    pub(crate) fn new(index: u64) -> Arc<JavaThread> {
        Arc::new(JavaThread {
            id_word: ((index + 1) as usize) << ID_SHIFT,
            parker: Parker::new(),
            interrupt: AtomicBool::new(false),
            state: AtomicU8::new(STATE_RUNNING),
            pending: Mutex::new(None),
            jni_locals: Mutex::new(JniLocals::new()),
            frames: Mutex::new(Vec::new()),
            java_object: AtomicUsize::new(0),
            do_yield: AtomicBool::new(false),
            gc_joined: AtomicBool::new(false),
            uncooperative_depth: AtomicU32::new(0),
        })
    }

    /// The thread id bits as they appear in a thin-locked object header.
    pub fn id_word(&self) -> usize {
        self.id_word
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// Sets the interrupt flag and kicks the parker. Delivery is flag
    /// based; the thread notices at its next wait, park or Java-level
    /// check.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
        self.parker.kick();
    }

    /// Clears and returns the previous flag value.
    pub fn clear_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::AcqRel)
    }

    pub fn java_object(&self) -> Option<ObjRef> {
        ObjRef::from_addr(self.java_object.load(Ordering::Acquire))
    }

    pub fn set_java_object(&self, obj: ObjRef) {
        self.java_object.store(obj.addr(), Ordering::Release);
    }

    // Pending exception. The slot is a GC root reported by scan_roots.

    pub fn set_pending(&self, error: JavaError, object: Option<ObjRef>) {
        *self.pending.lock() = Some(PendingException { error, object });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn pending_error(&self) -> Option<JavaError> {
        self.pending.lock().as_ref().map(|p| p.error.clone())
    }

    pub fn take_pending(&self) -> Option<PendingException> {
        self.pending.lock().take()
    }

    pub fn clear_pending(&self) {
        *self.pending.lock() = None;
    }

    // JNI local references.

    /// Stores `obj` in a fresh local slot and returns the slot's stable
    /// address.
    pub fn new_local_ref(&self, obj: Option<ObjRef>) -> *const AtomicUsize {
        self.jni_locals.lock().add(obj)
    }

    /// Clears one local reference slot.
    ///
    /// # Safety
    /// `slot` must have been returned by `new_local_ref` on this thread and
    /// its frame must still be live.
    pub unsafe fn delete_local_ref(&self, slot: *const AtomicUsize) {
        (*slot).store(0, Ordering::Release);
    }

    /// Records a high-water mark; `pop_local_frame` discards everything
    /// added after it.
    pub fn push_local_frame(&self) {
        let mut locals = self.jni_locals.lock();
        let mark = locals.total;
        locals.frames.push(mark);
    }

    pub fn pop_local_frame(&self) {
        let mut locals = self.jni_locals.lock();
        let mark = locals.frames.pop().unwrap_or(0);
        let excess = locals.total - mark;
        locals.remove(excess);
    }

    pub(crate) fn local_ref_count(&self) -> usize {
        self.jni_locals.lock().total
    }

    // Frame records for the stack walker.

    pub fn push_frame_record(&self, record: FrameRecord) {
        self.frames.lock().push(record);
    }

    pub fn pop_frame_record(&self) {
        self.frames.lock().pop();
    }

    /// Walks the stack from the newest frame down, reporting only Java
    /// frames (those carrying method metadata).
    pub fn walk_java_frames(&self, visitor: &mut dyn FnMut(usize, MethodPtr)) {
        let frames = self.frames.lock();
        for frame in frames.iter().rev() {
            if let Some(method) = frame.method {
                visitor(frame.ip, method);
            }
        }
    }

    /// Reports every root slot of this thread: frame GC maps, JNI locals,
    /// the pending-exception object and the thread mirror.
    pub fn scan_roots(&self, visitor: &mut dyn FnMut(*mut usize)) {
        for frame in self.frames.lock().iter() {
            for &slot in &frame.roots {
                visitor(slot);
            }
        }
        self.jni_locals.lock().for_each_slot(visitor);
        visitor(self.java_object.as_ptr());
        // The pending throwable moves with the GC like any other root.
        if let Some(pending) = self.pending.lock().as_mut() {
            if let Some(obj) = &mut pending.object {
                let slot = obj as *mut ObjRef as *mut usize;
                visitor(slot);
            }
        }
    }

    // Cooperative / uncooperative code.

    pub fn is_uncooperative(&self) -> bool {
        self.uncooperative_depth.load(Ordering::Acquire) > 0
    }

    pub(crate) fn enter_uncooperative_raw(&self) {
        self.uncooperative_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn leave_uncooperative_raw(&self) -> u32 {
        self.uncooperative_depth.fetch_sub(1, Ordering::AcqRel)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<JavaThread>>> = const { RefCell::new(None) };
}

impl JavaThread {
    /// The JavaThread attached to the calling OS thread.
    pub fn current() -> Arc<JavaThread> {
        JavaThread::try_current().expect("calling thread is not attached to the VM")
    }

    pub fn try_current() -> Option<Arc<JavaThread>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub(crate) fn set_current(thread: Option<Arc<JavaThread>>) {
        CURRENT.with(|c| *c.borrow_mut() = thread);
    }
}

/// Process-wide thread id source: ids pack into lock words, so they must
/// never collide across rings or VM lifetimes.
static NEXT_THREAD_INDEX: AtomicUsize = AtomicUsize::new(0);

/// The process-wide ring of attached threads.
pub struct ThreadRing {
    threads: Mutex<Vec<Arc<JavaThread>>>,
}

impl Default for ThreadRing {
    fn default() -> ThreadRing {
        ThreadRing::new()
    }
}

impl ThreadRing {
    pub fn new() -> ThreadRing {
        ThreadRing {
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self) -> Arc<JavaThread> {
        if let Some(existing) = JavaThread::try_current() {
            // Re-attaching (or attaching to a fresh VM on the same OS
            // thread) keeps the identity but must re-enter the ring.
            let mut threads = self.threads.lock();
            if !threads.iter().any(|t| Arc::ptr_eq(t, &existing)) {
                threads.push(existing.clone());
            }
            return existing;
        }
        let index = NEXT_THREAD_INDEX.fetch_add(1, Ordering::AcqRel) as u64;
        let thread = JavaThread::new(index);
        self.threads.lock().push(thread.clone());
        JavaThread::set_current(Some(thread.clone()));
        thread
    }

    pub fn detach(&self) {
        if let Some(thread) = JavaThread::try_current() {
            self.threads
                .lock()
                .retain(|t| !Arc::ptr_eq(t, &thread));
            JavaThread::set_current(None);
        }
    }

    pub fn for_each(&self, mut visitor: impl FnMut(&Arc<JavaThread>)) {
        for thread in self.threads.lock().iter() {
            visitor(thread);
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<JavaThread>> {
        self.threads.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_refs_span_pages_and_frames() {
        let thread = JavaThread::new(7);
        thread.push_local_frame();
        for _ in 0..REFS_PER_PAGE + 10 {
            thread.new_local_ref(None);
        }
        assert_eq!(thread.local_ref_count(), REFS_PER_PAGE + 10);
        thread.push_local_frame();
        for _ in 0..5 {
            thread.new_local_ref(None);
        }
        thread.pop_local_frame();
        assert_eq!(thread.local_ref_count(), REFS_PER_PAGE + 10);
        thread.pop_local_frame();
        assert_eq!(thread.local_ref_count(), 0);
    }

    #[test]
    fn interrupt_wakes_a_parked_thread() {
        let thread = JavaThread::new(1);
        let th = thread.clone();
        thread.parker.begin();
        let handle = std::thread::spawn(move || {
            th.parker.park(&th, Some(Duration::from_secs(10)))
        });
        std::thread::sleep(Duration::from_millis(50));
        thread.interrupt();
        let timed_out = handle.join().unwrap();
        assert!(!timed_out);
        assert!(thread.clear_interrupt());
    }

    #[test]
    fn id_words_are_disjoint_from_lock_fields() {
        let thread = JavaThread::new(0);
        assert_eq!(thread.id_word() & crate::object::NON_LOCK_MASK, 0);
        assert_eq!(thread.id_word() & crate::object::THIN_COUNT_MASK, 0);
        assert_ne!(thread.id_word(), 0);
    }
}
