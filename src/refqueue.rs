//! Soft, weak and phantom reference processing, and finalization.
//!
//! References are discovered at allocation and parked in one of three
//! queues. During a collection, after the transitive closure, each queue
//! is scanned: live references are forwarded, dead referents are cleared
//! and their references handed to the enqueue worker. Finalizable objects
//! found dead are resurrected onto the ready list for the finalizer
//! worker. Both workers are ordinary threads blocking on a condition and
//! swallow every exception the upcalls throw.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::object::ObjRef;
use crate::plan::GcPlan;
use crate::vm::Jvm;

// Same values as JikesRVM.
pub const INITIAL_QUEUE_SIZE: usize = 256;
pub const GROW_FACTOR: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    Soft,
    Weak,
    Phantom,
}

/// One of the three global reference queues.
pub struct ReferenceQueue {
    kind: RefKind,
    references: Mutex<Vec<ObjRef>>,
}

impl ReferenceQueue {
    fn new(kind: RefKind) -> ReferenceQueue {
        ReferenceQueue {
            kind,
            references: Mutex::new(Vec::with_capacity(INITIAL_QUEUE_SIZE)),
        }
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn add(&self, reference: ObjRef) {
        let mut refs = self.references.lock();
        if refs.len() == refs.capacity() {
            let grown = refs.capacity() * GROW_FACTOR;
            let additional = grown - refs.len();
            refs.reserve_exact(additional);
        }
        refs.push(reference);
    }

    pub fn len(&self) -> usize {
        self.references.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.lock().is_empty()
    }

    /// Walks the queue during a collection, compacting it to the
    /// references that survive.
    fn scan(&self, vm: &Jvm, plan: &dyn GcPlan, handler: &ReferenceHandler) {
        let mut refs = self.references.lock();
        let mut kept = 0;
        for i in 0..refs.len() {
            let reference = refs[i];
            if let Some(forwarded) = process_reference(vm, plan, handler, self.kind, reference) {
                refs[kept] = forwarded;
                kept += 1;
            }
        }
        refs.truncate(kept);
    }
}

/// The per-reference rules: dead references drop out; live references are
/// forwarded; a live referent keeps the reference queued (with the
/// referent forwarded in place); a dead referent is cleared and the
/// reference handed to the enqueue worker. Soft references may retain
/// their referent depending on the plan's pressure policy.
fn process_reference(
    vm: &Jvm,
    plan: &dyn GcPlan,
    handler: &ReferenceHandler,
    kind: RefKind,
    reference: ObjRef,
) -> Option<ObjRef> {
    if !plan.is_live(reference) {
        vm.set_referent(reference, None);
        return None;
    }
    let referent = vm.get_referent(reference)?;

    match kind {
        RefKind::Soft => {
            if plan.should_retain_softs() {
                plan.retain_referent(referent);
            }
        }
        RefKind::Phantom => {
            // The referent is never retained through a phantom reference.
        }
        RefKind::Weak => {}
    }

    let forwarded_ref = plan.get_forwarded(reference);
    if plan.is_live(referent) {
        vm.set_referent(forwarded_ref, Some(plan.get_forwarded(referent)));
        Some(forwarded_ref)
    } else {
        vm.set_referent(forwarded_ref, None);
        handler.add_to_enqueue(forwarded_ref);
        None
    }
}

/// The three queues plus the hand-off list to the enqueue worker.
pub struct ReferenceHandler {
    pub soft: ReferenceQueue,
    pub weak: ReferenceQueue,
    pub phantom: ReferenceQueue,
    to_enqueue: Mutex<Vec<ObjRef>>,
    enqueue_cond: Condvar,
    shutdown: AtomicBool,
}

impl Default for ReferenceHandler {
    fn default() -> ReferenceHandler {
        ReferenceHandler::new()
    }
}

impl ReferenceHandler {
    pub fn new() -> ReferenceHandler {
        ReferenceHandler {
            soft: ReferenceQueue::new(RefKind::Soft),
            weak: ReferenceQueue::new(RefKind::Weak),
            phantom: ReferenceQueue::new(RefKind::Phantom),
            to_enqueue: Mutex::new(Vec::with_capacity(INITIAL_QUEUE_SIZE)),
            enqueue_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Registers a freshly allocated reference object with the queue of
    /// its semantics.
    pub fn add_reference(&self, reference: ObjRef, kind: RefKind) {
        match kind {
            RefKind::Soft => self.soft.add(reference),
            RefKind::Weak => self.weak.add(reference),
            RefKind::Phantom => self.phantom.add(reference),
        }
    }

    fn add_to_enqueue(&self, reference: ObjRef) {
        self.to_enqueue.lock().push(reference);
    }

    pub fn pending_enqueue(&self) -> usize {
        self.to_enqueue.lock().len()
    }

    pub fn scan_soft_queue(&self, vm: &Jvm, plan: &dyn GcPlan) {
        self.soft.scan(vm, plan, self);
    }

    pub fn scan_weak_queue(&self, vm: &Jvm, plan: &dyn GcPlan) {
        self.weak.scan(vm, plan, self);
    }

    pub fn scan_phantom_queue(&self, vm: &Jvm, plan: &dyn GcPlan) {
        self.phantom.scan(vm, plan, self);
    }

    /// Wakes the enqueue worker after a collection produced work.
    pub fn notify_worker(&self) {
        let _guard = self.to_enqueue.lock();
        self.enqueue_cond.notify_all();
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify_worker();
    }

    /// Body of the enqueue worker thread: pop cleared references and
    /// upcall Reference.enqueue, ignoring whatever it throws. The blocking
    /// wait happens in uncooperative code so a rendezvous never stalls on
    /// an idle worker.
    pub(crate) fn enqueue_worker_loop(&self, vm: &Jvm) {
        let thread = crate::thread::JavaThread::current();
        loop {
            vm.rendezvous().enter_uncooperative(&thread);
            let reference = {
                let mut queue = self.to_enqueue.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        drop(queue);
                        vm.rendezvous().leave_uncooperative(&thread);
                        return;
                    }
                    if let Some(reference) = queue.pop() {
                        break reference;
                    }
                    self.enqueue_cond.wait(&mut queue);
                }
            };
            vm.rendezvous().leave_uncooperative(&thread);
            if let Err(err) = vm.engine().invoke_enqueue(vm, reference) {
                log::debug!("Reference.enqueue threw: {err}");
            }
            clear_worker_pending();
        }
    }
}

fn clear_worker_pending() {
    if let Some(thread) = crate::thread::JavaThread::try_current() {
        thread.clear_pending();
    }
}

/// Finalization state: candidates registered at allocation, the ready
/// list the collector fills, and the worker that drains it.
pub struct FinalizerSet {
    candidates: Mutex<Vec<ObjRef>>,
    ready: Mutex<Vec<ObjRef>>,
    ready_cond: Condvar,
    shutdown: AtomicBool,
}

impl Default for FinalizerSet {
    fn default() -> FinalizerSet {
        FinalizerSet::new()
    }
}

impl FinalizerSet {
    pub fn new() -> FinalizerSet {
        FinalizerSet {
            candidates: Mutex::new(Vec::with_capacity(INITIAL_QUEUE_SIZE)),
            ready: Mutex::new(Vec::with_capacity(INITIAL_QUEUE_SIZE)),
            ready_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Registers an object whose class carries a finalizer. Called once at
    /// allocation, which is what bounds finalization to at most once per
    /// object.
    pub fn add_candidate(&self, obj: ObjRef) {
        self.candidates.lock().push(obj);
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.lock().len()
    }

    /// Collector callback: dead candidates are resurrected onto the ready
    /// list; live ones stay, forwarded.
    pub fn scan_finalization_queue(&self, plan: &dyn GcPlan) {
        let mut candidates = self.candidates.lock();
        let mut ready = self.ready.lock();
        let mut kept = 0;
        for i in 0..candidates.len() {
            let obj = candidates[i];
            if plan.is_live(obj) {
                candidates[kept] = plan.get_forwarded(obj);
                kept += 1;
            } else {
                plan.retain_referent(obj);
                ready.push(plan.get_forwarded(obj));
            }
        }
        candidates.truncate(kept);
    }

    pub fn notify_worker(&self) {
        let _guard = self.ready.lock();
        self.ready_cond.notify_all();
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify_worker();
    }

    /// Body of the finalizer worker: pop resurrected objects and run their
    /// finalizer, preferring a native destructor when the VT carries one.
    pub(crate) fn finalizer_worker_loop(&self, vm: &Jvm) {
        let thread = crate::thread::JavaThread::current();
        loop {
            vm.rendezvous().enter_uncooperative(&thread);
            let obj = {
                let mut ready = self.ready.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        drop(ready);
                        vm.rendezvous().leave_uncooperative(&thread);
                        return;
                    }
                    if let Some(obj) = ready.pop() {
                        break obj;
                    }
                    self.ready_cond.wait(&mut ready);
                }
            };
            vm.rendezvous().leave_uncooperative(&thread);
            let vt = obj.vt();
            let destructor = vt.operator_delete.load(Ordering::Acquire);
            if destructor != 0 {
                let run: extern "C" fn(ObjRef) = unsafe { std::mem::transmute(destructor) };
                run(obj);
            } else if let Err(err) = vm.engine().invoke_finalize(vm, obj) {
                log::debug!("finalize threw: {err}");
            }
            clear_worker_pending();
        }
    }
}
