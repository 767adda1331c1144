//! The JNI subset the core provides per attached thread: local-reference
//! management over the thread's slot pages, monitor entry/exit over the
//! object monitor, and the pending-exception accessors. A full function
//! table would wrap these.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::JavaError;
use crate::object::ObjRef;
use crate::thread::JavaThread;
use crate::vm::Jvm;

/// A JNI local reference: the stable address of a slot whose content the
/// GC may update.
pub type LocalRef = *const AtomicUsize;

pub fn new_local_ref(thread: &Arc<JavaThread>, obj: Option<ObjRef>) -> LocalRef {
    thread.new_local_ref(obj)
}

/// # Safety
/// `local` must come from `new_local_ref` on the same thread, within a
/// still-live frame.
pub unsafe fn delete_local_ref(thread: &Arc<JavaThread>, local: LocalRef) {
    thread.delete_local_ref(local);
}

/// # Safety
/// Same contract as `delete_local_ref`.
pub unsafe fn local_ref_value(local: LocalRef) -> Option<ObjRef> {
    ObjRef::from_addr((*local).load(std::sync::atomic::Ordering::Acquire))
}

pub fn push_local_frame(thread: &Arc<JavaThread>) {
    thread.push_local_frame();
}

pub fn pop_local_frame(thread: &Arc<JavaThread>) {
    thread.pop_local_frame();
}

pub fn monitor_enter(vm: &Jvm, obj: Option<ObjRef>) -> Result<(), JavaError> {
    vm.monitor_enter(obj)
}

pub fn monitor_exit(vm: &Jvm, obj: Option<ObjRef>) -> Result<(), JavaError> {
    vm.monitor_exit(obj)
}

pub fn object_wait(
    vm: &Jvm,
    obj: Option<ObjRef>,
    timeout: Option<Duration>,
) -> Result<(), JavaError> {
    vm.object_wait(obj, timeout)
}

/// JNI Throw: parks the throwable in the pending slot; control returns to
/// the caller with the exception pending.
pub fn throw(thread: &Arc<JavaThread>, error: JavaError, object: Option<ObjRef>) {
    thread.set_pending(error, object);
}

/// JNI ExceptionOccurred.
pub fn exception_occurred(thread: &Arc<JavaThread>) -> Option<JavaError> {
    thread.pending_error()
}

/// JNI ExceptionClear.
pub fn exception_clear(thread: &Arc<JavaThread>) {
    thread.clear_pending();
}

/// Brackets a long-running native section: the GC will not wait for code
/// between these two calls.
pub fn enter_blocking_region(vm: &Jvm, thread: &Arc<JavaThread>) {
    vm.rendezvous().enter_uncooperative(thread);
}

pub fn leave_blocking_region(vm: &Jvm, thread: &Arc<JavaThread>) {
    vm.rendezvous().leave_uncooperative(thread);
}
