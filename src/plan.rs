//! The narrow interface between the core and whatever GC plan is
//! installed.
//!
//! The core calls down for allocation, write barriers and liveness; the
//! plan calls back up through the VM's `begin_collection`, `scan_stack`
//! and queue-scanning hooks. Nothing else crosses the boundary.

use std::alloc::Layout;

use crate::object::{JavaObject, ObjRef};
use crate::vm::Jvm;
use crate::vtable::VtPtr;

pub trait GcPlan: Send + Sync {
    /// Returns zero-initialized storage with the vtable installed, or None
    /// for out-of-memory. No safe point may occur inside.
    fn allocate(&self, size: usize, vt: VtPtr, align: usize) -> Option<ObjRef>;

    /// Called for every store to a reference field of a heap object. The
    /// plan performs the store.
    fn object_reference_write_barrier(
        &self,
        container: ObjRef,
        slot: *mut usize,
        value: Option<ObjRef>,
    );

    /// Same, for reference slots outside the heap (statics, delegatees,
    /// VM-internal roots).
    fn object_reference_non_heap_write_barrier(&self, slot: *mut usize, value: Option<ObjRef>);

    /// Only valid between begin_collection and end_collection.
    fn is_live(&self, obj: ObjRef) -> bool;

    /// The forwarded address of a live object; valid during tracing.
    fn get_forwarded(&self, obj: ObjRef) -> ObjRef;

    /// Keep a referent alive although only reference objects reach it.
    fn retain_referent(&self, obj: ObjRef);

    /// Soft-reference policy: when true, soft referents are retained this
    /// cycle.
    fn should_retain_softs(&self) -> bool {
        false
    }
}

/// Tracing hooks kept pluggable for bundle-teardown machinery that walks
/// references and clears pointers into uninstalled code. The default does
/// nothing.
pub trait StaleReferenceHooks: Send + Sync {
    fn before_collection(&self, _vm: &Jvm) {}
    fn after_collection(&self, _vm: &Jvm) {}
    /// Return false to have the slot cleared instead of traced.
    fn scan_reference(&self, _source: Option<ObjRef>, _slot: *mut usize) -> bool {
        true
    }
}

pub struct NoStaleHooks;

impl StaleReferenceHooks for NoStaleHooks {}

/// A non-moving plan over the system allocator: everything is live,
/// barriers are plain stores, nothing is ever reclaimed. Enough to run the
/// core without a collector.
pub struct MallocPlan;

fn alloc_layout(size: usize, align: usize) -> Layout {
    Layout::from_size_align(size, align.max(std::mem::align_of::<JavaObject>()))
        .expect("object layout")
}

impl GcPlan for MallocPlan {
    fn allocate(&self, size: usize, vt: VtPtr, align: usize) -> Option<ObjRef> {
        let layout = alloc_layout(size, align);
        let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut JavaObject;
        if raw.is_null() {
            return None;
        }
        unsafe {
            (*raw).vtable = vt.get();
            ObjRef::from_raw(raw)
        }
    }

    fn object_reference_write_barrier(
        &self,
        _container: ObjRef,
        slot: *mut usize,
        value: Option<ObjRef>,
    ) {
        unsafe { slot.write(value.map_or(0, |v| v.addr())) }
    }

    fn object_reference_non_heap_write_barrier(&self, slot: *mut usize, value: Option<ObjRef>) {
        unsafe { slot.write(value.map_or(0, |v| v.addr())) }
    }

    fn is_live(&self, _obj: ObjRef) -> bool {
        true
    }

    fn get_forwarded(&self, obj: ObjRef) -> ObjRef {
        obj
    }

    fn retain_referent(&self, _obj: ObjRef) {}
}
