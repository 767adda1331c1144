//! Call-ins the interpreter/JIT collaborator makes into the core:
//! allocation, monitors, type checks, interface dispatch and the throw
//! helpers. Every raised error sets the current thread's pending-exception
//! slot and comes back as `Err` until a Java frame handles it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::class::{ClassRef, MethodPtr};
use crate::constant_pool::{FieldKind, MethodKind, ResolvedField, ResolvedMethod};
use crate::errors::{JavaError, JavaKind};
use crate::loader;
use crate::monitor;
use crate::names::Name;
use crate::object::ObjRef;
use crate::refqueue::RefKind;
use crate::thread::JavaThread;
use crate::vm::Jvm;

/// Largest array the allocator accepts; larger requests surface as
/// OutOfMemoryError.
pub const MAX_ARRAY_SIZE: i32 = 268435455;

/// A call-site cache for invokeinterface, owned by the compiled code. One
/// entry: the last receiver VT and the method it resolved to.
#[derive(Default)]
pub struct InlineCache {
    vt: AtomicUsize,
    method: AtomicUsize,
}

impl InlineCache {
    pub fn new() -> InlineCache {
        InlineCache::default()
    }
}

impl Jvm {
    /// Sets the pending exception, materializing a throwable instance when
    /// the error's class is loadable.
    pub fn throw_java(&self, err: JavaError) -> JavaError {
        let object = self.materialize_throwable(&err);
        if let Some(thread) = JavaThread::try_current() {
            thread.set_pending(err.clone(), object);
        }
        err
    }

    fn materialize_throwable(&self, err: &JavaError) -> Option<ObjRef> {
        let names = self.bootstrap_loader().names();
        let class_name = names.from_str(err.kind.class_name());
        let class = self.bootstrap_loader().load_class(&class_name).ok()?;
        loader::resolve_class(self.bootstrap_loader(), &class).ok()?;
        self.allocate_instance_raw(&class).ok()
    }

    // Allocation.

    /// Allocates an instance of an initializing (or initialized) class.
    /// Finalizable instances and reference objects are registered with
    /// their processors here, at birth.
    pub fn allocate(&self, class: &ClassRef) -> Result<ObjRef, JavaError> {
        let rc = class.as_regular().ok_or_else(|| {
            self.throw_java(JavaError::new(
                JavaKind::InternalError,
                format!("cannot instantiate {}", class.name),
            ))
        })?;
        if !rc.is_resolved() && !rc.is_initializing() {
            return Err(self.throw_java(JavaError::new(
                JavaKind::InternalError,
                format!("allocating from unresolved class {}", class.name),
            )));
        }
        let obj = self
            .allocate_instance_raw(class)
            .map_err(|err| self.throw_java(err))?;

        let vt = obj.vt();
        if vt.finalize_method.is_some() || vt.operator_delete.load(Ordering::Acquire) != 0 {
            self.finalizer().add_candidate(obj);
        }
        if let Some(kind) = reference_kind(class) {
            self.references().add_reference(obj, kind);
        }
        Ok(obj)
    }

    /// Allocates an array with the given length.
    pub fn allocate_array(&self, class: &ClassRef, length: i32) -> Result<ObjRef, JavaError> {
        if length < 0 {
            return Err(self.throw_java(JavaError::new(
                JavaKind::NegativeArraySizeException,
                length.to_string(),
            )));
        }
        if length > MAX_ARRAY_SIZE {
            return Err(self.throw_java(JavaError::new(
                JavaKind::OutOfMemoryError,
                format!("requested array of length {length}"),
            )));
        }
        let vt = class.vt().ok_or_else(|| {
            self.throw_java(JavaError::new(
                JavaKind::InternalError,
                "array class without a VT",
            ))
        })?;
        let size = class.array_byte_size(length as usize);
        let obj = self
            .plan()
            .allocate(size, vt.as_ptr(), std::mem::size_of::<usize>())
            .ok_or_else(|| {
                self.throw_java(JavaError::new(JavaKind::OutOfMemoryError, "Java heap space"))
            })?;
        obj.set_array_length(length as usize);
        Ok(obj)
    }

    // Monitors. Blocking happens in uncooperative code so a collection
    // never waits on a parked monitor.

    pub fn monitor_enter(&self, obj: Option<ObjRef>) -> Result<(), JavaError> {
        let obj = self.check_null(obj)?;
        let thread = JavaThread::current();
        self.rendezvous().enter_uncooperative(&thread);
        monitor::acquire(self.lock_table(), obj);
        self.rendezvous().leave_uncooperative(&thread);
        Ok(())
    }

    pub fn monitor_exit(&self, obj: Option<ObjRef>) -> Result<(), JavaError> {
        let obj = self.check_null(obj)?;
        monitor::release(self.lock_table(), obj).map_err(|err| self.throw_java(err))
    }

    pub fn object_wait(&self, obj: Option<ObjRef>, timeout: Option<Duration>) -> Result<(), JavaError> {
        let obj = self.check_null(obj)?;
        let thread = JavaThread::current();
        self.rendezvous().enter_uncooperative(&thread);
        let result = monitor::wait(self.lock_table(), obj, timeout);
        self.rendezvous().leave_uncooperative(&thread);
        result.map_err(|err| self.throw_java(err))
    }

    pub fn object_notify(&self, obj: Option<ObjRef>) -> Result<(), JavaError> {
        let obj = self.check_null(obj)?;
        monitor::notify(self.lock_table(), obj).map_err(|err| self.throw_java(err))
    }

    pub fn object_notify_all(&self, obj: Option<ObjRef>) -> Result<(), JavaError> {
        let obj = self.check_null(obj)?;
        monitor::notify_all(self.lock_table(), obj).map_err(|err| self.throw_java(err))
    }

    // Type checks.

    pub fn instance_of(&self, obj: Option<ObjRef>, class: &ClassRef) -> bool {
        let Some(obj) = obj else { return false };
        let Some(target_vt) = class.vt() else {
            return false;
        };
        obj.vt().is_subtype_of(target_vt)
    }

    pub fn check_cast(&self, obj: Option<ObjRef>, class: &ClassRef) -> Result<(), JavaError> {
        if let Some(obj) = obj {
            if !self.instance_of(Some(obj), class) {
                return Err(self.throw_java(JavaError::new(
                    JavaKind::ClassCastException,
                    format!("{} cannot be cast to {}", obj.class().name, class.name),
                )));
            }
        }
        Ok(())
    }

    /// aastore type check: the stored element must be assignable to the
    /// array's component type.
    pub fn array_store_check(&self, array: ObjRef, elem: Option<ObjRef>) -> Result<(), JavaError> {
        let Some(elem) = elem else { return Ok(()) };
        let base_vt = array.vt().base_class_vt;
        if base_vt.is_null() || !elem.vt().is_subtype_of(base_vt.get()) {
            return Err(self.throw_java(JavaError::new(
                JavaKind::ArrayStoreException,
                format!("{} into {}", elem.class().name, array.class().name),
            )));
        }
        Ok(())
    }

    pub fn array_index_check(&self, array: ObjRef, index: i32) -> Result<usize, JavaError> {
        if index < 0 || index as usize >= array.array_length() {
            return Err(self.throw_java(JavaError::new(
                JavaKind::ArrayIndexOutOfBoundsException,
                format!("index {index}, length {}", array.array_length()),
            )));
        }
        Ok(index as usize)
    }

    // Interface dispatch.

    /// invokeinterface: consult the call site's inline cache, fall back to
    /// the receiver's IMT, and remember the result.
    pub fn invoke_interface(
        &self,
        obj: Option<ObjRef>,
        name: &Name,
        ty: &Name,
        cache: &InlineCache,
    ) -> Result<MethodPtr, JavaError> {
        let obj = self.check_null(obj)?;
        let vt = obj.vt();
        let vt_addr = vt.as_ptr().addr();
        if cache.vt.load(Ordering::Acquire) == vt_addr {
            let cached = cache.method.load(Ordering::Acquire);
            if cached != 0 {
                let method = unsafe { &*(cached as *const crate::class::JavaMethod) };
                return Ok(MethodPtr::of(method));
            }
        }
        let found = match &vt.imt {
            Some(imt) => imt.lookup(name, ty),
            None => None,
        };
        let found = match found {
            Some(method) => Some(method),
            None => {
                let class = obj.class();
                let class_ref = class.loader().lookup_class(&class.name).ok_or_else(|| {
                    self.throw_java(JavaError::new(
                        JavaKind::InternalError,
                        "receiver class missing from its loader table",
                    ))
                })?;
                class_ref
                    .lookup_interface_method_dont_throw(name, ty)
                    .map(|(_, m)| m)
            }
        };
        let method = found.ok_or_else(|| {
            self.throw_java(JavaError::new(
                JavaKind::NoSuchMethodError,
                format!("{}.{}{}", obj.class().name, name, ty),
            ))
        })?;
        if method.get().is_abstract() {
            return Err(self.throw_java(JavaError::new(
                JavaKind::AbstractMethodError,
                format!("{}.{}{}", obj.class().name, name, ty),
            )));
        }
        cache
            .method
            .store(method.get() as *const _ as usize, Ordering::Release);
        cache.vt.store(vt_addr, Ordering::Release);
        Ok(method)
    }

    // Constant pool resolution on behalf of compiled code.

    pub fn resolve_pool_class(&self, caller: &ClassRef, index: u16) -> Result<ClassRef, JavaError> {
        let rc = self.pool_of(caller)?;
        rc.pool
            .resolve_class(&caller.loader(), index)
            .map_err(|err| self.throw_java(err))
    }

    pub fn resolve_pool_method(
        &self,
        caller: &ClassRef,
        index: u16,
        kind: MethodKind,
    ) -> Result<ResolvedMethod, JavaError> {
        let rc = self.pool_of(caller)?;
        rc.pool
            .resolve_method(&caller.loader(), caller, index, kind)
            .map_err(|err| self.throw_java(err))
    }

    pub fn resolve_pool_field(
        &self,
        caller: &ClassRef,
        index: u16,
        kind: FieldKind,
    ) -> Result<ResolvedField, JavaError> {
        let rc = self.pool_of(caller)?;
        rc.pool
            .resolve_field(&caller.loader(), index, kind)
            .map_err(|err| self.throw_java(err))
    }

    pub fn resolve_pool_string(&self, caller: &ClassRef, index: u16) -> Result<ObjRef, JavaError> {
        let rc = self.pool_of(caller)?;
        rc.pool
            .resolve_string(self, index)
            .map_err(|err| self.throw_java(err))
    }

    fn pool_of<'c>(&self, class: &'c ClassRef) -> Result<&'c crate::class::RegularClass, JavaError> {
        class.as_regular().ok_or_else(|| {
            self.throw_java(JavaError::new(
                JavaKind::InternalError,
                "constant pool access on a non-regular class",
            ))
        })
    }

    /// Idempotent initialization trigger.
    pub fn class_initialize(&self, class: &ClassRef) -> Result<(), JavaError> {
        loader::initialize_class(self, class).map_err(|err| self.throw_java(err))
    }

    // Throw helpers for the compiled-code slow paths.

    pub fn throw(&self, err: JavaError) -> JavaError {
        self.throw_java(err)
    }

    pub fn null_pointer_exception(&self) -> JavaError {
        self.throw_java(JavaError::new(JavaKind::NullPointerException, ""))
    }

    pub fn negative_array_size_exception(&self, size: i32) -> JavaError {
        self.throw_java(JavaError::new(
            JavaKind::NegativeArraySizeException,
            size.to_string(),
        ))
    }

    pub fn arithmetic_exception(&self) -> JavaError {
        self.throw_java(JavaError::new(JavaKind::ArithmeticException, "/ by zero"))
    }

    pub fn stack_overflow(&self) -> JavaError {
        self.throw_java(JavaError::new(JavaKind::StackOverflowError, ""))
    }

    pub fn out_of_memory(&self) -> JavaError {
        self.throw_java(JavaError::new(JavaKind::OutOfMemoryError, "Java heap space"))
    }

    fn check_null(&self, obj: Option<ObjRef>) -> Result<ObjRef, JavaError> {
        obj.ok_or_else(|| self.null_pointer_exception())
    }
}

/// The reference semantics of a class, judged by its inheritance chain.
fn reference_kind(class: &ClassRef) -> Option<RefKind> {
    let loader = class.loader();
    let names = loader.names();
    let soft = names.from_str("java/lang/ref/SoftReference");
    let weak = names.from_str("java/lang/ref/WeakReference");
    let phantom = names.from_str("java/lang/ref/PhantomReference");
    if class.inherits_name(&phantom) {
        Some(RefKind::Phantom)
    } else if class.inherits_name(&weak) {
        Some(RefKind::Weak)
    } else if class.inherits_name(&soft) {
        Some(RefKind::Soft)
    } else {
        None
    }
}

/// Monitor recursion depth, exposed for diagnostics and tests.
pub fn monitor_depth(vm: &Jvm, obj: ObjRef) -> u32 {
    monitor::held_count(vm.lock_table(), obj)
}

// Keep Arc in the public surface so call sites clone cheaply.
pub type SharedVm = Arc<Jvm>;
