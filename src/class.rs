//! The internal model for classes, arrays and primitive classes.
//!
//! `CommonClass` is the prefix shared by every class-like entity; the
//! `ClassKind` payload carries what only regular classes (constant pool,
//! members, lifecycle word), arrays (component) or primitives (log size)
//! have. Classes are owned by their loader's table and live as long as it
//! does.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use jclass::access_flags;
use jclass::attributes::{self, AttributeSpan};
use parking_lot::{Condvar, Mutex};

use crate::constant_pool::ConstantPool;
use crate::errors::{JavaError, JavaKind};
use crate::loader::ClassLoader;
use crate::names::Name;
use crate::object::ObjRef;
use crate::types::{Primitive, Signdef, Typedef};
use crate::vtable::VirtualTable;

pub type ClassRef = Arc<CommonClass>;

// Internal access bits, kept above the class-file u16.
pub const ACC_JVM_CLASS: u32 = 1 << 16;
pub const ACC_JVM_ARRAY: u32 = 1 << 17;
pub const ACC_JVM_PRIMITIVE: u32 = 1 << 18;

// Lifecycle states of a regular class.
pub const STATUS_LOADED: u8 = 0;
pub const STATUS_RESOLVING: u8 = 1;
pub const STATUS_RESOLVED: u8 = 2;
pub const STATUS_IN_CLINIT: u8 = 3;
pub const STATUS_READY: u8 = 4;
pub const STATUS_ERRONEOUS: u8 = 5;

/// A stable pointer to a method record. Methods live inside their class'
/// vectors, which never move after construction, and classes live as long
/// as their loader.
#[derive(Clone, Copy, Debug)]
pub struct MethodPtr(NonNull<JavaMethod>);

unsafe impl Send for MethodPtr {}
unsafe impl Sync for MethodPtr {}

impl MethodPtr {
    pub fn of(method: &JavaMethod) -> MethodPtr {
        MethodPtr(NonNull::from(method))
    }

    pub fn get(&self) -> &'static JavaMethod {
        unsafe { &*self.0.as_ptr() }
    }
}

impl PartialEq for MethodPtr {
    fn eq(&self, other: &MethodPtr) -> bool {
        self.0 == other.0
    }
}

impl Eq for MethodPtr {}

#[derive(Clone, Copy, Debug)]
pub struct FieldPtr(NonNull<JavaField>);

unsafe impl Send for FieldPtr {}
unsafe impl Sync for FieldPtr {}

impl FieldPtr {
    pub fn of(field: &JavaField) -> FieldPtr {
        FieldPtr(NonNull::from(field))
    }

    pub fn get(&self) -> &'static JavaField {
        unsafe { &*self.0.as_ptr() }
    }
}

impl PartialEq for FieldPtr {
    fn eq(&self, other: &FieldPtr) -> bool {
        self.0 == other.0
    }
}

impl Eq for FieldPtr {}

/// A Java method record.
pub struct JavaMethod {
    pub access: u32,
    pub name: Name,
    /// The UTF8 descriptor of the method.
    pub ty: Name,
    pub attributes: Vec<AttributeSpan>,
    /// Index of the method in the virtual table; 0 for finalize, which is
    /// dispatched through the destructor slot instead.
    pub offset: AtomicUsize,
    /// Entry point installed by the compiler collaborator; 0 until
    /// materialized.
    pub code: AtomicUsize,
    signature: OnceLock<Arc<Signdef>>,
    class: OnceLock<Weak<CommonClass>>,
}

impl JavaMethod {
    pub(crate) fn new(access: u16, name: Name, ty: Name, attributes: Vec<AttributeSpan>) -> JavaMethod {
        JavaMethod {
            access: access as u32,
            name,
            ty,
            attributes,
            offset: AtomicUsize::new(0),
            code: AtomicUsize::new(0),
            signature: OnceLock::new(),
            class: OnceLock::new(),
        }
    }

    pub fn class(&self) -> ClassRef {
        self.class
            .get()
            .and_then(Weak::upgrade)
            .expect("method used before its class was published")
    }

    pub(crate) fn set_class(&self, class: &ClassRef) {
        let _ = self.class.set(Arc::downgrade(class));
    }

    /// The parsed signature, interned by the defining loader on first use.
    pub fn signature(&self) -> Result<Arc<Signdef>, JavaError> {
        if let Some(sign) = self.signature.get() {
            return Ok(sign.clone());
        }
        let class = self.class();
        let loader = class.loader();
        let sign = loader.construct_sign(&self.ty)?;
        Ok(self.signature.get_or_init(|| sign).clone())
    }

    pub fn lookup_attribute(&self, owner: &RegularClass, name: &[u8]) -> Option<AttributeSpan> {
        attributes::lookup(&self.attributes, owner.pool.raw(), name).cloned()
    }

    pub fn is_static(&self) -> bool {
        access_flags::is_static(self.access)
    }

    pub fn is_abstract(&self) -> bool {
        access_flags::is_abstract(self.access)
    }

    pub fn is_native(&self) -> bool {
        access_flags::is_native(self.access)
    }
}

/// A Java field record. The byte offset into the instance (or static area)
/// is assigned during resolution.
pub struct JavaField {
    pub access: u32,
    pub name: Name,
    pub ty: Name,
    pub attributes: Vec<AttributeSpan>,
    pub ptr_offset: AtomicUsize,
    /// Index of the field in its list.
    pub num: u16,
    signature: OnceLock<Arc<Typedef>>,
    class: OnceLock<Weak<CommonClass>>,
}

impl JavaField {
    pub(crate) fn new(
        access: u16,
        name: Name,
        ty: Name,
        attributes: Vec<AttributeSpan>,
        num: u16,
    ) -> JavaField {
        JavaField {
            access: access as u32,
            name,
            ty,
            attributes,
            ptr_offset: AtomicUsize::new(0),
            num,
            signature: OnceLock::new(),
            class: OnceLock::new(),
        }
    }

    pub fn class(&self) -> ClassRef {
        self.class
            .get()
            .and_then(Weak::upgrade)
            .expect("field used before its class was published")
    }

    pub(crate) fn set_class(&self, class: &ClassRef) {
        let _ = self.class.set(Arc::downgrade(class));
    }

    pub fn signature(&self) -> Result<Arc<Typedef>, JavaError> {
        if let Some(ty) = self.signature.get() {
            return Ok(ty.clone());
        }
        let class = self.class();
        let loader = class.loader();
        let ty = loader.construct_type(&self.ty)?;
        Ok(self.signature.get_or_init(|| ty).clone())
    }

    pub fn is_static(&self) -> bool {
        access_flags::is_static(self.access)
    }

    pub fn is_reference(&self) -> bool {
        let first = self.ty.char_at(0);
        first == b'[' as u16 || first == b'L' as u16
    }

    pub fn offset(&self) -> usize {
        self.ptr_offset.load(Ordering::Acquire)
    }

    // Instance accessors. Callers guarantee `obj` is an instance of the
    // declaring class and the class is resolved.

    /// # Safety
    /// `obj` must be an instance of the declaring class.
    pub unsafe fn get_instance_word(&self, obj: ObjRef) -> usize {
        obj.read_word(self.offset())
    }

    /// # Safety
    /// `obj` must be an instance of the declaring class.
    pub unsafe fn set_instance_word(&self, obj: ObjRef, value: usize) {
        obj.write_word(self.offset(), value)
    }

    /// # Safety
    /// `obj` must be an instance of the declaring class; the field must be
    /// a reference field.
    pub unsafe fn get_instance_ref(&self, obj: ObjRef) -> Option<ObjRef> {
        obj.read_ref(self.offset())
    }
}

/// The memory holding a class' static variables. Allocated during
/// resolution, only when the class has static fields.
pub struct StaticArea {
    base: *mut u8,
    layout: Layout,
    size: usize,
    /// Offsets of reference-typed statics, scanned as non-heap roots.
    ref_offsets: Vec<usize>,
}

unsafe impl Send for StaticArea {}
unsafe impl Sync for StaticArea {}

impl StaticArea {
    pub(crate) fn new(size: usize, ref_offsets: Vec<usize>) -> StaticArea {
        let layout = Layout::from_size_align(size.max(1), 8).expect("static area layout");
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "static area allocation failed");
        StaticArea {
            base,
            layout,
            size,
            ref_offsets,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// # Safety
    /// `offset` must be within the area and sized for `T`.
    pub unsafe fn read<T: Copy>(&self, offset: usize) -> T {
        (self.base.add(offset) as *const T).read_unaligned()
    }

    /// # Safety
    /// `offset` must be within the area and sized for `T`.
    pub unsafe fn write<T: Copy>(&self, offset: usize, value: T) {
        (self.base.add(offset) as *mut T).write_unaligned(value)
    }

    /// Raw pointer to a reference slot, for barriers and root scanning.
    pub fn ref_slot(&self, offset: usize) -> *mut usize {
        unsafe { self.base.add(offset) as *mut usize }
    }

    pub fn scan_roots(&self, visitor: &mut dyn FnMut(*mut usize)) {
        for &offset in &self.ref_offsets {
            visitor(self.ref_slot(offset));
        }
    }
}

impl Drop for StaticArea {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base, self.layout) }
    }
}

/// Inner/outer classification resolved lazily from the InnerClasses
/// attribute.
#[derive(Default)]
pub struct InnerOuter {
    pub resolved: bool,
    pub outer: Option<ClassRef>,
    pub inner: Vec<ClassRef>,
    pub inner_access: u16,
    pub is_anonymous: bool,
}

/// The payload of a regular (constant-pool carrying) class.
pub struct RegularClass {
    /// The raw class file. Attribute spans index into it.
    pub bytes: Arc<Vec<u8>>,
    pub major_version: u16,
    pub minor_version: u16,
    /// Minimal JDK version able to load this file, derived from
    /// major/minor.
    pub min_jdk: (u16, u16, u16),
    pub pool: ConstantPool,
    pub virtual_fields: Vec<JavaField>,
    pub static_fields: Vec<JavaField>,
    pub virtual_methods: Vec<JavaMethod>,
    pub static_methods: Vec<JavaMethod>,
    pub attributes: Vec<AttributeSpan>,
    status: AtomicU8,
    /// Header id-word of the thread driving `<clinit>`, for re-entrant
    /// initialization.
    init_owner: AtomicUsize,
    lifecycle: Mutex<()>,
    lifecycle_cond: Condvar,
    pub virtual_size: AtomicUsize,
    pub static_size: AtomicUsize,
    pub virtual_table_size: AtomicUsize,
    static_area: OnceLock<StaticArea>,
    pub inner_outer: Mutex<InnerOuter>,
}

impl RegularClass {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        bytes: Arc<Vec<u8>>,
        major_version: u16,
        minor_version: u16,
        min_jdk: (u16, u16, u16),
        pool: ConstantPool,
        virtual_fields: Vec<JavaField>,
        static_fields: Vec<JavaField>,
        virtual_methods: Vec<JavaMethod>,
        static_methods: Vec<JavaMethod>,
        attributes: Vec<AttributeSpan>,
    ) -> RegularClass {
        RegularClass {
            bytes,
            major_version,
            minor_version,
            min_jdk,
            pool,
            virtual_fields,
            static_fields,
            virtual_methods,
            static_methods,
            attributes,
            status: AtomicU8::new(STATUS_LOADED),
            init_owner: AtomicUsize::new(0),
            lifecycle: Mutex::new(()),
            lifecycle_cond: Condvar::new(),
            virtual_size: AtomicUsize::new(0),
            static_size: AtomicUsize::new(0),
            virtual_table_size: AtomicUsize::new(0),
            static_area: OnceLock::new(),
            inner_outer: Mutex::new(InnerOuter::default()),
        }
    }

    pub fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    pub(crate) fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.status() == STATUS_READY
    }

    pub fn is_resolved(&self) -> bool {
        let status = self.status();
        status >= STATUS_RESOLVED && status != STATUS_ERRONEOUS
    }

    pub fn is_erroneous(&self) -> bool {
        self.status() == STATUS_ERRONEOUS
    }

    pub fn is_initializing(&self) -> bool {
        let status = self.status();
        status == STATUS_IN_CLINIT || status == STATUS_READY
    }

    pub fn init_owner(&self) -> usize {
        self.init_owner.load(Ordering::Acquire)
    }

    pub(crate) fn set_init_owner(&self, owner: usize) {
        self.init_owner.store(owner, Ordering::Release);
    }

    pub(crate) fn lifecycle_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lifecycle.lock()
    }

    pub(crate) fn lifecycle_wait(&self, guard: &mut parking_lot::MutexGuard<'_, ()>) {
        self.lifecycle_cond.wait(guard);
    }

    pub(crate) fn lifecycle_broadcast(&self) {
        self.lifecycle_cond.notify_all();
    }

    pub fn static_area(&self) -> Option<&StaticArea> {
        self.static_area.get()
    }

    pub(crate) fn install_static_area(&self, area: StaticArea) -> &StaticArea {
        self.static_area.get_or_init(|| area)
    }

    pub fn lookup_attribute(&self, name: &[u8]) -> Option<AttributeSpan> {
        attributes::lookup(&self.attributes, self.pool.raw(), name).cloned()
    }

    /// True when instances of the class need an initialization check
    /// before use: the class is not ready and has statics or a `<clinit>`
    /// somewhere in its chain.
    pub fn needs_initialisation_check(&self, this: &ClassRef) -> bool {
        if self.is_ready() {
            return false;
        }
        if let Some(superclass) = &this.super_class {
            if let Some(rc) = superclass.as_regular() {
                if rc.needs_initialisation_check(superclass) {
                    return true;
                }
            }
        }
        if !self.static_fields.is_empty() {
            return true;
        }
        let has_clinit = self
            .static_methods
            .iter()
            .any(|m| m.name.same_chars(&to_utf16("<clinit>")));
        if has_clinit {
            return true;
        }
        self.set_status(STATUS_READY);
        false
    }
}

fn to_utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

pub struct ArrayClass {
    pub component: ClassRef,
}

pub struct PrimitiveClass {
    pub primitive: Primitive,
    pub log_size: usize,
}

pub enum ClassKind {
    Regular(RegularClass),
    Array(ArrayClass),
    Primitive(PrimitiveClass),
}

/// The common prefix of every class-like entity.
pub struct CommonClass {
    pub access: u32,
    pub name: Name,
    pub super_class: Option<ClassRef>,
    pub interfaces: Vec<ClassRef>,
    loader: Weak<ClassLoader>,
    /// The java.lang.Class mirror. Written once through the non-heap
    /// barrier; a single slot (one isolate).
    delegatee: AtomicUsize,
    vt: OnceLock<Box<VirtualTable>>,
    pub kind: ClassKind,
}

impl std::fmt::Debug for CommonClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonClass")
            .field("access", &self.access)
            .field("name", &self.name)
            .finish()
    }
}

impl CommonClass {
    pub(crate) fn new(
        access: u32,
        name: Name,
        super_class: Option<ClassRef>,
        interfaces: Vec<ClassRef>,
        loader: Weak<ClassLoader>,
        kind: ClassKind,
    ) -> CommonClass {
        CommonClass {
            access,
            name,
            super_class,
            interfaces,
            loader,
            delegatee: AtomicUsize::new(0),
            vt: OnceLock::new(),
            kind,
        }
    }

    pub fn loader(&self) -> Arc<ClassLoader> {
        self.loader
            .upgrade()
            .expect("class outlived its class loader")
    }

    pub fn is_array(&self) -> bool {
        self.access & ACC_JVM_ARRAY != 0
    }

    pub fn is_primitive(&self) -> bool {
        self.access & ACC_JVM_PRIMITIVE != 0
    }

    pub fn is_interface(&self) -> bool {
        access_flags::is_interface(self.access)
    }

    pub fn is_abstract(&self) -> bool {
        access_flags::is_abstract(self.access)
    }

    /// A real, instantiable (or at least constant-pool carrying) class.
    pub fn is_class(&self) -> bool {
        self.access & ACC_JVM_CLASS != 0
    }

    pub fn as_regular(&self) -> Option<&RegularClass> {
        match &self.kind {
            ClassKind::Regular(rc) => Some(rc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayClass> {
        match &self.kind {
            ClassKind::Array(ac) => Some(ac),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveClass> {
        match &self.kind {
            ClassKind::Primitive(pc) => Some(pc),
            _ => None,
        }
    }

    pub fn vt(&self) -> Option<&VirtualTable> {
        self.vt.get().map(|b| &**b)
    }

    pub(crate) fn install_vt(&self, vt: Box<VirtualTable>) -> &VirtualTable {
        self.vt.get_or_init(|| vt)
    }

    pub fn delegatee(&self) -> Option<ObjRef> {
        ObjRef::from_addr(self.delegatee.load(Ordering::Acquire))
    }

    /// Installs the java.lang.Class mirror if none is present and returns
    /// the winner.
    pub fn set_delegatee(
        &self,
        plan: &dyn crate::plan::GcPlan,
        mirror: ObjRef,
    ) -> ObjRef {
        if self.delegatee.load(Ordering::Acquire) == 0 {
            plan.object_reference_non_heap_write_barrier(
                self.delegatee.as_ptr(),
                Some(mirror),
            );
            let _ = self.delegatee.compare_exchange(
                0,
                mirror.addr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        self.delegatee().expect("delegatee installed")
    }

    pub fn delegatee_slot(&self) -> *mut usize {
        self.delegatee.as_ptr()
    }

    /// Is this class a subtype of `other`? Requires both VTs built.
    pub fn is_subclass_of(&self, other: &CommonClass) -> bool {
        match (self.vt(), other.vt()) {
            (Some(a), Some(b)) => a.is_subtype_of(b),
            _ => false,
        }
    }

    /// The super-chain depth: 0 for java/lang/Object and primitives.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.super_class.as_deref();
        while let Some(c) = cur {
            depth += 1;
            cur = c.super_class.as_deref();
        }
        depth
    }

    /// Does this class, or anything it inherits from, carry `name`? The
    /// linear walk the display-based check is validated against.
    pub fn inherits_name(&self, name: &Name) -> bool {
        if &self.name == name {
            return true;
        }
        if self.is_primitive() {
            return false;
        }
        if let Some(superclass) = &self.super_class {
            if superclass.inherits_name(name) {
                return true;
            }
        }
        self.interfaces.iter().any(|i| i.inherits_name(name))
    }

    /// Byte size of one instance. For arrays this needs the length.
    pub fn instance_size(&self) -> usize {
        match &self.kind {
            ClassKind::Regular(rc) => rc.virtual_size.load(Ordering::Acquire),
            _ => crate::object::OBJECT_BASE_SIZE,
        }
    }

    /// Byte size of an array instance with `length` elements.
    pub fn array_byte_size(&self, length: usize) -> usize {
        let component = &self
            .as_array()
            .expect("array_byte_size on a non-array")
            .component;
        let log_size = match component.as_primitive() {
            Some(pc) => pc.log_size,
            None => {
                if std::mem::size_of::<usize>() == 8 {
                    3
                } else {
                    2
                }
            }
        };
        crate::object::ARRAY_ELEMENTS_OFFSET + (length << log_size)
    }
}

// Method and field lookup, following the resolution rules of JVMS 5.4.3.

impl CommonClass {
    /// Scans own members, then the super chain, then (for static lookups)
    /// the interfaces. Returns the defining class alongside the member.
    pub fn lookup_method_dont_throw(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
        is_static: bool,
        recurse: bool,
    ) -> Option<(ClassRef, MethodPtr)> {
        if let Some(rc) = self.as_regular() {
            let methods = if is_static {
                &rc.static_methods
            } else {
                &rc.virtual_methods
            };
            for method in methods {
                if method.name.same_chars(name.chars()) && method.ty.same_chars(ty.chars()) {
                    return Some((self.clone(), MethodPtr::of(method)));
                }
            }
        }
        if recurse {
            if let Some(superclass) = &self.super_class {
                if let Some(found) =
                    superclass.lookup_method_dont_throw(name, ty, is_static, recurse)
                {
                    return Some(found);
                }
            }
            if is_static {
                for interface in &self.interfaces {
                    if let Some(found) =
                        interface.lookup_method_dont_throw(name, ty, is_static, recurse)
                    {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Interface lookup: own methods, then superinterfaces, then the super
    /// chain (which reaches java/lang/Object).
    pub fn lookup_interface_method_dont_throw(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
    ) -> Option<(ClassRef, MethodPtr)> {
        if let Some(found) = self.lookup_method_dont_throw(name, ty, false, false) {
            return Some(found);
        }
        for interface in &self.interfaces {
            if let Some(found) = interface.lookup_interface_method_dont_throw(name, ty) {
                return Some(found);
            }
        }
        if let Some(superclass) = &self.super_class {
            return superclass.lookup_interface_method_dont_throw(name, ty);
        }
        None
    }

    /// invokespecial selection: when the caller has ACC_SUPER, the found
    /// method sits in a superclass of the caller and the call is not to an
    /// instance initializer, redirect to the caller's direct super.
    pub fn lookup_special_method_dont_throw(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
        caller: &ClassRef,
    ) -> Option<(ClassRef, MethodPtr)> {
        let found = self.lookup_method_dont_throw(name, ty, false, true)?;
        let init_name: Vec<u16> = "<init>".encode_utf16().collect();
        if access_flags::is_super(caller.access)
            && !Arc::ptr_eq(&found.0, caller)
            && caller.is_subclass_of_by_chain(&found.0)
            && !name.same_chars(&init_name)
        {
            let superclass = caller.super_class.as_ref()?;
            return superclass.lookup_method_dont_throw(name, ty, false, true);
        }
        Some(found)
    }

    /// Super/interface-edge walk, independent of the VT encoding.
    pub fn is_subclass_of_by_chain(self: &Arc<Self>, other: &ClassRef) -> bool {
        if Arc::ptr_eq(self, other) {
            return true;
        }
        for interface in &self.interfaces {
            if interface.is_subclass_of_by_chain(other) {
                return true;
            }
        }
        match &self.super_class {
            Some(superclass) => superclass.is_subclass_of_by_chain(other),
            None => false,
        }
    }

    pub fn lookup_method(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
        is_static: bool,
        recurse: bool,
    ) -> Result<(ClassRef, MethodPtr), JavaError> {
        self.lookup_method_dont_throw(name, ty, is_static, recurse)
            .ok_or_else(|| {
                JavaError::new(
                    JavaKind::NoSuchMethodError,
                    format!("{}.{}{}", self.name, name, ty),
                )
            })
    }

    pub fn lookup_field_dont_throw(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
        is_static: bool,
        recurse: bool,
    ) -> Option<(ClassRef, FieldPtr)> {
        if let Some(rc) = self.as_regular() {
            let fields = if is_static {
                &rc.static_fields
            } else {
                &rc.virtual_fields
            };
            for field in fields {
                if field.name.same_chars(name.chars()) && field.ty.same_chars(ty.chars()) {
                    return Some((self.clone(), FieldPtr::of(field)));
                }
            }
        }
        if recurse {
            if let Some(superclass) = &self.super_class {
                if let Some(found) =
                    superclass.lookup_field_dont_throw(name, ty, is_static, recurse)
                {
                    return Some(found);
                }
            }
            if is_static {
                for interface in &self.interfaces {
                    if let Some(found) =
                        interface.lookup_field_dont_throw(name, ty, is_static, recurse)
                    {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    pub fn lookup_field(
        self: &Arc<Self>,
        name: &Name,
        ty: &Name,
        is_static: bool,
        recurse: bool,
    ) -> Result<(ClassRef, FieldPtr), JavaError> {
        self.lookup_field_dont_throw(name, ty, is_static, recurse)
            .ok_or_else(|| {
                JavaError::new(
                    JavaKind::NoSuchFieldError,
                    format!("{}.{} {}", self.name, name, ty),
                )
            })
    }
}

/// Maps a class-file version to the minimal JDK version able to load it.
pub fn minimal_jdk_version(major: u16, minor: u16) -> (u16, u16, u16) {
    if major == 45 && minor <= 3 {
        (1, 0, 2)
    } else if major == 45 {
        (1, 1, 0)
    } else {
        let mut jdk_minor = major.saturating_sub(43);
        if minor == 0 {
            jdk_minor = jdk_minor.saturating_sub(1);
        }
        (1, jdk_minor, 0)
    }
}

/// The newest class-file line this VM claims to support: Java 1.6.
pub const SUPPORTED_JDK_MINOR: u16 = 6;

pub fn is_class_version_supported(major: u16, minor: u16) -> bool {
    let (jdk_major, jdk_minor, _) = minimal_jdk_version(major, minor);
    jdk_major <= 1 && jdk_minor <= SUPPORTED_JDK_MINOR
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_floor() {
        assert_eq!(minimal_jdk_version(45, 3), (1, 0, 2));
        assert_eq!(minimal_jdk_version(45, 60), (1, 1, 0));
        assert_eq!(minimal_jdk_version(50, 0), (1, 6, 0));
        assert_eq!(minimal_jdk_version(51, 0), (1, 7, 0));
        assert!(is_class_version_supported(50, 0));
        assert!(!is_class_version_supported(52, 0));
    }
}
