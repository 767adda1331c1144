//! Class loading, resolution and initialization.
//!
//! The loader owns the per-loader tables (names, typedefs, signatures, the
//! class table) and drives every class through
//! loaded -> resolving -> resolved -> inClinit -> ready, with erroneous
//! reachable from any pre-ready state. Only one thread advances a class
//! past loaded; everyone else waits on the class' condition.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};

use jclass::access_flags::{
    self, ACC_ABSTRACT, ACC_FINAL, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC,
};
use jclass::attributes::{self, CodeAttribute};
use jclass::class_file::ClassFile;
use parking_lot::{ReentrantMutex, RwLock};

use crate::class::{
    is_class_version_supported, minimal_jdk_version, ArrayClass, ClassKind, ClassRef, CommonClass,
    JavaField, JavaMethod, PrimitiveClass, RegularClass, ACC_JVM_ARRAY, ACC_JVM_CLASS,
    ACC_JVM_PRIMITIVE, STATUS_ERRONEOUS, STATUS_IN_CLINIT, STATUS_LOADED, STATUS_READY,
    STATUS_RESOLVED, STATUS_RESOLVING,
};
use crate::constant_pool::ConstantPool;
use crate::errors::{JavaError, JavaKind};
use crate::names::{Name, NameTable};
use crate::object::OBJECT_BASE_SIZE;
use crate::thread::JavaThread;
use crate::types::{Primitive, SignMap, Signdef, TypeMap, Typedef};
use crate::vm::Jvm;
use crate::vtable::{build_array_vt, build_class_vt, build_primitive_vt};

/// Where class bytes come from. The bootstrap loader stacks one of these
/// per classpath entry; embedders and tests can add in-memory sources.
pub trait ClassBytesSource: Send + Sync {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>>;
}

/// Reads `<dir>/<internal/name>.class` files.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> DirectorySource {
        DirectorySource { dir: dir.into() }
    }

    /// One source per entry of a `:`-separated path list, as found in
    /// CLASSPATH or BOOTCLASSPATH.
    pub fn from_path_list(list: &str) -> Vec<Box<dyn ClassBytesSource>> {
        list.split(':')
            .filter(|entry| !entry.is_empty())
            .map(|entry| Box::new(DirectorySource::new(entry)) as Box<dyn ClassBytesSource>)
            .collect()
    }
}

impl ClassBytesSource for DirectorySource {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        let mut path = self.dir.clone();
        for piece in internal_name.split('/') {
            path.push(piece);
        }
        path.set_extension("class");
        std::fs::read(path).ok()
    }
}

/// In-memory class bytes, keyed by internal name.
#[derive(Default)]
pub struct MapSource {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MapSource {
    pub fn new() -> MapSource {
        MapSource::default()
    }

    pub fn put(&self, internal_name: &str, bytes: Vec<u8>) {
        self.map.write().insert(internal_name.to_string(), bytes);
    }
}

impl ClassBytesSource for MapSource {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.map.read().get(internal_name).cloned()
    }
}

pub struct ClassLoader {
    names: NameTable,
    types: TypeMap,
    signs: SignMap,
    classes: RwLock<HashMap<Name, ClassRef>>,
    sources: RwLock<Vec<Box<dyn ClassBytesSource>>>,
    /// Serializes array-class construction so a class never escapes the
    /// table without its VT.
    array_lock: ReentrantMutex<()>,
    primitives: OnceLock<Vec<(u8, ClassRef)>>,
    vm: OnceLock<Weak<Jvm>>,
    self_weak: Weak<ClassLoader>,
}

thread_local! {
    /// Names this thread is currently loading, for circularity detection.
    static LOADING: RefCell<Vec<Name>> = const { RefCell::new(Vec::new()) };
}

impl ClassLoader {
    pub fn new(sources: Vec<Box<dyn ClassBytesSource>>) -> Arc<ClassLoader> {
        Arc::new_cyclic(|weak| ClassLoader {
            names: NameTable::new(),
            types: TypeMap::new(),
            signs: SignMap::new(),
            classes: RwLock::new(HashMap::new()),
            sources: RwLock::new(sources),
            array_lock: ReentrantMutex::new(()),
            primitives: OnceLock::new(),
            vm: OnceLock::new(),
            self_weak: weak.clone(),
        })
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub(crate) fn set_vm(&self, vm: &Arc<Jvm>) {
        let _ = self.vm.set(Arc::downgrade(vm));
    }

    pub fn vm(&self) -> Arc<Jvm> {
        self.vm
            .get()
            .and_then(Weak::upgrade)
            .expect("class loader used before VM boot")
    }

    fn strong(&self) -> Arc<ClassLoader> {
        self.self_weak.upgrade().expect("loader torn down")
    }

    pub fn add_source(&self, source: Box<dyn ClassBytesSource>) {
        self.sources.write().push(source);
    }

    pub fn construct_type(&self, descriptor: &Name) -> Result<Arc<Typedef>, JavaError> {
        self.types.construct_type(&self.names, descriptor)
    }

    pub fn construct_sign(&self, descriptor: &Name) -> Result<Arc<Signdef>, JavaError> {
        self.signs.construct_sign(&self.types, &self.names, descriptor)
    }

    pub fn lookup_class(&self, name: &Name) -> Option<ClassRef> {
        self.classes.read().get(name).cloned()
    }

    pub fn each_class(&self, mut visitor: impl FnMut(&ClassRef)) {
        for class in self.classes.read().values() {
            visitor(class);
        }
    }

    /// Insert-if-absent; under a race the first installation wins and
    /// everyone gets the same class back.
    fn install(&self, name: &Name, class: ClassRef) -> ClassRef {
        let mut classes = self.classes.write();
        classes.entry(name.clone()).or_insert(class).clone()
    }

    /// The primitive class for a descriptor character, e.g. `I` -> int.
    pub fn primitive_class(&self, descriptor: u8) -> Option<ClassRef> {
        self.primitives
            .get()?
            .iter()
            .find(|(d, _)| *d == descriptor)
            .map(|(_, c)| c.clone())
    }

    /// Loads a class by internal name, raising NoClassDefFoundError when
    /// no source provides it. Linkage-triggered loads come through here.
    pub fn load_class(&self, name: &Name) -> Result<ClassRef, JavaError> {
        if let Some(existing) = self.lookup_class(name) {
            return Ok(existing);
        }
        if name.char_at(0) == b'[' as u16 {
            return self.construct_array(name);
        }
        let internal = name.to_string();
        let bytes = {
            let sources = self.sources.read();
            sources.iter().find_map(|s| s.class_bytes(&internal))
        };
        let Some(bytes) = bytes else {
            return Err(JavaError::new(JavaKind::NoClassDefFoundError, internal));
        };
        self.define_class(name, bytes)
    }

    /// User-triggered lookup (Class.forName): absence is the checked
    /// ClassNotFoundException instead of the linkage error.
    pub fn find_class_user(&self, name: &Name) -> Result<ClassRef, JavaError> {
        self.load_class(name).map_err(|err| {
            if err.kind == JavaKind::NoClassDefFoundError {
                JavaError::new(JavaKind::ClassNotFoundException, err.message)
            } else {
                err
            }
        })
    }

    /// Parses bytes and builds the class entity, loading supers and
    /// interfaces on the way. A cycle through the super or interface
    /// edges raises ClassCircularityError.
    pub fn define_class(&self, name: &Name, bytes: Vec<u8>) -> Result<ClassRef, JavaError> {
        let in_progress = LOADING.with(|l| l.borrow().iter().any(|n| n == name));
        if in_progress {
            return Err(JavaError::new(
                JavaKind::ClassCircularityError,
                name.to_string(),
            ));
        }
        LOADING.with(|l| l.borrow_mut().push(name.clone()));
        let result = self.define_class_inner(name, bytes);
        LOADING.with(|l| {
            l.borrow_mut().pop();
        });
        result
    }

    fn define_class_inner(&self, name: &Name, bytes: Vec<u8>) -> Result<ClassRef, JavaError> {
        let cf = ClassFile::from_bytes(&bytes)?;

        if !is_class_version_supported(cf.major_version, cf.minor_version) {
            let (jdk_major, jdk_minor, _) = minimal_jdk_version(cf.major_version, cf.minor_version);
            log::warn!(
                "class file '{name}' requires Java version {jdk_major}.{jdk_minor}; \
                 this VM only supports versions up to 1.{}",
                crate::class::SUPPORTED_JDK_MINOR
            );
        }

        let this_name = self.names.from_modified_utf8(cf.this_class_name()?)?;
        if &this_name != name {
            return Err(JavaError::new(
                JavaKind::NoClassDefFoundError,
                format!("{this_name} (wrong name: {name})"),
            ));
        }

        // Load parents before constructing, so the entity is immutable
        // once published.
        let super_class = match cf.super_class_name()? {
            Some(super_name) => {
                let super_name = self.names.from_modified_utf8(super_name)?;
                Some(self.load_class(&super_name)?)
            }
            None => None,
        };
        let mut interfaces = Vec::with_capacity(cf.interfaces.len());
        for &interface_index in &cf.interfaces {
            let interface_name = self.names.from_modified_utf8(jclass::constants::class_name_at(
                &cf.constant_pool,
                interface_index,
            )?)?;
            interfaces.push(self.load_class(&interface_name)?);
        }

        let pool = ConstantPool::build(cf.constant_pool.clone(), &self.names)?;

        let mut virtual_fields = Vec::new();
        let mut static_fields = Vec::new();
        for info in &cf.fields {
            let field_name = pool.utf8_at(info.name_index)?;
            let field_ty = pool.utf8_at(info.descriptor_index)?;
            let list = if access_flags::is_static(info.access_flags as u32) {
                &mut static_fields
            } else {
                &mut virtual_fields
            };
            let num = list.len() as u16;
            list.push(JavaField::new(
                info.access_flags,
                field_name,
                field_ty,
                info.attributes.clone(),
                num,
            ));
        }

        let mut virtual_methods = Vec::new();
        let mut static_methods = Vec::new();
        for info in &cf.methods {
            let method_name = pool.utf8_at(info.name_index)?;
            let method_ty = pool.utf8_at(info.descriptor_index)?;
            let list = if access_flags::is_static(info.access_flags as u32) {
                &mut static_methods
            } else {
                &mut virtual_methods
            };
            list.push(JavaMethod::new(
                info.access_flags,
                method_name,
                method_ty,
                info.attributes.clone(),
            ));
        }

        // Abstract classes synthesize miranda methods for interface
        // methods nothing in the super chain defines yet.
        if access_flags::is_abstract(cf.access_flags as u32) {
            let mut mirandas: Vec<(Name, Name, u16)> = Vec::new();
            collect_mirandas(&interfaces, &super_class, &virtual_methods, &mut mirandas);
            mirandas.sort_by(|a, b| {
                a.0.lexical_cmp(&b.0).then_with(|| a.1.lexical_cmp(&b.1))
            });
            mirandas.dedup_by(|a, b| {
                a.0.same_chars(b.0.chars()) && a.1.same_chars(b.1.chars())
            });
            for (m_name, m_ty, m_access) in mirandas {
                virtual_methods.push(JavaMethod::new(m_access, m_name, m_ty, Vec::new()));
            }
        }

        let mut access = cf.access_flags as u32 | ACC_JVM_CLASS;
        if !access_flags::is_public(access) {
            access |= ACC_PRIVATE as u32;
        }

        let min_jdk = minimal_jdk_version(cf.major_version, cf.minor_version);
        let regular = RegularClass::new(
            Arc::new(bytes),
            cf.major_version,
            cf.minor_version,
            min_jdk,
            pool,
            virtual_fields,
            static_fields,
            virtual_methods,
            static_methods,
            cf.attributes.clone(),
        );
        let class: ClassRef = Arc::new(CommonClass::new(
            access,
            name.clone(),
            super_class,
            interfaces,
            self.self_weak.clone(),
            ClassKind::Regular(regular),
        ));
        install_member_back_refs(&class);
        Ok(self.install(name, class))
    }

    /// Gets or creates an array class by internal name (`[I`,
    /// `[Ljava/lang/Object;`, ...). The VT is built before the class is
    /// visible outside the loader.
    pub fn construct_array(&self, name: &Name) -> Result<ClassRef, JavaError> {
        if let Some(existing) = self.lookup_class(name) {
            return Ok(existing);
        }
        let guard = self.array_lock.lock();
        if let Some(existing) = self.lookup_class(name) {
            return Ok(existing);
        }

        let component = self.component_of(name)?;
        let object = self.object_class()?;
        let cloneable = self.load_class(&self.names.from_str("java/lang/Cloneable"))?;
        let serializable = self.load_class(&self.names.from_str("java/io/Serializable"))?;
        resolve_class(&self.strong(), &cloneable)?;
        resolve_class(&self.strong(), &serializable)?;

        let mut access =
            (component.access & 0xFFFF) | (ACC_FINAL | ACC_ABSTRACT) as u32 | ACC_JVM_ARRAY;
        access &= !(ACC_INTERFACE as u32);
        let class: ClassRef = Arc::new(CommonClass::new(
            access,
            name.clone(),
            Some(object),
            vec![cloneable, serializable],
            self.self_weak.clone(),
            ClassKind::Array(ArrayClass { component }),
        ));
        let installed = self.install(name, class);
        if installed.vt().is_none() {
            let vt = build_array_vt(&self.strong(), &installed)?;
            installed.install_vt(vt);
        }
        drop(guard);
        Ok(installed)
    }

    fn component_of(&self, array_name: &Name) -> Result<ClassRef, JavaError> {
        let chars = array_name.chars();
        if chars.len() < 2 {
            return Err(JavaError::new(
                JavaKind::NoClassDefFoundError,
                array_name.to_string(),
            ));
        }
        let rest = &chars[1..];
        if rest[0] == b'[' as u16 {
            let inner = self.names.from_utf16(rest);
            return self.construct_array(&inner);
        }
        if rest[0] == b'L' as u16 {
            if rest[rest.len() - 1] != b';' as u16 {
                return Err(JavaError::new(
                    JavaKind::NoClassDefFoundError,
                    array_name.to_string(),
                ));
            }
            let inner = self.names.from_utf16(&rest[1..rest.len() - 1]);
            let class = self.load_class(&inner)?;
            resolve_class(&self.strong(), &class)?;
            return Ok(class);
        }
        if rest.len() == 1 {
            if let Some(primitive) = self.primitive_class(rest[0] as u8) {
                return Ok(primitive);
            }
        }
        Err(JavaError::new(
            JavaKind::NoClassDefFoundError,
            array_name.to_string(),
        ))
    }

    fn object_class(&self) -> Result<ClassRef, JavaError> {
        let object_name = self.names.from_str("java/lang/Object");
        let object = self.load_class(&object_name)?;
        resolve_class(&self.strong(), &object)?;
        Ok(object)
    }

    /// Boot-time preallocation: the nine primitive classes and the root
    /// array classes. java/lang/Object, Cloneable and Serializable must be
    /// loadable from the installed sources.
    pub(crate) fn preallocate_bootstrap(&self) -> Result<(), JavaError> {
        self.object_class()?;
        let primitives = Primitive::ALL
            .iter()
            .map(|&p| {
                let name = self.names.from_str(p.java_name());
                let class: ClassRef = Arc::new(CommonClass::new(
                    (ACC_ABSTRACT | ACC_FINAL | ACC_PUBLIC) as u32 | ACC_JVM_PRIMITIVE,
                    name.clone(),
                    None,
                    Vec::new(),
                    self.self_weak.clone(),
                    ClassKind::Primitive(PrimitiveClass {
                        primitive: p,
                        log_size: p.log_size(),
                    }),
                ));
                let installed = self.install(&name, class);
                if installed.vt().is_none() {
                    let vt = build_primitive_vt(&installed);
                    installed.install_vt(vt);
                }
                (p.descriptor(), installed)
            })
            .collect();
        let _ = self.primitives.set(primitives);

        for descriptor in ["[Z", "[B", "[C", "[S", "[I", "[F", "[D", "[J"] {
            self.construct_array(&self.names.from_str(descriptor))?;
        }
        self.construct_array(&self.names.from_str("[Ljava/lang/Object;"))?;
        Ok(())
    }
}

fn install_member_back_refs(class: &ClassRef) {
    if let Some(rc) = class.as_regular() {
        for field in rc.virtual_fields.iter().chain(rc.static_fields.iter()) {
            field.set_class(class);
        }
        for method in rc.virtual_methods.iter().chain(rc.static_methods.iter()) {
            method.set_class(class);
        }
    }
}

fn collect_mirandas(
    interfaces: &[ClassRef],
    super_class: &Option<ClassRef>,
    own_virtuals: &[JavaMethod],
    out: &mut Vec<(Name, Name, u16)>,
) {
    for interface in interfaces {
        if let Some(rc) = interface.as_regular() {
            for method in &rc.virtual_methods {
                let defined_here = own_virtuals.iter().any(|m| {
                    m.name.same_chars(method.name.chars()) && m.ty.same_chars(method.ty.chars())
                });
                let defined_above = super_class
                    .as_ref()
                    .and_then(|s| {
                        s.lookup_method_dont_throw(&method.name, &method.ty, false, true)
                    })
                    .is_some();
                if !defined_here && !defined_above {
                    out.push((method.name.clone(), method.ty.clone(), method.access as u16));
                }
            }
        }
        collect_mirandas(&interface.interfaces, super_class, own_virtuals, out);
    }
}

// Resolution.

/// Drives a class to the resolved state: parents resolved, catch-clause
/// exception classes loaded, field layout computed, constant statics
/// installed, virtual table built.
pub fn resolve_class(loader: &Arc<ClassLoader>, class: &ClassRef) -> Result<(), JavaError> {
    let Some(rc) = class.as_regular() else {
        // Arrays and primitives carry their VT from construction.
        return Ok(());
    };
    if rc.is_resolved() {
        return Ok(());
    }

    {
        let mut guard = rc.lifecycle_lock();
        loop {
            match rc.status() {
                STATUS_LOADED => {
                    rc.set_status(STATUS_RESOLVING);
                    break;
                }
                STATUS_RESOLVING => rc.lifecycle_wait(&mut guard),
                STATUS_ERRONEOUS => {
                    return Err(JavaError::new(
                        JavaKind::NoClassDefFoundError,
                        class.name.to_string(),
                    ))
                }
                _ => return Ok(()),
            }
        }
    }

    let result = do_resolve(loader, class, rc);
    {
        let _guard = rc.lifecycle_lock();
        match &result {
            Ok(()) => rc.set_status(STATUS_RESOLVED),
            Err(_) => rc.set_status(STATUS_ERRONEOUS),
        }
        rc.lifecycle_broadcast();
    }
    result
}

fn do_resolve(
    loader: &Arc<ClassLoader>,
    class: &ClassRef,
    rc: &RegularClass,
) -> Result<(), JavaError> {
    if let Some(superclass) = &class.super_class {
        resolve_class(loader, superclass)?;
    }
    for interface in &class.interfaces {
        resolve_class(loader, interface)?;
    }

    load_exception_classes(loader, rc)?;
    layout_fields(class, rc)?;
    init_static_defaults(loader, rc)?;

    if class.vt().is_none() {
        let vt = build_class_vt(class)?;
        class.install_vt(vt);
    }
    Ok(())
}

/// Loads every class named in a catch clause of the class' methods, so
/// exception dispatch never has to load under a propagating throw.
fn load_exception_classes(loader: &Arc<ClassLoader>, rc: &RegularClass) -> Result<(), JavaError> {
    for method in rc.virtual_methods.iter().chain(rc.static_methods.iter()) {
        let Some(span) = method.lookup_attribute(rc, attributes::CODE) else {
            continue;
        };
        let code = CodeAttribute::read(&rc.bytes, &span)?;
        for entry in &code.exception_table {
            if entry.catch_type != 0 {
                rc.pool.resolve_class(loader, entry.catch_type)?;
            }
        }
    }
    Ok(())
}

/// Assigns byte offsets: instance fields after the superclass' size,
/// statics from zero. Wider fields first keeps everything aligned without
/// padding gymnastics.
fn layout_fields(class: &ClassRef, rc: &RegularClass) -> Result<(), JavaError> {
    let base = match &class.super_class {
        Some(superclass) => match superclass.as_regular() {
            Some(super_rc) => super_rc.virtual_size.load(std::sync::atomic::Ordering::Acquire),
            None => OBJECT_BASE_SIZE,
        },
        None => OBJECT_BASE_SIZE,
    };

    let mut order: Vec<&JavaField> = rc.virtual_fields.iter().collect();
    order.sort_by_key(|f| std::cmp::Reverse(field_size(f)));
    let mut offset = base;
    for field in order {
        let size = field_size(field);
        offset = align_up(offset, size);
        field
            .ptr_offset
            .store(offset, std::sync::atomic::Ordering::Release);
        offset += size;
    }
    rc.virtual_size.store(
        align_up(offset, std::mem::size_of::<usize>()),
        std::sync::atomic::Ordering::Release,
    );

    let mut order: Vec<&JavaField> = rc.static_fields.iter().collect();
    order.sort_by_key(|f| std::cmp::Reverse(field_size(f)));
    let mut offset = 0;
    let mut ref_offsets = Vec::new();
    for field in order {
        let size = field_size(field);
        offset = align_up(offset, size);
        field
            .ptr_offset
            .store(offset, std::sync::atomic::Ordering::Release);
        if field.is_reference() {
            ref_offsets.push(offset);
        }
        offset += size;
    }
    let static_size = align_up(offset, std::mem::size_of::<usize>());
    rc.static_size
        .store(static_size, std::sync::atomic::Ordering::Release);

    if !rc.static_fields.is_empty() {
        rc.install_static_area(crate::class::StaticArea::new(static_size, ref_offsets));
    }
    Ok(())
}

fn field_size(field: &JavaField) -> usize {
    match Primitive::from_descriptor(field.ty.char_at(0)) {
        Some(p) => 1 << p.log_size(),
        None => std::mem::size_of::<usize>(),
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Installs ConstantValue statics; everything else stays zero from the
/// area allocation. String constants go through the interner.
fn init_static_defaults(loader: &Arc<ClassLoader>, rc: &RegularClass) -> Result<(), JavaError> {
    if rc.static_fields.is_empty() {
        return Ok(());
    }
    let area = rc
        .static_area()
        .expect("static defaults before area allocation");
    for field in &rc.static_fields {
        let Some(span) = attributes::lookup(&field.attributes, rc.pool.raw(), attributes::CONSTANT_VALUE)
        else {
            continue;
        };
        let index = attributes::read_constant_value(&rc.bytes, &span)?;
        let offset = field.offset();
        match Primitive::from_descriptor(field.ty.char_at(0)) {
            Some(Primitive::Long) => unsafe {
                area.write::<i64>(offset, rc.pool.long_at(index)?);
            },
            Some(Primitive::Double) => unsafe {
                area.write::<f64>(offset, rc.pool.double_at(index)?);
            },
            Some(Primitive::Float) => unsafe {
                area.write::<f32>(offset, rc.pool.float_at(index)?);
            },
            Some(_) => unsafe {
                area.write::<i32>(offset, rc.pool.integer_at(index)?);
            },
            None => {
                let vm = loader.vm();
                let string = rc.pool.resolve_string(&vm, index)?;
                vm.plan()
                    .object_reference_non_heap_write_barrier(area.ref_slot(offset), Some(string));
            }
        }
    }
    Ok(())
}

/// Lazily resolves the InnerClasses attribute into inner/outer links.
pub fn resolve_inner_outer_classes(
    loader: &Arc<ClassLoader>,
    class: &ClassRef,
) -> Result<(), JavaError> {
    let Some(rc) = class.as_regular() else {
        return Ok(());
    };
    let mut state = rc.inner_outer.lock();
    if state.resolved {
        return Ok(());
    }
    if let Some(span) = rc.lookup_attribute(attributes::INNER_CLASSES) {
        for info in attributes::read_inner_classes(&rc.bytes, &span)? {
            let inner = if info.inner_class_index != 0 {
                Some(rc.pool.resolve_class(loader, info.inner_class_index)?)
            } else {
                None
            };
            let outer = if info.outer_class_index != 0 {
                Some(rc.pool.resolve_class(loader, info.outer_class_index)?)
            } else {
                None
            };
            if let Some(inner_class) = &inner {
                if Arc::ptr_eq(inner_class, class) {
                    state.outer = outer.clone();
                    if info.inner_name_index == 0 {
                        state.is_anonymous = true;
                    }
                    state.inner_access = info.inner_access;
                    continue;
                }
            }
            if let Some(outer_class) = &outer {
                if Arc::ptr_eq(outer_class, class) {
                    if let Some(inner_class) = inner {
                        state.inner.push(inner_class);
                    }
                }
            }
        }
    }
    state.resolved = true;
    Ok(())
}

// Initialization.

fn has_clinit(rc: &RegularClass) -> bool {
    let clinit: Vec<u16> = "<clinit>".encode_utf16().collect();
    let void_desc: Vec<u16> = "()V".encode_utf16().collect();
    rc.static_methods
        .iter()
        .any(|m| m.name.same_chars(&clinit) && m.ty.same_chars(&void_desc))
}

/// Idempotently initializes a class per JVMS 5.5: one thread runs
/// `<clinit>`, re-entry by the driving thread returns immediately, waiters
/// block until ready or erroneous. A throwing initializer wraps non-Error
/// exceptions in ExceptionInInitializerError; later triggers observe the
/// erroneous state as NoClassInitializerError.
pub fn initialize_class(vm: &Jvm, class: &ClassRef) -> Result<(), JavaError> {
    let Some(rc) = class.as_regular() else {
        return Ok(());
    };
    if rc.is_ready() {
        return Ok(());
    }
    if rc.is_erroneous() {
        return Err(JavaError::new(
            JavaKind::NoClassInitializerError,
            format!("could not initialize class {}", class.name),
        ));
    }
    let loader = class.loader();
    resolve_class(&loader, class)?;

    let me = JavaThread::current().id_word();
    {
        let mut guard = rc.lifecycle_lock();
        loop {
            match rc.status() {
                STATUS_READY => return Ok(()),
                STATUS_ERRONEOUS => {
                    return Err(JavaError::new(
                        JavaKind::NoClassInitializerError,
                        format!("could not initialize class {}", class.name),
                    ))
                }
                STATUS_IN_CLINIT => {
                    if rc.init_owner() == me {
                        // Recursive initialization from <clinit> itself.
                        return Ok(());
                    }
                    rc.lifecycle_wait(&mut guard);
                }
                STATUS_RESOLVED => {
                    rc.set_status(STATUS_IN_CLINIT);
                    rc.set_init_owner(me);
                    break;
                }
                STATUS_LOADED | STATUS_RESOLVING => rc.lifecycle_wait(&mut guard),
                other => {
                    return Err(JavaError::new(
                        JavaKind::InternalError,
                        format!("class {} in unexpected state {other}", class.name),
                    ))
                }
            }
        }
    }

    let body = || -> Result<(), JavaError> {
        if !class.is_interface() {
            if let Some(superclass) = &class.super_class {
                initialize_class(vm, superclass)?;
            }
        }
        if has_clinit(rc) {
            vm.engine().run_clinit(vm, class)?;
        }
        Ok(())
    };
    let outcome = body();

    let mut guard = rc.lifecycle_lock();
    match outcome {
        Ok(()) => {
            rc.set_status(STATUS_READY);
            rc.set_init_owner(0);
            rc.lifecycle_broadcast();
            drop(guard);
            Ok(())
        }
        Err(err) => {
            rc.set_status(STATUS_ERRONEOUS);
            rc.set_init_owner(0);
            rc.lifecycle_broadcast();
            drop(guard);
            log::debug!("<clinit> of {} failed: {err}", class.name);
            if err.kind.is_error() {
                Err(err)
            } else {
                Err(JavaError::new(
                    JavaKind::ExceptionInInitializerError,
                    err.to_string(),
                ))
            }
        }
    }
}
