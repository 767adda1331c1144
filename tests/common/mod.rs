//! Shared fixtures: an in-memory class-file emitter, a GC plan with
//! scripted liveness, and an execution engine that counts its upcalls.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use jrt_rs::class::ClassRef;
use jrt_rs::engine::ExecutionEngine;
use jrt_rs::errors::{JavaError, JavaKind};
use jrt_rs::loader::MapSource;
use jrt_rs::object::{JavaObject, ObjRef};
use jrt_rs::plan::GcPlan;
use jrt_rs::vm::Jvm;
use jrt_rs::vtable::VtPtr;

// Class-file emission, just enough for the loader: constant pool with
// Utf8/Class/Integer/Long/Float/Double entries, members, ConstantValue.

enum CpEntry {
    Utf8(String),
    Class(u16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    StringRef(u16),
}

impl CpEntry {
    fn slots(&self) -> u16 {
        match self {
            CpEntry::Long(_) | CpEntry::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Clone)]
pub enum ConstVal {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

pub struct Member {
    access: u16,
    name: String,
    descriptor: String,
    constant: Option<ConstVal>,
}

pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access: u16,
    fields: Vec<Member>,
    methods: Vec<Member>,
    entries: Vec<CpEntry>,
    extra_classes: Vec<String>,
}

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

impl ClassBuilder {
    pub fn new(name: &str) -> ClassBuilder {
        ClassBuilder {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access: ACC_PUBLIC | ACC_SUPER,
            fields: Vec::new(),
            methods: Vec::new(),
            entries: Vec::new(),
            extra_classes: Vec::new(),
        }
    }

    /// Adds a Class constant without using it anywhere, for resolution
    /// tests. Find its index by scanning the loaded pool.
    pub fn reference_class(mut self, name: &str) -> ClassBuilder {
        self.extra_classes.push(name.to_string());
        self
    }

    pub fn no_super(mut self) -> ClassBuilder {
        self.super_name = None;
        self
    }

    pub fn super_class(mut self, name: &str) -> ClassBuilder {
        self.super_name = Some(name.to_string());
        self
    }

    pub fn access(mut self, access: u16) -> ClassBuilder {
        self.access = access;
        self
    }

    pub fn interface(mut self) -> ClassBuilder {
        self.access = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        self
    }

    pub fn implements(mut self, name: &str) -> ClassBuilder {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> ClassBuilder {
        self.fields.push(Member {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant: None,
        });
        self
    }

    pub fn constant_field(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        value: ConstVal,
    ) -> ClassBuilder {
        self.fields.push(Member {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant: Some(value),
        });
        self
    }

    pub fn method(mut self, access: u16, name: &str, descriptor: &str) -> ClassBuilder {
        self.methods.push(Member {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant: None,
        });
        self
    }

    pub fn clinit(self) -> ClassBuilder {
        self.method(ACC_STATIC, "<clinit>", "()V")
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let mut index = 1;
        for entry in &self.entries {
            if let CpEntry::Utf8(existing) = entry {
                if existing == value {
                    return index;
                }
            }
            index += entry.slots();
        }
        self.entries.push(CpEntry::Utf8(value.to_string()));
        index
    }

    fn class_entry(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut index = 1;
        for entry in &self.entries {
            if let CpEntry::Class(existing) = entry {
                if *existing == name_index {
                    return index;
                }
            }
            index += entry.slots();
        }
        self.entries.push(CpEntry::Class(name_index));
        index
    }

    fn push_entry(&mut self, entry: CpEntry) -> u16 {
        let mut index = 1;
        for existing in &self.entries {
            index += existing.slots();
        }
        self.entries.push(entry);
        index
    }

    pub fn build(mut self) -> Vec<u8> {
        let this_index = self.class_entry(&self.name.clone());
        let super_index = match self.super_name.clone() {
            Some(name) => self.class_entry(&name),
            None => 0,
        };
        let interface_indices: Vec<u16> = self
            .interfaces
            .clone()
            .iter()
            .map(|name| self.class_entry(name))
            .collect();
        for name in self.extra_classes.clone() {
            self.class_entry(&name);
        }

        struct EmittedMember {
            access: u16,
            name_index: u16,
            descriptor_index: u16,
            constant: Option<(u16, u16)>, // (attr name index, value index)
        }

        let mut emit_member = |builder: &mut ClassBuilder, member: &Member| {
            let name_index = builder.utf8(&member.name);
            let descriptor_index = builder.utf8(&member.descriptor);
            let constant = member.constant.as_ref().map(|value| {
                let attr_name = builder.utf8("ConstantValue");
                let value_index = match value {
                    ConstVal::Int(v) => builder.push_entry(CpEntry::Integer(*v)),
                    ConstVal::Long(v) => builder.push_entry(CpEntry::Long(*v)),
                    ConstVal::Float(v) => builder.push_entry(CpEntry::Float(*v)),
                    ConstVal::Double(v) => builder.push_entry(CpEntry::Double(*v)),
                    ConstVal::Str(v) => {
                        let utf8 = builder.utf8(v);
                        builder.push_entry(CpEntry::StringRef(utf8))
                    }
                };
                (attr_name, value_index)
            });
            EmittedMember {
                access: member.access,
                name_index,
                descriptor_index,
                constant,
            }
        };

        let fields: Vec<EmittedMember> = std::mem::take(&mut self.fields)
            .iter()
            .map(|f| emit_member(&mut self, f))
            .collect();
        let methods: Vec<EmittedMember> = std::mem::take(&mut self.methods)
            .iter()
            .map(|m| emit_member(&mut self, m))
            .collect();

        let mut out: Vec<u8> = Vec::new();
        out.extend(0xCAFEBABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes()); // minor
        out.extend(50u16.to_be_bytes()); // major: Java 6 line

        let slots: u16 = self.entries.iter().map(|e| e.slots()).sum();
        out.extend((slots + 1).to_be_bytes());
        for entry in &self.entries {
            match entry {
                CpEntry::Utf8(value) => {
                    out.push(1);
                    out.extend((value.len() as u16).to_be_bytes());
                    out.extend(value.as_bytes());
                }
                CpEntry::Integer(v) => {
                    out.push(3);
                    out.extend(v.to_be_bytes());
                }
                CpEntry::Float(v) => {
                    out.push(4);
                    out.extend(v.to_bits().to_be_bytes());
                }
                CpEntry::Long(v) => {
                    out.push(5);
                    out.extend(v.to_be_bytes());
                }
                CpEntry::Double(v) => {
                    out.push(6);
                    out.extend(v.to_bits().to_be_bytes());
                }
                CpEntry::Class(name_index) => {
                    out.push(7);
                    out.extend(name_index.to_be_bytes());
                }
                CpEntry::StringRef(value_index) => {
                    out.push(8);
                    out.extend(value_index.to_be_bytes());
                }
            }
        }

        out.extend(self.access.to_be_bytes());
        out.extend(this_index.to_be_bytes());
        out.extend(super_index.to_be_bytes());
        out.extend((interface_indices.len() as u16).to_be_bytes());
        for index in &interface_indices {
            out.extend(index.to_be_bytes());
        }

        let emit_members = |out: &mut Vec<u8>, members: &[EmittedMember]| {
            out.extend((members.len() as u16).to_be_bytes());
            for member in members {
                out.extend(member.access.to_be_bytes());
                out.extend(member.name_index.to_be_bytes());
                out.extend(member.descriptor_index.to_be_bytes());
                match &member.constant {
                    Some((attr_name, value_index)) => {
                        out.extend(1u16.to_be_bytes());
                        out.extend(attr_name.to_be_bytes());
                        out.extend(2u32.to_be_bytes());
                        out.extend(value_index.to_be_bytes());
                    }
                    None => out.extend(0u16.to_be_bytes()),
                }
            }
        };
        emit_members(&mut out, &fields);
        emit_members(&mut out, &methods);

        out.extend(0u16.to_be_bytes()); // class attributes
        out
    }
}

/// The bootstrap classes every test VM needs.
pub fn core_classes() -> Vec<(String, Vec<u8>)> {
    let object = ClassBuilder::new("java/lang/Object")
        .no_super()
        .access(ACC_PUBLIC)
        .method(ACC_PUBLIC, "<init>", "()V")
        .method(ACC_PUBLIC, "equals", "(Ljava/lang/Object;)Z")
        .method(ACC_PUBLIC, "hashCode", "()I")
        .method(ACC_PUBLIC, "toString", "()Ljava/lang/String;")
        .method(ACC_PUBLIC, "getClass", "()Ljava/lang/Class;")
        .build();
    let cloneable = ClassBuilder::new("java/lang/Cloneable").interface().build();
    let serializable = ClassBuilder::new("java/io/Serializable").interface().build();
    let class = ClassBuilder::new("java/lang/Class")
        .implements("java/io/Serializable")
        .build();
    let string = ClassBuilder::new("java/lang/String")
        .implements("java/io/Serializable")
        .build();
    let reference = ClassBuilder::new("java/lang/ref/Reference")
        .field(ACC_PUBLIC, "referent", "Ljava/lang/Object;")
        .field(ACC_PUBLIC, "queue", "Ljava/lang/Object;")
        .method(ACC_PUBLIC, "enqueue", "()Z")
        .build();
    let soft = ClassBuilder::new("java/lang/ref/SoftReference")
        .super_class("java/lang/ref/Reference")
        .build();
    let weak = ClassBuilder::new("java/lang/ref/WeakReference")
        .super_class("java/lang/ref/Reference")
        .build();
    let phantom = ClassBuilder::new("java/lang/ref/PhantomReference")
        .super_class("java/lang/ref/Reference")
        .build();
    vec![
        ("java/lang/Object".into(), object),
        ("java/lang/Cloneable".into(), cloneable),
        ("java/io/Serializable".into(), serializable),
        ("java/lang/Class".into(), class),
        ("java/lang/String".into(), string),
        ("java/lang/ref/Reference".into(), reference),
        ("java/lang/ref/SoftReference".into(), soft),
        ("java/lang/ref/WeakReference".into(), weak),
        ("java/lang/ref/PhantomReference".into(), phantom),
    ]
}

// A plan with scripted liveness: everything is live unless marked dead;
// retain resurrects. Non-moving, never frees.

pub struct TestPlan {
    dead: Mutex<HashSet<usize>>,
    retain_softs: bool,
}

impl TestPlan {
    pub fn new() -> TestPlan {
        TestPlan {
            dead: Mutex::new(HashSet::new()),
            retain_softs: false,
        }
    }

    pub fn retaining_softs() -> TestPlan {
        TestPlan {
            dead: Mutex::new(HashSet::new()),
            retain_softs: true,
        }
    }

    pub fn mark_dead(&self, obj: ObjRef) {
        self.dead.lock().insert(obj.addr());
    }

    pub fn was_retained(&self, obj: ObjRef) -> bool {
        !self.dead.lock().contains(&obj.addr())
    }
}

impl GcPlan for TestPlan {
    fn allocate(&self, size: usize, vt: VtPtr, align: usize) -> Option<ObjRef> {
        let layout = std::alloc::Layout::from_size_align(
            size.max(std::mem::size_of::<JavaObject>()),
            align.max(std::mem::align_of::<JavaObject>()),
        )
        .ok()?;
        let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut JavaObject;
        if raw.is_null() {
            return None;
        }
        unsafe {
            JavaObject::install_vtable(raw, vt.get());
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

    fn is_live(&self, obj: ObjRef) -> bool {
        !self.dead.lock().contains(&obj.addr())
    }

    fn get_forwarded(&self, obj: ObjRef) -> ObjRef {
        obj
    }

    fn retain_referent(&self, obj: ObjRef) {
        self.dead.lock().remove(&obj.addr());
    }

    fn should_retain_softs(&self) -> bool {
        self.retain_softs
    }
}

// An engine that records its upcalls.

#[derive(Default)]
pub struct TestEngine {
    pub clinit_counts: Mutex<HashMap<String, u32>>,
    pub failing_clinits: Mutex<HashSet<String>>,
    pub clinit_delay: Option<Duration>,
    pub finalize_count: AtomicU32,
    pub enqueue_count: AtomicU32,
}

impl TestEngine {
    pub fn new() -> TestEngine {
        TestEngine::default()
    }

    pub fn with_clinit_delay(delay: Duration) -> TestEngine {
        TestEngine {
            clinit_delay: Some(delay),
            ..TestEngine::default()
        }
    }

    pub fn fail_clinit_of(&self, class_name: &str) {
        self.failing_clinits.lock().insert(class_name.to_string());
    }

    pub fn clinit_count(&self, class_name: &str) -> u32 {
        self.clinit_counts
            .lock()
            .get(class_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn finalized(&self) -> u32 {
        self.finalize_count.load(Ordering::Acquire)
    }

    pub fn enqueued(&self) -> u32 {
        self.enqueue_count.load(Ordering::Acquire)
    }
}

impl ExecutionEngine for TestEngine {
    fn run_clinit(&self, _vm: &Jvm, class: &ClassRef) -> Result<(), JavaError> {
        if let Some(delay) = self.clinit_delay {
            std::thread::sleep(delay);
        }
        let name = class.name.to_string();
        *self.clinit_counts.lock().entry(name.clone()).or_insert(0) += 1;
        if self.failing_clinits.lock().contains(&name) {
            return Err(JavaError::new(
                JavaKind::RuntimeException,
                format!("boom in {name}"),
            ));
        }
        Ok(())
    }

    fn invoke_finalize(&self, _vm: &Jvm, _obj: ObjRef) -> Result<(), JavaError> {
        self.finalize_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn invoke_enqueue(&self, _vm: &Jvm, _reference: ObjRef) -> Result<(), JavaError> {
        self.enqueue_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Boots a VM over the synthetic bootstrap classes plus any extra classes
/// a test defines.
pub fn boot_vm(
    plan: Arc<dyn GcPlan>,
    engine: Arc<dyn ExecutionEngine>,
    extra_classes: Vec<(String, Vec<u8>)>,
) -> Arc<Jvm> {
    let source = MapSource::new();
    for (name, bytes) in core_classes().into_iter().chain(extra_classes) {
        source.put(&name, bytes);
    }
    Jvm::boot(
        Box::new(SharedPlan(plan)),
        Box::new(SharedEngine(engine)),
        vec![Box::new(source)],
    )
    .expect("test VM failed to boot")
}

/// Adapters so tests can keep a handle on the plan and engine they hand
/// to the VM.
struct SharedPlan(Arc<dyn GcPlan>);

impl GcPlan for SharedPlan {
    fn allocate(&self, size: usize, vt: VtPtr, align: usize) -> Option<ObjRef> {
        self.0.allocate(size, vt, align)
    }
    fn object_reference_write_barrier(
        &self,
        container: ObjRef,
        slot: *mut usize,
        value: Option<ObjRef>,
    ) {
        self.0.object_reference_write_barrier(container, slot, value)
    }
    fn object_reference_non_heap_write_barrier(&self, slot: *mut usize, value: Option<ObjRef>) {
        self.0.object_reference_non_heap_write_barrier(slot, value)
    }
    fn is_live(&self, obj: ObjRef) -> bool {
        self.0.is_live(obj)
    }
    fn get_forwarded(&self, obj: ObjRef) -> ObjRef {
        self.0.get_forwarded(obj)
    }
    fn retain_referent(&self, obj: ObjRef) {
        self.0.retain_referent(obj)
    }
    fn should_retain_softs(&self) -> bool {
        self.0.should_retain_softs()
    }
}

struct SharedEngine(Arc<dyn ExecutionEngine>);

impl ExecutionEngine for SharedEngine {
    fn run_clinit(&self, vm: &Jvm, class: &ClassRef) -> Result<(), JavaError> {
        self.0.run_clinit(vm, class)
    }
    fn invoke_finalize(&self, vm: &Jvm, obj: ObjRef) -> Result<(), JavaError> {
        self.0.invoke_finalize(vm, obj)
    }
    fn invoke_enqueue(&self, vm: &Jvm, reference: ObjRef) -> Result<(), JavaError> {
        self.0.invoke_enqueue(vm, reference)
    }
}

/// Loads, resolves and returns a class from the bootstrap loader.
pub fn load_resolved(vm: &Arc<Jvm>, name: &str) -> ClassRef {
    let interned = vm.bootstrap_loader().names().from_str(name);
    let class = vm
        .bootstrap_loader()
        .load_class(&interned)
        .unwrap_or_else(|err| panic!("loading {name}: {err}"));
    jrt_rs::loader::resolve_class(vm.bootstrap_loader(), &class)
        .unwrap_or_else(|err| panic!("resolving {name}: {err}"));
    class
}

/// Spin-waits for a worker-side counter to reach a value.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
