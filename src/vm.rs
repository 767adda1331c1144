//! The VM assembly: one `Jvm` owns the bootstrap loader, the fat-lock
//! table, the thread ring, the rendezvous, the reference machinery and the
//! plan/engine collaborators. Global mutable state is initialized at boot
//! and torn down in reverse order: workers first, then loaders, then the
//! class arenas die with them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::class::ClassRef;
use crate::engine::ExecutionEngine;
use crate::errors::{JavaError, JavaKind};
use crate::loader::{self, ClassBytesSource, ClassLoader, DirectorySource};
use crate::lock_table::LockTable;
use crate::names::Name;
use crate::object::{ObjRef, OBJECT_BASE_SIZE};
use crate::plan::{GcPlan, NoStaleHooks, StaleReferenceHooks};
use crate::refqueue::{FinalizerSet, ReferenceHandler};
use crate::rendezvous::CollectionRendezvous;
use crate::thread::{JavaThread, ThreadRing};

pub struct Jvm {
    bootstrap: Arc<ClassLoader>,
    lock_table: LockTable,
    threads: ThreadRing,
    rendezvous: CollectionRendezvous,
    references: ReferenceHandler,
    finalizer: FinalizerSet,
    plan: Box<dyn GcPlan>,
    engine: Box<dyn ExecutionEngine>,
    stale_hooks: Box<dyn StaleReferenceHooks>,
    strings: Mutex<HashMap<Name, ObjRef>>,
    /// Byte offset of the referent field inside reference objects.
    referent_offset: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Jvm {
    /// Boots a VM over the given plan, engine and class sources: attaches
    /// the calling thread, preallocates the bootstrap classes and starts
    /// the two service workers.
    pub fn boot(
        plan: Box<dyn GcPlan>,
        engine: Box<dyn ExecutionEngine>,
        sources: Vec<Box<dyn ClassBytesSource>>,
    ) -> Result<Arc<Jvm>, JavaError> {
        Jvm::boot_with_hooks(plan, engine, Box::new(NoStaleHooks), sources)
    }

    pub fn boot_with_hooks(
        plan: Box<dyn GcPlan>,
        engine: Box<dyn ExecutionEngine>,
        stale_hooks: Box<dyn StaleReferenceHooks>,
        sources: Vec<Box<dyn ClassBytesSource>>,
    ) -> Result<Arc<Jvm>, JavaError> {
        let bootstrap = ClassLoader::new(sources);
        let vm = Arc::new(Jvm {
            bootstrap: bootstrap.clone(),
            lock_table: LockTable::new(),
            threads: ThreadRing::new(),
            rendezvous: CollectionRendezvous::new(),
            references: ReferenceHandler::new(),
            finalizer: FinalizerSet::new(),
            plan,
            engine,
            stale_hooks,
            strings: Mutex::new(HashMap::new()),
            referent_offset: AtomicUsize::new(OBJECT_BASE_SIZE),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        });
        bootstrap.set_vm(&vm);
        vm.threads.attach();
        bootstrap.preallocate_bootstrap()?;
        vm.locate_referent_field();
        vm.spawn_workers();
        Ok(vm)
    }

    /// The classpath the bootstrap loader reads, per the usual environment
    /// variables.
    pub fn sources_from_env() -> Vec<Box<dyn ClassBytesSource>> {
        let mut sources = Vec::new();
        for var in ["BOOTCLASSPATH", "CLASSPATH"] {
            if let Ok(list) = std::env::var(var) {
                sources.extend(DirectorySource::from_path_list(&list));
            }
        }
        if let Ok(home) = std::env::var("JAVA_HOME") {
            sources.push(Box::new(DirectorySource::new(format!("{home}/classes"))));
        }
        sources
    }

    fn locate_referent_field(&self) {
        let names = self.bootstrap.names();
        let reference_name = names.from_str("java/lang/ref/Reference");
        if let Some(class) = self.bootstrap.lookup_class(&reference_name).or_else(|| {
            self.bootstrap.load_class(&reference_name).ok()
        }) {
            if loader::resolve_class(&self.bootstrap, &class).is_ok() {
                let field_name = names.from_str("referent");
                let field_ty = names.from_str("Ljava/lang/Object;");
                if let Some((_, field)) =
                    class.lookup_field_dont_throw(&field_name, &field_ty, false, true)
                {
                    self.referent_offset
                        .store(field.get().offset(), Ordering::Release);
                }
            }
        }
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        let vm = self.clone();
        workers.push(
            std::thread::Builder::new()
                .name("reference-handler".into())
                .spawn(move || {
                    vm.threads.attach();
                    vm.references.enqueue_worker_loop(&vm);
                    vm.threads.detach();
                })
                .expect("spawning reference handler"),
        );
        let vm = self.clone();
        workers.push(
            std::thread::Builder::new()
                .name("finalizer".into())
                .spawn(move || {
                    vm.threads.attach();
                    vm.finalizer.finalizer_worker_loop(&vm);
                    vm.threads.detach();
                })
                .expect("spawning finalizer"),
        );
    }

    // Accessors.

    pub fn bootstrap_loader(&self) -> &Arc<ClassLoader> {
        &self.bootstrap
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    pub fn threads(&self) -> &ThreadRing {
        &self.threads
    }

    pub fn rendezvous(&self) -> &CollectionRendezvous {
        &self.rendezvous
    }

    pub fn references(&self) -> &ReferenceHandler {
        &self.references
    }

    pub fn finalizer(&self) -> &FinalizerSet {
        &self.finalizer
    }

    pub fn plan(&self) -> &dyn GcPlan {
        &*self.plan
    }

    pub fn engine(&self) -> &dyn ExecutionEngine {
        &*self.engine
    }

    pub fn attach_current_thread(&self) -> Arc<JavaThread> {
        self.threads.attach()
    }

    pub fn detach_current_thread(&self) {
        self.threads.detach()
    }

    /// Mutator-side safe point, honored between bytecodes, on loop
    /// back-edges and at allocation slow paths.
    pub fn safe_point_check(&self) {
        if let Some(thread) = JavaThread::try_current() {
            self.rendezvous.safe_point_check(&thread);
        }
    }

    // Reference-object plumbing.

    pub fn referent_offset(&self) -> usize {
        self.referent_offset.load(Ordering::Acquire)
    }

    pub fn get_referent(&self, reference: ObjRef) -> Option<ObjRef> {
        unsafe { reference.read_ref(self.referent_offset()) }
    }

    pub fn set_referent(&self, reference: ObjRef, referent: Option<ObjRef>) {
        let slot = unsafe { reference.ref_slot(self.referent_offset()) };
        self.plan
            .object_reference_write_barrier(reference, slot, referent);
    }

    // String interning.

    /// Returns the canonical java.lang.String instance for the given
    /// characters, allocating it on first use.
    pub fn intern_string(&self, value: &Name) -> Result<ObjRef, JavaError> {
        if let Some(existing) = self.strings.lock().get(value) {
            return Ok(*existing);
        }
        let names = self.bootstrap.names();
        let string_class = self
            .bootstrap
            .load_class(&names.from_str("java/lang/String"))?;
        loader::resolve_class(&self.bootstrap, &string_class)?;
        let instance = self.allocate_instance_raw(&string_class)?;
        let mut strings = self.strings.lock();
        Ok(*strings.entry(value.clone()).or_insert(instance))
    }

    pub fn interned_string_count(&self) -> usize {
        self.strings.lock().len()
    }

    /// Allocation without the initialization check, for VM-internal
    /// instances (mirrors, interned strings).
    pub(crate) fn allocate_instance_raw(&self, class: &ClassRef) -> Result<ObjRef, JavaError> {
        let vt = class
            .vt()
            .ok_or_else(|| JavaError::new(JavaKind::InternalError, "allocating without a VT"))?;
        let size = class.instance_size().max(OBJECT_BASE_SIZE);
        self.plan
            .allocate(size, vt.as_ptr(), std::mem::size_of::<usize>())
            .ok_or_else(|| JavaError::new(JavaKind::OutOfMemoryError, "Java heap space"))
    }

    /// Returns (allocating on demand) the java.lang.Class mirror of a
    /// class. Requires java/lang/Class to be loadable.
    pub fn class_delegatee(&self, class: &ClassRef) -> Result<ObjRef, JavaError> {
        if let Some(existing) = class.delegatee() {
            return Ok(existing);
        }
        let names = self.bootstrap.names();
        let class_class = self
            .bootstrap
            .load_class(&names.from_str("java/lang/Class"))?;
        loader::resolve_class(&self.bootstrap, &class_class)?;
        let mirror = self.allocate_instance_raw(&class_class)?;
        Ok(class.set_delegatee(self.plan(), mirror))
    }

    // Collection driving: the plan-facing hooks of the core.

    /// Stops the world. Exposed to the installed plan.
    pub fn begin_collection(&self) {
        self.rendezvous.begin(&self.threads);
        self.stale_hooks.before_collection(self);
    }

    /// Resumes the world and kicks the service workers.
    pub fn end_collection(&self) {
        self.stale_hooks.after_collection(self);
        self.rendezvous.finish(&self.threads);
        self.references.notify_worker();
        self.finalizer.notify_worker();
    }

    /// Reference phases, in queue order, then finalization candidates.
    /// The plan calls this after computing the transitive closure.
    pub fn process_references(&self) {
        self.references.scan_soft_queue(self, &*self.plan);
        self.references.scan_weak_queue(self, &*self.plan);
        self.references.scan_phantom_queue(self, &*self.plan);
        self.finalizer.scan_finalization_queue(&*self.plan);
    }

    /// A full stop-the-world cycle for plans without their own driver.
    pub fn collect(&self) {
        self.begin_collection();
        self.process_references();
        self.end_collection();
    }

    /// Reports every root slot of one thread to the plan.
    pub fn scan_stack(&self, thread: &JavaThread, visitor: &mut dyn FnMut(*mut usize)) {
        thread.scan_roots(visitor);
    }

    /// Reports the VM-internal roots: thread roots, class delegatees,
    /// static areas and interned strings.
    pub fn scan_roots(&self, visitor: &mut dyn FnMut(*mut usize)) {
        self.threads.for_each(|t| t.scan_roots(visitor));
        self.bootstrap.each_class(|class| {
            if class.delegatee().is_some() {
                visitor(class.delegatee_slot());
            }
            if let Some(rc) = class.as_regular() {
                if let Some(area) = rc.static_area() {
                    area.scan_roots(visitor);
                }
            }
        });
        let mut strings = self.strings.lock();
        for value in strings.values_mut() {
            visitor(value as *mut ObjRef as *mut usize);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the service workers and waits for them. Loaders and their
    /// class arenas go away when the `Jvm` is dropped.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.references.request_shutdown();
        self.finalizer.request_shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for Jvm {
    fn drop(&mut self) {
        self.shutdown();
    }
}
