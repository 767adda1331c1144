//! Class initialization: single entry, error wrapping, recursion.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{boot_vm, ClassBuilder, TestEngine, TestPlan};
use jrt_rs::class::{ClassRef, STATUS_READY};
use jrt_rs::engine::ExecutionEngine;
use jrt_rs::errors::{JavaError, JavaKind};
use jrt_rs::object::ObjRef;
use jrt_rs::vm::Jvm;

/// Property 5: K racing triggers run `<clinit>` exactly once, and every
/// trigger returns only after the class is ready.
#[test]
fn initialization_is_single_entry() {
    let engine = Arc::new(TestEngine::with_clinit_delay(Duration::from_millis(50)));
    let with = ClassBuilder::new("Racy").clinit().build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        engine.clone(),
        vec![("Racy".into(), with)],
    );

    let name = vm.bootstrap_loader().names().from_str("Racy");
    let class = vm.bootstrap_loader().load_class(&name).unwrap();

    const RACERS: usize = 8;
    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let vm = vm.clone();
        let class = class.clone();
        handles.push(std::thread::spawn(move || {
            vm.attach_current_thread();
            let result = vm.class_initialize(&class);
            let ready = class.as_regular().unwrap().status() == STATUS_READY;
            vm.detach_current_thread();
            (result, ready)
        }));
    }
    for handle in handles {
        let (result, ready) = handle.join().unwrap();
        result.unwrap();
        assert!(ready, "trigger returned before the class was ready");
    }
    assert_eq!(engine.clinit_count("Racy"), 1);
    vm.shutdown();
}

/// The class-init exception scenario: the first trigger gets the wrapped
/// initializer exception, later triggers observe the erroneous state, and
/// the body never re-executes.
#[test]
fn failed_clinit_is_wrapped_then_sticky() {
    let engine = Arc::new(TestEngine::new());
    engine.fail_clinit_of("Bad");
    let bad = ClassBuilder::new("Bad").clinit().build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        engine.clone(),
        vec![("Bad".into(), bad)],
    );

    let name = vm.bootstrap_loader().names().from_str("Bad");
    let class = vm.bootstrap_loader().load_class(&name).unwrap();

    let first = vm.class_initialize(&class).unwrap_err();
    assert_eq!(first.kind, JavaKind::ExceptionInInitializerError);

    let second = vm.class_initialize(&class).unwrap_err();
    assert_eq!(second.kind, JavaKind::NoClassInitializerError);

    assert_eq!(engine.clinit_count("Bad"), 1, "<clinit> must not re-run");
    assert!(class.as_regular().unwrap().is_erroneous());
    vm.shutdown();
}

/// Errors thrown by `<clinit>` pass through unwrapped.
#[test]
fn error_kinds_are_not_wrapped() {
    struct OomEngine;
    impl ExecutionEngine for OomEngine {
        fn run_clinit(&self, _vm: &Jvm, _class: &ClassRef) -> Result<(), JavaError> {
            Err(JavaError::new(JavaKind::OutOfMemoryError, "simulated"))
        }
        fn invoke_finalize(&self, _vm: &Jvm, _obj: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
        fn invoke_enqueue(&self, _vm: &Jvm, _reference: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
    }

    let class_bytes = ClassBuilder::new("Starved").clinit().build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        Arc::new(OomEngine),
        vec![("Starved".into(), class_bytes)],
    );
    let name = vm.bootstrap_loader().names().from_str("Starved");
    let class = vm.bootstrap_loader().load_class(&name).unwrap();
    let err = vm.class_initialize(&class).unwrap_err();
    assert_eq!(err.kind, JavaKind::OutOfMemoryError);
    vm.shutdown();
}

/// Superclass initializers run first; interfaces do not trigger their
/// super.
#[test]
fn super_runs_before_subclass() {
    struct OrderEngine {
        order: parking_lot::Mutex<Vec<String>>,
    }
    impl ExecutionEngine for OrderEngine {
        fn run_clinit(&self, _vm: &Jvm, class: &ClassRef) -> Result<(), JavaError> {
            self.order.lock().push(class.name.to_string());
            Ok(())
        }
        fn invoke_finalize(&self, _vm: &Jvm, _obj: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
        fn invoke_enqueue(&self, _vm: &Jvm, _reference: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
    }

    let engine = Arc::new(OrderEngine {
        order: parking_lot::Mutex::new(Vec::new()),
    });
    let parent = ClassBuilder::new("Parent").clinit().build();
    let child = ClassBuilder::new("Child")
        .super_class("Parent")
        .clinit()
        .build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        engine.clone(),
        vec![("Parent".into(), parent), ("Child".into(), child)],
    );
    let name = vm.bootstrap_loader().names().from_str("Child");
    let class = vm.bootstrap_loader().load_class(&name).unwrap();
    vm.class_initialize(&class).unwrap();
    assert_eq!(*engine.order.lock(), vec!["Parent".to_string(), "Child".to_string()]);
    vm.shutdown();
}

/// A `<clinit>` that touches its own class again returns immediately
/// instead of deadlocking.
#[test]
fn recursive_initialization_returns() {
    struct ReentrantEngine {
        reentries: AtomicU32,
    }
    impl ExecutionEngine for ReentrantEngine {
        fn run_clinit(&self, vm: &Jvm, class: &ClassRef) -> Result<(), JavaError> {
            if self.reentries.fetch_add(1, Ordering::AcqRel) == 0 {
                // The initializer uses its own class: the trigger must
                // come straight back.
                vm.class_initialize(class)?;
            }
            Ok(())
        }
        fn invoke_finalize(&self, _vm: &Jvm, _obj: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
        fn invoke_enqueue(&self, _vm: &Jvm, _reference: ObjRef) -> Result<(), JavaError> {
            Ok(())
        }
    }

    let engine = Arc::new(ReentrantEngine {
        reentries: AtomicU32::new(0),
    });
    let selfish = ClassBuilder::new("Selfish").clinit().build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        engine.clone(),
        vec![("Selfish".into(), selfish)],
    );
    let name = vm.bootstrap_loader().names().from_str("Selfish");
    let class = vm.bootstrap_loader().load_class(&name).unwrap();
    vm.class_initialize(&class).unwrap();
    assert_eq!(engine.reentries.load(Ordering::Acquire), 1);
    assert!(class.as_regular().unwrap().is_ready());
    vm.shutdown();
}

/// Classes without statics or `<clinit>` skip the initialization check
/// entirely once observed.
#[test]
fn trivial_classes_flip_straight_to_ready() {
    let plain = ClassBuilder::new("Plain").build();
    let vm = boot_vm(
        Arc::new(TestPlan::new()),
        Arc::new(TestEngine::new()),
        vec![("Plain".into(), plain)],
    );
    let class = common::load_resolved(&vm, "Plain");
    let rc = class.as_regular().unwrap();
    assert!(!rc.needs_initialisation_check(&class));
    assert!(rc.is_ready());
    vm.shutdown();
}
