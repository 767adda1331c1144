//! The call-in surface compiled code uses: allocation, type checks,
//! interface dispatch, pending exceptions.

mod common;

use std::sync::Arc;

use common::{boot_vm, load_resolved, ClassBuilder, TestEngine, TestPlan, ACC_PUBLIC};
use jrt_rs::errors::JavaKind;
use jrt_rs::runtime::InlineCache;
use jrt_rs::vm::Jvm;

fn dispatch_vm() -> Arc<Jvm> {
    let greeter = ClassBuilder::new("Greeter")
        .interface()
        .method(ACC_PUBLIC | 0x0400, "greet", "()V")
        .build();
    let friendly = ClassBuilder::new("Friendly")
        .implements("Greeter")
        .method(ACC_PUBLIC, "greet", "()V")
        .build();
    let hostile = ClassBuilder::new("Hostile")
        .implements("Greeter")
        .method(ACC_PUBLIC, "greet", "()V")
        .build();
    boot_vm(
        Arc::new(TestPlan::new()),
        Arc::new(TestEngine::new()),
        vec![
            ("Greeter".into(), greeter),
            ("Friendly".into(), friendly),
            ("Hostile".into(), hostile),
        ],
    )
}

#[test]
fn instance_of_and_checkcast() {
    let vm = dispatch_vm();
    let friendly = load_resolved(&vm, "Friendly");
    let greeter = load_resolved(&vm, "Greeter");
    let hostile = load_resolved(&vm, "Hostile");

    let obj = vm.allocate(&friendly).unwrap();
    assert!(vm.instance_of(Some(obj), &friendly));
    assert!(vm.instance_of(Some(obj), &greeter));
    assert!(!vm.instance_of(Some(obj), &hostile));
    assert!(!vm.instance_of(None, &friendly));

    vm.check_cast(Some(obj), &greeter).unwrap();
    // null passes every checkcast.
    vm.check_cast(None, &hostile).unwrap();
    let err = vm.check_cast(Some(obj), &hostile).unwrap_err();
    assert_eq!(err.kind, JavaKind::ClassCastException);

    let thread = vm.attach_current_thread();
    assert!(thread.has_pending());
    thread.clear_pending();
    vm.shutdown();
}

#[test]
fn array_store_checks_are_covariant() {
    let vm = dispatch_vm();
    let friendly = load_resolved(&vm, "Friendly");
    let hostile = load_resolved(&vm, "Hostile");
    let greeter_array = load_resolved(&vm, "[LGreeter;");

    let array = vm.allocate_array(&greeter_array, 4).unwrap();
    assert_eq!(array.array_length(), 4);

    let good = vm.allocate(&friendly).unwrap();
    vm.array_store_check(array, Some(good)).unwrap();
    let also_good = vm.allocate(&hostile).unwrap();
    vm.array_store_check(array, Some(also_good)).unwrap();
    vm.array_store_check(array, None).unwrap();

    let object = load_resolved(&vm, "java/lang/Object");
    let stranger = vm.allocate(&object).unwrap();
    let err = vm.array_store_check(array, Some(stranger)).unwrap_err();
    assert_eq!(err.kind, JavaKind::ArrayStoreException);
    vm.shutdown();
}

#[test]
fn array_allocation_bounds() {
    let vm = dispatch_vm();
    let int_array = load_resolved(&vm, "[I");
    let err = vm.allocate_array(&int_array, -1).unwrap_err();
    assert_eq!(err.kind, JavaKind::NegativeArraySizeException);

    let array = vm.allocate_array(&int_array, 3).unwrap();
    let err = vm.array_index_check(array, 3).unwrap_err();
    assert_eq!(err.kind, JavaKind::ArrayIndexOutOfBoundsException);
    assert_eq!(vm.array_index_check(array, 2).unwrap(), 2);
    vm.shutdown();
}

#[test]
fn invoke_interface_uses_imt_and_inline_cache() {
    let vm = dispatch_vm();
    let friendly = load_resolved(&vm, "Friendly");
    let hostile = load_resolved(&vm, "Hostile");
    let names = vm.bootstrap_loader().names();
    let greet = names.from_str("greet");
    let desc = names.from_str("()V");

    let cache = InlineCache::new();
    let friend = vm.allocate(&friendly).unwrap();
    let method = vm
        .invoke_interface(Some(friend), &greet, &desc, &cache)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&method.get().class(), &friendly));

    // Cache hit resolves to the same target.
    let again = vm
        .invoke_interface(Some(friend), &greet, &desc, &cache)
        .unwrap();
    assert_eq!(method, again);

    // A different receiver class repopulates the cache.
    let foe = vm.allocate(&hostile).unwrap();
    let other = vm
        .invoke_interface(Some(foe), &greet, &desc, &cache)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&other.get().class(), &hostile));
    assert_ne!(method, other);

    let err = vm
        .invoke_interface(None, &greet, &desc, &cache)
        .unwrap_err();
    assert_eq!(err.kind, JavaKind::NullPointerException);
    vm.shutdown();
}

#[test]
fn pending_exceptions_ride_the_thread() {
    let vm = dispatch_vm();
    let thread = vm.attach_current_thread();
    assert!(!thread.has_pending());

    let err = vm.null_pointer_exception();
    assert_eq!(err.kind, JavaKind::NullPointerException);
    assert!(thread.has_pending());
    let pending = thread.take_pending().unwrap();
    assert_eq!(pending.error.kind, JavaKind::NullPointerException);
    assert!(!thread.has_pending());
    vm.shutdown();
}

#[test]
fn jni_local_frames_manage_references() {
    let vm = dispatch_vm();
    let thread = vm.attach_current_thread();
    let object = load_resolved(&vm, "java/lang/Object");
    let obj = vm.allocate(&object).unwrap();

    jrt_rs::jni::push_local_frame(&thread);
    let local = jrt_rs::jni::new_local_ref(&thread, Some(obj));
    assert_eq!(unsafe { jrt_rs::jni::local_ref_value(local) }, Some(obj));
    unsafe { jrt_rs::jni::delete_local_ref(&thread, local) };
    assert_eq!(unsafe { jrt_rs::jni::local_ref_value(local) }, None);
    jrt_rs::jni::pop_local_frame(&thread);
    vm.shutdown();
}
