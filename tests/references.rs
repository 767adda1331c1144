//! Reference lifecycle and finalization.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{boot_vm, load_resolved, wait_until, ClassBuilder, TestEngine, TestPlan, ACC_PUBLIC};
use jrt_rs::object::ObjRef;
use jrt_rs::vm::Jvm;

fn reference_vm(plan: Arc<TestPlan>, engine: Arc<TestEngine>) -> Arc<Jvm> {
    let fin = ClassBuilder::new("Fin")
        .method(ACC_PUBLIC, "finalize", "()V")
        .build();
    boot_vm(plan, engine, vec![("Fin".into(), fin)])
}

fn new_weak_ref(vm: &Arc<Jvm>, referent: ObjRef) -> ObjRef {
    let weak_class = load_resolved(vm, "java/lang/ref/WeakReference");
    let reference = vm.allocate(&weak_class).unwrap();
    vm.set_referent(reference, Some(referent));
    reference
}

/// Property 6: after the referent dies, one collection clears the
/// reference and surfaces it on the queue exactly once.
#[test]
fn weak_reference_clears_and_enqueues_once() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let object_class = load_resolved(&vm, "java/lang/Object");
    let target = vm.allocate(&object_class).unwrap();
    let weak = new_weak_ref(&vm, target);
    assert_eq!(vm.get_referent(weak), Some(target));
    assert_eq!(vm.references().weak.len(), 1);

    // The mutator drops its last strong reference.
    plan.mark_dead(target);
    vm.collect();

    assert_eq!(vm.get_referent(weak), None);
    assert!(
        wait_until(Duration::from_secs(2), || engine.enqueued() == 1),
        "reference was not enqueued"
    );
    assert_eq!(vm.references().weak.len(), 0, "cleared reference left queued");

    // A second collection must not enqueue again.
    vm.collect();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(engine.enqueued(), 1);
    vm.shutdown();
}

#[test]
fn live_referents_keep_their_references_queued() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let object_class = load_resolved(&vm, "java/lang/Object");
    let target = vm.allocate(&object_class).unwrap();
    let weak = new_weak_ref(&vm, target);

    vm.collect();
    assert_eq!(vm.get_referent(weak), Some(target));
    assert_eq!(vm.references().weak.len(), 1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.enqueued(), 0);
    vm.shutdown();
}

#[test]
fn dead_references_drop_out_silently() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let object_class = load_resolved(&vm, "java/lang/Object");
    let target = vm.allocate(&object_class).unwrap();
    let weak = new_weak_ref(&vm, target);

    // The reference object itself dies.
    plan.mark_dead(weak);
    vm.collect();
    assert_eq!(vm.references().weak.len(), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.enqueued(), 0, "a dead reference must not be enqueued");
    vm.shutdown();
}

#[test]
fn soft_references_follow_the_plan_policy() {
    // Policy off: soft referents die like weak ones.
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());
    let object_class = load_resolved(&vm, "java/lang/Object");
    let soft_class = load_resolved(&vm, "java/lang/ref/SoftReference");

    let target = vm.allocate(&object_class).unwrap();
    let soft = vm.allocate(&soft_class).unwrap();
    vm.set_referent(soft, Some(target));
    assert_eq!(vm.references().soft.len(), 1);
    plan.mark_dead(target);
    vm.collect();
    assert_eq!(vm.get_referent(soft), None);
    vm.shutdown();

    // Policy on: the plan retains the referent and the reference stays.
    let plan = Arc::new(TestPlan::retaining_softs());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());
    let object_class = load_resolved(&vm, "java/lang/Object");
    let soft_class = load_resolved(&vm, "java/lang/ref/SoftReference");

    let target = vm.allocate(&object_class).unwrap();
    let soft = vm.allocate(&soft_class).unwrap();
    vm.set_referent(soft, Some(target));
    plan.mark_dead(target);
    vm.collect();
    assert!(plan.was_retained(target));
    assert_eq!(vm.get_referent(soft), Some(target));
    assert_eq!(vm.references().soft.len(), 1);
    vm.shutdown();
}

#[test]
fn phantom_referents_are_never_retained() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());
    let object_class = load_resolved(&vm, "java/lang/Object");
    let phantom_class = load_resolved(&vm, "java/lang/ref/PhantomReference");

    let target = vm.allocate(&object_class).unwrap();
    let phantom = vm.allocate(&phantom_class).unwrap();
    vm.set_referent(phantom, Some(target));
    assert_eq!(vm.references().phantom.len(), 1);

    plan.mark_dead(target);
    vm.collect();
    assert_eq!(vm.get_referent(phantom), None);
    assert!(
        wait_until(Duration::from_secs(2), || engine.enqueued() == 1),
        "phantom reference was not enqueued"
    );
    vm.shutdown();
}

/// Property 7 and the finalizer scenario: finalize runs exactly once per
/// object, on the finalizer worker, after the object dies.
#[test]
fn finalize_runs_at_most_once() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let fin_class = load_resolved(&vm, "Fin");
    let doomed = vm.allocate(&fin_class).unwrap();
    assert_eq!(vm.finalizer().candidate_count(), 1);

    plan.mark_dead(doomed);
    vm.collect();
    assert!(
        wait_until(Duration::from_secs(2), || engine.finalized() == 1),
        "finalize did not run"
    );
    // Resurrected for finalization.
    assert!(plan.was_retained(doomed));
    assert_eq!(vm.finalizer().candidate_count(), 0);

    // The second collection finds no candidate; the counter stays at one.
    plan.mark_dead(doomed);
    vm.collect();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(engine.finalized(), 1);
    vm.shutdown();
}

#[test]
fn live_finalizables_stay_candidates() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let fin_class = load_resolved(&vm, "Fin");
    let kept = vm.allocate(&fin_class).unwrap();
    let _ = kept;
    vm.collect();
    assert_eq!(vm.finalizer().candidate_count(), 1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.finalized(), 0);
    vm.shutdown();
}

#[test]
fn objects_without_finalizers_are_not_candidates() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let object_class = load_resolved(&vm, "java/lang/Object");
    let _plain = vm.allocate(&object_class).unwrap();
    assert_eq!(vm.finalizer().candidate_count(), 0);
    vm.shutdown();
}

static NATIVE_DTOR_RUNS: AtomicU32 = AtomicU32::new(0);

extern "C" fn native_dtor(_obj: ObjRef) {
    NATIVE_DTOR_RUNS.fetch_add(1, Ordering::AcqRel);
}

/// The VT's operator-delete slot takes precedence over a Java finalizer.
#[test]
fn native_destructor_takes_precedence() {
    let plan = Arc::new(TestPlan::new());
    let engine = Arc::new(TestEngine::new());
    let vm = reference_vm(plan.clone(), engine.clone());

    let fin_class = load_resolved(&vm, "Fin");
    fin_class
        .vt()
        .unwrap()
        .operator_delete
        .store(native_dtor as usize, Ordering::Release);

    let doomed = vm.allocate(&fin_class).unwrap();
    plan.mark_dead(doomed);
    vm.collect();
    assert!(
        wait_until(Duration::from_secs(2), || {
            NATIVE_DTOR_RUNS.load(Ordering::Acquire) == 1
        }),
        "native destructor did not run"
    );
    assert_eq!(engine.finalized(), 0);
    vm.shutdown();
}
