//! The execution-engine collaborator.
//!
//! The core never interprets bytecode. Class initializers, finalizers and
//! reference enqueueing run through this trait; a JIT additionally
//! registers frame records at safe points through `JavaThread` and
//! installs entry points on methods and trampolines on signatures.

use crate::class::{ClassRef, MethodPtr};
use crate::errors::JavaError;
use crate::object::ObjRef;
use crate::vm::Jvm;

pub trait ExecutionEngine: Send + Sync {
    /// Runs `<clinit>` of a class that is in the inClinit state.
    fn run_clinit(&self, vm: &Jvm, class: &ClassRef) -> Result<(), JavaError>;

    /// Invokes `Object.finalize` on a resurrected object.
    fn invoke_finalize(&self, vm: &Jvm, obj: ObjRef) -> Result<(), JavaError>;

    /// Invokes `Reference.enqueue` on a cleared reference object.
    fn invoke_enqueue(&self, vm: &Jvm, reference: ObjRef) -> Result<(), JavaError>;

    /// Produces (or returns) the entry point of a method. Zero means the
    /// engine declined.
    fn materialize(&self, _vm: &Jvm, _method: MethodPtr) -> usize {
        0
    }
}

/// An engine that runs nothing: classes have empty initializer semantics,
/// finalize and enqueue are no-ops. Useful for embedding the core without
/// an interpreter.
pub struct NullEngine;

impl ExecutionEngine for NullEngine {
    fn run_clinit(&self, _vm: &Jvm, _class: &ClassRef) -> Result<(), JavaError> {
        Ok(())
    }

    fn invoke_finalize(&self, _vm: &Jvm, _obj: ObjRef) -> Result<(), JavaError> {
        Ok(())
    }

    fn invoke_enqueue(&self, _vm: &Jvm, _reference: ObjRef) -> Result<(), JavaError> {
        Ok(())
    }
}
