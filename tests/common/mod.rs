//! Test utilities for recursive wrapping integration tests
//!
//! - Counting transformations that record which functions they were given
//! - Helpers for defining bytecode functions inside a scope
//! - A shorthand for decorating a value through the entry point

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use recwrap::backend::recursive::transformation_name;
use recwrap::{
    CallArgs, CallShape, ChunkBuilder, Function, Instruction, Kwargs, NativeFn, RecursiveWrap,
    Scope, Signature, Value, Vm, VmResult,
};

/// A transformation that counts its applications and returns its argument
#[derive(Clone)]
pub struct Counter {
    value: Value,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Counter {
    pub fn new(name: &str) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let value = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            NativeFn::new(name, move |_vm, args: CallArgs| {
                let target = args.positional.into_iter().next().unwrap_or(Value::Nil);
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().push(transformation_name(&target));
                Ok(target)
            })
            .into_value()
        };
        Self { value, calls, seen }
    }

    pub fn value(&self) -> Value {
        self.value.clone()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of the values passed in, in order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

/// Build a function body in `scope`
pub fn function(
    scope: &Arc<Scope>,
    name: &str,
    signature: Signature,
    build: impl FnOnce(&mut ChunkBuilder),
) -> Function {
    let mut builder = ChunkBuilder::new(name);
    builder.set_signature(signature);
    build(&mut builder);
    Function::new(name, builder.build_arc(), Arc::clone(scope))
}

/// Bind `function` as a global of its own scope
pub fn define(function: Function) -> Value {
    let name = function.name().to_string();
    let scope = Arc::clone(function.scope());
    let value = function.into_value();
    scope.bind(name, value.clone());
    value
}

/// Emit `return <global>()`
pub fn emit_tail_call(builder: &mut ChunkBuilder, callee: &str) {
    builder.emit_load_global(callee);
    builder.emit_call(CallShape::positional(0));
    builder.emit(Instruction::Return);
}

/// Emit `return <n>`
pub fn emit_return_long(builder: &mut ChunkBuilder, n: i8) {
    builder.emit(Instruction::PushLongSmall(n));
    builder.emit(Instruction::Return);
}

/// `apply_recursive(w)(target)`
pub fn decorate(wrap: &RecursiveWrap, vm: &mut Vm, w: &Value, target: &Value) -> VmResult<Value> {
    decorate_with(wrap, vm, w, Vec::new(), Kwargs::new(), target)
}

/// `apply_recursive(w, *extras, **kw)(target)`, going through the entry point
pub fn decorate_with(
    wrap: &RecursiveWrap,
    vm: &mut Vm,
    w: &Value,
    extras: Vec<Value>,
    kw: Kwargs,
    target: &Value,
) -> VmResult<Value> {
    let mut positional = vec![w.clone()];
    positional.extend(extras);
    let decorator = vm.call_value(&wrap.entry_point(), CallArgs::new(positional, kw))?;
    vm.call_value(&decorator, CallArgs::one(target.clone()))
}

/// Call with no arguments
pub fn call0(vm: &mut Vm, callee: &Value) -> VmResult<Value> {
    vm.call_value(callee, CallArgs::default())
}
