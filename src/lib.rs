//! Recwrap - recursive call-site instrumentation
//!
//! This library applies a transformation to a function and, lazily, to every
//! function that function goes on to call. It runs on a small stack-based
//! bytecode runtime whose function bodies can be decoded, rewritten and
//! re-encoded.
//!
//! # Architecture
//!
//! 1. **Runtime** (`backend::models`, `backend::bytecode`)
//!    - Values, functions with captures, scopes holding globals
//!    - Chunk format with a typed instruction IR
//!    - Stack VM with one canonical call shape for every call opcode
//!
//! 2. **Recursive wrapping** (`backend::recursive`)
//!    - `apply_recursive(w, *extras, **kw)` returns a decorator
//!    - The decorator rewrites each call site so the callee is decorated
//!      before it runs
//!    - A registry of wrap histories keeps decoration idempotent
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use recwrap::{CallArgs, CallShape, ChunkBuilder, Function, Instruction, NativeFn};
//! use recwrap::{RecursiveWrap, Scope, Value, Vm};
//!
//! let scope = Scope::new("demo");
//!
//! let mut g = ChunkBuilder::new("g");
//! g.emit(Instruction::PushLongSmall(42));
//! g.emit(Instruction::Return);
//! scope.bind("g", Function::new("g", g.build_arc(), Arc::clone(&scope)).into_value());
//!
//! let mut f = ChunkBuilder::new("f");
//! f.emit_load_global("g");
//! f.emit_call(CallShape::positional(0));
//! f.emit(Instruction::Return);
//! let f = Function::new("f", f.build_arc(), Arc::clone(&scope)).into_value();
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let w = NativeFn::new("w", move |_vm, args: CallArgs| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(args.positional[0].clone())
//! })
//! .into_value();
//!
//! let wrap = RecursiveWrap::new();
//! let mut vm = Vm::new();
//! let decorator = wrap.apply_recursive(w, Vec::new(), Default::default());
//! let f = vm.call_value(&decorator, CallArgs::one(f))?;
//!
//! assert_eq!(vm.call_value(&f, CallArgs::default())?, Value::Long(42));
//! // once for f, once for g when its call site ran
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! # Ok::<(), recwrap::VmError>(())
//! ```

pub mod backend;

pub use backend::bytecode::{
    CallShape, Chunk, ChunkBuilder, ConfigError, Instruction, Opcode, RewriteError, Vm, VmConfig,
    VmError, VmResult,
};
pub use backend::models::{
    BoundMethod, CallArgs, Capture, Function, FunctionId, Kwargs, NativeFn, Scope, Signature,
    Value, ValueType,
};
pub use backend::recursive::{
    rewrite_call_sites, RecursiveWrap, RewriteStats, WrapAdapter, WrapHistory, WrapRegistry,
    ENTRY_POINT_NAME,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_entry_point_is_callable() {
        let wrap = RecursiveWrap::new();
        let entry = wrap.entry_point();
        assert!(entry.is_callable());
        assert_eq!(transformation(&entry), ENTRY_POINT_NAME);
    }

    #[test]
    fn test_decorator_is_named_after_transformation() {
        let wrap = RecursiveWrap::new();
        let w = NativeFn::new("audit", |_vm, args: CallArgs| Ok(args.positional[0].clone())).into_value();
        let decorator = wrap.apply_recursive(w, Vec::new(), Kwargs::new());
        assert_eq!(transformation(&decorator), "audit");
    }

    #[test]
    fn test_decorate_plain_function() {
        let scope = Scope::new("lib");
        let mut body = ChunkBuilder::new("answer");
        body.emit(Instruction::PushLongSmall(7));
        body.emit(Instruction::Return);
        let answer = Function::new("answer", body.build_arc(), Arc::clone(&scope)).into_value();

        let wrap = RecursiveWrap::new();
        let w = NativeFn::new("w", |_vm, args: CallArgs| Ok(args.positional[0].clone())).into_value();
        let mut vm = Vm::new();
        let decorated = vm
            .call_value(&wrap.apply_recursive(w, Vec::new(), Kwargs::new()), CallArgs::one(answer))
            .unwrap();

        assert_eq!(vm.call_value(&decorated, CallArgs::default()), Ok(Value::Long(7)));
        assert_eq!(wrap.wrap_history(&decorated).as_slice(), &["w".to_string()]);
    }

    fn transformation(value: &Value) -> String {
        backend::recursive::transformation_name(value)
    }
}
