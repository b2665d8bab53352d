//! Recursive wrapping
//!
//! `apply_recursive(w, *extras, **kw)` returns a decorator. Decorating a
//! function `f` rewrites every call site in `f`'s body so the callee is first
//! passed through the same decorator, then applies the resolved wrapper to
//! the rewritten function. Callees are rewritten lazily, when a call site
//! actually runs, so wrapping follows the executed call graph.
//!
//! # Components
//!
//! - [`adapter`]: transformation plus extras, resolved to a one-argument wrapper
//! - [`history`]: which transformations each function already carries
//! - [`rewriter`]: the call-site instrumentation pass
//!
//! # Concurrency
//!
//! Decoration is synchronous. The wrap registry is internally locked, but
//! decorating functions that share a scope from several threads at once is
//! only safe if the caller serializes those decorations.

pub mod adapter;
pub mod history;
pub mod rewriter;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::debug;

pub use adapter::{transformation_name, WrapAdapter};
pub use history::{WrapHistory, WrapRegistry};
pub use rewriter::{rewrite_call_sites, CallSiteRewriter, RewriteStats};

use crate::backend::bytecode::chunk::Chunk;
use crate::backend::bytecode::error::RewriteError;
use crate::backend::bytecode::vm::{Vm, VmError, VmResult};
use crate::backend::models::{CallArgs, Capture, Function, Kwargs, NativeFn, Value};

/// Name of the entry point, in its native form and in capture tables
pub const ENTRY_POINT_NAME: &str = "apply_recursive";

/// Recursive wrapping with its own history registry
///
/// Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct RecursiveWrap {
    registry: Arc<WrapRegistry>,
}

impl RecursiveWrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing registry
    pub fn with_registry(registry: Arc<WrapRegistry>) -> Self {
        Self { registry }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<WrapRegistry> {
        &self.registry
    }

    /// The entry point as a callable value
    ///
    /// Called as `apply_recursive(w, *extras, **kw)` it returns the decorator
    /// for `w`.
    pub fn entry_point(&self) -> Value {
        let this = self.clone();
        NativeFn::new(ENTRY_POINT_NAME, move |_vm, args: CallArgs| {
            let mut positional = args.positional.into_iter();
            let transformation = positional.next().ok_or_else(|| {
                VmError::argument(ENTRY_POINT_NAME, "missing required argument 'transformation'")
            })?;
            Ok(this.apply_recursive(transformation, positional.collect(), args.keyword))
        })
        .into_value()
    }

    /// The decorator applying `transformation` recursively
    ///
    /// The decorator takes exactly one argument and carries the
    /// transformation's name.
    pub fn apply_recursive(&self, transformation: Value, extras: Vec<Value>, kw_extras: Kwargs) -> Value {
        let this = self.clone();
        let name = transformation_name(&transformation);
        let decorator_name = name.clone();
        NativeFn::new(name, move |vm, args: CallArgs| {
            let target = single_argument(&decorator_name, args)?;
            let adapter = WrapAdapter::new(transformation.clone(), extras.clone(), kw_extras.clone());
            this.decorate(vm, &target, adapter)
        })
        .into_value()
    }

    /// Decorate `target` with the adapter's transformation
    ///
    /// Targets that are not bytecode functions, or that already carry this
    /// transformation, come back unchanged and the transformation is not
    /// called.
    pub fn decorate(&self, vm: &mut Vm, target: &Value, adapter: WrapAdapter) -> VmResult<Value> {
        let identifier = adapter.identifier();
        if !self.registry.is_eligible(target, &identifier) {
            debug!(
                target: "recwrap::entry",
                target_value = %target,
                transformation = %identifier,
                "not eligible; passing through"
            );
            return Ok(target.clone());
        }
        let function = match target {
            Value::Function(function) => function,
            _ => return Ok(target.clone()),
        };

        let rewritten = self.instrument(function, &adapter)?;
        let history = self
            .registry
            .wrap_history(function)
            .unwrap_or_default()
            .extended(identifier.as_str());

        let wrapper = adapter.resolve(vm)?;
        let result = vm.call_value(&wrapper, CallArgs::one(Value::Function(rewritten)))?;

        if let Value::Function(wrapped) = &result {
            debug!(
                target: "recwrap::entry",
                function = wrapped.name(),
                id = %wrapped.id(),
                history = %history,
                "wrapped"
            );
            self.registry.set_wrap_history(wrapped, history);
        }
        Ok(result)
    }

    /// Transformations already applied to `value`, oldest first
    pub fn wrap_history(&self, value: &Value) -> WrapHistory {
        self.registry.history_of(value)
    }

    /// Overwrite the history of a function
    ///
    /// Returns false when `value` is not a bytecode function.
    pub fn set_wrap_history(&self, value: &Value, history: WrapHistory) -> bool {
        match value {
            Value::Function(function) => {
                self.registry.set_wrap_history(function, history);
                true
            }
            _ => false,
        }
    }

    /// Copy of `function` with every call site instrumented for `adapter`
    fn instrument(&self, function: &Arc<Function>, adapter: &WrapAdapter) -> VmResult<Arc<Function>> {
        let entry_index = function.captures().len();
        let adapter_index = entry_index + 1;
        let (entry_capture, adapter_capture) =
            match (u16::try_from(entry_index), u16::try_from(adapter_index)) {
                (Ok(entry), Ok(adapter)) => (entry, adapter),
                _ => {
                    return Err(RewriteError::TooManyCaptures {
                        count: adapter_index + 1,
                    }
                    .into())
                }
            };

        let mut rewriter = CallSiteRewriter::new(entry_capture, adapter_capture);
        let body = rewriter.rewrite(function.body())?;
        let body = repair_signature(body, function);

        let mut captures = function.captures().to_vec();
        captures.push(Capture::new(ENTRY_POINT_NAME, self.entry_point()));
        captures.push(Capture::new(adapter.binding_name(), adapter.as_tuple()));

        let rewritten = Function::new(function.name(), Arc::new(body), Arc::clone(function.scope()))
            .with_defaults(function.defaults().to_vec())
            .with_kw_defaults(function.kw_defaults().clone())
            .with_captures(captures);

        debug!(
            target: "recwrap::entry",
            function = function.name(),
            from = %function.id(),
            to = %rewritten.id(),
            call_sites = rewriter.stats().call_sites_instrumented,
            "instrumented"
        );
        Ok(Arc::new(rewritten))
    }
}

/// Restore the declared parameters of `original` onto a rewritten body
fn repair_signature(body: Chunk, original: &Function) -> Chunk {
    body.with_signature(original.signature().clone())
}

fn single_argument(name: &str, args: CallArgs) -> VmResult<Value> {
    if !args.keyword.is_empty() || args.positional.len() != 1 {
        return Err(VmError::argument(
            name,
            format!(
                "takes exactly one argument ({} given)",
                args.positional.len() + args.keyword.len()
            ),
        ));
    }
    args.positional
        .into_iter()
        .next()
        .ok_or(VmError::StackUnderflow)
}
