//! Transformation adapter
//!
//! A `WrapAdapter` bundles a transformation with the extra arguments it was
//! registered with. Resolution turns it into the single-argument wrapper that
//! is actually applied to functions.

use std::sync::OnceLock;

use tracing::trace;

use crate::backend::bytecode::vm::{Vm, VmResult};
use crate::backend::models::{CallArgs, Kwargs, Value};

/// A transformation plus its extra positional and keyword arguments
#[derive(Debug)]
pub struct WrapAdapter {
    transformation: Value,
    extras: Vec<Value>,
    kw_extras: Kwargs,
    wrapper: OnceLock<Value>,
}

impl WrapAdapter {
    pub fn new(transformation: Value, extras: Vec<Value>, kw_extras: Kwargs) -> Self {
        Self {
            transformation,
            extras,
            kw_extras,
            wrapper: OnceLock::new(),
        }
    }

    #[inline]
    pub fn transformation(&self) -> &Value {
        &self.transformation
    }

    #[inline]
    pub fn extras(&self) -> &[Value] {
        &self.extras
    }

    #[inline]
    pub fn kw_extras(&self) -> &Kwargs {
        &self.kw_extras
    }

    pub fn has_extras(&self) -> bool {
        !self.extras.is_empty() || !self.kw_extras.is_empty()
    }

    /// Key recorded in wrap histories
    pub fn identifier(&self) -> String {
        transformation_name(&self.transformation)
    }

    /// Name of the adapter entry in a rewritten function's capture table
    pub fn binding_name(&self) -> String {
        format!("{}_adapter", self.identifier())
    }

    /// The single-argument wrapper
    ///
    /// Without extras this is the transformation itself. Otherwise the
    /// transformation is called once with the extras and its result is the
    /// wrapper. A failed resolution is not cached.
    pub fn resolve(&self, vm: &mut Vm) -> VmResult<Value> {
        if let Some(wrapper) = self.wrapper.get() {
            return Ok(wrapper.clone());
        }
        let wrapper = if self.has_extras() {
            trace!(
                target: "recwrap::entry",
                transformation = %self.transformation,
                extras = self.extras.len(),
                kw_extras = self.kw_extras.len(),
                "resolving wrapper factory"
            );
            let args = CallArgs::new(self.extras.clone(), self.kw_extras.clone());
            vm.call_value(&self.transformation, args)?
        } else {
            self.transformation.clone()
        };
        Ok(self.wrapper.get_or_init(|| wrapper).clone())
    }

    /// `(transformation, extras, kw_extras)` as one value
    ///
    /// Instrumented call sites unpack this to call the entry point.
    pub fn as_tuple(&self) -> Value {
        Value::tuple(vec![
            self.transformation.clone(),
            Value::tuple(self.extras.clone()),
            Value::dict(self.kw_extras.clone()),
        ])
    }
}

/// Declared name of a transformation value
pub fn transformation_name(value: &Value) -> String {
    match value {
        Value::Function(function) => function.name().to_string(),
        Value::Native(native) => native.name().to_string(),
        Value::BoundMethod(method) => method.function().name().to_string(),
        Value::Type(ty) => ty.name().to_string(),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::backend::models::NativeFn;

    #[test]
    fn test_resolve_without_extras_is_the_transformation() {
        let w = NativeFn::new("w", |_vm, args: CallArgs| Ok(args.positional[0].clone())).into_value();
        let adapter = WrapAdapter::new(w.clone(), Vec::new(), Kwargs::new());
        assert!(!adapter.has_extras());
        assert_eq!(adapter.resolve(&mut Vm::new()), Ok(w));
        assert_eq!(adapter.identifier(), "w");
        assert_eq!(adapter.binding_name(), "w_adapter");
    }

    #[test]
    fn test_resolve_calls_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = NativeFn::new("inner", |_vm, _args| Ok(Value::Nil)).into_value();
        let factory = {
            let calls = Arc::clone(&calls);
            let inner = inner.clone();
            NativeFn::new("factory", move |_vm, args: CallArgs| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(args.positional, vec![Value::Long(1)]);
                assert_eq!(args.keyword.get("k"), Some(&Value::str("v")));
                Ok(inner.clone())
            })
            .into_value()
        };
        let mut kw = Kwargs::new();
        kw.insert("k".to_string(), Value::str("v"));
        let adapter = WrapAdapter::new(factory, vec![Value::Long(1)], kw);

        let mut vm = Vm::new();
        assert_eq!(adapter.resolve(&mut vm), Ok(inner.clone()));
        assert_eq!(adapter.resolve(&mut vm), Ok(inner));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_as_tuple_layout() {
        let adapter = WrapAdapter::new(Value::str("w"), vec![Value::Long(1)], Kwargs::new());
        let tuple = adapter.as_tuple();
        let items = tuple.as_tuple().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Value::str("w"));
        assert_eq!(items[1], Value::tuple(vec![Value::Long(1)]));
        assert_eq!(items[2], Value::dict(Kwargs::new()));
    }

    #[test]
    fn test_transformation_names() {
        use crate::backend::models::ValueType;
        assert_eq!(transformation_name(&Value::Type(ValueType::Tuple)), "tuple");
        assert_eq!(transformation_name(&Value::Long(3)), "int");
    }
}
