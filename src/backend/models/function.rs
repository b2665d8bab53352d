//! Callables hosted by the VM
//!
//! - `Function`: a bytecode body plus the state it closes over (owning scope,
//!   defaults, capture table). Functions are immutable; instrumentation
//!   produces a new `Function` with a new `FunctionId`.
//! - `NativeFn`: a named host closure.
//! - `BoundMethod`: a function with its first argument fixed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scope::Scope;
use super::value::{Kwargs, Value};
use crate::backend::bytecode::chunk::Chunk;
use crate::backend::bytecode::vm::{Vm, VmError, VmResult};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a `Function`
///
/// Ids are never reused, so a stale id can never alias a live function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    fn next() -> Self {
        Self(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared parameters of a body
///
/// Parameters occupy the first local slots in this order: positional,
/// keyword-only, variadic positional, variadic keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub positional: Vec<String>,
    pub keyword_only: Vec<String>,
    pub var_positional: Option<String>,
    pub var_keyword: Option<String>,
}

impl Signature {
    /// Signature with the given positional parameters
    pub fn new<I, S>(positional: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            positional: positional.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_keyword_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyword_only = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_var_positional(mut self, name: impl Into<String>) -> Self {
        self.var_positional = Some(name.into());
        self
    }

    pub fn with_var_keyword(mut self, name: impl Into<String>) -> Self {
        self.var_keyword = Some(name.into());
        self
    }

    #[inline]
    pub fn positional_count(&self) -> usize {
        self.positional.len()
    }

    #[inline]
    pub fn keyword_only_count(&self) -> usize {
        self.keyword_only.len()
    }

    /// Number of local slots taken by parameters
    pub fn param_slots(&self) -> usize {
        self.positional.len()
            + self.keyword_only.len()
            + usize::from(self.var_positional.is_some())
            + usize::from(self.var_keyword.is_some())
    }

    /// Slot of a parameter that can be passed by keyword
    fn keyword_slot(&self, name: &str) -> Option<usize> {
        self.positional
            .iter()
            .chain(self.keyword_only.iter())
            .position(|p| p == name)
    }
}

/// A named entry in a function's capture table
#[derive(Debug, Clone)]
pub struct Capture {
    pub name: String,
    pub value: Value,
}

impl Capture {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Arguments of a single call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Kwargs,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, keyword: Kwargs) -> Self {
        Self { positional, keyword }
    }

    pub fn positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Kwargs::new(),
        }
    }

    /// A single positional argument
    pub fn one(value: Value) -> Self {
        Self::positional(vec![value])
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(name.into(), value);
        self
    }
}

/// A bytecode function
pub struct Function {
    id: FunctionId,
    name: String,
    body: Arc<Chunk>,
    scope: Arc<Scope>,
    /// Defaults for the trailing positional parameters
    defaults: Vec<Value>,
    kw_defaults: Kwargs,
    captures: Vec<Capture>,
}

impl Function {
    pub fn new(name: impl Into<String>, body: Arc<Chunk>, scope: Arc<Scope>) -> Self {
        Self {
            id: FunctionId::next(),
            name: name.into(),
            body,
            scope,
            defaults: Vec::new(),
            kw_defaults: Kwargs::new(),
            captures: Vec::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_kw_defaults(mut self, kw_defaults: Kwargs) -> Self {
        self.kw_defaults = kw_defaults;
        self
    }

    pub fn with_captures(mut self, captures: Vec<Capture>) -> Self {
        self.captures = captures;
        self
    }

    /// Wrap in a `Value`
    pub fn into_value(self) -> Value {
        Value::Function(Arc::new(self))
    }

    #[inline]
    pub fn id(&self) -> FunctionId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn body(&self) -> &Arc<Chunk> {
        &self.body
    }

    #[inline]
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        self.body.signature()
    }

    #[inline]
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    #[inline]
    pub fn kw_defaults(&self) -> &Kwargs {
        &self.kw_defaults
    }

    #[inline]
    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    #[inline]
    pub fn capture(&self, index: u16) -> Option<&Value> {
        self.captures.get(index as usize).map(|c| &c.value)
    }

    /// Bind call arguments to the initial local slots of the body
    pub(crate) fn bind_arguments(&self, args: CallArgs) -> VmResult<Vec<Value>> {
        let sig = self.body.signature();
        let npos = sig.positional_count();
        let mut slots: Vec<Option<Value>> = vec![None; sig.param_slots()];
        let mut extra_positional = Vec::new();
        let mut extra_keyword = Kwargs::new();

        let given = args.positional.len();
        for (i, value) in args.positional.into_iter().enumerate() {
            if i < npos {
                slots[i] = Some(value);
            } else if sig.var_positional.is_some() {
                extra_positional.push(value);
            } else {
                return Err(VmError::argument(
                    &self.name,
                    format!("takes {} positional arguments but {} were given", npos, given),
                ));
            }
        }

        for (name, value) in args.keyword {
            match sig.keyword_slot(&name) {
                Some(slot) if slots[slot].is_some() => {
                    return Err(VmError::argument(
                        &self.name,
                        format!("got multiple values for argument '{}'", name),
                    ));
                }
                Some(slot) => slots[slot] = Some(value),
                None if sig.var_keyword.is_some() => {
                    extra_keyword.insert(name, value);
                }
                None => {
                    return Err(VmError::argument(
                        &self.name,
                        format!("got an unexpected keyword argument '{}'", name),
                    ));
                }
            }
        }

        let first_default = npos.saturating_sub(self.defaults.len());
        for (i, param) in sig.positional.iter().enumerate() {
            if slots[i].is_some() {
                continue;
            }
            match i.checked_sub(first_default).and_then(|d| self.defaults.get(d)) {
                Some(default) => slots[i] = Some(default.clone()),
                None => {
                    return Err(VmError::argument(
                        &self.name,
                        format!("missing required positional argument '{}'", param),
                    ));
                }
            }
        }

        for (i, param) in sig.keyword_only.iter().enumerate() {
            let slot = npos + i;
            if slots[slot].is_some() {
                continue;
            }
            match self.kw_defaults.get(param) {
                Some(default) => slots[slot] = Some(default.clone()),
                None => {
                    return Err(VmError::argument(
                        &self.name,
                        format!("missing required keyword-only argument '{}'", param),
                    ));
                }
            }
        }

        let mut next = npos + sig.keyword_only_count();
        if sig.var_positional.is_some() {
            slots[next] = Some(Value::tuple(extra_positional));
            next += 1;
        }
        if sig.var_keyword.is_some() {
            slots[next] = Some(Value::dict(extra_keyword));
        }

        let mut locals: Vec<Value> = slots.into_iter().map(|s| s.unwrap_or(Value::Nil)).collect();
        let local_count = self.body.local_count().max(locals.len());
        locals.resize(local_count, Value::Nil);
        Ok(locals)
    }

    /// Disassemble the body followed by the capture table
    pub fn disassemble(&self) -> String {
        let mut output = self.body.disassemble();
        if !self.captures.is_empty() {
            output.push_str("captures:\n");
            for (i, capture) in self.captures.iter().enumerate() {
                output.push_str(&format!("  [{}] {} = {}\n", i, capture.name, capture.value));
            }
        }
        output
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", self.signature())
            .field("captures", &self.captures.len())
            .finish()
    }
}

/// Host closure signature for native functions
pub type NativeHandler = dyn Fn(&mut Vm, CallArgs) -> VmResult<Value> + Send + Sync;

/// A built-in function implemented in Rust
pub struct NativeFn {
    name: String,
    handler: Box<NativeHandler>,
}

impl NativeFn {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Vm, CallArgs) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(handler),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Native(Arc::new(self))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, vm: &mut Vm, args: CallArgs) -> VmResult<Value> {
        (self.handler)(vm, args)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").field("name", &self.name).finish()
    }
}

/// A function with its receiver fixed as the first positional argument
#[derive(Debug)]
pub struct BoundMethod {
    receiver: Value,
    function: Arc<Function>,
}

impl BoundMethod {
    pub fn new(receiver: Value, function: Arc<Function>) -> Self {
        Self { receiver, function }
    }

    pub fn into_value(self) -> Value {
        Value::BoundMethod(Arc::new(self))
    }

    #[inline]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    #[inline]
    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }
}
