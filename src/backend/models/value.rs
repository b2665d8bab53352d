//! Runtime values for the bytecode VM
//!
//! Data values compare structurally. Callables and modules compare by
//! reference identity, so two distinct functions are never equal even when
//! their bodies are byte-for-byte the same.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;

use super::function::{BoundMethod, Function, NativeFn};
use super::scope::Scope;
use crate::backend::bytecode::vm::{VmError, VmResult};

/// Keyword arguments and dictionary contents, in insertion order
pub type Kwargs = IndexMap<String, Value>;

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// Absence of a value
    Nil,
    /// A boolean
    Bool(bool),
    /// A 64-bit integer
    Long(i64),
    /// An immutable string
    Str(Arc<str>),
    /// An immutable ordered sequence
    Tuple(Arc<[Value]>),
    /// A string-keyed, insertion-ordered mapping
    Dict(Arc<Kwargs>),
    /// A bytecode function, the only callable eligible for instrumentation
    Function(Arc<Function>),
    /// A built-in host function
    Native(Arc<NativeFn>),
    /// A callable type object
    Type(ValueType),
    /// A function bound to a receiver
    BoundMethod(Arc<BoundMethod>),
    /// A named scope used as a value
    Module(Arc<Scope>),
}

/// Built-in type objects that can be called as constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Str,
    Tuple,
    Dict,
}

impl ValueType {
    /// Name the type object is known by
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Str => "str",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
        }
    }

    /// Construct a value of this type from call arguments
    pub fn construct(self, positional: &[Value], keyword: &Kwargs) -> VmResult<Value> {
        if self != Self::Dict && !keyword.is_empty() {
            return Err(VmError::argument(
                self.name(),
                "takes no keyword arguments",
            ));
        }
        if positional.len() > 1 {
            return Err(VmError::argument(
                self.name(),
                format!("expected at most 1 argument, got {}", positional.len()),
            ));
        }
        let arg = positional.first();

        match (self, arg) {
            (Self::Bool, None) => Ok(Value::Bool(false)),
            (Self::Bool, Some(v)) => Ok(Value::Bool(v.is_truthy())),
            (Self::Int, None) => Ok(Value::Long(0)),
            (Self::Int, Some(Value::Long(n))) => Ok(Value::Long(*n)),
            (Self::Int, Some(Value::Bool(b))) => Ok(Value::Long(i64::from(*b))),
            (Self::Int, Some(Value::Str(s))) => s
                .trim()
                .parse::<i64>()
                .map(Value::Long)
                .map_err(|_| VmError::argument("int", format!("invalid literal {:?}", s))),
            (Self::Int, Some(other)) => Err(VmError::TypeError {
                expected: "int, bool or str",
                got: other.type_name(),
            }),
            (Self::Str, None) => Ok(Value::str("")),
            (Self::Str, Some(Value::Str(s))) => Ok(Value::Str(s.clone())),
            (Self::Str, Some(v)) => Ok(Value::str(v.to_string())),
            (Self::Tuple, None) => Ok(Value::tuple(Vec::new())),
            (Self::Tuple, Some(Value::Tuple(items))) => Ok(Value::Tuple(items.clone())),
            (Self::Tuple, Some(Value::Dict(map))) => {
                Ok(Value::tuple(map.keys().map(|k| Value::str(k.as_str())).collect()))
            }
            (Self::Tuple, Some(other)) => Err(VmError::TypeError {
                expected: "tuple or dict",
                got: other.type_name(),
            }),
            (Self::Dict, None) => Ok(Value::dict(keyword.clone())),
            (Self::Dict, Some(Value::Dict(map))) => {
                let mut merged = (**map).clone();
                merged.extend(keyword.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Value::dict(merged))
            }
            (Self::Dict, Some(other)) => Err(VmError::TypeError {
                expected: "dict",
                got: other.type_name(),
            }),
        }
    }
}

impl Value {
    /// Create a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Create a tuple value
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    /// Create a dict value
    pub fn dict(map: Kwargs) -> Self {
        Value::Dict(Arc::new(map))
    }

    /// Name of this value's runtime type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Long(_) => "int",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function",
            Value::Type(_) => "type",
            Value::BoundMethod(_) => "method",
            Value::Module(_) => "module",
        }
    }

    /// Truthiness used by conditional jumps and `bool(...)`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Whether this value can be the target of a call
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Type(_) | Value::BoundMethod(_)
        )
    }

    /// The bytecode function behind this value, if it is one
    #[inline]
    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn as_dict(&self) -> Option<&Kwargs> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(Arc::new(f))
    }
}

impl From<NativeFn> for Value {
    fn from(f: NativeFn) -> Self {
        Value::Native(Arc::new(f))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Value::Tuple(items) => write!(f, "({})", items.iter().join(", ")),
            Value::Dict(map) => write!(
                f,
                "{{{}}}",
                map.iter().map(|(k, v)| format!("{:?}: {}", k, v)).join(", ")
            ),
            Value::Function(func) => write!(f, "<function {} #{}>", func.name(), func.id()),
            Value::Native(native) => write!(f, "<built-in function {}>", native.name()),
            Value::Type(ty) => write!(f, "<type {}>", ty.name()),
            Value::BoundMethod(m) => write!(f, "<bound method {}>", m.function().name()),
            Value::Module(scope) => write!(f, "<module {}>", scope.name()),
        }
    }
}
