pub mod function;
pub mod scope;
pub mod value;

pub use function::{BoundMethod, CallArgs, Capture, Function, FunctionId, NativeFn, Signature};
pub use scope::Scope;
pub use value::{Kwargs, Value, ValueType};
