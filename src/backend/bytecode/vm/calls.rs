//! Call operations for the bytecode VM.
//!
//! Every call opcode decodes to a `CallShape`; `op_call` collects the
//! operands the shape describes into `CallArgs` and dispatches on the kind
//! of callee. Bytecode-to-bytecode calls never recurse on the host stack.

use std::sync::Arc;

use tracing::trace;

use super::types::{Frame, VmError, VmResult};
use super::Vm;
use crate::backend::bytecode::instruction::CallShape;
use crate::backend::models::{CallArgs, Function, Kwargs, Value};

impl Vm {
    /// Call any callable value
    pub fn call_value(&mut self, callee: &Value, args: CallArgs) -> VmResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Native(native) => {
                trace!(
                    target: "recwrap::vm::call",
                    native = native.name(),
                    depth = self.call_stack.len(),
                    "call_native"
                );
                native.invoke(self, args)
            }
            Value::Type(ty) => ty.construct(&args.positional, &args.keyword),
            Value::BoundMethod(method) => {
                self.call_function(method.function(), with_receiver(method.receiver(), args))
            }
            other => Err(VmError::NotCallable(other.type_name())),
        }
    }

    /// Run a bytecode function to completion
    ///
    /// Calls made by the function run in this same loop. On error every
    /// frame and value pushed since entry is unwound.
    pub fn call_function(&mut self, function: &Arc<Function>, args: CallArgs) -> VmResult<Value> {
        let floor = self.call_stack.len();
        let base = self.value_stack.len();
        let result = self
            .push_frame(function, args)
            .and_then(|()| self.run_until(floor));
        if result.is_err() {
            self.call_stack.truncate(floor);
            self.value_stack.truncate(base);
        }
        result
    }

    /// Bind arguments and make `function` the innermost frame
    pub(super) fn push_frame(&mut self, function: &Arc<Function>, args: CallArgs) -> VmResult<()> {
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(VmError::CallDepthExceeded(self.config.max_call_depth));
        }
        let locals = function.bind_arguments(args)?;
        trace!(
            target: "recwrap::vm::call",
            function = function.name(),
            id = %function.id(),
            depth = self.call_stack.len(),
            "enter"
        );
        let frame = Frame::new(Arc::clone(function), locals, self.value_stack.len());
        self.call_stack.push(frame);
        Ok(())
    }

    /// Pop the innermost frame, returning its result
    ///
    /// Whatever the frame left on the value stack is discarded.
    pub(super) fn op_return(&mut self) -> VmResult<Value> {
        let result = self.pop()?;
        let frame = self.call_stack.pop().ok_or(VmError::NoActiveFrame)?;
        self.value_stack.truncate(frame.base);
        trace!(
            target: "recwrap::vm::call",
            function = frame.function.name(),
            depth = self.call_stack.len(),
            "return"
        );
        Ok(result)
    }

    /// Stack: [callee, <slots of shape>] -> [result]
    ///
    /// Bytecode callees get a new frame and the result is pushed when that
    /// frame returns; everything else is called directly.
    pub(super) fn op_call(&mut self, shape: CallShape) -> VmResult<()> {
        let mut operands = self.pop_n(shape.slots() + 1)?.into_iter();
        let callee = operands.next().ok_or(VmError::StackUnderflow)?;
        let args = collect_args(&callee, shape, operands)?;
        trace!(
            target: "recwrap::vm::call",
            callee = %callee,
            positional = args.positional.len(),
            keyword = args.keyword.len(),
            "call"
        );
        match &callee {
            Value::Function(function) => self.push_frame(function, args),
            Value::BoundMethod(method) => {
                self.push_frame(method.function(), with_receiver(method.receiver(), args))
            }
            _ => {
                let result = self.call_value(&callee, args)?;
                self.push(result)
            }
        }
    }
}

/// Prepend a bound method's receiver to the positional arguments
fn with_receiver(receiver: &Value, args: CallArgs) -> CallArgs {
    let mut positional = Vec::with_capacity(args.positional.len() + 1);
    positional.push(receiver.clone());
    positional.extend(args.positional);
    CallArgs::new(positional, args.keyword)
}

/// Gather call operands, laid out bottom to top, into `CallArgs`
fn collect_args(
    callee: &Value,
    shape: CallShape,
    mut operands: impl Iterator<Item = Value>,
) -> VmResult<CallArgs> {
    let mut positional: Vec<Value> = operands.by_ref().take(shape.positional as usize).collect();
    let mut keyword = Kwargs::new();

    for _ in 0..shape.keyword {
        let name = operands.next().ok_or(VmError::StackUnderflow)?;
        let value = operands.next().ok_or(VmError::StackUnderflow)?;
        match name {
            Value::Str(name) => insert_keyword(callee, &mut keyword, name.to_string(), value)?,
            other => {
                return Err(VmError::TypeError {
                    expected: "str",
                    got: other.type_name(),
                })
            }
        }
    }

    if shape.var_positional {
        match operands.next().ok_or(VmError::StackUnderflow)? {
            Value::Tuple(items) => positional.extend(items.iter().cloned()),
            other => {
                return Err(VmError::TypeError {
                    expected: "tuple",
                    got: other.type_name(),
                })
            }
        }
    }

    if shape.var_keyword {
        match operands.next().ok_or(VmError::StackUnderflow)? {
            Value::Dict(map) => {
                for (name, value) in map.iter() {
                    insert_keyword(callee, &mut keyword, name.clone(), value.clone())?;
                }
            }
            other => {
                return Err(VmError::TypeError {
                    expected: "dict",
                    got: other.type_name(),
                })
            }
        }
    }

    Ok(CallArgs::new(positional, keyword))
}

fn insert_keyword(callee: &Value, keyword: &mut Kwargs, name: String, value: Value) -> VmResult<()> {
    if keyword.contains_key(&name) {
        return Err(VmError::argument(
            callee.to_string(),
            format!("got multiple values for keyword argument '{}'", name),
        ));
    }
    keyword.insert(name, value);
    Ok(())
}
