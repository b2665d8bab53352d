//! Stack operations for the bytecode VM.
//!
//! This module contains methods for stack manipulation operations
//! like push, pop, dup, swap and rot3, plus the aggregate builders that
//! consume or produce runs of stack values.

use std::sync::Arc;

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::{Kwargs, Value};

impl Vm {
    // === Stack Operations ===

    #[inline]
    pub(super) fn push(&mut self, value: Value) -> VmResult<()> {
        if self.value_stack.len() >= self.config.max_value_stack {
            return Err(VmError::ValueStackOverflow);
        }
        self.value_stack.push(value);
        Ok(())
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Value> {
        self.value_stack.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn peek(&self) -> VmResult<&Value> {
        self.value_stack.last().ok_or(VmError::StackUnderflow)
    }

    /// Remove the top `n` values, returned bottom first
    pub(super) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let len = self.value_stack.len();
        if n > len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.value_stack.split_off(len - n))
    }

    pub(super) fn op_dup(&mut self) -> VmResult<()> {
        trace!(target: "recwrap::vm::stack", depth = self.call_stack.len(), "dup");
        let value = self.peek()?.clone();
        self.push(value)
    }

    pub(super) fn op_swap(&mut self) -> VmResult<()> {
        trace!(target: "recwrap::vm::stack", depth = self.call_stack.len(), "swap");
        let len = self.value_stack.len();
        if len < 2 {
            return Err(VmError::StackUnderflow);
        }
        self.value_stack.swap(len - 1, len - 2);
        Ok(())
    }

    pub(super) fn op_rot3(&mut self) -> VmResult<()> {
        trace!(target: "recwrap::vm::stack", depth = self.call_stack.len(), "rot3");
        let len = self.value_stack.len();
        if len < 3 {
            return Err(VmError::StackUnderflow);
        }
        // [a, b, c] -> [c, a, b]
        self.value_stack[len - 3..].rotate_right(1);
        Ok(())
    }

    // === Aggregates ===

    /// Stack: [v1, ..., vn] -> [(v1, ..., vn)]
    pub(super) fn op_build_tuple(&mut self, n: u8) -> VmResult<()> {
        let items = self.pop_n(n as usize)?;
        self.push(Value::tuple(items))
    }

    /// Stack: [k1, v1, ..., kn, vn] -> [{k1: v1, ..., kn: vn}]
    pub(super) fn op_build_dict(&mut self, n: u8) -> VmResult<()> {
        let items = self.pop_n(2 * n as usize)?;
        let mut map = Kwargs::with_capacity(n as usize);
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let key = match key {
                Value::Str(s) => s.to_string(),
                other => {
                    return Err(VmError::TypeError {
                        expected: "str",
                        got: other.type_name(),
                    })
                }
            };
            map.insert(key, value);
        }
        self.push(Value::Dict(Arc::new(map)))
    }

    /// Stack: [(v1, ..., vn)] -> [v1, ..., vn]
    ///
    /// The first element ends deepest, so the original order reads
    /// bottom to top.
    pub(super) fn op_unpack_sequence(&mut self, n: u8) -> VmResult<()> {
        let items = match self.pop()? {
            Value::Tuple(items) => items,
            other => {
                return Err(VmError::TypeError {
                    expected: "tuple",
                    got: other.type_name(),
                })
            }
        };
        if items.len() != n as usize {
            return Err(VmError::raised(format!(
                "cannot unpack {} values into {}",
                items.len(),
                n
            )));
        }
        for item in items.iter() {
            self.push(item.clone())?;
        }
        Ok(())
    }
}
