//! Bytecode Virtual Machine
//!
//! The VM executes function bodies with a shared value stack. Bytecode calls
//! push a `Frame` onto an explicit call stack bounded by
//! `VmConfig::max_call_depth`; only natives that call back into the VM nest a
//! new run loop on the host stack.
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, Frame)
//! - `stack`: Stack manipulation and aggregate operations
//! - `arithmetic`: Arithmetic and comparison operations
//! - `value_ops`: Constants, locals, globals and captures
//! - `calls`: Call dispatch for every call shape

use std::ops::ControlFlow;

use tracing::trace;

use super::instruction::Instruction;

// === Submodules ===

mod arithmetic;
mod calls;
mod stack;
mod types;
mod value_ops;


// === Re-exports ===

pub use types::{ConfigError, VmConfig, VmError, VmResult};

use crate::backend::models::Value;
use types::Frame;

// === Vm Struct ===

/// The Bytecode Virtual Machine
#[derive(Debug)]
pub struct Vm {
    /// Value stack for operands and results
    pub(super) value_stack: Vec<Value>,

    /// Active bytecode frames, innermost last
    pub(super) call_stack: Vec<Frame>,

    /// VM configuration
    pub(super) config: VmConfig,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    // === Constructors ===

    /// Create a new VM
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a new VM with custom configuration
    pub fn with_config(config: VmConfig) -> Self {
        Self {
            value_stack: Vec::with_capacity(256),
            call_stack: Vec::with_capacity(64),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Number of bytecode frames currently running
    #[inline]
    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Current height of the value stack
    #[inline]
    pub fn stack_len(&self) -> usize {
        self.value_stack.len()
    }

    // === Execution Methods ===

    /// Run until the frame entered at call-stack height `floor` returns
    ///
    /// Frames pushed by calls inside the loop are run by the same loop.
    pub(super) fn run_until(&mut self, floor: usize) -> VmResult<Value> {
        loop {
            if let ControlFlow::Break(result) = self.step()? {
                if self.call_stack.len() == floor {
                    return Ok(result);
                }
                self.push(result)?;
            }
        }
    }

    #[inline]
    pub(super) fn frame(&self) -> VmResult<&Frame> {
        self.call_stack.last().ok_or(VmError::NoActiveFrame)
    }

    #[inline]
    pub(super) fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.call_stack.last_mut().ok_or(VmError::NoActiveFrame)
    }

    /// Execute a single instruction of the innermost frame
    ///
    /// Breaks with the return value after popping a returning frame.
    fn step(&mut self) -> VmResult<ControlFlow<Value>> {
        let frame = self.frame()?;
        let body = frame.function.body();
        if frame.ip >= body.len() {
            return Err(VmError::IpOutOfBounds);
        }
        let (instruction, next) = Instruction::decode_at(body.code(), frame.ip)?;

        // Trace if enabled
        if self.config.trace {
            trace!(
                target: "recwrap::vm::step",
                function = frame.function.name(),
                ip = frame.ip,
                instruction = %instruction,
                stack_depth = self.value_stack.len()
            );
        }

        self.frame_mut()?.ip = next;

        match instruction {
            // Stack operations
            Instruction::Nop => {}
            // Runtime no-op; only the rewriter reads it
            Instruction::Synthetic => {}
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Dup => self.op_dup()?,
            Instruction::Swap => self.op_swap()?,
            Instruction::Rot3 => self.op_rot3()?,

            // Value creation
            Instruction::PushNil => self.push(Value::Nil)?,
            Instruction::PushTrue => self.push(Value::Bool(true))?,
            Instruction::PushFalse => self.push(Value::Bool(false))?,
            Instruction::PushLongSmall(n) => self.push(Value::Long(i64::from(n)))?,
            Instruction::PushConstant(index) => self.op_push_constant(index)?,

            // Variable operations
            Instruction::LoadLocal(slot) => self.op_load_local(slot)?,
            Instruction::StoreLocal(slot) => self.op_store_local(slot)?,
            Instruction::LoadGlobal(index) => self.op_load_global(index)?,
            Instruction::StoreGlobal(index) => self.op_store_global(index)?,
            Instruction::LoadCapture(index) => self.op_load_capture(index)?,

            // Aggregates
            Instruction::BuildTuple(n) => self.op_build_tuple(n)?,
            Instruction::BuildDict(n) => self.op_build_dict(n)?,
            Instruction::UnpackSequence(n) => self.op_unpack_sequence(n)?,

            // Arithmetic and comparison
            Instruction::Add => self.op_add()?,
            Instruction::Sub => self.op_sub()?,
            Instruction::Mul => self.op_mul()?,
            Instruction::Lt => self.op_lt()?,
            Instruction::Eq => self.op_eq()?,
            Instruction::Not => self.op_not()?,

            // Control flow
            Instruction::Jump(target) => self.frame_mut()?.ip = target,
            Instruction::JumpIfFalse(target) => {
                if !self.pop()?.is_truthy() {
                    self.frame_mut()?.ip = target;
                }
            }
            Instruction::Return => return self.op_return().map(ControlFlow::Break),
            Instruction::Call(shape) => self.op_call(shape)?,
        }

        Ok(ControlFlow::Continue(()))
    }
}
