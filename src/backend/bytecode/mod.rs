//! Bytecode Module
//!
//! Function bodies are stack-machine bytecode. This module provides the
//! encoding, a typed instruction IR over it, and the VM that runs it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    ChunkBuilder                                   │
//! │          Instructions, constants, names → Chunk                   │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Chunk (encoded bytes)                          │
//! └───────────────────────────────────────────────────────────────────┘
//!            │                                         ▲
//!            │ decode                                  │ encode
//!            ▼                                         │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │            Instruction IR  (call-site rewriter works here)        │
//! └───────────────────────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Vm                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                │
//! │  │ Value Stack │  │ Frames      │  │ Scope /     │                │
//! │  │             │  │ (host stack)│  │ Captures    │                │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`opcodes`]: Bytecode opcode definitions
//! - [`instruction`]: Typed instructions, `CallShape`, decode/encode
//! - [`chunk`]: Chunk structure with constant pool and name table
//! - [`error`]: Decode and rewrite errors
//! - [`vm`]: Virtual machine execution engine
//!
//! # Example
//!
//! ```
//! use recwrap::backend::bytecode::{ChunkBuilder, Instruction, Vm};
//! use recwrap::backend::models::{CallArgs, Function, Scope, Value};
//!
//! // Build a simple program: 40 + 2
//! let mut builder = ChunkBuilder::new("example");
//! builder.emit(Instruction::PushLongSmall(40));
//! builder.emit(Instruction::PushLongSmall(2));
//! builder.emit(Instruction::Add);
//! builder.emit(Instruction::Return);
//!
//! let f = Function::new("example", builder.build_arc(), Scope::new("main"));
//! let mut vm = Vm::new();
//! let result = vm.call_value(&f.into_value(), CallArgs::default()).unwrap();
//! assert_eq!(result, Value::Long(42));
//! ```

pub mod chunk;
pub mod error;
pub mod instruction;
pub mod opcodes;
pub mod vm;

// Re-export main types
pub use chunk::{Chunk, ChunkBuilder, JumpLabel, MAX_CODE_LEN};
pub use error::{BuildError, DecodeError, RewriteError, RewriteResult};
pub use instruction::{decode, encode, CallShape, Instruction, CALL_EX_KWARGS};
pub use opcodes::Opcode;
pub use vm::{ConfigError, Vm, VmConfig, VmError, VmResult};
