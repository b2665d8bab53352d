// Backend module for recursive call-site wrapping
//
// - `models`: runtime values, functions and scopes
// - `bytecode`: chunk format, instruction IR and the stack VM
// - `recursive`: call-site rewriting and the `apply_recursive` entry point

pub mod bytecode;
pub mod models;
pub mod recursive;

pub use bytecode::{Chunk, ChunkBuilder, Instruction, Vm, VmConfig, VmError, VmResult};
pub use models::*;
pub use recursive::{RecursiveWrap, WrapAdapter, WrapHistory, WrapRegistry, ENTRY_POINT_NAME};
