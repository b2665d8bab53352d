//! Bytecode chunk representation
//!
//! A Chunk is the body of a function: encoded instructions together with the
//! constant pool, the name table used by global loads and stores, the
//! declared signature and the number of local slots.

use std::sync::Arc;

use super::error::{BuildError, DecodeError};
use super::instruction::{decode, CallShape, Instruction};
use super::opcodes::Opcode;
use crate::backend::models::{Signature, Value};

/// Largest body whose jumps all fit in a signed 16-bit offset
pub const MAX_CODE_LEN: usize = i16::MAX as usize;

/// A compiled bytecode chunk
///
/// Chunks are immutable after construction and shared between functions;
/// rewriting always produces a new chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The bytecode instructions
    code: Vec<u8>,

    /// Constant pool for values that can't be encoded inline
    constants: Vec<Value>,

    /// Names referenced by `LoadGlobal`/`StoreGlobal`
    names: Vec<String>,

    /// Declared parameters
    signature: Signature,

    /// Number of local slots needed, parameters included
    local_count: usize,

    /// Name of this chunk (for debugging)
    name: String,
}

impl Chunk {
    /// Create a builder for constructing a chunk
    pub fn builder(name: impl Into<String>) -> ChunkBuilder {
        ChunkBuilder::new(name)
    }

    /// Assemble a chunk from already-encoded parts
    pub(crate) fn from_parts(
        name: String,
        code: Vec<u8>,
        constants: Vec<Value>,
        names: Vec<String>,
        local_count: usize,
    ) -> Self {
        Self {
            code,
            constants,
            names,
            signature: Signature::default(),
            local_count,
            name,
        }
    }

    /// Same chunk with a different declared signature
    ///
    /// The local count grows to cover the parameter slots if needed.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.local_count = self.local_count.max(signature.param_slots());
        self.signature = signature;
        self
    }

    /// Get the bytecode instructions
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Get the length of the bytecode
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the chunk is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get a constant from the pool
    #[inline]
    pub fn get_constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    /// Get all constants
    #[inline]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Get a global name by index
    #[inline]
    pub fn get_name(&self, index: u16) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    /// Get the chunk name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode the whole body
    pub fn instructions(&self) -> Result<Vec<(usize, Instruction)>, DecodeError> {
        decode(&self.code)
    }

    /// Call shapes of every call instruction, in code order
    pub fn call_sites(&self) -> Result<Vec<CallShape>, DecodeError> {
        Ok(self
            .instructions()?
            .into_iter()
            .filter_map(|(_, instruction)| match instruction {
                Instruction::Call(shape) => Some(shape),
                _ => None,
            })
            .collect())
    }

    /// Disassemble the chunk to a string
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== {} ===\n", self.name));
        output.push_str(&format!(
            "params: {}, kwonly: {}, locals: {}, constants: {}\n",
            self.signature.positional_count(),
            self.signature.keyword_only_count(),
            self.local_count,
            self.constants.len()
        ));

        let mut offset = 0;
        while offset < self.code.len() {
            let (disasm, next_offset) = self.disassemble_instruction(offset);
            output.push_str(&format!("{:04x} {}\n", offset, disasm));
            offset = next_offset;
        }

        output
    }

    /// Disassemble a single instruction, returns (string, next_offset)
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let (instruction, next_offset) = match Instruction::decode_at(&self.code, offset) {
            Ok(decoded) => decoded,
            Err(_) => {
                let byte = self.code.get(offset).copied().unwrap_or(0);
                return (format!("??? (0x{:02x})", byte), offset + 1);
            }
        };

        let annotation = match instruction {
            Instruction::PushConstant(i) => self
                .get_constant(i)
                .map(|c| format!(" ({})", c))
                .unwrap_or_else(|| " (???)".to_string()),
            Instruction::LoadGlobal(i) | Instruction::StoreGlobal(i) => self
                .get_name(i)
                .map(|n| format!(" ({})", n))
                .unwrap_or_else(|| " (???)".to_string()),
            _ => String::new(),
        };

        (format!("{}{}", instruction, annotation), next_offset)
    }
}

/// Builder for constructing Chunks
#[derive(Debug)]
pub struct ChunkBuilder {
    code: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<String>,
    signature: Signature,
    local_count: usize,
    name: String,
    /// First table overflow, reported by `try_build`
    overflow: Option<BuildError>,
}

impl ChunkBuilder {
    /// Create a new chunk builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            code: Vec::with_capacity(64),
            constants: Vec::new(),
            names: Vec::new(),
            signature: Signature::default(),
            local_count: 0,
            name: name.into(),
            overflow: None,
        }
    }

    /// Declare the parameters; their slots come first in the local table
    pub fn set_signature(&mut self, signature: Signature) {
        self.local_count = self.local_count.max(signature.param_slots());
        self.signature = signature;
    }

    /// Reserve at least `count` local slots
    pub fn set_local_count(&mut self, count: usize) {
        self.local_count = self.local_count.max(count);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current bytecode offset
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit one instruction
    ///
    /// Jumps are encoded relative to their own position, so a jump to an
    /// already-emitted offset can be emitted directly. Forward jumps go
    /// through `emit_jump`/`patch_jump`.
    pub fn emit(&mut self, instruction: Instruction) {
        if let Instruction::LoadLocal(slot) | Instruction::StoreLocal(slot) = instruction {
            self.set_local_count(slot as usize + 1);
        }
        let at = self.code.len();
        instruction.encode(at, &mut self.code);
    }

    /// Emit raw bytes
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Add a constant to the pool, returns its index
    ///
    /// Past `u16::MAX` the overflow is recorded for `try_build` and the
    /// returned index is meaningless.
    pub fn add_constant(&mut self, value: Value) -> u16 {
        // Check if constant already exists
        for (i, existing) in self.constants.iter().enumerate() {
            if existing == &value {
                return i as u16;
            }
        }

        match u16::try_from(self.constants.len()) {
            Ok(index) => {
                self.constants.push(value);
                index
            }
            Err(_) => {
                self.overflow.get_or_insert(BuildError::TooManyConstants);
                u16::MAX
            }
        }
    }

    /// Emit a constant load
    pub fn emit_constant(&mut self, value: impl Into<Value>) {
        let index = self.add_constant(value.into());
        self.emit(Instruction::PushConstant(index));
    }

    /// Add a global name, returns its index
    ///
    /// Overflow is handled as in `add_constant`.
    pub fn add_name(&mut self, name: &str) -> u16 {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return i as u16;
        }
        match u16::try_from(self.names.len()) {
            Ok(index) => {
                self.names.push(name.to_string());
                index
            }
            Err(_) => {
                self.overflow.get_or_insert(BuildError::TooManyNames);
                u16::MAX
            }
        }
    }

    pub fn emit_load_global(&mut self, name: &str) {
        let index = self.add_name(name);
        self.emit(Instruction::LoadGlobal(index));
    }

    pub fn emit_store_global(&mut self, name: &str) {
        let index = self.add_name(name);
        self.emit(Instruction::StoreGlobal(index));
    }

    pub fn emit_call(&mut self, shape: CallShape) {
        self.emit(Instruction::Call(shape));
    }

    /// Create a forward jump, returns a label to patch later
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        debug_assert!(opcode.is_jump(), "{} is not a jump", opcode);
        self.code.push(opcode.to_byte());
        let offset = self.code.len();
        self.code.push(0xFF); // Placeholder
        self.code.push(0xFF);
        JumpLabel { offset }
    }

    /// Patch a jump label to jump to the current position
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        let jump_from = label.offset + 2; // After the i16 operand
        let offset = (target as isize - jump_from as isize) as i16;
        let bytes = offset.to_be_bytes();
        self.code[label.offset] = bytes[0];
        self.code[label.offset + 1] = bytes[1];
    }

    /// Build the final chunk, reporting any overflow
    pub fn try_build(self) -> Result<Chunk, BuildError> {
        if let Some(err) = self.overflow {
            return Err(err);
        }
        if self.code.len() > MAX_CODE_LEN {
            return Err(BuildError::CodeTooLarge {
                len: self.code.len(),
            });
        }
        Ok(Chunk {
            code: self.code,
            constants: self.constants,
            names: self.names,
            signature: self.signature,
            local_count: self.local_count,
            name: self.name,
        })
    }

    /// Build the final chunk
    ///
    /// # Panics
    ///
    /// Panics if the constant pool, the name table or the code outgrew the
    /// encoding. Use `try_build` to get the error instead.
    pub fn build(self) -> Chunk {
        match self.try_build() {
            Ok(chunk) => chunk,
            Err(err) => panic!("{}", err),
        }
    }

    /// Build and wrap in Arc
    pub fn build_arc(self) -> Arc<Chunk> {
        Arc::new(self.build())
    }
}

/// Label for a forward jump to be patched later
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_dedupes_constants_and_names() {
        let mut builder = ChunkBuilder::new("t");
        let a = builder.add_constant(Value::Long(1000));
        let b = builder.add_constant(Value::Long(1000));
        assert_eq!(a, b);
        let g = builder.add_name("g");
        assert_eq!(builder.add_name("g"), g);
        assert_ne!(builder.add_name("h"), g);
    }

    #[test]
    fn test_try_build_reports_overflow() {
        let mut builder = ChunkBuilder::new("t");
        for _ in 0..=MAX_CODE_LEN {
            builder.emit(Instruction::Nop);
        }
        assert_eq!(
            builder.try_build().unwrap_err(),
            BuildError::CodeTooLarge { len: MAX_CODE_LEN + 1 }
        );

        let mut builder = ChunkBuilder::new("t");
        builder.overflow = Some(BuildError::TooManyNames);
        builder.emit(Instruction::Return);
        assert_eq!(builder.try_build().unwrap_err(), BuildError::TooManyNames);
    }

    #[test]
    fn test_forward_jump_patch() {
        let mut builder = ChunkBuilder::new("t");
        builder.emit(Instruction::PushTrue);
        let label = builder.emit_jump(Opcode::JumpIfFalse);
        builder.emit(Instruction::PushNil);
        builder.patch_jump(label);
        builder.emit(Instruction::Return);
        let chunk = builder.build();

        let decoded = chunk.instructions().unwrap();
        assert_eq!(decoded[1], (1, Instruction::JumpIfFalse(5)));
        assert_eq!(decoded[3], (5, Instruction::Return));
    }

    #[test]
    fn test_local_count_tracks_slots_and_signature() {
        let mut builder = ChunkBuilder::new("t");
        builder.set_signature(Signature::new(["a", "b"]).with_var_keyword("kw"));
        assert_eq!(builder.local_count, 3);
        builder.emit(Instruction::StoreLocal(5));
        assert_eq!(builder.build().local_count(), 6);
    }

    #[test]
    fn test_call_sites_lists_every_shape() {
        let mut builder = ChunkBuilder::new("t");
        builder.emit_call(CallShape::positional(2));
        builder.emit_call(CallShape::expandable(true));
        builder.emit(Instruction::Return);
        let shapes = builder.build().call_sites().unwrap();
        assert_eq!(shapes, vec![CallShape::positional(2), CallShape::expandable(true)]);
    }

    #[test]
    fn test_disassemble_resolves_names_and_constants() {
        let mut builder = ChunkBuilder::new("demo");
        builder.emit_load_global("g");
        builder.emit_constant(Value::str("hi"));
        builder.emit_call(CallShape::positional(1));
        builder.emit(Instruction::Return);
        builder.emit_raw(&[0xEE]);
        let text = builder.build().disassemble();

        assert!(text.contains("=== demo ==="));
        assert!(text.contains("load_global #0 (g)"));
        assert!(text.contains("push_const #0 (\"hi\")"));
        assert!(text.contains(&format!("{} pos=1 kw=0", Opcode::Call.mnemonic())));
        assert!(text.contains("??? (0xee)"));
    }
}
