//! Bytecode opcodes for the recwrap VM
//!
//! This module defines all bytecode instructions used by the VM.
//! Opcodes are grouped by category and assigned contiguous ranges.

use std::fmt;

/// Bytecode opcode enumeration
///
/// Each opcode is assigned a unique u8 value. Opcodes are organized into
/// logical groups with reserved ranges for future expansion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Stack Operations (0x00-0x0F) ===
    /// No operation
    Nop = 0x00,
    /// Discard top of stack
    Pop = 0x01,
    /// Duplicate top of stack
    Dup = 0x02,
    /// Swap top two stack elements
    Swap = 0x03,
    /// Rotate top 3: [a,b,c] -> [c,a,b]
    Rot3 = 0x04,

    // === Value Creation (0x10-0x1F) ===
    /// Push Nil value
    PushNil = 0x10,
    /// Push Bool(true)
    PushTrue = 0x11,
    /// Push Bool(false)
    PushFalse = 0x12,
    /// Push small integer (-128 to 127), value is next byte
    PushLongSmall = 0x13,
    /// Push constant from pool, index is next 2 bytes
    PushConstant = 0x14,

    // === Variable Operations (0x20-0x2F) ===
    /// Load value from local slot, index is next byte
    LoadLocal = 0x20,
    /// Store value to local slot, index is next byte
    StoreLocal = 0x21,
    /// Load from the owning scope, name index is next 2 bytes
    LoadGlobal = 0x22,
    /// Store to the owning scope, name index is next 2 bytes
    StoreGlobal = 0x23,
    /// Load from the function's capture table, index is next 2 bytes
    LoadCapture = 0x24,

    // === Aggregates (0x30-0x3F) ===
    /// Collect top N values into a tuple, N is next byte
    BuildTuple = 0x30,
    /// Collect top N name/value pairs into a dict, N is next byte
    BuildDict = 0x31,
    /// Expand a tuple of exactly N elements, first element deepest
    UnpackSequence = 0x32,

    // === Arithmetic and Comparison (0x40-0x4F) ===
    /// [a, b] -> [a + b]
    Add = 0x40,
    /// [a, b] -> [a - b]
    Sub = 0x41,
    /// [a, b] -> [a * b]
    Mul = 0x42,
    /// [a, b] -> [a < b]
    Lt = 0x43,
    /// [a, b] -> [a == b]
    Eq = 0x44,
    /// [a] -> [!a]
    Not = 0x45,

    // === Control Flow (0x50-0x5F) ===
    /// Unconditional jump, offset is next 2 bytes (signed)
    Jump = 0x50,
    /// Jump if top is falsy, offset is next 2 bytes (signed)
    JumpIfFalse = 0x51,
    /// Return from function with top of stack
    Return = 0x52,

    // === Calls (0x60-0x6F) ===
    /// Call with positional and keyword args: <npos: u8> <nkw: u8>
    Call = 0x60,
    /// Call with a trailing varargs tuple: <npos: u8> <nkw: u8>
    CallVar = 0x61,
    /// Call with a trailing kwargs dict: <npos: u8> <nkw: u8>
    CallKw = 0x62,
    /// Call with trailing varargs tuple and kwargs dict: <npos: u8> <nkw: u8>
    CallVarKw = 0x63,
    /// Call with an args tuple and optional kwargs dict: <flags: u8>
    CallEx = 0x64,

    // === Meta (0xF0-0xFF) ===
    /// Marks the next call as emitted by the call-site rewriter
    Synthetic = 0xF0,
}

impl Opcode {
    /// Convert byte to opcode, returns None if invalid
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        // Use a lookup table for O(1) conversion
        OPCODE_TABLE.get(byte as usize).copied().flatten()
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the number of immediate bytes following this opcode
    #[inline]
    pub fn immediate_size(self) -> usize {
        match self {
            // No immediate
            Self::Nop | Self::Pop | Self::Dup | Self::Swap | Self::Rot3
            | Self::PushNil | Self::PushTrue | Self::PushFalse
            | Self::Add | Self::Sub | Self::Mul | Self::Lt | Self::Eq | Self::Not
            | Self::Return | Self::Synthetic => 0,

            // 1-byte immediate
            Self::PushLongSmall | Self::LoadLocal | Self::StoreLocal
            | Self::BuildTuple | Self::BuildDict | Self::UnpackSequence
            | Self::CallEx => 1,

            // 2-byte immediate
            Self::PushConstant | Self::LoadGlobal | Self::StoreGlobal | Self::LoadCapture
            | Self::Jump | Self::JumpIfFalse => 2,

            // 1-byte positional count + 1-byte keyword count
            Self::Call | Self::CallVar | Self::CallKw | Self::CallVarKw => 2,
        }
    }

    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::Rot3 => "rot3",
            Self::PushNil => "push_nil",
            Self::PushTrue => "push_true",
            Self::PushFalse => "push_false",
            Self::PushLongSmall => "push_long_small",
            Self::PushConstant => "push_const",
            Self::LoadLocal => "load_local",
            Self::StoreLocal => "store_local",
            Self::LoadGlobal => "load_global",
            Self::StoreGlobal => "store_global",
            Self::LoadCapture => "load_capture",
            Self::BuildTuple => "build_tuple",
            Self::BuildDict => "build_dict",
            Self::UnpackSequence => "unpack_sequence",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Lt => "lt",
            Self::Eq => "eq",
            Self::Not => "not",
            Self::Jump => "jump",
            Self::JumpIfFalse => "jump_if_false",
            Self::Return => "return",
            Self::Call => "call",
            Self::CallVar => "call_var",
            Self::CallKw => "call_kw",
            Self::CallVarKw => "call_var_kw",
            Self::CallEx => "call_ex",
            Self::Synthetic => "synthetic",
        }
    }

    /// Check if this opcode is a jump instruction
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIfFalse)
    }

    /// Check if this opcode is a call instruction
    #[inline]
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::Call | Self::CallVar | Self::CallKw | Self::CallVarKw | Self::CallEx
        )
    }

    /// Check if this opcode can terminate execution
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Lookup table for byte -> Opcode conversion
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];

    // Stack operations
    table[0x00] = Some(Opcode::Nop);
    table[0x01] = Some(Opcode::Pop);
    table[0x02] = Some(Opcode::Dup);
    table[0x03] = Some(Opcode::Swap);
    table[0x04] = Some(Opcode::Rot3);

    // Value creation
    table[0x10] = Some(Opcode::PushNil);
    table[0x11] = Some(Opcode::PushTrue);
    table[0x12] = Some(Opcode::PushFalse);
    table[0x13] = Some(Opcode::PushLongSmall);
    table[0x14] = Some(Opcode::PushConstant);

    // Variables
    table[0x20] = Some(Opcode::LoadLocal);
    table[0x21] = Some(Opcode::StoreLocal);
    table[0x22] = Some(Opcode::LoadGlobal);
    table[0x23] = Some(Opcode::StoreGlobal);
    table[0x24] = Some(Opcode::LoadCapture);

    // Aggregates
    table[0x30] = Some(Opcode::BuildTuple);
    table[0x31] = Some(Opcode::BuildDict);
    table[0x32] = Some(Opcode::UnpackSequence);

    // Arithmetic and comparison
    table[0x40] = Some(Opcode::Add);
    table[0x41] = Some(Opcode::Sub);
    table[0x42] = Some(Opcode::Mul);
    table[0x43] = Some(Opcode::Lt);
    table[0x44] = Some(Opcode::Eq);
    table[0x45] = Some(Opcode::Not);

    // Control flow
    table[0x50] = Some(Opcode::Jump);
    table[0x51] = Some(Opcode::JumpIfFalse);
    table[0x52] = Some(Opcode::Return);

    // Calls
    table[0x60] = Some(Opcode::Call);
    table[0x61] = Some(Opcode::CallVar);
    table[0x62] = Some(Opcode::CallKw);
    table[0x63] = Some(Opcode::CallVarKw);
    table[0x64] = Some(Opcode::CallEx);

    // Meta
    table[0xF0] = Some(Opcode::Synthetic);

    table
};
