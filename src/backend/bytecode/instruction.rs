//! Typed instruction IR
//!
//! `Instruction` is the decoded form of one opcode plus its immediates. The
//! VM steps through a body by decoding one instruction at a time. The
//! call-site rewriter decodes a whole body, transforms the instruction list
//! and encodes it again.
//!
//! Jump targets are absolute byte offsets in the IR and signed 16-bit
//! offsets (relative to the end of the jump) in the encoding.

use std::fmt;

use super::error::DecodeError;
use super::opcodes::Opcode;

/// `CallEx` flag: a kwargs dict follows the args tuple
pub const CALL_EX_KWARGS: u8 = 0x01;

/// Canonical classification of every call opcode
///
/// Stack layout below the call, bottom to top: callee, `positional`
/// arguments, `keyword` name/value pairs, the varargs tuple if
/// `var_positional`, the kwargs dict if `var_keyword`. The expandable shape
/// (`CallEx`) is the degenerate case with no explicit arguments and an
/// always-present args tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallShape {
    pub positional: u8,
    pub keyword: u8,
    pub var_positional: bool,
    pub var_keyword: bool,
    pub expandable: bool,
}

impl CallShape {
    /// Plain call with `n` positional arguments
    pub const fn positional(n: u8) -> Self {
        Self {
            positional: n,
            keyword: 0,
            var_positional: false,
            var_keyword: false,
            expandable: false,
        }
    }

    /// Expandable call: args tuple, plus kwargs dict if `with_kwargs`
    pub const fn expandable(with_kwargs: bool) -> Self {
        Self {
            positional: 0,
            keyword: 0,
            var_positional: true,
            var_keyword: with_kwargs,
            expandable: true,
        }
    }

    pub const fn with_keywords(mut self, n: u8) -> Self {
        self.keyword = n;
        self
    }

    pub const fn with_var_positional(mut self) -> Self {
        self.var_positional = true;
        self
    }

    pub const fn with_var_keyword(mut self) -> Self {
        self.var_keyword = true;
        self
    }

    /// Number of stack values between the callee and the call
    pub fn slots(&self) -> usize {
        self.positional as usize
            + 2 * self.keyword as usize
            + usize::from(self.var_positional)
            + usize::from(self.var_keyword)
    }

    /// Opcode that encodes this shape
    pub fn opcode(&self) -> Opcode {
        if self.expandable {
            return Opcode::CallEx;
        }
        match (self.var_positional, self.var_keyword) {
            (false, false) => Opcode::Call,
            (true, false) => Opcode::CallVar,
            (false, true) => Opcode::CallKw,
            (true, true) => Opcode::CallVarKw,
        }
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Pop,
    Dup,
    Swap,
    Rot3,
    PushNil,
    PushTrue,
    PushFalse,
    PushLongSmall(i8),
    PushConstant(u16),
    LoadLocal(u8),
    StoreLocal(u8),
    LoadGlobal(u16),
    StoreGlobal(u16),
    LoadCapture(u16),
    BuildTuple(u8),
    BuildDict(u8),
    UnpackSequence(u8),
    Add,
    Sub,
    Mul,
    Lt,
    Eq,
    Not,
    /// Absolute target offset
    Jump(usize),
    /// Absolute target offset
    JumpIfFalse(usize),
    Return,
    Call(CallShape),
    Synthetic,
}

impl Instruction {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::Pop => Opcode::Pop,
            Self::Dup => Opcode::Dup,
            Self::Swap => Opcode::Swap,
            Self::Rot3 => Opcode::Rot3,
            Self::PushNil => Opcode::PushNil,
            Self::PushTrue => Opcode::PushTrue,
            Self::PushFalse => Opcode::PushFalse,
            Self::PushLongSmall(_) => Opcode::PushLongSmall,
            Self::PushConstant(_) => Opcode::PushConstant,
            Self::LoadLocal(_) => Opcode::LoadLocal,
            Self::StoreLocal(_) => Opcode::StoreLocal,
            Self::LoadGlobal(_) => Opcode::LoadGlobal,
            Self::StoreGlobal(_) => Opcode::StoreGlobal,
            Self::LoadCapture(_) => Opcode::LoadCapture,
            Self::BuildTuple(_) => Opcode::BuildTuple,
            Self::BuildDict(_) => Opcode::BuildDict,
            Self::UnpackSequence(_) => Opcode::UnpackSequence,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Lt => Opcode::Lt,
            Self::Eq => Opcode::Eq,
            Self::Not => Opcode::Not,
            Self::Jump(_) => Opcode::Jump,
            Self::JumpIfFalse(_) => Opcode::JumpIfFalse,
            Self::Return => Opcode::Return,
            Self::Call(shape) => shape.opcode(),
            Self::Synthetic => Opcode::Synthetic,
        }
    }

    /// Encoded size in bytes
    #[inline]
    pub fn encoded_len(&self) -> usize {
        1 + self.opcode().immediate_size()
    }

    /// Jump target, if this is a jump
    #[inline]
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Self::Jump(target) | Self::JumpIfFalse(target) => Some(*target),
            _ => None,
        }
    }

    /// Same instruction with its jump target replaced
    pub fn retarget(self, target: usize) -> Self {
        match self {
            Self::Jump(_) => Self::Jump(target),
            Self::JumpIfFalse(_) => Self::JumpIfFalse(target),
            other => other,
        }
    }

    /// Decode the instruction starting at `offset`
    ///
    /// Returns the instruction and the offset of the next one. Jump targets
    /// are checked against the body length but not against instruction
    /// boundaries; `decode` does that for whole bodies.
    pub fn decode_at(code: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let byte = *code
            .get(offset)
            .ok_or(DecodeError::Truncated { offset, opcode: Opcode::Nop })?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::InvalidOpcode { offset, byte })?;
        let next = offset + 1 + opcode.immediate_size();
        if next > code.len() {
            return Err(DecodeError::Truncated { offset, opcode });
        }

        let u8_at = |i: usize| code[offset + 1 + i];
        let u16_operand = || u16::from_be_bytes([code[offset + 1], code[offset + 2]]);
        let jump_target = || -> Result<usize, DecodeError> {
            let rel = i16::from_be_bytes([code[offset + 1], code[offset + 2]]);
            let target = next as isize + rel as isize;
            if target < 0 || target as usize >= code.len() {
                return Err(DecodeError::JumpOutOfRange { offset, target });
            }
            Ok(target as usize)
        };
        let call_shape = |var_positional: bool, var_keyword: bool| CallShape {
            positional: u8_at(0),
            keyword: u8_at(1),
            var_positional,
            var_keyword,
            expandable: false,
        };

        let instruction = match opcode {
            Opcode::Nop => Self::Nop,
            Opcode::Pop => Self::Pop,
            Opcode::Dup => Self::Dup,
            Opcode::Swap => Self::Swap,
            Opcode::Rot3 => Self::Rot3,
            Opcode::PushNil => Self::PushNil,
            Opcode::PushTrue => Self::PushTrue,
            Opcode::PushFalse => Self::PushFalse,
            Opcode::PushLongSmall => Self::PushLongSmall(u8_at(0) as i8),
            Opcode::PushConstant => Self::PushConstant(u16_operand()),
            Opcode::LoadLocal => Self::LoadLocal(u8_at(0)),
            Opcode::StoreLocal => Self::StoreLocal(u8_at(0)),
            Opcode::LoadGlobal => Self::LoadGlobal(u16_operand()),
            Opcode::StoreGlobal => Self::StoreGlobal(u16_operand()),
            Opcode::LoadCapture => Self::LoadCapture(u16_operand()),
            Opcode::BuildTuple => Self::BuildTuple(u8_at(0)),
            Opcode::BuildDict => Self::BuildDict(u8_at(0)),
            Opcode::UnpackSequence => Self::UnpackSequence(u8_at(0)),
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Mul => Self::Mul,
            Opcode::Lt => Self::Lt,
            Opcode::Eq => Self::Eq,
            Opcode::Not => Self::Not,
            Opcode::Jump => Self::Jump(jump_target()?),
            Opcode::JumpIfFalse => Self::JumpIfFalse(jump_target()?),
            Opcode::Return => Self::Return,
            Opcode::Call => Self::Call(call_shape(false, false)),
            Opcode::CallVar => Self::Call(call_shape(true, false)),
            Opcode::CallKw => Self::Call(call_shape(false, true)),
            Opcode::CallVarKw => Self::Call(call_shape(true, true)),
            Opcode::CallEx => {
                let flags = u8_at(0);
                if flags & !CALL_EX_KWARGS != 0 {
                    return Err(DecodeError::InvalidOperand {
                        offset,
                        opcode,
                        operand: flags,
                    });
                }
                Self::Call(CallShape::expandable(flags & CALL_EX_KWARGS != 0))
            }
            Opcode::Synthetic => Self::Synthetic,
        };

        Ok((instruction, next))
    }

    /// Encode at byte offset `at`, appending to `out`
    ///
    /// The caller guarantees every jump distance fits in an i16.
    pub fn encode(&self, at: usize, out: &mut Vec<u8>) {
        out.push(self.opcode().to_byte());
        match *self {
            Self::PushLongSmall(n) => out.push(n as u8),
            Self::LoadLocal(i) | Self::StoreLocal(i) => out.push(i),
            Self::BuildTuple(n) | Self::BuildDict(n) | Self::UnpackSequence(n) => out.push(n),
            Self::PushConstant(i)
            | Self::LoadGlobal(i)
            | Self::StoreGlobal(i)
            | Self::LoadCapture(i) => out.extend_from_slice(&i.to_be_bytes()),
            Self::Jump(target) | Self::JumpIfFalse(target) => {
                let jump_from = at + 3;
                let rel = (target as isize - jump_from as isize) as i16;
                out.extend_from_slice(&rel.to_be_bytes());
            }
            Self::Call(shape) if shape.expandable => {
                out.push(if shape.var_keyword { CALL_EX_KWARGS } else { 0 });
            }
            Self::Call(shape) => {
                out.push(shape.positional);
                out.push(shape.keyword);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode().mnemonic();
        match self {
            Self::PushLongSmall(n) => write!(f, "{} {}", mnemonic, n),
            Self::PushConstant(i)
            | Self::LoadGlobal(i)
            | Self::StoreGlobal(i)
            | Self::LoadCapture(i) => write!(f, "{} #{}", mnemonic, i),
            Self::LoadLocal(i) | Self::StoreLocal(i) => write!(f, "{} {}", mnemonic, i),
            Self::BuildTuple(n) | Self::BuildDict(n) | Self::UnpackSequence(n) => {
                write!(f, "{} {}", mnemonic, n)
            }
            Self::Jump(target) | Self::JumpIfFalse(target) => {
                write!(f, "{} -> {:04x}", mnemonic, target)
            }
            Self::Call(shape) if shape.expandable => {
                write!(f, "{} kwargs={}", mnemonic, shape.var_keyword)
            }
            Self::Call(shape) => write!(f, "{} pos={} kw={}", mnemonic, shape.positional, shape.keyword),
            _ => write!(f, "{}", mnemonic),
        }
    }
}

/// Decode a whole body
///
/// Returns `(offset, instruction)` pairs in code order. Every jump must land
/// on the first byte of a decoded instruction.
pub fn decode(code: &[u8]) -> Result<Vec<(usize, Instruction)>, DecodeError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (instruction, next) = Instruction::decode_at(code, offset)?;
        instructions.push((offset, instruction));
        offset = next;
    }

    for &(offset, instruction) in &instructions {
        if let Some(target) = instruction.jump_target() {
            if instructions
                .binary_search_by_key(&target, |&(o, _)| o)
                .is_err()
            {
                return Err(DecodeError::MisalignedJump { offset, target });
            }
        }
    }

    Ok(instructions)
}

/// Encode an instruction list laid out from offset zero
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.iter().map(Instruction::encoded_len).sum());
    for instruction in instructions {
        let at = out.len();
        instruction.encode(at, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_shape_slots() {
        assert_eq!(CallShape::positional(3).slots(), 3);
        assert_eq!(CallShape::positional(3).with_keywords(2).slots(), 7);
        assert_eq!(
            CallShape::positional(1).with_var_positional().with_var_keyword().slots(),
            3
        );
        assert_eq!(CallShape::expandable(false).slots(), 1);
        assert_eq!(CallShape::expandable(true).slots(), 2);
    }

    #[test]
    fn test_call_shape_opcodes() {
        assert_eq!(CallShape::positional(0).opcode(), Opcode::Call);
        assert_eq!(CallShape::positional(0).with_var_positional().opcode(), Opcode::CallVar);
        assert_eq!(CallShape::positional(0).with_var_keyword().opcode(), Opcode::CallKw);
        assert_eq!(
            CallShape::positional(0).with_var_positional().with_var_keyword().opcode(),
            Opcode::CallVarKw
        );
        assert_eq!(CallShape::expandable(true).opcode(), Opcode::CallEx);
    }

    #[test]
    fn test_backward_jump_decodes_to_absolute_target() {
        let program = [
            Instruction::PushTrue,
            Instruction::JumpIfFalse(7),
            Instruction::Jump(0),
            Instruction::PushNil,
            Instruction::Return,
        ];
        let code = encode(&program);
        let decoded: Vec<Instruction> = decode(&code).unwrap().into_iter().map(|(_, i)| i).collect();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let err = decode(&[Opcode::PushNil.to_byte(), 0xEE]).unwrap_err();
        assert_eq!(err, DecodeError::InvalidOpcode { offset: 1, byte: 0xEE });
    }

    #[test]
    fn test_decode_rejects_truncated_immediate() {
        let err = decode(&[Opcode::Call.to_byte(), 1]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { offset: 0, opcode: Opcode::Call });
    }

    #[test]
    fn test_decode_rejects_misaligned_jump() {
        // jump lands on the operand byte of push_long_small
        let code = [
            Opcode::Jump.to_byte(), 0x00, 0x01,
            Opcode::PushLongSmall.to_byte(), 5,
            Opcode::Return.to_byte(),
        ];
        let err = decode(&code).unwrap_err();
        assert_eq!(err, DecodeError::MisalignedJump { offset: 0, target: 4 });
    }

    #[test]
    fn test_decode_rejects_unknown_call_ex_flags() {
        let err = decode(&[Opcode::CallEx.to_byte(), 0x06]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidOperand { operand: 0x06, .. }));
    }
}
