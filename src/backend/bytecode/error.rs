//! Error types for decoding and rewriting bytecode.

use super::opcodes::Opcode;

/// Errors raised while decoding a byte stream into instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte does not name an opcode
    InvalidOpcode { offset: usize, byte: u8 },
    /// Immediate operand runs past the end of the code
    Truncated { offset: usize, opcode: Opcode },
    /// Operand value not valid for the opcode
    InvalidOperand { offset: usize, opcode: Opcode, operand: u8 },
    /// Jump lands outside the body
    JumpOutOfRange { offset: usize, target: isize },
    /// Jump lands inside another instruction
    MisalignedJump { offset: usize, target: usize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOpcode { offset, byte } => {
                write!(f, "Invalid opcode 0x{:02x} at {:04x}", byte, offset)
            }
            Self::Truncated { offset, opcode } => {
                write!(f, "Truncated {} at {:04x}", opcode, offset)
            }
            Self::InvalidOperand { offset, opcode, operand } => {
                write!(f, "Invalid operand {} for {} at {:04x}", operand, opcode, offset)
            }
            Self::JumpOutOfRange { offset, target } => {
                write!(f, "Jump at {:04x} targets {} outside the body", offset, target)
            }
            Self::MisalignedJump { offset, target } => {
                write!(
                    f,
                    "Jump at {:04x} targets {:04x}, which is not an instruction boundary",
                    offset, target
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors raised when a `ChunkBuilder` outgrows the encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// More constants than a `u16` index can address
    TooManyConstants,
    /// More global names than a `u16` index can address
    TooManyNames,
    /// Body exceeds the jump encoding range
    CodeTooLarge { len: usize },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyConstants => write!(f, "Too many constants in chunk (max {})", u16::MAX as usize + 1),
            Self::TooManyNames => write!(f, "Too many names in chunk (max {})", u16::MAX as usize + 1),
            Self::CodeTooLarge { len } => {
                write!(f, "Chunk is {} bytes (max {})", len, i16::MAX)
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Errors raised by the call-site rewriter
///
/// Any of these aborts the rewrite of that body; no partial output is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// Body could not be decoded
    Decode(DecodeError),
    /// Synthetic marker not followed by a call
    DanglingMarker { offset: usize },
    /// Call site has more argument slots than one aggregate can hold
    TooManySlots { offset: usize, slots: usize },
    /// Rewritten body exceeds the jump encoding range
    CodeTooLarge { len: usize },
    /// Capture table exceeds the `LoadCapture` index range
    TooManyCaptures { count: usize },
}

impl std::fmt::Display for RewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "Cannot decode body: {}", err),
            Self::DanglingMarker { offset } => {
                write!(f, "Synthetic marker at {:04x} is not followed by a call", offset)
            }
            Self::TooManySlots { offset, slots } => write!(
                f,
                "Call at {:04x} has {} argument slots (max {})",
                offset,
                slots,
                u8::MAX
            ),
            Self::CodeTooLarge { len } => {
                write!(f, "Rewritten body is {} bytes (max {})", len, i16::MAX)
            }
            Self::TooManyCaptures { count } => {
                write!(f, "Too many captures: {} (max {})", count, u16::MAX)
            }
        }
    }
}

impl std::error::Error for RewriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for RewriteError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

/// Result type for rewriting
pub type RewriteResult<T> = Result<T, RewriteError>;
