//! Type definitions for the bytecode VM.
//!
//! This module contains the core types used throughout the VM:
//! - VmError: Error types that can occur during execution
//! - Frame: Activation record of a running function
//! - VmConfig: VM configuration options, loadable from TOML

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::backend::bytecode::error::{DecodeError, RewriteError};
use crate::backend::models::{Function, Value};

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Stack underflow
    StackUnderflow,
    /// Body could not be decoded
    Decode(DecodeError),
    /// Invalid constant index
    InvalidConstant(u16),
    /// Invalid local variable index
    InvalidLocal(u8),
    /// Invalid capture table index
    InvalidCapture(u16),
    /// Invalid name table index
    InvalidName(u16),
    /// Global name not bound in the owning scope
    UnboundGlobal(String),
    /// Type error in operation
    TypeError { expected: &'static str, got: &'static str },
    /// Call target is not callable
    NotCallable(&'static str),
    /// Arguments could not be bound to a callable's parameters
    ArgumentError { function: String, message: String },
    /// Arithmetic overflow
    ArithmeticOverflow,
    /// Instruction pointer out of bounds
    IpOutOfBounds,
    /// Instruction executed with no frame on the call stack
    NoActiveFrame,
    /// Call depth limit reached
    CallDepthExceeded(usize),
    /// Value stack overflow
    ValueStackOverflow,
    /// Error raised by host or user code
    Raised(String),
    /// Call-site rewrite failed
    Rewrite(RewriteError),
}

impl VmError {
    /// Argument binding error for `function`
    pub fn argument(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentError {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Error raised by user code
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised(message.into())
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::Decode(err) => write!(f, "Decode error: {}", err),
            Self::InvalidConstant(i) => write!(f, "Invalid constant index: {}", i),
            Self::InvalidLocal(i) => write!(f, "Invalid local variable index: {}", i),
            Self::InvalidCapture(i) => write!(f, "Invalid capture index: {}", i),
            Self::InvalidName(i) => write!(f, "Invalid name index: {}", i),
            Self::UnboundGlobal(name) => write!(f, "Name '{}' is not defined", name),
            Self::TypeError { expected, got } => {
                write!(f, "Type error: expected {}, got {}", expected, got)
            }
            Self::NotCallable(type_name) => write!(f, "'{}' object is not callable", type_name),
            Self::ArgumentError { function, message } => write!(f, "{}() {}", function, message),
            Self::ArithmeticOverflow => write!(f, "Arithmetic overflow"),
            Self::IpOutOfBounds => write!(f, "Instruction pointer out of bounds"),
            Self::NoActiveFrame => write!(f, "No active frame"),
            Self::CallDepthExceeded(limit) => {
                write!(f, "Maximum call depth exceeded ({})", limit)
            }
            Self::ValueStackOverflow => write!(f, "Value stack overflow"),
            Self::Raised(msg) => write!(f, "{}", msg),
            Self::Rewrite(err) => write!(f, "Rewrite error: {}", err),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            Self::Rewrite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<RewriteError> for VmError {
    fn from(err: RewriteError) -> Self {
        Self::Rewrite(err)
    }
}

/// Activation record of a running function
#[derive(Debug)]
pub(super) struct Frame {
    /// Function being executed
    pub function: Arc<Function>,
    /// Current instruction pointer
    pub ip: usize,
    /// Height of the value stack when the frame was entered
    pub base: usize,
    /// Local slots, parameters first
    pub locals: Vec<Value>,
}

impl Frame {
    pub fn new(function: Arc<Function>, locals: Vec<Value>, base: usize) -> Self {
        Self {
            function,
            ip: 0,
            base,
            locals,
        }
    }
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Maximum value stack size
    pub max_value_stack: usize,
    /// Maximum depth of nested function calls
    pub max_call_depth: usize,
    /// Trace every executed instruction
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_value_stack: 65536,
            max_call_depth: 512,
            trace: false,
        }
    }
}

impl VmConfig {
    /// Parse a configuration from TOML text
    ///
    /// Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&text)
    }
}

/// Errors loading a `VmConfig`
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(std::io::Error),
    /// Contents are not a valid configuration
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Cannot read config: {}", err),
            Self::Parse(err) => write!(f, "Invalid config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
        }
    }
}
