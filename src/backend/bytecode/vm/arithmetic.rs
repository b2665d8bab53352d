//! Arithmetic and comparison operations for the bytecode VM.
//!
//! Integers use checked arithmetic. `Add` also concatenates strings and
//! tuples, and `Lt` orders strings as well as integers.

use std::sync::Arc;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::Value;

impl Vm {
    // === Basic Arithmetic Operations ===

    pub(super) fn op_add(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Long(x), Value::Long(y)) => {
                Value::Long(x.checked_add(*y).ok_or(VmError::ArithmeticOverflow)?)
            }
            (Value::Str(x), Value::Str(y)) => Value::Str(Arc::from(format!("{}{}", x, y))),
            (Value::Tuple(x), Value::Tuple(y)) => {
                Value::tuple(x.iter().chain(y.iter()).cloned().collect())
            }
            _ => return Err(mismatch("int, str or tuple", &a, &b)),
        };
        self.push(result)
    }

    pub(super) fn op_sub(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Long(x), Value::Long(y)) => {
                Value::Long(x.checked_sub(*y).ok_or(VmError::ArithmeticOverflow)?)
            }
            _ => return Err(mismatch("int", &a, &b)),
        };
        self.push(result)
    }

    pub(super) fn op_mul(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Long(x), Value::Long(y)) => {
                Value::Long(x.checked_mul(*y).ok_or(VmError::ArithmeticOverflow)?)
            }
            _ => return Err(mismatch("int", &a, &b)),
        };
        self.push(result)
    }

    // === Comparison Operations ===

    pub(super) fn op_lt(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Long(x), Value::Long(y)) => x < y,
            (Value::Str(x), Value::Str(y)) => x < y,
            _ => return Err(mismatch("int or str", &a, &b)),
        };
        self.push(Value::Bool(result))
    }

    pub(super) fn op_eq(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(a == b))
    }

    pub(super) fn op_not(&mut self) -> VmResult<()> {
        let a = self.pop()?;
        self.push(Value::Bool(!a.is_truthy()))
    }
}

/// Type error naming whichever operand is off
fn mismatch(expected: &'static str, a: &Value, b: &Value) -> VmError {
    let got = if a.type_name() == b.type_name() || matches!(a, Value::Long(_) | Value::Str(_)) {
        b.type_name()
    } else {
        a.type_name()
    };
    VmError::TypeError { expected, got }
}
