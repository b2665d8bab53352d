//! Tests for the call-site rewriter and the entry point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::rewriter::{rewrite_call_sites, CallSiteRewriter};
use super::{RecursiveWrap, WrapHistory, ENTRY_POINT_NAME};
use crate::backend::bytecode::chunk::{Chunk, ChunkBuilder, MAX_CODE_LEN};
use crate::backend::bytecode::error::RewriteError;
use crate::backend::bytecode::instruction::{CallShape, Instruction};
use crate::backend::bytecode::opcodes::Opcode;
use crate::backend::bytecode::vm::{Vm, VmError};
use crate::backend::models::{CallArgs, Capture, Function, Kwargs, NativeFn, Scope, Signature, Value};

fn instructions(chunk: &Chunk) -> Vec<Instruction> {
    chunk
        .instructions()
        .unwrap()
        .into_iter()
        .map(|(_, instruction)| instruction)
        .collect()
}

fn call_body(shape: CallShape) -> Chunk {
    let mut builder = ChunkBuilder::new("f");
    builder.emit_load_global("g");
    builder.emit_call(shape);
    builder.emit(Instruction::Return);
    builder.build()
}

#[test]
fn test_call_site_expansion() {
    let (rewritten, stats) = rewrite_call_sites(&call_body(CallShape::positional(0)), 4, 5).unwrap();

    assert_eq!(stats.call_sites_instrumented, 1);
    assert_eq!(stats.synthetic_calls_skipped, 0);
    assert_eq!(
        instructions(&rewritten),
        vec![
            Instruction::LoadGlobal(0),
            Instruction::BuildTuple(0),
            Instruction::Swap,
            Instruction::LoadCapture(4),
            Instruction::LoadCapture(5),
            Instruction::UnpackSequence(3),
            Instruction::Synthetic,
            Instruction::Call(CallShape::positional(1).with_var_positional().with_var_keyword()),
            Instruction::Swap,
            Instruction::Synthetic,
            Instruction::Call(CallShape::positional(1)),
            Instruction::Swap,
            Instruction::UnpackSequence(0),
            Instruction::Call(CallShape::positional(0)),
            Instruction::Return,
        ]
    );
}

#[test]
fn test_slot_count_follows_call_shape() {
    let shapes = [
        (CallShape::positional(2).with_keywords(3), 8),
        (CallShape::positional(1).with_var_positional(), 2),
        (CallShape::positional(0).with_keywords(1).with_var_keyword(), 3),
        (CallShape::expandable(false), 1),
        (CallShape::expandable(true), 2),
    ];
    for (shape, slots) in shapes {
        let (rewritten, _) = rewrite_call_sites(&call_body(shape), 0, 1).unwrap();
        let body = instructions(&rewritten);
        assert_eq!(body[1], Instruction::BuildTuple(slots));
        assert_eq!(body[12], Instruction::UnpackSequence(slots));
        assert_eq!(body[13], Instruction::Call(shape));
    }
}

#[test]
fn test_synthetic_calls_are_not_instrumented_again() {
    let (once, _) = rewrite_call_sites(&call_body(CallShape::positional(0)), 0, 1).unwrap();
    let (twice, stats) = rewrite_call_sites(&once, 2, 3).unwrap();

    assert_eq!(stats.call_sites_instrumented, 1);
    assert_eq!(stats.synthetic_calls_skipped, 2);
    let opcodes: Vec<Opcode> = instructions(&twice).iter().map(Instruction::opcode).collect();
    assert_eq!(opcodes.iter().filter(|op| **op == Opcode::Synthetic).count(), 4);
    assert_eq!(opcodes.iter().filter(|op| op.is_call()).count(), 5);
}

#[test]
fn test_jumps_are_remapped() {
    let mut builder = ChunkBuilder::new("f");
    builder.emit(Instruction::PushTrue);
    let else_label = builder.emit_jump(Opcode::JumpIfFalse);
    builder.emit_load_global("g");
    builder.emit_call(CallShape::positional(0));
    let end_label = builder.emit_jump(Opcode::Jump);
    builder.patch_jump(else_label);
    builder.emit(Instruction::PushNil);
    builder.patch_jump(end_label);
    builder.emit(Instruction::Return);
    let chunk = builder.build();

    let (rewritten, stats) = rewrite_call_sites(&chunk, 0, 1).unwrap();
    assert!(stats.bytes_added > 0);

    let decoded = rewritten.instructions().unwrap();
    let at = |target: usize| {
        decoded
            .iter()
            .find(|(offset, _)| *offset == target)
            .map(|(_, instruction)| *instruction)
    };
    let conditional = decoded
        .iter()
        .find_map(|(_, i)| match i {
            Instruction::JumpIfFalse(t) => Some(*t),
            _ => None,
        })
        .unwrap();
    let unconditional = decoded
        .iter()
        .find_map(|(_, i)| match i {
            Instruction::Jump(t) => Some(*t),
            _ => None,
        })
        .unwrap();
    assert_eq!(at(conditional), Some(Instruction::PushNil));
    assert_eq!(at(unconditional), Some(Instruction::Return));
}

#[test]
fn test_jump_to_call_lands_on_expansion() {
    // pushes differ per branch, both paths meet at the call
    let mut builder = ChunkBuilder::new("f");
    builder.emit_load_global("g");
    builder.emit(Instruction::PushTrue);
    let else_label = builder.emit_jump(Opcode::JumpIfFalse);
    builder.emit(Instruction::PushLongSmall(1));
    let join = builder.emit_jump(Opcode::Jump);
    builder.patch_jump(else_label);
    builder.emit(Instruction::PushLongSmall(2));
    builder.patch_jump(join);
    builder.emit_call(CallShape::positional(1));
    builder.emit(Instruction::Return);

    let (rewritten, _) = rewrite_call_sites(&builder.build(), 0, 1).unwrap();
    let decoded = rewritten.instructions().unwrap();
    let target = decoded
        .iter()
        .find_map(|(_, i)| match i {
            Instruction::Jump(t) => Some(*t),
            _ => None,
        })
        .unwrap();
    let landing = decoded.iter().find(|(offset, _)| *offset == target).map(|(_, i)| *i);
    assert_eq!(landing, Some(Instruction::BuildTuple(1)));
}

#[test]
fn test_body_without_calls_is_unchanged() {
    let mut builder = ChunkBuilder::new("f");
    builder.set_signature(Signature::new(["x"]));
    builder.emit(Instruction::LoadLocal(0));
    builder.emit_constant(Value::Long(1000));
    builder.emit(Instruction::Add);
    builder.emit(Instruction::Return);
    let chunk = builder.build();

    let mut rewriter = CallSiteRewriter::new(0, 1);
    let rewritten = rewriter.rewrite(&chunk).unwrap();
    assert_eq!(rewritten.code(), chunk.code());
    assert_eq!(rewritten.constants(), chunk.constants());
    assert_eq!(rewritten.local_count(), chunk.local_count());
    assert_eq!(rewritten.signature(), &Signature::default());
    assert_eq!(rewriter.stats().call_sites_instrumented, 0);
}

#[test]
fn test_dangling_marker_is_rejected() {
    let mut builder = ChunkBuilder::new("f");
    builder.emit(Instruction::Synthetic);
    builder.emit(Instruction::PushNil);
    builder.emit(Instruction::Return);
    let err = rewrite_call_sites(&builder.build(), 0, 1).unwrap_err();
    assert_eq!(err, RewriteError::DanglingMarker { offset: 0 });
}

#[test]
fn test_too_many_slots_is_rejected() {
    let shape = CallShape::positional(200).with_keywords(40);
    let err = rewrite_call_sites(&call_body(shape), 0, 1).unwrap_err();
    assert_eq!(err, RewriteError::TooManySlots { offset: 3, slots: 280 });
}

/// `calls` statements of `g()` followed by `return nil`
fn call_dense_body(calls: usize) -> Chunk {
    let mut builder = ChunkBuilder::new("dense");
    for _ in 0..calls {
        builder.emit_load_global("g");
        builder.emit_call(CallShape::positional(0));
        builder.emit(Instruction::Pop);
    }
    builder.emit(Instruction::PushNil);
    builder.emit(Instruction::Return);
    builder.build()
}

/// Identity transformation counting its applications
fn counting(calls: &Arc<AtomicUsize>) -> Value {
    let calls = Arc::clone(calls);
    NativeFn::new("w", move |_vm, args: CallArgs| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(args.positional.into_iter().next().unwrap_or(Value::Nil))
    })
    .into_value()
}

#[test]
fn test_code_growth_past_the_limit_is_rejected() {
    // 7 bytes per site before, 30 after
    let body = call_dense_body(1500);
    assert_eq!(body.len(), 10_502);
    assert!(body.len() <= MAX_CODE_LEN);

    let err = rewrite_call_sites(&body, 0, 1).unwrap_err();
    assert_eq!(err, RewriteError::CodeTooLarge { len: 45_002 });

    // the largest body that still fits
    let (fits, stats) = rewrite_call_sites(&call_dense_body(1092), 0, 1).unwrap();
    assert!(fits.len() <= MAX_CODE_LEN);
    assert_eq!(stats.bytes_added, 1092 * 23);
}

#[test]
fn test_oversized_rewrite_reaches_the_caller() {
    let dense = Function::new("dense", Arc::new(call_dense_body(1500)), Scope::new("test")).into_value();
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = RecursiveWrap::new();
    let mut vm = Vm::new();

    let decorator = wrap.apply_recursive(counting(&calls), Vec::new(), Kwargs::new());
    let result = vm.call_value(&decorator, CallArgs::one(dense.clone()));
    assert_eq!(
        result,
        Err(VmError::Rewrite(RewriteError::CodeTooLarge { len: 45_002 }))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(wrap.wrap_history(&dense).is_empty());
}

#[test]
fn test_full_capture_table_is_rejected() {
    let mut builder = ChunkBuilder::new("f");
    builder.emit(Instruction::PushNil);
    builder.emit(Instruction::Return);
    let captures = vec![Capture::new("c", Value::Nil); u16::MAX as usize];
    let full = Function::new("f", builder.build_arc(), Scope::new("test"))
        .with_captures(captures)
        .into_value();
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = RecursiveWrap::new();
    let mut vm = Vm::new();

    let decorator = wrap.apply_recursive(counting(&calls), Vec::new(), Kwargs::new());
    assert_eq!(
        vm.call_value(&decorator, CallArgs::one(full)),
        Err(VmError::Rewrite(RewriteError::TooManyCaptures {
            count: u16::MAX as usize + 2
        }))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_malformed_body_is_rejected() {
    let mut builder = ChunkBuilder::new("f");
    builder.emit_raw(&[0xEE]);
    let err = rewrite_call_sites(&builder.build(), 0, 1).unwrap_err();
    assert!(matches!(err, RewriteError::Decode(_)));
}

#[test]
fn test_entry_point_requires_a_transformation() {
    let wrap = RecursiveWrap::new();
    let entry = wrap.entry_point();
    assert_eq!(entry.to_string(), format!("<built-in function {}>", ENTRY_POINT_NAME));

    let err = Vm::new().call_value(&entry, CallArgs::default()).unwrap_err();
    assert!(matches!(err, VmError::ArgumentError { .. }));
}

#[test]
fn test_decorator_takes_one_argument() {
    let wrap = RecursiveWrap::new();
    let decorator = wrap.apply_recursive(Value::str("w"), Vec::new(), Default::default());
    let err = Vm::new()
        .call_value(&decorator, CallArgs::positional(vec![Value::Nil, Value::Nil]))
        .unwrap_err();
    assert!(matches!(err, VmError::ArgumentError { .. }));
}

#[test]
fn test_history_accessors_ignore_non_functions() {
    let wrap = RecursiveWrap::new();
    assert!(!wrap.set_wrap_history(&Value::Long(1), WrapHistory::from_iter(["w"])));
    assert!(wrap.wrap_history(&Value::Long(1)).is_empty());
    assert!(Arc::strong_count(wrap.registry()) >= 1);
}
