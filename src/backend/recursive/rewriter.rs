//! Call-site rewriter
//!
//! A single linear pass over a decoded body. Every user call is expanded so
//! that its callee is first passed through the entry point; calls emitted by
//! a previous rewrite carry a `Synthetic` marker and are copied verbatim.
//!
//! For a call with `n` argument slots the expansion is:
//!
//! ```text
//! build_tuple n            [callee, args]        -> [callee, argt]
//! swap                                           -> [argt, callee]
//! load_capture entry                             -> [argt, callee, entry]
//! load_capture adapter                           -> [argt, callee, entry, (w, extras, kw)]
//! unpack_sequence 3                              -> [argt, callee, entry, w, extras, kw]
//! synthetic
//! call_var_kw pos=1 kw=0                         -> [argt, callee, decorate]
//! swap                                           -> [argt, decorate, callee]
//! synthetic
//! call pos=1 kw=0                                -> [argt, wrapped]
//! swap                                           -> [wrapped, argt]
//! unpack_sequence n                              -> [wrapped, args]
//! <original call>
//! ```
//!
//! Jump targets are remapped through an old-to-new offset table; a jump to
//! an instrumented call lands on the start of its expansion.

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace};

use crate::backend::bytecode::chunk::{Chunk, MAX_CODE_LEN};
use crate::backend::bytecode::error::{DecodeError, RewriteError, RewriteResult};
use crate::backend::bytecode::instruction::{encode, CallShape, Instruction};

/// Shape of the synthetic call to the entry point: `entry(w, *extras, **kw)`
const ENTRY_CALL: CallShape = CallShape::positional(1).with_var_positional().with_var_keyword();

/// Shape of the synthetic call applying the decorator to the callee
const DECORATE_CALL: CallShape = CallShape::positional(1);

/// Statistics about one rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// User call sites expanded
    pub call_sites_instrumented: usize,
    /// Marked calls copied verbatim
    pub synthetic_calls_skipped: usize,
    /// Growth of the encoded body
    pub bytes_added: usize,
}

/// Rewrites every user call site of a body
#[derive(Debug)]
pub struct CallSiteRewriter {
    entry_capture: u16,
    adapter_capture: u16,
    stats: RewriteStats,
}

impl CallSiteRewriter {
    /// Rewriter loading the entry point and adapter from the given capture slots
    pub fn new(entry_capture: u16, adapter_capture: u16) -> Self {
        Self {
            entry_capture,
            adapter_capture,
            stats: RewriteStats::default(),
        }
    }

    /// Statistics for the most recent rewrite
    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    /// Produce an instrumented copy of `chunk`
    ///
    /// The copy keeps the constants, names and local count of the original.
    /// Its signature is left empty; callers restore the original one.
    pub fn rewrite(&mut self, chunk: &Chunk) -> RewriteResult<Chunk> {
        self.stats = RewriteStats::default();
        let decoded = chunk.instructions()?;

        let mut out = Emitted::with_capacity(decoded.len() * 2);
        let mut offset_map: Vec<Option<usize>> = vec![None; chunk.len() + 1];
        // (index in `out`, offset of the original jump)
        let mut jumps: Vec<(usize, usize)> = Vec::new();

        let mut iter = decoded.iter().copied();
        while let Some((offset, instruction)) = iter.next() {
            offset_map[offset] = Some(out.offset);
            match instruction {
                Instruction::Synthetic => {
                    let (call_offset, call) = match iter.next() {
                        Some((call_offset, call @ Instruction::Call(_))) => (call_offset, call),
                        _ => return Err(RewriteError::DanglingMarker { offset }),
                    };
                    trace!(target: "recwrap::rewrite", offset, "skipping synthetic call");
                    out.push(Instruction::Synthetic);
                    offset_map[call_offset] = Some(out.offset);
                    out.push(call);
                    self.stats.synthetic_calls_skipped += 1;
                }
                Instruction::Call(shape) => {
                    trace!(
                        target: "recwrap::rewrite",
                        offset,
                        opcode = %shape.opcode(),
                        slots = shape.slots(),
                        "instrumenting call site"
                    );
                    for expanded in self.expand(offset, shape)? {
                        out.push(expanded);
                    }
                    self.stats.call_sites_instrumented += 1;
                }
                other => {
                    if other.jump_target().is_some() {
                        jumps.push((out.instructions.len(), offset));
                    }
                    out.push(other);
                }
            }
        }

        for (index, offset) in jumps {
            let jump = out.instructions[index];
            if let Some(target) = jump.jump_target() {
                let new_target = offset_map
                    .get(target)
                    .copied()
                    .flatten()
                    .ok_or(DecodeError::MisalignedJump { offset, target })?;
                out.instructions[index] = jump.retarget(new_target);
            }
        }

        let code = encode(&out.instructions);
        if code.len() > MAX_CODE_LEN {
            return Err(RewriteError::CodeTooLarge { len: code.len() });
        }
        self.stats.bytes_added = code.len() - chunk.len();

        debug!(
            target: "recwrap::rewrite",
            chunk = chunk.name(),
            instrumented = self.stats.call_sites_instrumented,
            skipped = self.stats.synthetic_calls_skipped,
            bytes_added = self.stats.bytes_added,
            "rewrote body"
        );

        Ok(Chunk::from_parts(
            chunk.name().to_string(),
            code,
            chunk.constants().to_vec(),
            chunk.names().to_vec(),
            chunk.local_count(),
        ))
    }

    /// Expansion of one user call site
    fn expand(&self, offset: usize, shape: CallShape) -> RewriteResult<SmallVec<[Instruction; 13]>> {
        let slots = shape.slots();
        let n = u8::try_from(slots).map_err(|_| RewriteError::TooManySlots { offset, slots })?;
        Ok(smallvec![
            Instruction::BuildTuple(n),
            Instruction::Swap,
            Instruction::LoadCapture(self.entry_capture),
            Instruction::LoadCapture(self.adapter_capture),
            Instruction::UnpackSequence(3),
            Instruction::Synthetic,
            Instruction::Call(ENTRY_CALL),
            Instruction::Swap,
            Instruction::Synthetic,
            Instruction::Call(DECORATE_CALL),
            Instruction::Swap,
            Instruction::UnpackSequence(n),
            Instruction::Call(shape),
        ])
    }
}

/// Output instruction list with its running encoded length
struct Emitted {
    instructions: Vec<Instruction>,
    offset: usize,
}

impl Emitted {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            instructions: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    fn push(&mut self, instruction: Instruction) {
        self.offset += instruction.encoded_len();
        self.instructions.push(instruction);
    }
}

/// Rewrite `chunk` and return it with the statistics
pub fn rewrite_call_sites(
    chunk: &Chunk,
    entry_capture: u16,
    adapter_capture: u16,
) -> RewriteResult<(Chunk, RewriteStats)> {
    let mut rewriter = CallSiteRewriter::new(entry_capture, adapter_capture);
    let rewritten = rewriter.rewrite(chunk)?;
    Ok((rewritten, rewriter.stats))
}
