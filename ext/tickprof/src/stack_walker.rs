use std::mem;

use crate::context::{ExecutionContext, StackMemory};
use crate::frame::Frame;
use crate::runtime::{FailureKind, ManagedRuntime};
use crate::symbols::Symbols;

/// Maximum depth of a captured trace, native and managed frames combined.
pub const MAX_STACK_FRAMES: usize = 4096;
/// Maximum number of native frames in front of the managed ones.
pub const MAX_NATIVE_FRAMES: usize = 128;

// Frame pointers further than this above sp are not trusted. Without a
// known stack end this is the only bound on reads: a garbage fp on a thread
// whose stack is smaller than the span can point past its top and fault.
// Runtimes that know their threads' stacks should set
// ExecutionContext::stack_end.
const MAX_STACK_SPAN: usize = 8 << 20;
const WORD: usize = mem::size_of::<usize>();

/// Captures the stack of one execution context: native frames by chasing
/// frame pointers through the code caches, followed by the managed frames
/// reported by the runtime.
pub struct StackWalker<'a> {
    symbols: &'a Symbols,
    runtime: &'a dyn ManagedRuntime,
    memory: &'a dyn StackMemory,
}

impl<'a> StackWalker<'a> {
    pub fn new(
        symbols: &'a Symbols,
        runtime: &'a dyn ManagedRuntime,
        memory: &'a dyn StackMemory,
    ) -> Self {
        Self {
            symbols,
            runtime,
            memory,
        }
    }

    /// Fills `frames` innermost first and returns the depth. On failure the
    /// contents of `frames` are unspecified and must not be stored.
    // async-signal-safe
    pub fn capture(
        &self,
        context: &ExecutionContext,
        frames: &mut [Frame],
    ) -> Result<usize, FailureKind> {
        let limit = frames.len().min(MAX_STACK_FRAMES);
        let frames = &mut frames[..limit];

        let native = self.native_frames(context, frames);
        let managed = self.runtime.walk(context, &mut frames[native..])?;
        if managed == 0 {
            return Err(FailureKind::NoManagedFrame);
        }
        Ok(native + managed.min(limit - native))
    }

    fn native_frames(&self, context: &ExecutionContext, frames: &mut [Frame]) -> usize {
        let max = frames.len().min(MAX_NATIVE_FRAMES);
        let mut pc = context.pc;
        let mut fp = context.fp;
        let mut depth = 0;

        while depth < max {
            let Some(symbol) = self.symbols.find(pc) else {
                break;
            };
            frames[depth] = Frame::native(symbol);
            depth += 1;

            if !self.is_valid_frame_pointer(fp, context) {
                break;
            }
            let (Some(next_fp), Some(return_address)) =
                (self.memory.read_word(fp), self.memory.read_word(fp + WORD))
            else {
                break;
            };
            // Stacks grow down: the caller's frame is always higher
            if next_fp <= fp || return_address == 0 {
                break;
            }
            // Resolve the call instruction, not the one after it
            pc = return_address - 1;
            fp = next_fp;
        }
        depth
    }

    // fp and fp + WORD are read
    fn is_valid_frame_pointer(&self, fp: usize, context: &ExecutionContext) -> bool {
        let sp = context.sp;
        if fp == 0 || fp % WORD != 0 || fp < sp || fp - sp >= MAX_STACK_SPAN {
            return false;
        }
        match context.stack_end {
            Some(end) => fp.checked_add(2 * WORD).is_some_and(|last| last <= end),
            None => true,
        }
    }
}
