//! Low-overhead sampling profiler for managed-language processes.
//!
//! A timer (signal or helper thread) interrupts the process periodically; each
//! tick walks the native frames through the code caches and the managed frames
//! through the runtime, then aggregates the result into fixed-capacity,
//! hash-sharded tables that can be dumped as text or JSON at any time.

extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod agent;

mod call_trace_table;
mod code_cache;
pub mod configuration;
mod context;
mod error;
mod frame;
mod frame_buffer;
mod method_table;
#[cfg(target_os = "linux")]
mod native_libraries;
mod profile_serializer;
mod profiler;
mod reporter;
mod runtime;
mod sample_table;
mod sampler;
mod scheduler;
#[cfg(unix)]
mod signal_scheduler;
#[cfg(not(unix))]
#[path = "signal_scheduler_unsupported_platform.rs"]
mod signal_scheduler;
mod spin_lock;
mod stack_walker;
mod symbols;
mod timer_thread_scheduler;
mod util;

#[cfg(test)]
mod tests;

pub use call_trace_table::{CallTraceSample, CallTraceTable};
pub use code_cache::CodeCache;
pub use configuration::Configuration;
pub use context::{ExecutionContext, LiveStack, StackMemory};
pub use error::{CodeCacheError, ProfilerError, SymbolsError};
pub use frame::{Frame, FrameRange, MethodId, NameId, Symbol, BCI_NATIVE_FRAME};
pub use frame_buffer::{FrameBuffer, FrameBufferOverflow};
pub use method_table::{MethodSample, MethodTable};
pub use profiler::Profiler;
pub use reporter::Reporter;
pub use runtime::{FailureKind, ManagedRuntime, RuntimeEvent};
pub use sample_table::{Recorded, CONCURRENCY_LEVEL};
pub use sampler::SamplerStats;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use stack_walker::{StackWalker, MAX_NATIVE_FRAMES, MAX_STACK_FRAMES};
pub use symbols::{Symbols, MAX_NATIVE_LIBS};
