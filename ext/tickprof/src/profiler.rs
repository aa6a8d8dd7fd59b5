use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crate::call_trace_table::CallTraceTable;
use crate::configuration::Configuration;
use crate::context::{ExecutionContext, LiveStack, StackMemory};
use crate::error::{CodeCacheError, ProfilerError};
use crate::frame::{Frame, Symbol};
use crate::frame_buffer::FrameBuffer;
use crate::method_table::MethodTable;
use crate::profile_serializer::ProfileSerializer;
use crate::reporter::Reporter;
use crate::runtime::{FailureKind, ManagedRuntime, RuntimeEvent};
use crate::sample_table::{Recorded, CONCURRENCY_LEVEL};
use crate::sampler::{Sampler, SamplerStats};
use crate::scheduler::new_scheduler;
use crate::spin_lock::SpinLock;
#[cfg(test)]
use crate::spin_lock::SpinLockGuard;
use crate::stack_walker::{StackWalker, MAX_STACK_FRAMES};
use crate::symbols::Symbols;

/// One profiling session per process: owns the tick source, the code caches
/// and the aggregated samples.
///
/// Lifecycle operations and dumps are serialised by an internal mutex.
/// [`Profiler::record_sample`] and [`Profiler::tick`] never take it and may
/// run inside a signal handler.
pub struct Profiler {
    configuration: Configuration,
    runtime: Box<dyn ManagedRuntime>,
    memory: Box<dyn StackMemory>,
    symbols: Symbols,
    traces: CallTraceTable,
    methods: MethodTable,
    // Allocated by the first start
    frame_buffer: OnceLock<FrameBuffer>,
    scratch: Box<[SpinLock<Box<[Frame]>>]>,
    sampler: Sampler,
    lifecycle: Mutex<()>,
}

impl Profiler {
    pub fn new(configuration: Configuration, runtime: Box<dyn ManagedRuntime>) -> Self {
        Self {
            runtime,
            memory: Box::new(LiveStack),
            symbols: Symbols::new(configuration.code_cache_capacity),
            traces: CallTraceTable::new(configuration.max_call_traces),
            methods: MethodTable::new(configuration.max_call_traces),
            frame_buffer: OnceLock::new(),
            scratch: (0..CONCURRENCY_LEVEL)
                .map(|_| SpinLock::new(vec![Frame::default(); MAX_STACK_FRAMES].into_boxed_slice()))
                .collect(),
            sampler: Sampler::new(new_scheduler(configuration.scheduler)),
            lifecycle: Mutex::new(()),
            configuration,
        }
    }

    pub fn with_stack_memory(mut self, memory: Box<dyn StackMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.runtime.as_ref()
    }

    pub(crate) fn traces(&self) -> &CallTraceTable {
        &self.traces
    }

    pub(crate) fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub(crate) fn frame_buffer(&self) -> Option<&FrameBuffer> {
        self.frame_buffer.get()
    }

    #[cfg(test)]
    pub(crate) fn scratch_for_test(&self, thread_id: u64) -> SpinLockGuard<'_, Box<[Frame]>> {
        self.scratch[(thread_id % CONCURRENCY_LEVEL as u64) as usize].lock()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a session: clears the previous session's samples and counters,
    /// loads new native libraries and arms the tick source. The session
    /// stops by itself after `duration`.
    pub fn start(&'static self, interval: Duration, duration: Duration) -> Result<(), ProfilerError> {
        let _lifecycle = self.lock();
        if interval.is_zero() {
            return Err(ProfilerError::InvalidInterval(interval));
        }
        if self.sampler.is_running() {
            return Err(ProfilerError::AlreadyRunning);
        }

        let frame_buffer = self
            .frame_buffer
            .get_or_init(|| FrameBuffer::new(self.configuration.frame_buffer_size));
        self.traces.reset(frame_buffer);
        self.methods.reset();

        if self.configuration.load_native_libraries {
            if let Err(err) = self.symbols.refresh_native_libraries() {
                log::warn!("Failed to load native library symbols: {}", err);
            }
        }

        self.sampler
            .arm(self, interval, duration, self.configuration.time_mode)?;
        log::debug!(
            "Profiling started (interval {:?}, duration {:?}, {:?} scheduler)",
            interval,
            duration,
            self.configuration.scheduler
        );
        Ok(())
    }

    /// Stops sampling and keeps the samples for dumping. Returns whether a
    /// session was running; stopping an idle profiler is a no-op.
    pub fn stop(&self) -> bool {
        let _lifecycle = self.lock();
        let was_running = self.sampler.disarm();
        self.sampler.shutdown();
        if was_running {
            log::debug!("Profiling stopped after {} samples", self.sampler.samples());
        }
        was_running
    }

    /// Whether a session is running. Turns false once the deadline has
    /// passed, even if no tick noticed yet.
    pub fn running(&self) -> bool {
        self.sampler.is_active()
    }

    pub fn samples(&self) -> u64 {
        self.sampler.samples()
    }

    pub fn stats(&self) -> SamplerStats {
        self.sampler.stats()
    }

    // async-signal-safe
    pub fn record_sample(&self, context: &ExecutionContext) {
        if !self.sampler.is_active() {
            return;
        }
        let Some(frame_buffer) = self.frame_buffer.get() else {
            return;
        };
        self.sampler.record_attempt();

        let shard = (context.thread_id % CONCURRENCY_LEVEL as u64) as usize;
        let Some(mut frames) = self.scratch[shard].try_lock() else {
            self.sampler.record_failure(FailureKind::Skipped);
            return;
        };

        let walker = StackWalker::new(&self.symbols, self.runtime.as_ref(), self.memory.as_ref());
        let depth = match walker.capture(context, &mut frames) {
            Ok(depth) => depth,
            Err(kind) => {
                self.sampler.record_failure(kind);
                return;
            }
        };

        let frames = &frames[..depth];
        match self.traces.record(frames, frame_buffer) {
            Recorded::Rejected => self.sampler.record_frame_buffer_full(),
            Recorded::Inserted | Recorded::Incremented | Recorded::TableFull => {
                self.methods.record(frames[0].symbol);
                self.sampler.record_success();
            }
        }
    }

    /// Samples every thread the runtime reports. Driven by the timer thread
    /// scheduler or by the embedder.
    pub fn tick(&self) {
        if !self.sampler.is_active() {
            return;
        }
        self.runtime
            .for_each_thread(&mut |context| self.record_sample(context));
    }

    pub fn handle_event(&self, event: RuntimeEvent<'_>) -> Result<(), CodeCacheError> {
        let code = self.symbols.runtime_code();
        match event {
            RuntimeEvent::CompiledMethodLoad {
                method,
                address,
                size,
            } => code.add(address, size, Symbol::Method(method)),
            RuntimeEvent::CompiledMethodUnload { method, address } => {
                if !code.remove(address, Symbol::Method(method)) {
                    log::trace!("No compiled code for {:?} at {:#x}", method, address);
                }
                Ok(())
            }
            RuntimeEvent::DynamicCodeGenerated {
                name,
                address,
                size,
            } => {
                let name = self.symbols.intern(name);
                code.add(address, size, Symbol::Named(name))
            }
        }
    }

    pub fn symbol_name(&self, symbol: Symbol) -> String {
        match symbol {
            Symbol::Method(method) => self
                .runtime
                .method_name(method)
                .unwrap_or_else(|| format!("[unknown method {:#x}]", method.0)),
            Symbol::Named(name) => self
                .symbols
                .name(name)
                .map(|name| name.to_string())
                .unwrap_or_else(|| "[unknown]".to_string()),
        }
    }

    pub fn summary(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let _lifecycle = self.lock();
        Reporter::new(self).summary(out)
    }

    pub fn dump_traces(&self, out: &mut impl fmt::Write, max_traces: usize) -> fmt::Result {
        let _lifecycle = self.lock();
        Reporter::new(self).dump_traces(out, max_traces)
    }

    pub fn dump_methods(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let _lifecycle = self.lock();
        Reporter::new(self).dump_methods(out)
    }

    pub fn dump_raw_traces(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let _lifecycle = self.lock();
        Reporter::new(self).dump_raw_traces(out)
    }

    pub fn dump_json(&self, max_traces: usize) -> Result<String, serde_json::Error> {
        let _lifecycle = self.lock();
        ProfileSerializer::serialize(self, max_traces)
    }
}

impl fmt::Debug for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler")
            .field("configuration", &self.configuration)
            .field("running", &self.sampler.is_running())
            .field("samples", &self.sampler.samples())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MethodId;
    use crate::tests::{leak_profiler, manual_configuration, FakeRuntime};

    #[test]
    fn test_handle_event() {
        let profiler = Profiler::new(manual_configuration(), Box::new(FakeRuntime::default()));
        let method = MethodId(0x42);

        profiler
            .handle_event(RuntimeEvent::CompiledMethodLoad {
                method,
                address: 0x1000,
                size: 0x100,
            })
            .unwrap();
        profiler
            .handle_event(RuntimeEvent::DynamicCodeGenerated {
                name: "interpreter",
                address: 0x8000,
                size: 0x400,
            })
            .unwrap();

        assert_eq!(profiler.symbols().find(0x1050), Some(Symbol::Method(method)));
        let stub = profiler.symbols().find(0x8010).unwrap();
        assert_eq!(profiler.symbol_name(stub), "interpreter");

        profiler
            .handle_event(RuntimeEvent::CompiledMethodUnload {
                method,
                address: 0x1000,
            })
            .unwrap();
        assert_eq!(profiler.symbols().find(0x1050), None);
        // Unload without a matching load
        profiler
            .handle_event(RuntimeEvent::CompiledMethodUnload {
                method,
                address: 0x1000,
            })
            .unwrap();
        assert_eq!(
            profiler.handle_event(RuntimeEvent::CompiledMethodLoad {
                method,
                address: 0x2000,
                size: 0,
            }),
            Err(CodeCacheError::EmptyRange { address: 0x2000 })
        );
    }

    #[test]
    fn test_symbol_name_placeholders() {
        let profiler = Profiler::new(manual_configuration(), Box::new(FakeRuntime::default()));
        assert_eq!(
            profiler.symbol_name(Symbol::Method(MethodId(0xbeef))),
            "[unknown method 0xbeef]"
        );
        assert_eq!(
            profiler.symbol_name(Symbol::Named(crate::frame::NameId(12))),
            "[unknown]"
        );
    }

    #[test]
    fn test_start_rejects_zero_interval() {
        let profiler = leak_profiler(manual_configuration());
        assert!(matches!(
            profiler.start(Duration::ZERO, Duration::from_secs(1)),
            Err(ProfilerError::InvalidInterval(_))
        ));
        assert!(!profiler.running());
    }

    #[test]
    fn test_record_sample_when_idle_is_ignored() {
        let profiler = leak_profiler(manual_configuration());
        profiler.record_sample(&ExecutionContext::new(1, 0, 0, 0));
        assert_eq!(profiler.stats(), SamplerStats::default());
    }
}
