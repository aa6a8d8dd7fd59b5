use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::configuration::{Configuration, SchedulerKind, TimeMode};
use crate::context::ExecutionContext;
use crate::error::ProfilerError;
use crate::frame::{Frame, MethodId, Symbol};
use crate::profiler::Profiler;
use crate::runtime::{FailureKind, ManagedRuntime, RuntimeEvent};

/// Runtime whose stacks are looked up by thread id.
#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    names: HashMap<MethodId, String>,
    traces: HashMap<u64, Result<Vec<Frame>, FailureKind>>,
    threads: Vec<u64>,
    // Returned for threads without a trace of their own
    fallback: Option<Vec<Frame>>,
}

impl FakeRuntime {
    pub(crate) fn add_method(&mut self, method: MethodId, name: &str) {
        self.names.insert(method, name.to_string());
    }

    pub(crate) fn set_trace(&mut self, thread_id: u64, trace: Result<Vec<Frame>, FailureKind>) {
        if !self.threads.contains(&thread_id) {
            self.threads.push(thread_id);
        }
        self.traces.insert(thread_id, trace);
    }

    pub(crate) fn set_fallback(&mut self, trace: Vec<Frame>) {
        self.fallback = Some(trace);
    }
}

impl ManagedRuntime for FakeRuntime {
    fn walk(&self, context: &ExecutionContext, frames: &mut [Frame]) -> Result<usize, FailureKind> {
        let trace = match self.traces.get(&context.thread_id) {
            Some(Ok(trace)) => trace,
            Some(Err(kind)) => return Err(*kind),
            None => self.fallback.as_ref().ok_or(FailureKind::UnknownState)?,
        };
        let depth = trace.len().min(frames.len());
        frames[..depth].copy_from_slice(&trace[..depth]);
        Ok(depth)
    }

    fn method_name(&self, method: MethodId) -> Option<String> {
        self.names.get(&method).cloned()
    }

    fn for_each_thread(&self, visit: &mut dyn FnMut(&ExecutionContext)) {
        for thread_id in &self.threads {
            visit(&ExecutionContext::new(*thread_id, 0, 0, 0));
        }
    }
}

pub(crate) fn manual_configuration() -> Configuration {
    Configuration {
        scheduler: SchedulerKind::Manual,
        frame_buffer_size: 4096,
        load_native_libraries: false,
        ..Configuration::default()
    }
}

pub(crate) fn leak_profiler(configuration: Configuration) -> &'static Profiler {
    leak_profiler_with(configuration, FakeRuntime::default())
}

pub(crate) fn leak_profiler_with(
    configuration: Configuration,
    runtime: FakeRuntime,
) -> &'static Profiler {
    Box::leak(Box::new(Profiler::new(configuration, Box::new(runtime))))
}

fn managed(ids: &[u64]) -> Vec<Frame> {
    ids.iter().map(|id| Frame::managed(MethodId(*id), 0)).collect()
}

fn context(thread_id: u64) -> ExecutionContext {
    ExecutionContext::new(thread_id, 0, 0, 0)
}

const INTERVAL: Duration = Duration::from_millis(10);
const HOUR: Duration = Duration::from_secs(3600);

fn summary(profiler: &Profiler) -> String {
    let mut out = String::new();
    profiler.summary(&mut out).unwrap();
    out
}

fn dump_traces(profiler: &Profiler, max_traces: usize) -> String {
    let mut out = String::new();
    profiler.dump_traces(&mut out, max_traces).unwrap();
    out
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn test_two_hot_traces() {
    let mut runtime = FakeRuntime::default();
    runtime.add_method(MethodId(1), "Main.main");
    runtime.add_method(MethodId(2), "Worker.run");
    runtime.add_method(MethodId(3), "Worker.idle");
    runtime.set_trace(1, Ok(managed(&[2, 1])));
    runtime.set_trace(2, Ok(managed(&[3, 1])));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

    profiler.start(INTERVAL, HOUR).unwrap();
    for _ in 0..500 {
        profiler.record_sample(&context(1));
    }
    for _ in 0..100 {
        profiler.record_sample(&context(2));
    }
    assert!(profiler.stop());
    assert_eq!(profiler.samples(), 600);

    assert_eq!(
        dump_traces(profiler, 10),
        "\
Samples: 500 (83.33%)
  [ 0] Worker.run
  [ 1] Main.main

Samples: 100 (16.67%)
  [ 0] Worker.idle
  [ 1] Main.main

"
    );

    let mut methods = String::new();
    profiler.dump_methods(&mut methods).unwrap();
    assert_eq!(
        methods,
        "       500 (83.33%) Worker.run\n       100 (16.67%) Worker.idle\n"
    );

    assert_eq!(
        summary(profiler),
        "--- Execution profile ---\nTotal samples:          600\n\n"
    );

    // Only the top trace
    assert!(dump_traces(profiler, 1).ends_with("  [ 1] Main.main\n\n"));
    assert_eq!(dump_traces(profiler, 1).matches("Samples:").count(), 1);
}

#[test]
fn test_frame_buffer_overflow_is_reported() {
    let mut runtime = FakeRuntime::default();
    runtime.set_trace(1, Ok(managed(&[1, 2, 3])));
    runtime.set_trace(2, Ok(managed(&[4, 5, 6])));
    runtime.set_trace(3, Ok(managed(&[7, 8, 9])));
    let configuration = Configuration {
        frame_buffer_size: 6,
        ..manual_configuration()
    };
    let profiler = leak_profiler_with(configuration, runtime);

    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.record_sample(&context(1));
    profiler.record_sample(&context(2));
    profiler.record_sample(&context(3));
    // Known traces still count
    profiler.record_sample(&context(1));
    profiler.stop();

    assert_eq!(profiler.samples(), 3);
    let stats = profiler.stats();
    assert_eq!(stats.attempts, 4);
    assert_eq!(stats.frame_buffer_full, 1);
    assert_eq!(profiler.traces().len(), 2);

    let summary = summary(profiler);
    assert!(summary.contains("Frame buffer full:      1 (25.00%)\n"));
    assert!(summary.contains("Frame buffer overflowed with size 6. Consider increasing its size.\n"));

    // A new session clears the overflow
    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.stop();
    assert!(!self::summary(profiler).contains("overflowed"));
}

#[test]
fn test_compiled_method_resolves_native_frame() {
    let method = MethodId(0x77);
    let mut runtime = FakeRuntime::default();
    runtime.add_method(method, "Hot.loop");
    runtime.add_method(MethodId(1), "Main.main");
    runtime.set_trace(1, Ok(managed(&[1])));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

    profiler
        .handle_event(RuntimeEvent::CompiledMethodLoad {
            method,
            address: 0x1000,
            size: 0x100,
        })
        .unwrap();
    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.record_sample(&ExecutionContext::new(1, 0x1050, 0, 0));
    profiler.stop();

    let traces = profiler.traces().samples();
    assert_eq!(traces.len(), 1);
    let frames = profiler.frame_buffer().unwrap().frames(traces[0].frames);
    assert_eq!(frames, [Frame::native(Symbol::Method(method)), Frame::managed(MethodId(1), 0)]);
    assert_eq!(
        dump_traces(profiler, 10),
        "Samples: 1 (100.00%)\n  [ 0] Hot.loop\n  [ 1] Main.main\n\n"
    );

    let mut raw = String::new();
    profiler.dump_raw_traces(&mut raw).unwrap();
    assert_eq!(raw, "Main.main;Hot.loop 1\n");
}

#[test]
fn test_failures_are_classified() {
    let mut runtime = FakeRuntime::default();
    runtime.set_trace(1, Ok(managed(&[1])));
    runtime.set_trace(2, Err(FailureKind::GcActive));
    runtime.set_trace(3, Ok(vec![]));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.record_sample(&context(1));
    profiler.record_sample(&context(2));
    profiler.record_sample(&context(2));
    profiler.record_sample(&context(3));
    // Unknown thread
    profiler.record_sample(&context(4));
    profiler.stop();

    let stats = profiler.stats();
    assert_eq!(stats.samples, 1);
    assert_eq!(stats.failure(FailureKind::GcActive), 2);
    assert_eq!(stats.failure(FailureKind::NoManagedFrame), 1);
    assert_eq!(stats.failure(FailureKind::UnknownState), 1);
    assert_eq!(profiler.traces().len(), 1);

    assert_eq!(
        summary(profiler),
        "\
--- Execution profile ---
Total samples:          1
No managed frame:       1 (20.00%)
GC active:              2 (40.00%)
Unknown state:          1 (20.00%)

"
    );
}

#[test]
fn test_busy_scratch_buffer_is_skipped() {
    let mut runtime = FakeRuntime::default();
    runtime.set_trace(1, Ok(managed(&[1])));
    let profiler = leak_profiler_with(manual_configuration(), runtime);
    profiler.start(INTERVAL, HOUR).unwrap();

    // A sample interrupting another sample of the same shard
    let _held = profiler.scratch_for_test(1);
    profiler.record_sample(&context(1));
    profiler.record_sample(&context(17));
    drop(_held);
    profiler.record_sample(&context(1));
    profiler.stop();

    assert_eq!(profiler.stats().failure(FailureKind::Skipped), 2);
    assert_eq!(profiler.samples(), 1);
}

#[test]
fn test_deadline_stops_sampling() {
    let mut runtime = FakeRuntime::default();
    runtime.set_trace(1, Ok(managed(&[1])));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

    profiler.start(INTERVAL, Duration::from_millis(50)).unwrap();
    assert!(profiler.running());
    profiler.record_sample(&context(1));
    assert_eq!(profiler.samples(), 1);

    thread::sleep(Duration::from_millis(80));
    assert!(!profiler.running());
    profiler.record_sample(&context(1));
    profiler.tick();
    assert_eq!(profiler.samples(), 1);
    // Already stopped by the deadline
    assert!(!profiler.stop());

    // The data stays available, and the profiler can be restarted
    assert_eq!(profiler.traces().len(), 1);
    profiler.start(INTERVAL, HOUR).unwrap();
    assert_eq!(profiler.samples(), 0);
    assert!(profiler.traces().is_empty());
    profiler.stop();
}

#[test]
fn test_start_while_running() {
    let profiler = leak_profiler(manual_configuration());
    profiler.start(INTERVAL, HOUR).unwrap();
    assert!(matches!(
        profiler.start(INTERVAL, HOUR),
        Err(ProfilerError::AlreadyRunning)
    ));
    assert!(profiler.running());
    assert!(profiler.stop());
    assert!(!profiler.stop());
    assert!(!profiler.running());
}

#[test]
fn test_table_full_still_counts_samples() {
    let mut runtime = FakeRuntime::default();
    for thread_id in 1..=100 {
        runtime.set_trace(thread_id, Ok(managed(&[thread_id])));
    }
    let configuration = Configuration {
        max_call_traces: 16,
        ..manual_configuration()
    };
    let profiler = leak_profiler_with(configuration, runtime);

    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.tick();
    profiler.stop();

    assert_eq!(profiler.samples(), 100);
    assert!(profiler.traces().len() <= 16);
    assert!(profiler.methods().len() <= 16);
    let stored: u64 = profiler.traces().samples().iter().map(|t| t.counter).sum();
    assert_eq!(stored, profiler.traces().len() as u64);
}

#[test]
fn test_dump_json() {
    let mut runtime = FakeRuntime::default();
    runtime.add_method(MethodId(1), "Main.main");
    runtime.set_trace(1, Ok(managed(&[1])));
    runtime.set_trace(2, Err(FailureKind::Safepoint));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

    profiler.start(INTERVAL, HOUR).unwrap();
    profiler.tick();
    profiler.tick();
    profiler.stop();

    let json: serde_json::Value = serde_json::from_str(&profiler.dump_json(10).unwrap()).unwrap();
    assert_eq!(json["summary"]["samples"], 2);
    assert_eq!(json["summary"]["failures"]["Safepoint"], 2);
    assert_eq!(json["configuration"]["scheduler"], "manual");
    assert_eq!(json["traces"][0]["counter"], 2);
    let frame_id = json["traces"][0]["frames"][0].to_string();
    assert_eq!(json["frames"][frame_id.as_str()]["full_label"], "Main.main");
    assert_eq!(json["methods"][0]["counter"], 2);
}

#[test]
fn test_dump_json_entry_type_follows_symbol() {
    let method = MethodId(0x77);
    let mut runtime = FakeRuntime::default();
    runtime.add_method(method, "Hot.loop");
    runtime.add_method(MethodId(1), "Main.main");
    runtime.set_trace(1, Ok(managed(&[1])));
    runtime.set_trace(2, Ok(managed(&[1])));
    let profiler = leak_profiler_with(manual_configuration(), runtime);

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
    profiler.start(INTERVAL, HOUR).unwrap();
    // Compiled code is first seen as a native frame of a trace
    profiler.record_sample(&ExecutionContext::new(1, 0x1050, 0, 0));
    profiler.record_sample(&ExecutionContext::new(1, 0x1050, 0, 0));
    profiler.record_sample(&ExecutionContext::new(2, 0x8010, 0, 0));
    profiler.stop();

    let json: serde_json::Value = serde_json::from_str(&profiler.dump_json(10).unwrap()).unwrap();
    let entry = |id: &serde_json::Value| json["frames"][id.to_string().as_str()].clone();

    let hot = &json["traces"][0]["frames"][0];
    assert_eq!(entry(hot)["full_label"], "Hot.loop");
    assert_eq!(entry(hot)["entry_type"], "Managed");
    assert_eq!(json["methods"][0]["frame"], *hot);

    let stub = &json["traces"][1]["frames"][0];
    assert_eq!(entry(stub)["full_label"], "interpreter");
    assert_eq!(entry(stub)["entry_type"], "Native");
    assert_eq!(json["frames"].as_object().unwrap().len(), 3);
}

#[test]
fn test_timer_thread_scheduler() {
    let mut runtime = FakeRuntime::default();
    runtime.set_trace(1, Ok(managed(&[1])));
    runtime.set_trace(2, Ok(managed(&[2])));
    let configuration = Configuration {
        scheduler: SchedulerKind::TimerThread,
        time_mode: TimeMode::WallTime,
        ..manual_configuration()
    };
    let profiler = leak_profiler_with(configuration, runtime);

    profiler.start(Duration::from_millis(1), HOUR).unwrap();
    assert!(wait_until(Duration::from_secs(5), || profiler.samples() >= 10));
    assert!(profiler.stop());

    let samples = profiler.samples();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(profiler.samples(), samples);
    // Both threads are sampled on every tick
    assert_eq!(profiler.traces().len(), 2);

    // Restart with a fresh thread
    profiler.start(Duration::from_millis(1), HOUR).unwrap();
    assert!(wait_until(Duration::from_secs(5), || profiler.samples() > 0));
    profiler.stop();
}

#[cfg(target_os = "linux")]
#[test]
fn test_signal_scheduler() {
    let mut runtime = FakeRuntime::default();
    runtime.set_fallback(managed(&[1]));
    let configuration = Configuration {
        scheduler: SchedulerKind::Signal,
        time_mode: TimeMode::CpuTime,
        ..manual_configuration()
    };
    let profiler = leak_profiler_with(configuration, runtime);

    profiler.start(Duration::from_millis(1), HOUR).unwrap();
    let start = Instant::now();
    let mut spin = 0u64;
    while profiler.samples() == 0 && start.elapsed() < Duration::from_secs(10) {
        spin = spin.wrapping_add(std::hint::black_box(1));
    }
    assert!(profiler.stop());
    assert!(profiler.samples() > 0);
    assert!(spin > 0);
}
