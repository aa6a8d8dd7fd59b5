//! Process-wide entry points for a binding layer: one profiler per process,
//! constructed once when the agent is loaded.

use std::sync::OnceLock;
use std::time::Duration;

use crate::configuration::{
    Configuration, DEFAULT_DURATION, DEFAULT_INTERVAL, DEFAULT_TRACES_TO_DUMP,
};
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::runtime::{ManagedRuntime, RuntimeEvent};

static PROFILER: OnceLock<Profiler> = OnceLock::new();

/// Constructs the process-wide profiler (idle) and, with the `debug`
/// feature, the logger.
pub fn init(
    configuration: Configuration,
    runtime: Box<dyn ManagedRuntime>,
) -> Result<&'static Profiler, ProfilerError> {
    #[cfg(feature = "debug")]
    {
        let _ = env_logger::builder()
            .format_timestamp(None)
            .format_module_path(false)
            .try_init();
    }

    let mut initialized = false;
    let profiler = PROFILER.get_or_init(|| {
        initialized = true;
        Profiler::new(configuration, runtime)
    });
    if !initialized {
        return Err(ProfilerError::AlreadyInitialized);
    }
    log::debug!("Profiler initialized: {:?}", profiler.configuration());
    Ok(profiler)
}

pub fn profiler() -> Option<&'static Profiler> {
    PROFILER.get()
}

fn initialized() -> Result<&'static Profiler, ProfilerError> {
    profiler().ok_or(ProfilerError::NotInitialized)
}

/// Starts sampling every `interval_ms` milliseconds for at most an hour.
/// A non-positive interval selects the default (10 ms).
pub fn start(interval_ms: i32) -> Result<(), ProfilerError> {
    let interval = u64::try_from(interval_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_INTERVAL);
    initialized()?.start(interval, DEFAULT_DURATION)
}

pub fn stop() -> bool {
    profiler().is_some_and(|profiler| profiler.stop())
}

pub fn running() -> bool {
    profiler().is_some_and(|profiler| profiler.running())
}

pub fn sample_count() -> u64 {
    profiler().map_or(0, |profiler| profiler.samples())
}

/// Summary followed by the `max_traces` most frequent call traces. A
/// non-positive count selects the default (500).
pub fn dump_traces(max_traces: i32) -> Result<String, ProfilerError> {
    let profiler = initialized()?;
    let max_traces = usize::try_from(max_traces)
        .ok()
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_TRACES_TO_DUMP);

    let mut out = String::new();
    // Writing to a String never fails
    let _ = profiler.summary(&mut out);
    let _ = profiler.dump_traces(&mut out, max_traces);
    Ok(out)
}

pub fn dump_methods() -> Result<String, ProfilerError> {
    let profiler = initialized()?;
    let mut out = String::new();
    let _ = profiler.summary(&mut out);
    let _ = profiler.dump_methods(&mut out);
    Ok(out)
}

/// Forwards a code lifecycle notification. Events arriving before `init`
/// are dropped.
pub fn dispatch(event: RuntimeEvent<'_>) {
    let Some(profiler) = profiler() else {
        log::trace!("Dropping {:?}: profiler not initialized", event);
        return;
    };
    if let Err(err) = profiler.handle_event(event) {
        log::warn!("Failed to handle {:?}: {}", event, err);
    }
}
