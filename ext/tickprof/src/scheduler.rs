use std::time::Duration;

use crate::configuration::{SchedulerKind, TimeMode};
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::signal_scheduler::SignalScheduler;
use crate::timer_thread_scheduler::TimerThreadScheduler;

pub trait Scheduler: Send + Sync {
    /// Starts delivering ticks to `profiler` every `interval`.
    fn arm(
        &self,
        profiler: &'static Profiler,
        interval: Duration,
        time_mode: TimeMode,
    ) -> Result<(), ProfilerError>;

    /// Stops delivering ticks. May run inside a tick (deadline expiry), so
    /// it must neither block nor allocate.
    // async-signal-safe
    fn disarm(&self);

    /// Disarms and releases whatever `arm` acquired. Never called from a
    /// tick.
    fn shutdown(&self) {
        self.disarm();
    }
}

pub(crate) fn new_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Signal => Box::new(SignalScheduler::new()),
        SchedulerKind::TimerThread => Box::new(TimerThreadScheduler::new()),
        SchedulerKind::Manual => Box::new(ManualScheduler),
    }
}

/// Ticks come from the embedder calling [`Profiler::tick`] or
/// [`Profiler::record_sample`] itself.
#[derive(Debug, Default)]
pub struct ManualScheduler;

impl Scheduler for ManualScheduler {
    fn arm(&self, _: &'static Profiler, interval: Duration, _: TimeMode) -> Result<(), ProfilerError> {
        log::debug!("Manual scheduler armed (interval {:?} is up to the embedder)", interval);
        Ok(())
    }

    fn disarm(&self) {
        // No-op
    }
}
