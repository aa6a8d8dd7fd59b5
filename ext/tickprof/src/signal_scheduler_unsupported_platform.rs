use std::time::Duration;

use crate::configuration::TimeMode;
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::scheduler::Scheduler;

#[derive(Debug, Default)]
pub struct SignalScheduler {}

impl Scheduler for SignalScheduler {
    fn arm(&self, _: &'static Profiler, _: Duration, _: TimeMode) -> Result<(), ProfilerError> {
        Err(ProfilerError::Unsupported("signal"))
    }

    fn disarm(&self) {}
}

impl SignalScheduler {
    pub fn new() -> Self {
        Self {}
    }
}
