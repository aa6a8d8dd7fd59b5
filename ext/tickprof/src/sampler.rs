use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::configuration::TimeMode;
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::runtime::FailureKind;
use crate::scheduler::Scheduler;
use crate::util::saturating_nanos;

/// Counters of one profiling session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    /// Ticks that reached the stack walker (or failed to get a buffer).
    pub attempts: u64,
    pub samples: u64,
    /// Failed captures, indexed by [`FailureKind::index`].
    pub failures: [u64; FailureKind::COUNT],
    /// Captures dropped because the frame buffer was exhausted.
    pub frame_buffer_full: u64,
}

impl SamplerStats {
    pub fn failure(&self, kind: FailureKind) -> u64 {
        self.failures[kind.index()]
    }
}

// Everything read from a tick is an atomic
pub(crate) struct Sampler {
    scheduler: Box<dyn Scheduler>,
    running: AtomicBool,
    epoch: Instant,
    // Nanoseconds since epoch
    deadline: AtomicU64,
    attempts: AtomicU64,
    samples: AtomicU64,
    failures: [AtomicU64; FailureKind::COUNT],
    frame_buffer_full: AtomicU64,
}

impl Sampler {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            running: AtomicBool::new(false),
            epoch: Instant::now(),
            deadline: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            failures: std::array::from_fn(|_| AtomicU64::new(0)),
            frame_buffer_full: AtomicU64::new(0),
        }
    }

    pub fn arm(
        &self,
        profiler: &'static Profiler,
        interval: Duration,
        duration: Duration,
        time_mode: TimeMode,
    ) -> Result<(), ProfilerError> {
        self.attempts.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        for failure in &self.failures {
            failure.store(0, Ordering::Relaxed);
        }
        self.frame_buffer_full.store(0, Ordering::Relaxed);

        let deadline = saturating_nanos(self.epoch.elapsed()).saturating_add(saturating_nanos(duration));
        self.deadline.store(deadline, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);

        if let Err(err) = self.scheduler.arm(profiler, interval, time_mode) {
            self.running.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    // Returns whether the sampler was running
    // async-signal-safe
    pub fn disarm(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if was_running {
            self.scheduler.disarm();
        }
        was_running
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // Disarms once the deadline has passed
    // async-signal-safe
    pub fn is_active(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if saturating_nanos(self.epoch.elapsed()) >= self.deadline.load(Ordering::Relaxed) {
            self.disarm();
            return false;
        }
        true
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind) {
        self.failures[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_buffer_full(&self) {
        self.frame_buffer_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            samples: self.samples(),
            failures: std::array::from_fn(|i| self.failures[i].load(Ordering::Relaxed)),
            frame_buffer_full: self.frame_buffer_full.load(Ordering::Relaxed),
        }
    }
}
