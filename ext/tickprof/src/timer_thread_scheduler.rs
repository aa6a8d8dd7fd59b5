use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::configuration::TimeMode;
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::scheduler::Scheduler;

/// A helper thread that wakes up every interval and samples every thread the
/// runtime reports, through [`Profiler::tick`].
#[derive(Debug)]
pub struct TimerThreadScheduler {
    // Bumped on every arm and disarm; a thread exits once it sees a
    // generation other than its own.
    generation: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler for TimerThreadScheduler {
    fn arm(
        &self,
        profiler: &'static Profiler,
        interval: Duration,
        time_mode: TimeMode,
    ) -> Result<(), ProfilerError> {
        if time_mode != TimeMode::WallTime {
            log::debug!("TimerThreadScheduler samples in wall time regardless of {:?}", time_mode);
        }

        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = thread.take() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            let _ = previous.join();
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let current = Arc::clone(&self.generation);
        let handle = thread::Builder::new()
            .name("tickprof-timer".to_string())
            .spawn(move || Self::thread_main_loop(profiler, interval, current, generation))
            .map_err(ProfilerError::TimerThread)?;
        *thread = Some(handle);
        log::debug!("Timer thread started with interval {:?}", interval);
        Ok(())
    }

    fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn shutdown(&self) {
        self.disarm();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("Timer thread panicked");
            }
        }
    }
}

impl TimerThreadScheduler {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            thread: Mutex::new(None),
        }
    }

    fn thread_main_loop(
        profiler: &'static Profiler,
        interval: Duration,
        current: Arc<AtomicU64>,
        generation: u64,
    ) {
        loop {
            thread::sleep(interval);
            if current.load(Ordering::Acquire) != generation {
                break;
            }
            log::trace!("Timer thread tick");
            profiler.tick();
        }
    }
}

impl Default for TimerThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}
