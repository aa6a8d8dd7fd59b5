#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{c_int, c_void};
use std::io;
use std::mem;
use std::ptr::{self, null_mut};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};
use std::time::Duration;

use crate::configuration::TimeMode;
use crate::context::ExecutionContext;
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::scheduler::Scheduler;

// The process-wide profiler receiving signals. Set before the first timer is
// armed; never cleared, so a late signal always finds a valid target.
static SIGNAL_TARGET: AtomicPtr<Profiler> = AtomicPtr::new(null_mut());

/// Interval timer delivering `SIGPROF` (CPU time) or `SIGALRM` (wall time)
/// to the process. The kernel picks the interrupted thread.
#[derive(Debug)]
pub struct SignalScheduler {
    // ITIMER_PROF or ITIMER_REAL while armed, -1 otherwise
    timer: AtomicI32,
    installed: [AtomicBool; 2],
}

impl Scheduler for SignalScheduler {
    fn arm(
        &self,
        profiler: &'static Profiler,
        interval: Duration,
        time_mode: TimeMode,
    ) -> Result<(), ProfilerError> {
        let (signal, timer) = match time_mode {
            TimeMode::CpuTime => (libc::SIGPROF, libc::ITIMER_PROF as c_int),
            TimeMode::WallTime => (libc::SIGALRM, libc::ITIMER_REAL as c_int),
        };

        SIGNAL_TARGET.store(profiler as *const Profiler as *mut Profiler, Ordering::Release);
        self.install_signal_handler(signal)
            .map_err(ProfilerError::SignalHandler)?;

        // Switching time modes between sessions leaves the other timer off
        self.disarm();
        set_timer(timer, interval).map_err(ProfilerError::Timer)?;
        self.timer.store(timer, Ordering::Release);
        log::debug!("Timer armed with interval {:?} ({:?})", interval, time_mode);
        Ok(())
    }

    fn disarm(&self) {
        let timer = self.timer.swap(-1, Ordering::AcqRel);
        if timer >= 0 {
            let _ = set_timer(timer, Duration::ZERO);
        }
    }
}

impl SignalScheduler {
    pub fn new() -> Self {
        Self {
            timer: AtomicI32::new(-1),
            installed: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    // Install signal handler for profiling events to the current process.
    // The handler stays installed after disarm so that signals still in
    // flight are dropped rather than hitting the default action.
    fn install_signal_handler(&self, signal: c_int) -> io::Result<()> {
        let installed = &self.installed[usize::from(signal == libc::SIGALRM)];
        if installed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut sa: libc::sigaction = unsafe { mem::zeroed() };
        sa.sa_sigaction = Self::signal_handler as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        unsafe {
            libc::sigemptyset(&mut sa.sa_mask);
        }
        let err = unsafe { libc::sigaction(signal, &sa, null_mut()) };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }
        installed.store(true, Ordering::Release);
        log::debug!("Signal handler installed");
        Ok(())
    }

    // Respond to the signal and collect a sample.
    // Everything reachable from here must be async-signal-safe.
    extern "C" fn signal_handler(_sig: c_int, _info: *mut libc::siginfo_t, ucontext: *mut c_void) {
        let saved_errno = errno();

        let profiler = SIGNAL_TARGET.load(Ordering::Acquire);
        if !profiler.is_null() {
            let profiler = unsafe { &*profiler };
            let context = unsafe { ExecutionContext::from_ucontext(current_thread_id(), ucontext) };
            profiler.record_sample(&context);
        }

        set_errno(saved_errno);
    }
}

impl Default for SignalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn set_timer(timer: c_int, interval: Duration) -> io::Result<()> {
    let mut tv = libc::timeval {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_usec: interval.subsec_micros() as libc::suseconds_t,
    };
    // A zero timeval disarms; round sub-microsecond intervals up
    if !interval.is_zero() && tv.tv_sec == 0 && tv.tv_usec == 0 {
        tv.tv_usec = 1;
    }
    let value = libc::itimerval {
        it_interval: tv,
        it_value: tv,
    };
    if unsafe { libc::setitimer(timer as _, &value, ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn current_thread_id() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(not(target_os = "linux"))]
fn current_thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

fn errno() -> c_int {
    unsafe { *errno_location() }
}

fn set_errno(value: c_int) {
    unsafe { *errno_location() = value }
}
