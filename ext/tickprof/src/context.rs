use std::ffi::c_void;
use std::ptr;

/// Register state of an interrupted (or otherwise observed) thread.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionContext {
    pub thread_id: u64,
    pub pc: usize,
    pub fp: usize,
    pub sp: usize,
    /// End (exclusive) of the thread's stack when the caller knows it.
    /// Frame pointer reads never cross it.
    pub stack_end: Option<usize>,
    /// Platform `ucontext_t` when the context comes from a signal handler;
    /// null otherwise. Passed through to the runtime's stack walker.
    pub ucontext: *mut c_void,
}

impl ExecutionContext {
    pub fn new(thread_id: u64, pc: usize, fp: usize, sp: usize) -> Self {
        Self {
            thread_id,
            pc,
            fp,
            sp,
            stack_end: None,
            ucontext: ptr::null_mut(),
        }
    }

    pub fn with_stack_end(mut self, stack_end: usize) -> Self {
        self.stack_end = Some(stack_end);
        self
    }

    /// Reads pc, fp and sp from a signal handler's `ucontext_t`. Registers
    /// are left at zero on unsupported targets, which makes the native walk
    /// stop immediately.
    ///
    /// # Safety
    ///
    /// `ucontext` must be null or point to the `ucontext_t` passed to a
    /// `SA_SIGINFO` handler that is still running.
    // async-signal-safe
    pub unsafe fn from_ucontext(thread_id: u64, ucontext: *mut c_void) -> Self {
        let mut context = Self::new(thread_id, 0, 0, 0);
        context.ucontext = ucontext;
        if ucontext.is_null() {
            return context;
        }

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            let uc = unsafe { &*(ucontext as *const libc::ucontext_t) };
            let gregs = &uc.uc_mcontext.gregs;
            context.pc = gregs[libc::REG_RIP as usize] as usize;
            context.fp = gregs[libc::REG_RBP as usize] as usize;
            context.sp = gregs[libc::REG_RSP as usize] as usize;
        }

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        {
            let uc = unsafe { &*(ucontext as *const libc::ucontext_t) };
            let mcontext = &uc.uc_mcontext;
            context.pc = mcontext.pc as usize;
            context.fp = mcontext.regs[29] as usize;
            context.sp = mcontext.sp as usize;
        }

        context
    }
}

pub trait StackMemory: Send + Sync {
    // async-signal-safe
    fn read_word(&self, address: usize) -> Option<usize>;
}

/// Reads the stacks of the current process directly, without fault
/// protection. The stack walker keeps every read between `sp` and the
/// context's stack end, or within a fixed span above `sp` when the end is
/// unknown (see `MAX_STACK_SPAN` in the stack walker).
#[derive(Clone, Copy, Debug, Default)]
pub struct LiveStack;

impl StackMemory for LiveStack {
    fn read_word(&self, address: usize) -> Option<usize> {
        if address == 0 || address % std::mem::align_of::<usize>() != 0 {
            return None;
        }
        Some(unsafe { ptr::read_volatile(address as *const usize) })
    }
}
