use crate::context::ExecutionContext;
use crate::frame::{Frame, MethodId};

/// Why a stack could not be captured. Discriminants are the negated status
/// codes of the runtime's stack-walk primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoManagedFrame = 0,
    NoClassLoaded = 1,
    GcActive = 2,
    UnknownNotManaged = 3,
    NotWalkableNotManaged = 4,
    UnknownManaged = 5,
    NotWalkableManaged = 6,
    UnknownState = 7,
    ThreadExit = 8,
    Deopt = 9,
    Safepoint = 10,
    Skipped = 11,
}

impl FailureKind {
    pub const COUNT: usize = 12;

    pub const ALL: [FailureKind; Self::COUNT] = [
        FailureKind::NoManagedFrame,
        FailureKind::NoClassLoaded,
        FailureKind::GcActive,
        FailureKind::UnknownNotManaged,
        FailureKind::NotWalkableNotManaged,
        FailureKind::UnknownManaged,
        FailureKind::NotWalkableManaged,
        FailureKind::UnknownState,
        FailureKind::ThreadExit,
        FailureKind::Deopt,
        FailureKind::Safepoint,
        FailureKind::Skipped,
    ];

    /// Classifies a non-positive status code. Codes outside the known range
    /// count as an unknown runtime state.
    pub fn from_status(status: i32) -> Self {
        status
            .checked_neg()
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(FailureKind::UnknownState)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureKind::NoManagedFrame => "No managed frame",
            FailureKind::NoClassLoaded => "No class loaded",
            FailureKind::GcActive => "GC active",
            FailureKind::UnknownNotManaged => "Unknown (native)",
            FailureKind::NotWalkableNotManaged => "Not walkable (native)",
            FailureKind::UnknownManaged => "Unknown (managed)",
            FailureKind::NotWalkableManaged => "Not walkable (managed)",
            FailureKind::UnknownState => "Unknown state",
            FailureKind::ThreadExit => "Thread exit",
            FailureKind::Deopt => "Deoptimization",
            FailureKind::Safepoint => "Safepoint",
            FailureKind::Skipped => "Skipped",
        }
    }
}

/// The managed runtime being profiled, treated as a black box.
pub trait ManagedRuntime: Send + Sync {
    /// Writes the managed frames of the interrupted thread into `frames`,
    /// innermost first, and returns how many were written. `Ok(0)` is
    /// reported as [`FailureKind::NoManagedFrame`].
    ///
    /// Called from the sampling tick, possibly inside a signal handler: it
    /// must not allocate, lock or block.
    fn walk(&self, context: &ExecutionContext, frames: &mut [Frame]) -> Result<usize, FailureKind>;

    /// Qualified human-readable name of a method. Only used when reporting.
    fn method_name(&self, method: MethodId) -> Option<String>;

    /// Visits every thread that can be sampled right now. Used by tick
    /// sources that don't interrupt threads themselves.
    fn for_each_thread(&self, _visit: &mut dyn FnMut(&ExecutionContext)) {}
}

/// Code lifecycle notifications delivered by the runtime, usually on a
/// single event thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeEvent<'a> {
    CompiledMethodLoad {
        method: MethodId,
        address: usize,
        size: usize,
    },
    CompiledMethodUnload {
        method: MethodId,
        address: usize,
    },
    DynamicCodeGenerated {
        name: &'a str,
        address: usize,
        size: usize,
    },
}
