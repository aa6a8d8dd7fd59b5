use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors of the lifecycle operations. The sampling path never fails; it
/// only counts.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("profiler is already running")]
    AlreadyRunning,
    #[error("profiler has already been initialized")]
    AlreadyInitialized,
    #[error("profiler has not been initialized")]
    NotInitialized,
    #[error("invalid sampling interval {0:?}")]
    InvalidInterval(Duration),
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
    #[error("failed to arm timer: {0}")]
    Timer(#[source] io::Error),
    #[error("failed to spawn timer thread: {0}")]
    TimerThread(#[source] io::Error),
    #[error("{0} scheduler is not supported on this platform")]
    Unsupported(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeCacheError {
    #[error("empty code range at {address:#x}")]
    EmptyRange { address: usize },
    #[error("code cache {name} is full ({capacity} entries)")]
    Full { name: String, capacity: usize },
}

#[derive(Debug, Error)]
pub enum SymbolsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse ELF object {path}: {source}")]
    Elf {
        path: String,
        #[source]
        source: goblin::error::Error,
    },
    #[error("native library limit ({0}) reached")]
    TooManyLibraries(usize),
}
