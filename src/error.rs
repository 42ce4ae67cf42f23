use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong with a session. None of these are
/// retried; the session tears down and the caller reports the message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not attach to pid {pid}: {source}{advice}")]
    PermissionDenied {
        pid: i32,
        source: Errno,
        advice: String,
    },
    #[error("could not find a `{needle}` text mapping in pid {pid}")]
    LibraryNotFound { needle: String, pid: i32 },
    #[error("cannot do relative jump of size {delta}; did you compile with -fPIC?")]
    RangeOverflow { delta: i64 },
    #[error("ptrace request failed: {0}")]
    KernelRefused(#[from] Errno),
    #[error("unexpected wait status {0:?}")]
    UnexpectedStop(WaitStatus),
    #[error("failed to mmap in the target (syscall returned {ret:#x})")]
    MapFailed { ret: u64 },
    #[error("target jumped to {actual:#x} (expected to be at {expected:#x})")]
    PivotFailed { expected: u64, actual: u64 },
    #[error("could not resolve `{symbol}` in this process: {source}")]
    SymbolResolution {
        symbol: &'static str,
        source: libloading::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
