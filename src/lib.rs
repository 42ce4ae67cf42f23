//! Read a named environment variable from the live address space of
//! another running process on Linux/x86_64.
//!
//! The environment block the kernel exports for a process is a
//! snapshot from exec time; the authoritative table lives in the
//! target's own C library and is mutated entirely in user space. This
//! crate therefore briefly hijacks the target: it maps a scratch page
//! inside it, trampolines a call to the target's own lookup routine,
//! copies the resulting string out word by word, and restores the
//! original instructions and registers before detaching.
//!
//! Both processes must have loaded the same C library image; reading
//! from a target whose library has been upgraded or relocated since
//! load is undefined.

pub mod addr;
pub mod asm;
pub mod debugee;
pub mod error;
pub mod maps;
pub mod regs;
pub mod resolve;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
pub use session::Session;

use nix::unistd::Pid;

/// Reads `name` from the live environment of the process `pid`.
/// `None` means the target has no such variable.
pub fn read_remote_env(pid: Pid, name: &str) -> Result<Option<Vec<u8>>> {
    let mut session = Session::attach(pid)?;
    let value = session.getenv(name)?;
    session.finish()?;
    Ok(value)
}
