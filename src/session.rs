//! The stop/inject/resume protocol around a single target.
//!
//! A session moves strictly forward: attach, locate the library in
//! both address spaces, map a scratch page inside the target, run the
//! trampoline, copy the result out, then unmap, restore and detach.
//! Any failure short-circuits into the restore path; the drop guard
//! covers early exits.

use nix::libc::{MAP_ANONYMOUS, MAP_PRIVATE, PROT_EXEC, PROT_READ};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::Pid;
use syscalls::Sysno;

use crate::addr::RemoteAddr;
use crate::asm::{self, WORD};
use crate::debugee::Debugee;
use crate::error::{Error, Result};
use crate::maps;
use crate::regs::Frame;
use crate::resolve::{self, LibraryPlacement};

/// x86_64 pages are 4 KiB; one is enough for the trampoline.
const PAGE_SIZE: u64 = 4096;

/// Raw system calls report failure as a small negative errno.
fn syscall_failed(ret: u64) -> bool {
    ret >= -4095i64 as u64
}

/// A bounded scope around one stopped target. Owns everything needed
/// to put the target back exactly as found: the original register
/// file, the original instruction word at the pivot, and the scratch
/// page once it exists. Dropping a session without `finish` performs
/// best-effort restoration and detaches.
pub struct Session {
    debugee: Debugee,
    saved_regs: Frame,
    pivot: RemoteAddr,
    saved_word: [u8; WORD],
    stub_installed: bool,
    scratch: Option<RemoteAddr>,
    finished: bool,
    _shield: InterruptShield,
}

impl Session {
    /// Attaches to `pid` and snapshots the state needed for restore.
    pub fn attach(pid: Pid) -> Result<Self> {
        let shield = InterruptShield::install();
        let debugee = Debugee::attach(pid)?;
        let saved_regs = debugee.getregs()?;
        let pivot = RemoteAddr::new(saved_regs.rip());
        log::debug!("pivot at {:#x}", pivot);
        Ok(Session {
            debugee,
            saved_regs,
            pivot,
            saved_word: [0; WORD],
            stub_installed: false,
            scratch: None,
            finished: false,
            _shield: shield,
        })
    }

    /// Makes the target call its own environment lookup for `name`.
    /// `None` means the variable is unset in the target.
    pub fn getenv(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        // Both library images must be locatable before the target is
        // touched at all.
        let placement = LibraryPlacement::locate(self.debugee.pid, maps::LIBC_NEEDLE)?;
        let lookup = placement.resolve(resolve::local_lookup_symbol()?);
        log::debug!("remote {} at {:#x}", resolve::LOOKUP_SYMBOL, lookup);

        let scratch = self.map_scratch()?;
        let blob = asm::call_trampoline(scratch, lookup, name.as_bytes())?;
        self.debugee.poke_region(scratch, &blob, None)?;

        let mut regs = self.debugee.getregs()?;
        regs.set_rip(scratch.get());
        // %al holds the vector-register count for variadic callees
        regs.set_rax(0);
        regs.set_first_arg(scratch.add(asm::NAME_OFFSET as u64).get());
        self.debugee.setregs(&regs)?;

        log::trace!(
            "calling {} in pid {} with the name at {:#x}",
            resolve::LOOKUP_SYMBOL,
            self.debugee.pid,
            scratch.add(asm::NAME_OFFSET as u64)
        );
        self.debugee.cont_to_trap()?;

        let result = self.debugee.getregs()?.rax();
        if result == 0 {
            log::info!("variable is unset in the target");
            return Ok(None);
        }
        let value = self.read_cstring(RemoteAddr::new(result))?;
        Ok(Some(value))
    }

    /// Executes an anonymous single-page read+execute mapping inside
    /// the target through a syscall probe at the pivot, then follows
    /// the probe's jump into the new page.
    fn map_scratch(&mut self) -> Result<RemoteAddr> {
        let stub = asm::syscall_jump_stub();
        self.debugee
            .poke_region(self.pivot, &stub, Some(&mut self.saved_word))?;
        self.stub_installed = true;

        let mut regs = self.saved_regs;
        regs.stage_syscall(
            Sysno::mmap,
            [
                0,
                PAGE_SIZE,
                (PROT_READ | PROT_EXEC) as u64,
                (MAP_PRIVATE | MAP_ANONYMOUS) as u64,
                -1i64 as u64,
                0,
            ],
        );
        self.debugee.setregs(&regs)?;
        self.debugee.single_step()?;

        let mapped = self.debugee.getregs()?.rax();
        if syscall_failed(mapped) {
            return Err(Error::MapFailed { ret: mapped });
        }
        log::debug!("scratch page at {:#x}", mapped);

        // The probe's second instruction jumps through %rax into the
        // fresh page.
        self.debugee.single_step()?;
        let rip = self.debugee.getregs()?.rip();
        if rip != mapped {
            return Err(Error::PivotFailed {
                expected: mapped,
                actual: rip,
            });
        }

        let scratch = RemoteAddr::new(mapped);
        self.scratch = Some(scratch);
        Ok(scratch)
    }

    /// Copies the NUL-terminated string at `addr` out of the target,
    /// one word at a time, stopping at the first zero byte in any
    /// lane.
    fn read_cstring(&self, addr: RemoteAddr) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        let mut offset = 0u64;
        loop {
            let word = self.debugee.peek_word(addr.add(offset))?;
            for byte in word.to_ne_bytes() {
                if byte == 0 {
                    return Ok(value);
                }
                value.push(byte);
            }
            offset += WORD as u64;
        }
    }

    /// Unmaps the scratch page, restores the original text and
    /// registers, and detaches. Calling it again is harmless.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_error = None;

        if let Some(scratch) = self.scratch.take() {
            if let Err(error) = self.unmap_scratch(scratch) {
                log::warn!(
                    "could not unmap the scratch page at {:#x}: {}; the page leaks in the target",
                    scratch,
                    error
                );
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        if self.stub_installed {
            let saved = self.saved_word;
            match self.debugee.poke_region(self.pivot, &saved, None) {
                Ok(()) => self.stub_installed = false,
                Err(error) => {
                    log::warn!("could not restore original text at {:#x}: {}", self.pivot, error);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        let saved_regs = self.saved_regs;
        if let Err(error) = self.debugee.setregs(&saved_regs) {
            log::warn!("could not restore original registers: {}", error);
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        if let Err(error) = self.debugee.detach() {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Mirrors the allocation probe with the unmap call; the stub is
    /// still installed at the pivot at this point. Puts the
    /// instruction pointer back at the pivot as a side effect.
    fn unmap_scratch(&mut self, scratch: RemoteAddr) -> Result<()> {
        let mut regs = self.saved_regs;
        regs.stage_syscall(Sysno::munmap, [scratch.get(), PAGE_SIZE, 0, 0, 0, 0]);
        self.debugee.setregs(&regs)?;
        self.debugee.single_step()?;

        let ret = self.debugee.getregs()?.rax();
        if ret != 0 {
            log::warn!("munmap in the target returned {:#x}", ret);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        // Failure path: restore text and registers and let the debugee
        // detach. No more target code runs, so the scratch page stays
        // mapped.
        if self.stub_installed {
            let saved = self.saved_word;
            if let Err(error) = self.debugee.poke_region(self.pivot, &saved, None) {
                log::warn!("could not restore original text at {:#x}: {}", self.pivot, error);
            }
        }
        let saved_regs = self.saved_regs;
        if let Err(error) = self.debugee.setregs(&saved_regs) {
            log::warn!("could not restore original registers: {}", error);
        }
        if let Some(scratch) = self.scratch {
            log::warn!("scratch page at {:#x} leaks in the target", scratch);
        }
    }
}

/// Ignores SIGINT and SIGTERM while a session is live, so an operator
/// interrupt cannot strand the target between mutation and restore.
struct InterruptShield {
    saved_int: SigHandler,
    saved_term: SigHandler,
}

impl InterruptShield {
    fn install() -> Self {
        let saved_int =
            unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.unwrap_or(SigHandler::SigDfl);
        let saved_term =
            unsafe { signal(Signal::SIGTERM, SigHandler::SigIgn) }.unwrap_or(SigHandler::SigDfl);
        Self {
            saved_int,
            saved_term,
        }
    }
}

impl Drop for InterruptShield {
    fn drop(&mut self) {
        unsafe {
            let _ = signal(Signal::SIGINT, self.saved_int);
            let _ = signal(Signal::SIGTERM, self.saved_term);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_syscall_error_range_covers_the_classic_map_failed() {
        assert!(syscall_failed(u64::MAX)); // -1
        assert!(syscall_failed(-12i64 as u64)); // -ENOMEM
        assert!(!syscall_failed(0x7f00_dead_0000));
        assert!(!syscall_failed(0));
    }
}
