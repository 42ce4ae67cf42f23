//! Thin contract over the kernel's process-tracing interface. One
//! `Debugee` is one traced thread; every operation blocks until the
//! kernel confirms the corresponding stop.

use std::fs;

use nix::errno::Errno;
use nix::libc::{c_long, c_void};
use nix::sys::{
    ptrace,
    signal::Signal,
    wait::{waitpid, WaitStatus},
};
use nix::unistd::Pid;

use crate::addr::RemoteAddr;
use crate::asm::WORD;
use crate::error::{Error, Result};
use crate::regs::Frame;

/// Kernel switch governing whether unprivileged processes may trace
/// arbitrary same-uid peers.
const YAMA_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";

pub struct Debugee {
    pub pid: Pid,
    is_attached: bool,
}

impl Debugee {
    /// Requests tracing of `pid` and waits until the target is
    /// observed stopped.
    pub fn attach(pid: Pid) -> Result<Self> {
        match ptrace::attach(pid) {
            Ok(()) => {}
            Err(Errno::EPERM) => {
                return Err(Error::PermissionDenied {
                    pid: pid.as_raw(),
                    source: Errno::EPERM,
                    advice: yama_advice().unwrap_or_default(),
                });
            }
            Err(errno) => return Err(Error::KernelRefused(errno)),
        }

        let debugee = Debugee {
            pid,
            is_attached: true,
        };
        debugee.wait_stopped()?;
        log::info!("attached pid {}", pid);
        Ok(debugee)
    }

    fn wait(&self) -> Result<WaitStatus> {
        waitpid(self.pid, None).map_err(Error::KernelRefused)
    }

    /// The stop following an attach carries whatever signal halted the
    /// target, usually SIGSTOP.
    fn wait_stopped(&self) -> Result<()> {
        match self.wait()? {
            WaitStatus::Stopped(..) => Ok(()),
            status => Err(Error::UnexpectedStop(status)),
        }
    }

    fn wait_trap(&self) -> Result<()> {
        match self.wait()? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(()),
            status => Err(Error::UnexpectedStop(status)),
        }
    }

    pub fn getregs(&self) -> Result<Frame> {
        let raw = ptrace::getregs(self.pid).map_err(Error::KernelRefused)?;
        Ok(raw.into())
    }

    pub fn setregs(&mut self, frame: &Frame) -> Result<()> {
        ptrace::setregs(self.pid, frame.as_raw()).map_err(Error::KernelRefused)
    }

    pub fn peek_word(&self, addr: RemoteAddr) -> Result<u64> {
        let word = ptrace::read(self.pid, addr.get() as ptrace::AddressType)
            .map_err(Error::KernelRefused)?;
        Ok(word as u64)
    }

    pub fn poke_word(&mut self, addr: RemoteAddr, word: u64) -> Result<()> {
        unsafe {
            ptrace::write(
                self.pid,
                addr.get() as ptrace::AddressType,
                word as c_long as *mut c_void,
            )
        }
        .map_err(Error::KernelRefused)
    }

    /// Writes `new_text` at `addr` word by word. When `old_text` is
    /// given, the prior contents are captured into it first, yielding
    /// an exact undo buffer. Lengths must be a multiple of the word
    /// size; the codec pads emitted text accordingly.
    pub fn poke_region(
        &mut self,
        addr: RemoteAddr,
        new_text: &[u8],
        mut old_text: Option<&mut [u8]>,
    ) -> Result<()> {
        assert!(
            new_text.len() % WORD == 0,
            "unpadded text write of {} bytes",
            new_text.len()
        );
        if let Some(old) = old_text.as_deref_mut() {
            assert_eq!(old.len(), new_text.len(), "undo buffer size mismatch");
        }

        for (i, chunk) in new_text.chunks(WORD).enumerate() {
            let at = addr.add((i * WORD) as u64);
            if let Some(old) = old_text.as_deref_mut() {
                let prior = self.peek_word(at)?;
                old[i * WORD..(i + 1) * WORD].copy_from_slice(&prior.to_ne_bytes());
            }
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            self.poke_word(at, u64::from_ne_bytes(word))?;
        }
        Ok(())
    }

    /// Advances one instruction and waits for the implied trap-stop.
    pub fn single_step(&mut self) -> Result<()> {
        ptrace::step(self.pid, None).map_err(Error::KernelRefused)?;
        self.wait_trap()
    }

    /// Resumes the target until the next stop, which is expected to be
    /// the trampoline breakpoint.
    pub fn cont_to_trap(&mut self) -> Result<()> {
        ptrace::cont(self.pid, None).map_err(Error::KernelRefused)?;
        self.wait_trap()
    }

    pub fn detach(&mut self) -> Result<()> {
        if !self.is_attached {
            log::warn!("debugee is detached already");
            return Ok(());
        }
        ptrace::detach(self.pid, Signal::SIGCONT).map_err(Error::KernelRefused)?;
        self.is_attached = false;
        log::info!("detached pid {}", self.pid);
        Ok(())
    }
}

// Debugee destructor
impl Drop for Debugee {
    fn drop(&mut self) {
        if self.is_attached {
            log::trace!("dropping debugee");
            if let Err(error) = self.detach() {
                log::warn!("failed detaching from pid {}: {}", self.pid, error);
            }
        }
    }
}

/// Reads the Yama trace-scope sysctl; a non-permissive value is the
/// usual cause of an EPERM on attach.
fn yama_advice() -> Option<String> {
    let value = fs::read_to_string(YAMA_SCOPE).ok()?;
    let value = value.trim().to_string();
    if value == "0" {
        return None;
    }
    Some(format!(
        "\nthe likely cause of this failure is kernel.yama.ptrace_scope = {value}\n\
         to allow tracing unrelated processes, run: sudo sysctl kernel.yama.ptrace_scope=0"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::kill;
    use nix::unistd::{fork, ForkResult};
    use std::time::Duration;

    // The child only sleeps: no allocation after the fork.
    fn spawn_parked_child() -> Pid {
        match unsafe { fork() }.expect("fork failed") {
            ForkResult::Child => loop {
                std::thread::sleep(Duration::from_millis(5));
            },
            ForkResult::Parent { child } => child,
        }
    }

    fn reap(pid: Pid) {
        let _ = kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
    }

    #[test]
    fn attach_stops_the_target_and_exposes_registers() {
        let pid = spawn_parked_child();
        let debugee = Debugee::attach(pid).expect("attach failed");
        let regs = debugee.getregs().expect("getregs failed");
        assert_ne!(regs.rip(), 0);
        drop(debugee);
        reap(pid);
    }

    #[test]
    fn poke_region_captures_an_exact_undo_buffer() {
        let pid = spawn_parked_child();
        let mut debugee = Debugee::attach(pid).expect("attach failed");
        let pivot = RemoteAddr::new(debugee.getregs().unwrap().rip());

        let patch = [0xcc; WORD];
        let mut old = [0u8; WORD];
        debugee.poke_region(pivot, &patch, Some(&mut old)).unwrap();
        assert_eq!(debugee.peek_word(pivot).unwrap(), u64::from_ne_bytes(patch));

        debugee.poke_region(pivot, &old, None).unwrap();
        assert_eq!(debugee.peek_word(pivot).unwrap(), u64::from_ne_bytes(old));

        debugee.detach().unwrap();
        reap(pid);
    }

    #[test]
    fn single_step_advances_and_traps() {
        let pid = spawn_parked_child();
        let mut debugee = Debugee::attach(pid).expect("attach failed");
        debugee.single_step().expect("single step failed");
        debugee.detach().unwrap();
        reap(pid);
    }
}
