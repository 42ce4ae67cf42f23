//! Typed view of the kernel's general-purpose register file.

use nix::libc::user_regs_struct;
use syscalls::Sysno;

/// The full register frame of a stopped thread, fetched and written
/// back whole through the tracing interface.
#[derive(Debug, Clone, Copy)]
pub struct Frame(user_regs_struct);

impl Frame {
    pub fn rip(&self) -> u64 {
        self.0.rip
    }

    pub fn set_rip(&mut self, rip: u64) {
        self.0.rip = rip;
    }

    pub fn rax(&self) -> u64 {
        self.0.rax
    }

    pub fn set_rax(&mut self, rax: u64) {
        self.0.rax = rax;
    }

    /// First integer argument of the System V calling convention.
    pub fn set_first_arg(&mut self, arg: u64) {
        self.0.rdi = arg;
    }

    /// Stages a system call: number in `%rax`, arguments in the kernel
    /// argument registers in their documented order.
    pub fn stage_syscall(&mut self, sysno: Sysno, args: [u64; 6]) {
        self.0.rax = sysno as u64;
        self.0.rdi = args[0];
        self.0.rsi = args[1];
        self.0.rdx = args[2];
        self.0.r10 = args[3];
        self.0.r8 = args[4];
        self.0.r9 = args[5];
    }

    pub fn as_raw(&self) -> user_regs_struct {
        self.0
    }
}

impl From<user_regs_struct> for Frame {
    fn from(raw: user_regs_struct) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed() -> Frame {
        Frame::from(unsafe { std::mem::zeroed::<user_regs_struct>() })
    }

    #[test]
    fn accessors_round_trip() {
        let mut frame = zeroed();
        frame.set_rip(0xdead_beef);
        frame.set_rax(42);
        assert_eq!(frame.rip(), 0xdead_beef);
        assert_eq!(frame.rax(), 42);
        assert_eq!(frame.as_raw().rip, 0xdead_beef);
    }

    #[test]
    fn syscall_staging_follows_the_kernel_argument_order() {
        let mut frame = zeroed();
        frame.stage_syscall(Sysno::mmap, [1, 2, 3, 4, 5, 6]);
        let raw = frame.as_raw();
        assert_eq!(raw.rax, Sysno::mmap as u64);
        assert_eq!(raw.rdi, 1);
        assert_eq!(raw.rsi, 2);
        assert_eq!(raw.rdx, 3);
        assert_eq!(raw.r10, 4);
        assert_eq!(raw.r8, 5);
        assert_eq!(raw.r9, 6);
    }
}
